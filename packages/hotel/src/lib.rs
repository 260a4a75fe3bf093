#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity room allocator that leases rooms to occupants for a bounded time.
//!
//! A [`Hotel`] has a fixed number of rooms, identified by indexes `0..capacity`. Occupants check
//! in and receive a room index, which they later use to check out. If an occupant overstays the
//! configured eviction timeout, the hotel evicts it: the room is vacated and the eviction
//! callback receives the occupant that was evicted.
//!
//! Expiry is driven by a [`Scheduler`] that the hotel is given when built. The crate bundles
//! [`EventBase`], a single-threaded event loop with a real or a manual clock, but any event loop
//! can be plugged in by implementing the trait. Without a scheduler, leases never expire and the
//! hotel is a plain bounded pool of rooms.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use hotel::{EventBase, Hotel};
//!
//! let event_base = EventBase::with_manual_clock();
//!
//! let hotel = Hotel::builder()
//!     .capacity(2)
//!     .scheduler(event_base.clone())
//!     .eviction_timeout(Duration::from_millis(100))
//!     .on_evict(|hotel: &Hotel<u32>, room, connection_id| {
//!         println!("connection {connection_id} timed out in room {room}");
//!         assert!(!hotel.is_occupied(room));
//!     })
//!     .build()
//!     .unwrap();
//!
//! let room = hotel.check_in(1001).unwrap();
//! hotel.check_in(1002).unwrap();
//!
//! // The response for the first connection arrives in time.
//! hotel.check_out(room).unwrap();
//!
//! // The second one never gets a response and is evicted.
//! assert_eq!(event_base.advance(Duration::from_millis(100)), 1);
//! assert!(hotel.is_empty());
//! ```
//!
//! # Rooms are leased, not owned
//!
//! The hotel stores occupants but never looks inside them. Occupants are meant to be cheap
//! references to state owned elsewhere (indexes, keys, [`Rc`][std::rc::Rc]s). Explicit checkout
//! via [`Hotel::check_out()`] does not notify anyone - the eviction callback is only called for
//! occupants that overstay.
//!
//! # Threading
//!
//! Hotels and event loops are single-threaded. Every operation, including eviction, runs on the
//! thread that drives the scheduler.

mod builder;
mod clock;
mod error;
mod event_base;
mod free_list;
mod hotel;
mod scheduler;

pub use builder::*;
pub use error::*;
pub use event_base::*;
pub use hotel::*;
pub use scheduler::*;
