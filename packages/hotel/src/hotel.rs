use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, trace};

use crate::free_list::FreeList;
use crate::{
    Error, HotelBuilder, NoVacancy, Priority, Result, Scheduler, TimerCallback, TimerId,
};

/// Signature of the callback that is notified when an occupant is evicted.
///
/// Receives the hotel, the room the occupant was evicted from and the occupant itself.
pub type EvictionCallback<T> = dyn Fn(&Hotel<T>, usize, T);

/// Above this capacity, debug builds only check the room touched by each operation.
#[cfg(debug_assertions)]
const FULL_INTEGRITY_CHECK_MAX_ROOMS: usize = 64;

/// A fixed number of rooms that occupants can check into for a limited time.
///
/// Checking in assigns the occupant a room, identified by an index in `0..capacity`. The
/// occupant stays until it is explicitly checked out or, if the hotel has a [`Scheduler`], until
/// the eviction timeout elapses. On eviction, the room is vacated and the eviction callback is
/// notified with the occupant that was evicted.
///
/// The hotel does not care what an occupant is. Typically it is something cheap that refers to
/// state owned elsewhere, such as an index, a key or an [`Rc`]. The hotel only stores occupants
/// and hands them back - on explicit checkout via [`check_out_occupant()`][1] and on eviction via
/// the eviction callback.
///
/// Vacated rooms are reused most-recently-vacated first.
///
/// # Timers
///
/// When built with a scheduler, the hotel registers one timer per room up front. Checking in
/// arms the room's timer and checking out disarms it, so no timer is created or destroyed while
/// the hotel is in use. Dropping the last handle to the hotel disarms and unregisters all of its
/// timers without notifying the eviction callback about the remaining occupants.
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// use hotel::{EventBase, Hotel};
///
/// let event_base = EventBase::with_manual_clock();
/// let evicted = Rc::new(RefCell::new(Vec::new()));
///
/// let hotel = Hotel::builder()
///     .capacity(2)
///     .scheduler(event_base.clone())
///     .eviction_timeout(Duration::from_millis(100))
///     .on_evict({
///         let evicted = Rc::clone(&evicted);
///         move |_hotel, room, occupant| evicted.borrow_mut().push((room, occupant))
///     })
///     .build()
///     .unwrap();
///
/// let alice = hotel.check_in("alice").unwrap();
/// let bob = hotel.check_in("bob").unwrap();
///
/// // Alice leaves on time, Bob overstays.
/// assert_eq!(hotel.check_out_occupant(alice).unwrap(), "alice");
/// event_base.advance(Duration::from_millis(150));
///
/// assert_eq!(*evicted.borrow(), vec![(bob, "bob")]);
/// assert!(hotel.is_empty());
/// ```
///
/// # Thread safety
///
/// The hotel is meant to be used from the thread that drives its scheduler. It is neither
/// [`Send`] nor [`Sync`]. The hotel is a cheap handle - clones refer to the same rooms.
///
/// [1]: Self::check_out_occupant
pub struct Hotel<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

struct Inner<T> {
    rooms: Box<[Room<T>]>,
    free_list: FreeList,

    scheduler: Option<Rc<dyn Scheduler>>,
    eviction_timeout: Duration,
    eviction_priority: Priority,

    on_evict: Rc<EvictionCallback<T>>,
}

struct Room<T> {
    occupant: Option<T>,

    /// Registered once when the hotel is built, `None` if the hotel has no scheduler.
    timer: Option<TimerId>,
}

impl<T: 'static> Hotel<T> {
    /// Creates a builder for configuring and constructing a [`Hotel`].
    ///
    /// At the very least, you need to specify the capacity and the eviction callback.
    pub fn builder() -> HotelBuilder<T> {
        HotelBuilder::new()
    }

    pub(crate) fn new_inner(
        capacity: usize,
        scheduler: Option<Rc<dyn Scheduler>>,
        eviction_timeout: Duration,
        eviction_priority: Priority,
        on_evict: Rc<EvictionCallback<T>>,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<RefCell<Inner<T>>>| {
            let rooms = (0..capacity)
                .map(|room| Room {
                    occupant: None,
                    timer: scheduler
                        .as_ref()
                        .map(|scheduler| scheduler.register(eviction_timer(weak.clone(), room))),
                })
                .collect();

            RefCell::new(Inner {
                rooms,
                free_list: FreeList::new(capacity),
                scheduler,
                eviction_timeout,
                eviction_priority,
                on_evict,
            })
        });

        let hotel = Self { inner };

        debug!(
            capacity,
            has_scheduler = hotel.has_scheduler(),
            ?eviction_timeout,
            "hotel opened"
        );

        hotel
    }
}

/// The eviction path only holds a weak reference, so pending timers never keep a hotel alive.
fn eviction_timer<T: 'static>(inner: Weak<RefCell<Inner<T>>>, room: usize) -> TimerCallback {
    Rc::new(move || {
        if let Some(inner) = inner.upgrade() {
            Hotel { inner }.evict(room);
        }
    })
}

impl<T> Hotel<T> {
    /// Checks the occupant into a vacant room and returns the room index.
    ///
    /// If the hotel has a scheduler, the occupant is evicted once the eviction timeout elapses,
    /// unless checked out before that.
    ///
    /// # Errors
    ///
    /// Returns [`NoVacancy`] if every room is occupied. The occupant is handed back inside the
    /// error and the hotel is unchanged.
    pub fn check_in(&self, occupant: T) -> std::result::Result<usize, NoVacancy<T>> {
        let room = self.inner.borrow_mut().occupy(occupant)?;

        trace!(room, "checked in");

        Ok(room)
    }

    /// Checks out the occupant of `room`, cancelling its eviction. The occupant is dropped.
    ///
    /// Use [`check_out_occupant()`][Self::check_out_occupant] to get the occupant back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the room does not exist or is vacant. The hotel is
    /// unchanged.
    pub fn check_out(&self, room: usize) -> Result<()> {
        self.check_out_occupant(room).map(drop)
    }

    /// Checks out the occupant of `room`, cancelling its eviction, and returns the occupant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the room does not exist or is vacant. The hotel is
    /// unchanged.
    pub fn check_out_occupant(&self, room: usize) -> Result<T> {
        let occupant = self.inner.borrow_mut().vacate(room)?;

        trace!(room, "checked out");

        Ok(occupant)
    }

    /// Returns a clone of the occupant of `room` without checking it out, or `None` if the room
    /// is vacant or does not exist.
    #[must_use]
    pub fn knock(&self, room: usize) -> Option<T>
    where
        T: Clone,
    {
        self.inner
            .borrow()
            .rooms
            .get(room)
            .and_then(|room| room.occupant.clone())
    }

    /// Whether `room` exists and has an occupant.
    #[must_use]
    pub fn is_occupied(&self, room: usize) -> bool {
        self.inner
            .borrow()
            .rooms
            .get(room)
            .is_some_and(|room| room.occupant.is_some())
    }

    /// The fixed number of rooms in the hotel.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.borrow().rooms.len()
    }

    /// The number of occupied rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().occupied()
    }

    /// The number of vacant rooms.
    #[must_use]
    pub fn vacant_count(&self) -> usize {
        self.inner.borrow().free_list.len()
    }

    /// Whether every room is vacant.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every room is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.borrow().free_list.is_empty()
    }

    /// How long an occupant may stay before being evicted.
    #[must_use]
    pub fn eviction_timeout(&self) -> Duration {
        self.inner.borrow().eviction_timeout
    }

    /// The priority of the eviction timers.
    #[must_use]
    pub fn eviction_priority(&self) -> Priority {
        self.inner.borrow().eviction_priority
    }

    /// Whether occupants are evicted when their lease expires. Without a scheduler, occupants
    /// stay until checked out.
    #[must_use]
    pub fn has_scheduler(&self) -> bool {
        self.inner.borrow().scheduler.is_some()
    }

    /// Called by the room's timer when the lease expires.
    fn evict(&self, room: usize) {
        let (occupant, on_evict) = {
            let mut inner = self.inner.borrow_mut();

            let occupant = inner.vacate(room).unwrap_or_else(|error| {
                panic!("eviction timer fired for a room that cannot be vacated: {error}")
            });

            (occupant, Rc::clone(&inner.on_evict))
        };

        debug!(room, "evicted occupant after lease expired");

        // No borrow is held here, so the callback may use the hotel.
        on_evict(self, room, occupant);
    }
}

impl<T> Inner<T> {
    fn occupied(&self) -> usize {
        self.rooms
            .len()
            .checked_sub(self.free_list.len())
            .expect("free list never holds more rooms than exist")
    }

    fn occupy(&mut self, occupant: T) -> std::result::Result<usize, NoVacancy<T>> {
        let Some(room) = self.free_list.pop() else {
            return Err(NoVacancy::new(occupant, self.rooms.len()));
        };

        let slot = self
            .rooms
            .get_mut(room)
            .expect("free list only holds rooms that exist");

        assert!(
            slot.occupant.is_none(),
            "room {room} was on the free list while occupied"
        );

        slot.occupant = Some(occupant);

        if let (Some(scheduler), Some(timer)) = (&self.scheduler, slot.timer) {
            scheduler.arm(timer, self.eviction_timeout, self.eviction_priority);
        }

        #[cfg(debug_assertions)]
        self.integrity_check(room);

        Ok(room)
    }

    /// Returns an occupied room to the free list. This is the only way a room becomes vacant,
    /// whether by checkout or by eviction.
    fn vacate(&mut self, room: usize) -> Result<T> {
        let capacity = self.rooms.len();

        let slot = self.rooms.get_mut(room).ok_or(Error::InvalidHandle {
            room,
            capacity,
            problem: "room does not exist",
        })?;

        let occupant = slot.occupant.take().ok_or(Error::InvalidHandle {
            room,
            capacity,
            problem: "room is vacant",
        })?;

        // On eviction the timer has already expired, in which case this does nothing.
        if let (Some(scheduler), Some(timer)) = (&self.scheduler, slot.timer) {
            scheduler.disarm(timer);
        }

        self.free_list.push(room);

        #[cfg(debug_assertions)]
        self.integrity_check(room);

        Ok(occupant)
    }

    /// Verifies the room that was just checked in or out against the free list. Small hotels
    /// also get a full sweep of every room, larger ones are only checked at the touched room.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    fn integrity_check(&self, touched: usize) {
        let slot = self
            .rooms
            .get(touched)
            .expect("only rooms that exist are checked in or out");

        let top_room = self.free_list.iter().next_back();

        if slot.occupant.is_some() {
            assert_ne!(
                top_room,
                Some(touched),
                "occupied room {touched} is on top of the free list"
            );
        } else {
            assert_eq!(
                top_room,
                Some(touched),
                "vacated room {touched} must be on top of the free list"
            );
        }

        if self.rooms.len() > FULL_INTEGRITY_CHECK_MAX_ROOMS {
            return;
        }

        let mut on_free_list = [false; FULL_INTEGRITY_CHECK_MAX_ROOMS];

        for room in self.free_list.iter() {
            let seen = on_free_list
                .get_mut(room)
                .filter(|_| room < self.rooms.len())
                .unwrap_or_else(|| panic!("free list holds room {room} which does not exist"));

            assert!(!*seen, "room {room} is on the free list more than once");
            *seen = true;
        }

        for (index, (room, vacant)) in self.rooms.iter().zip(on_free_list).enumerate() {
            assert_eq!(
                room.occupant.is_none(),
                vacant,
                "room {index} is vacant if and only if it is on the free list"
            );
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };

        // Disarm first so nothing can fire into a half-dismantled hotel.
        for room in &self.rooms {
            if let (Some(_), Some(timer)) = (&room.occupant, room.timer) {
                scheduler.disarm(timer);
            }
        }

        for timer in self.rooms.iter().filter_map(|room| room.timer) {
            scheduler.unregister(timer);
        }

        debug!(
            capacity = self.rooms.len(),
            abandoned = self.occupied(),
            "hotel closed"
        );
    }
}

impl<T> Clone for Hotel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Hotel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();

        f.debug_struct("Hotel")
            .field(
                "occupant_type",
                &format_args!("{}", std::any::type_name::<T>()),
            )
            .field("capacity", &inner.rooms.len())
            .field("occupied", &inner.occupied())
            .field("free_list_top", &inner.free_list.top())
            .field("scheduler", &inner.scheduler)
            .field("eviction_timeout", &inner.eviction_timeout)
            .field("eviction_priority", &inner.eviction_priority)
            .finish_non_exhaustive()
    }
}
