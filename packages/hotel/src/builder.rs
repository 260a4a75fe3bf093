use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::{Error, EvictionCallback, Hotel, Priority, Result, Scheduler};

/// How long a lease lasts before the occupant is evicted, unless configured otherwise.
pub const DEFAULT_EVICTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Builder for creating an instance of [`Hotel`].
///
/// The capacity and the eviction callback are required. Without a scheduler, leases never
/// expire and the hotel behaves as a bounded pool of rooms that must be checked out explicitly.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use hotel::{EventBase, Hotel, Priority};
///
/// let event_base = EventBase::new();
///
/// let hotel = Hotel::<u64>::builder()
///     .capacity(16)
///     .scheduler(event_base.clone())
///     .eviction_timeout(Duration::from_millis(250))
///     .eviction_priority(Priority::HIGHEST)
///     .on_evict(|_hotel, room, occupant| println!("evicted {occupant} from room {room}"))
///     .build()
///     .unwrap();
///
/// assert_eq!(hotel.capacity(), 16);
/// ```
#[must_use]
pub struct HotelBuilder<T> {
    capacity: usize,
    scheduler: Option<Rc<dyn Scheduler>>,
    eviction_timeout: Duration,
    eviction_priority: Priority,
    on_evict: Option<Rc<EvictionCallback<T>>>,
}

impl<T> fmt::Debug for HotelBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotelBuilder")
            .field(
                "occupant_type",
                &format_args!("{}", std::any::type_name::<T>()),
            )
            .field("capacity", &self.capacity)
            .field("scheduler", &self.scheduler)
            .field("eviction_timeout", &self.eviction_timeout)
            .field("eviction_priority", &self.eviction_priority)
            .field("has_on_evict", &self.on_evict.is_some())
            .finish()
    }
}

impl<T: 'static> HotelBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: 0,
            scheduler: None,
            eviction_timeout: DEFAULT_EVICTION_TIMEOUT,
            eviction_priority: Priority::default(),
            on_evict: None,
        }
    }

    /// Sets the number of rooms. Must be greater than zero. The capacity never changes after
    /// the hotel is built.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the scheduler that evicts occupants whose lease has expired.
    ///
    /// If no scheduler is set, leases never expire.
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Sets how long an occupant may stay before being evicted.
    ///
    /// Only meaningful if a scheduler is set. Defaults to [`DEFAULT_EVICTION_TIMEOUT`].
    pub fn eviction_timeout(mut self, timeout: Duration) -> Self {
        self.eviction_timeout = timeout;
        self
    }

    /// Sets the priority of the eviction timers. The hotel passes this to the scheduler as-is.
    pub fn eviction_priority(mut self, priority: Priority) -> Self {
        self.eviction_priority = priority;
        self
    }

    /// Sets the callback that is notified when an occupant is evicted.
    ///
    /// The callback receives the hotel, the room the occupant was evicted from and the occupant.
    /// By the time it is called, the room is already vacant, so the callback must not check out
    /// that room. It is free to check in new occupants or check out other rooms.
    pub fn on_evict<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Hotel<T>, usize, T) + 'static,
    {
        self.on_evict = Some(Rc::new(callback));
        self
    }

    /// Builds the hotel with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the capacity is zero or no eviction callback is set.
    pub fn build(self) -> Result<Hotel<T>> {
        if self.capacity == 0 {
            return Err(Error::InvalidArgument {
                problem: "capacity must be greater than zero",
            });
        }

        let Some(on_evict) = self.on_evict else {
            return Err(Error::InvalidArgument {
                problem: "an eviction callback is required",
            });
        };

        Ok(Hotel::new_inner(
            self.capacity,
            self.scheduler,
            self.eviction_timeout,
            self.eviction_priority,
            on_evict,
        ))
    }
}
