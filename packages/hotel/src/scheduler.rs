use std::fmt::Debug;
use std::rc::Rc;
use std::time::Duration;

/// Callback bound to a timer when it is registered with a [`Scheduler`].
///
/// Invoked on the thread that drives the scheduler, once per expiry.
pub type TimerCallback = Rc<dyn Fn()>;

/// Identifies a timer registered with a [`Scheduler`].
///
/// The meaning of the inner value is up to the scheduler that minted the identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TimerId(usize);

impl TimerId {
    /// Creates a timer identifier. Only meaningful to the scheduler that uses it.
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    /// The raw value the scheduler assigned to the timer.
    #[must_use]
    pub const fn value(self) -> usize {
        self.0
    }
}

/// Ordering hint for timers that expire at the same instant.
///
/// Lower values are more urgent. The hotel passes this through to the scheduler without
/// interpreting it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Priority(u8);

impl Priority {
    /// Dispatched before any other timer that is due at the same time.
    pub const HIGHEST: Self = Self(0);

    /// The default priority.
    pub const NORMAL: Self = Self(128);

    /// Dispatched after any other timer that is due at the same time.
    pub const LOWEST: Self = Self(u8::MAX);

    /// Creates a priority from its raw value, where 0 is the most urgent.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// The raw value of the priority.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// An event loop that can fire one-shot timers.
///
/// A [`Hotel`][crate::Hotel] registers one timer per room when it is built, arms it whenever the
/// room is checked in and disarms it whenever the room is checked out. The timer registrations
/// are reused for the lifetime of the hotel and only unregistered when the hotel is dropped.
///
/// # Contract
///
/// * Callbacks are only ever invoked from the scheduler's own dispatch loop, never from within
///   any of the methods of this trait.
/// * Each arming results in at most one callback invocation.
/// * After [`disarm()`][Self::disarm] returns, the callback is not invoked for any earlier arming.
///
/// The bundled [`EventBase`][crate::EventBase] satisfies this contract.
#[cfg_attr(test, mockall::automock)]
pub trait Scheduler: Debug {
    /// Registers a disarmed timer that will invoke `callback` whenever it expires.
    fn register(&self, callback: TimerCallback) -> TimerId;

    /// Arms the timer to expire once `after` has elapsed. Arming an armed timer replaces the
    /// previous arming.
    fn arm(&self, timer: TimerId, after: Duration, priority: Priority);

    /// Disarms the timer. Does nothing if the timer is not armed.
    fn disarm(&self, timer: TimerId);

    /// Removes the timer registration. The identifier must not be used afterwards.
    fn unregister(&self, timer: TimerId);
}
