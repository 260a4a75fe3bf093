use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::clock::ClockFacade;
use crate::{Priority, Scheduler, TimerCallback, TimerId};

/// A single-threaded event loop that dispatches one-shot timers.
///
/// This is the [`Scheduler`] bundled with the crate. It keeps timers in a priority queue ordered
/// by deadline, then by [`Priority`], then by the order in which they were armed. Nothing happens
/// in the background - timers only fire when the owner of the event loop calls one of the
/// dispatch methods:
///
/// * [`dispatch_due()`][Self::dispatch_due] fires every timer that is due right now.
/// * [`run()`][Self::run] keeps dispatching until no timer is armed, waiting for each deadline.
/// * [`advance()`][Self::advance] moves a manual clock forward, firing timers along the way.
///
/// The event base is a cheap handle - clones refer to the same event loop.
///
/// # Clocks
///
/// [`EventBase::new()`] follows the real monotonic clock. [`EventBase::with_manual_clock()`]
/// creates an event loop whose time stands still until [`advance()`][Self::advance] is called,
/// which is useful for deterministic tests and simulations.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// use hotel::{EventBase, Priority, Scheduler};
///
/// let event_base = EventBase::with_manual_clock();
///
/// let fired = Rc::new(Cell::new(false));
/// let timer = event_base.register(Rc::new({
///     let fired = Rc::clone(&fired);
///     move || fired.set(true)
/// }));
///
/// event_base.arm(timer, Duration::from_millis(10), Priority::NORMAL);
///
/// event_base.advance(Duration::from_millis(5));
/// assert!(!fired.get());
///
/// event_base.advance(Duration::from_millis(5));
/// assert!(fired.get());
/// ```
///
/// # Thread safety
///
/// The event base is single-threaded. It is neither [`Send`] nor [`Sync`].
#[derive(Clone)]
pub struct EventBase {
    state: Rc<RefCell<State>>,
}

struct State {
    clock: ClockFacade,

    /// Indexed by `TimerId` value. `None` for identifiers that are free for reuse.
    timers: Vec<Option<Timer>>,
    unused_ids: Vec<usize>,

    /// May contain stale entries for timers that were since disarmed, re-armed or unregistered,
    /// but never at the top. Stale entries are compacted away before they outnumber the armed
    /// timers by more than `COMPACTION_SLACK`.
    queue: BinaryHeap<Reverse<Expiry>>,

    next_sequence: u64,
    armed: usize,
}

struct Timer {
    callback: TimerCallback,

    /// Sequence number of the current arming, if armed.
    armed_sequence: Option<u64>,
}

#[derive(Debug, Eq, Ord, PartialEq, PartialOrd)]
struct Expiry {
    deadline: Instant,
    priority: Priority,
    sequence: u64,
    timer: usize,
}

/// How many stale entries the queue may hold beyond twice the armed timers before it is compacted.
const COMPACTION_SLACK: usize = 16;

impl EventBase {
    /// Creates an event loop that follows the real monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(ClockFacade::real())
    }

    /// Creates an event loop whose clock only moves when [`advance()`][Self::advance] is called.
    #[must_use]
    pub fn with_manual_clock() -> Self {
        Self::with_clock(ClockFacade::manual())
    }

    fn with_clock(clock: ClockFacade) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                clock,
                timers: Vec::new(),
                unused_ids: Vec::new(),
                queue: BinaryHeap::new(),
                next_sequence: 0,
                armed: 0,
            })),
        }
    }

    /// The current time according to the event loop's clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.state.borrow().clock.now()
    }

    /// Whether the event loop uses a manual clock.
    #[must_use]
    pub fn has_manual_clock(&self) -> bool {
        self.state.borrow().clock.is_manual()
    }

    /// Number of timers that are currently armed.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.state.borrow().armed
    }

    /// Number of timers that are currently registered, armed or not.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        let state = self.state.borrow();

        state
            .timers
            .len()
            .checked_sub(state.unused_ids.len())
            .expect("every unused identifier was once a registered timer")
    }

    /// The deadline of the next timer to fire, if any timer is armed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state
            .borrow()
            .peek_armed()
            .map(|expiry| expiry.deadline)
    }

    /// Fires every timer whose deadline has been reached, in dispatch order.
    ///
    /// Callbacks may arm, disarm, register and unregister timers. Timers that a callback arms
    /// to expire immediately are also fired before this returns.
    ///
    /// Returns the number of timers fired.
    pub fn dispatch_due(&self) -> usize {
        let mut fired: usize = 0;

        loop {
            // The borrow must end before the callback runs, as the callback may call back into
            // the event loop.
            let callback = {
                let mut state = self.state.borrow_mut();
                let now = state.clock.now();
                state.pop_due(now)
            };

            let Some(callback) = callback else {
                break;
            };

            callback();

            fired = fired
                .checked_add(1)
                .expect("cannot fire more timers than fit in memory");
        }

        fired
    }

    /// Moves the manual clock forward by `duration`, firing every timer that expires within
    /// that window. Each timer fires with the clock set to its own deadline, so timers armed by
    /// callbacks are measured from the moment the callback ran.
    ///
    /// Returns the number of timers fired.
    ///
    /// # Panics
    ///
    /// Panics if the event loop follows the real clock.
    pub fn advance(&self, duration: Duration) -> usize {
        let target = {
            let state = self.state.borrow();

            assert!(
                state.clock.is_manual(),
                "advance() is only supported by an event loop with a manual clock"
            );

            state
                .clock
                .now()
                .checked_add(duration)
                .expect("cannot advance the clock past the end of time")
        };

        let mut fired: usize = 0;

        while let Some(deadline) = self.next_deadline().filter(|deadline| *deadline <= target) {
            self.state.borrow_mut().clock.advance_to(deadline);

            fired = fired
                .checked_add(self.dispatch_due())
                .expect("cannot fire more timers than fit in memory");
        }

        self.state.borrow_mut().clock.advance_to(target);

        fired
            .checked_add(self.dispatch_due())
            .expect("cannot fire more timers than fit in memory")
    }

    /// Dispatches timers until none are armed.
    ///
    /// With the real clock, the current thread sleeps until each deadline. With a manual clock,
    /// the clock jumps straight to each deadline.
    ///
    /// Returns the number of timers fired.
    pub fn run(&self) -> usize {
        let mut fired: usize = 0;

        while let Some(deadline) = self.next_deadline() {
            let wait = {
                let mut state = self.state.borrow_mut();

                if state.clock.is_manual() {
                    state.clock.advance_to(deadline);
                    Duration::ZERO
                } else {
                    deadline.saturating_duration_since(state.clock.now())
                }
            };

            if !wait.is_zero() {
                thread::sleep(wait);
            }

            fired = fired
                .checked_add(self.dispatch_due())
                .expect("cannot fire more timers than fit in memory");
        }

        fired
    }
}

impl Default for EventBase {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBase")
            .field("manual_clock", &self.has_manual_clock())
            .field("registered", &self.registered_count())
            .field("armed", &self.armed_count())
            .finish_non_exhaustive()
    }
}

impl Scheduler for EventBase {
    fn register(&self, callback: TimerCallback) -> TimerId {
        let mut state = self.state.borrow_mut();

        let timer = Timer {
            callback,
            armed_sequence: None,
        };

        let id = if let Some(id) = state.unused_ids.pop() {
            *state
                .timers
                .get_mut(id)
                .expect("unused identifiers always refer to existing slots") = Some(timer);
            id
        } else {
            state.timers.push(Some(timer));
            state
                .timers
                .len()
                .checked_sub(1)
                .expect("we just pushed a timer so there is at least one")
        };

        trace!(timer = id, "registered timer");

        TimerId::new(id)
    }

    fn arm(&self, timer: TimerId, after: Duration, priority: Priority) {
        let mut state = self.state.borrow_mut();

        let Some(deadline) = state.clock.now().checked_add(after) else {
            warn!(
                timer = timer.value(),
                ?after,
                "timer deadline is beyond the range of the clock, leaving it disarmed"
            );

            state.disarm(timer);
            return;
        };

        let sequence = state.next_sequence;
        state.next_sequence = sequence
            .checked_add(1)
            .expect("cannot arm more than u64::MAX timers");

        let was_armed = state
            .timer_mut(timer)
            .armed_sequence
            .replace(sequence)
            .is_some();

        if !was_armed {
            state.armed = state
                .armed
                .checked_add(1)
                .expect("cannot arm more timers than fit in memory");
        }

        state.compact_if_sparse();

        state.queue.push(Reverse(Expiry {
            deadline,
            priority,
            sequence,
            timer: timer.value(),
        }));

        // The previous arming of this timer may have been at the top.
        state.prune_top();

        trace!(timer = timer.value(), ?after, ?priority, "armed timer");
    }

    fn disarm(&self, timer: TimerId) {
        self.state.borrow_mut().disarm(timer);
    }

    fn unregister(&self, timer: TimerId) {
        let mut state = self.state.borrow_mut();

        state.disarm(timer);

        *state
            .timers
            .get_mut(timer.value())
            .expect("timer must be registered before it can be unregistered") = None;
        state.unused_ids.push(timer.value());

        trace!(timer = timer.value(), "unregistered timer");
    }
}

impl State {
    /// # Panics
    ///
    /// Panics if the timer is not registered.
    fn timer_mut(&mut self, timer: TimerId) -> &mut Timer {
        self.timers
            .get_mut(timer.value())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("timer {} is not registered", timer.value()))
    }

    fn disarm(&mut self, timer: TimerId) {
        if self.timer_mut(timer).armed_sequence.take().is_some() {
            self.armed = self
                .armed
                .checked_sub(1)
                .expect("an armed timer is included in the armed count");

            self.prune_top();
        }
    }

    /// Drops stale entries from the top of the queue until the top is a current arming.
    fn prune_top(&mut self) {
        while let Some(Reverse(expiry)) = self.queue.peek() {
            if is_current(&self.timers, expiry) {
                break;
            }

            self.queue.pop();
        }
    }

    /// Drops every stale entry once they make up most of the queue. The queue keeps its
    /// allocation, so steady arming and disarming does not allocate.
    fn compact_if_sparse(&mut self) {
        let limit = self.armed.saturating_mul(2).saturating_add(COMPACTION_SLACK);

        if self.queue.len() <= limit {
            return;
        }

        let before = self.queue.len();

        let timers = &self.timers;
        self.queue.retain(|Reverse(expiry)| is_current(timers, expiry));

        trace!(before, after = self.queue.len(), "compacted timer queue");
    }

    /// The next expiry to fire, if any timer is armed.
    fn peek_armed(&self) -> Option<&Expiry> {
        let expiry = self.queue.peek().map(|Reverse(expiry)| expiry);

        debug_assert!(
            expiry.is_none_or(|expiry| is_current(&self.timers, expiry)),
            "the top of the timer queue is never stale"
        );

        expiry
    }

    /// Disarms the next timer due at `now` and returns its callback.
    fn pop_due(&mut self, now: Instant) -> Option<TimerCallback> {
        if self.peek_armed()?.deadline > now {
            return None;
        }

        let Reverse(expiry) = self.queue.pop().expect("we just peeked at it");

        // Disarming also prunes whatever stale entries are now at the top.
        let timer = TimerId::new(expiry.timer);
        self.disarm(timer);

        trace!(timer = expiry.timer, "timer expired");

        Some(Rc::clone(&self.timer_mut(timer).callback))
    }
}

fn is_current(timers: &[Option<Timer>], expiry: &Expiry) -> bool {
    timers
        .get(expiry.timer)
        .and_then(Option::as_ref)
        .is_some_and(|timer| timer.armed_sequence == Some(expiry.sequence))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::{Cell, RefCell};

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::Hotel;

    assert_not_impl_any!(EventBase: Send, Sync);

    /// Every arming adds at most one entry and disarming removes at most one armed timer, so
    /// the queue never holds more than this many entries.
    fn queue_limit(event_base: &EventBase) -> usize {
        2 * event_base.armed_count() + COMPACTION_SLACK + 3
    }

    fn queue_len(event_base: &EventBase) -> usize {
        event_base.state.borrow().queue.len()
    }

    fn queue_allocation(event_base: &EventBase) -> usize {
        event_base.state.borrow().queue.capacity()
    }

    type Journal = Rc<RefCell<Vec<&'static str>>>;

    fn register_recording(event_base: &EventBase, journal: &Journal, name: &'static str) -> TimerId {
        let journal = Rc::clone(journal);
        event_base.register(Rc::new(move || journal.borrow_mut().push(name)))
    }

    #[test]
    fn fires_in_deadline_order() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let late = register_recording(&event_base, &journal, "late");
        let early = register_recording(&event_base, &journal, "early");

        event_base.arm(late, Duration::from_millis(20), Priority::NORMAL);
        event_base.arm(early, Duration::from_millis(10), Priority::NORMAL);

        assert_eq!(event_base.armed_count(), 2);
        assert_eq!(event_base.advance(Duration::from_millis(30)), 2);
        assert_eq!(*journal.borrow(), vec!["early", "late"]);
        assert_eq!(event_base.armed_count(), 0);
    }

    #[test]
    fn priority_breaks_deadline_ties() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let relaxed = register_recording(&event_base, &journal, "relaxed");
        let urgent = register_recording(&event_base, &journal, "urgent");

        event_base.arm(relaxed, Duration::from_millis(10), Priority::LOWEST);
        event_base.arm(urgent, Duration::from_millis(10), Priority::HIGHEST);

        event_base.advance(Duration::from_millis(10));
        assert_eq!(*journal.borrow(), vec!["urgent", "relaxed"]);
    }

    #[test]
    fn arming_order_breaks_remaining_ties() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let second = register_recording(&event_base, &journal, "second");
        let first = register_recording(&event_base, &journal, "first");

        event_base.arm(first, Duration::from_millis(10), Priority::NORMAL);
        event_base.arm(second, Duration::from_millis(10), Priority::NORMAL);

        event_base.advance(Duration::from_millis(10));
        assert_eq!(*journal.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn disarmed_timer_does_not_fire() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let timer = register_recording(&event_base, &journal, "timer");

        event_base.arm(timer, Duration::from_millis(10), Priority::NORMAL);
        event_base.disarm(timer);
        event_base.disarm(timer);

        assert_eq!(event_base.armed_count(), 0);
        assert_eq!(event_base.next_deadline(), None);
        assert_eq!(event_base.advance(Duration::from_secs(1)), 0);
        assert!(journal.borrow().is_empty());
    }

    #[test]
    fn rearming_replaces_previous_deadline() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let timer = register_recording(&event_base, &journal, "timer");

        event_base.arm(timer, Duration::from_millis(10), Priority::NORMAL);
        event_base.arm(timer, Duration::from_millis(50), Priority::NORMAL);
        assert_eq!(event_base.armed_count(), 1);

        assert_eq!(event_base.advance(Duration::from_millis(20)), 0);
        assert_eq!(event_base.advance(Duration::from_millis(30)), 1);
        assert_eq!(*journal.borrow(), vec!["timer"]);
    }

    #[test]
    fn timer_fires_once_per_arming() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let timer = register_recording(&event_base, &journal, "timer");

        event_base.arm(timer, Duration::from_millis(10), Priority::NORMAL);
        event_base.advance(Duration::from_millis(100));
        event_base.advance(Duration::from_millis(100));
        assert_eq!(journal.borrow().len(), 1);

        event_base.arm(timer, Duration::from_millis(10), Priority::NORMAL);
        event_base.advance(Duration::from_millis(100));
        assert_eq!(journal.borrow().len(), 2);
    }

    #[test]
    fn callback_can_arm_another_timer() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let follower = register_recording(&event_base, &journal, "follower");

        let leader = event_base.register(Rc::new({
            let event_base = event_base.clone();
            let journal = Rc::clone(&journal);
            move || {
                journal.borrow_mut().push("leader");
                event_base.arm(follower, Duration::from_millis(10), Priority::NORMAL);
            }
        }));

        event_base.arm(leader, Duration::from_millis(10), Priority::NORMAL);

        // The follower is armed at t=10 so expires at t=20, within the advanced window.
        assert_eq!(event_base.advance(Duration::from_millis(25)), 2);
        assert_eq!(*journal.borrow(), vec!["leader", "follower"]);
    }

    #[test]
    fn callback_observes_own_deadline() {
        let event_base = EventBase::with_manual_clock();
        let start = event_base.now();
        let observed = Rc::new(Cell::new(None));

        let timer = event_base.register(Rc::new({
            let event_base = event_base.clone();
            let observed = Rc::clone(&observed);
            move || observed.set(Some(event_base.now()))
        }));

        event_base.arm(timer, Duration::from_millis(40), Priority::NORMAL);
        event_base.advance(Duration::from_millis(100));

        assert_eq!(observed.get(), Some(start + Duration::from_millis(40)));
        assert_eq!(event_base.now(), start + Duration::from_millis(100));
    }

    #[test]
    fn run_drains_manual_clock() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();
        let start = event_base.now();

        let a = register_recording(&event_base, &journal, "a");
        let b = register_recording(&event_base, &journal, "b");

        event_base.arm(a, Duration::from_secs(60), Priority::NORMAL);
        event_base.arm(b, Duration::from_secs(30), Priority::NORMAL);

        assert_eq!(event_base.run(), 2);
        assert_eq!(*journal.borrow(), vec!["b", "a"]);
        assert_eq!(event_base.now(), start + Duration::from_secs(60));
    }

    #[test]
    fn run_waits_for_real_clock() {
        let event_base = EventBase::new();
        let journal = Journal::default();

        let timer = register_recording(&event_base, &journal, "timer");

        let start = Instant::now();
        event_base.arm(timer, Duration::from_millis(20), Priority::NORMAL);

        assert_eq!(event_base.run(), 1);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(*journal.borrow(), vec!["timer"]);
    }

    #[test]
    fn dispatch_due_ignores_future_timers() {
        let event_base = EventBase::new();
        let journal = Journal::default();

        let timer = register_recording(&event_base, &journal, "timer");
        event_base.arm(timer, Duration::from_secs(3600), Priority::NORMAL);

        assert_eq!(event_base.dispatch_due(), 0);
        assert_eq!(event_base.armed_count(), 1);
        assert!(event_base.next_deadline().is_some());
    }

    #[test]
    fn unregistered_ids_are_reused() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let first = register_recording(&event_base, &journal, "first");
        let second = register_recording(&event_base, &journal, "second");
        assert_eq!(event_base.registered_count(), 2);

        event_base.arm(first, Duration::from_millis(10), Priority::NORMAL);
        event_base.unregister(first);
        assert_eq!(event_base.registered_count(), 1);
        assert_eq!(event_base.armed_count(), 0);

        let third = register_recording(&event_base, &journal, "third");
        assert_eq!(third, first);
        assert_ne!(third, second);

        // The stale expiry of the unregistered timer must not fire the new callback.
        event_base.advance(Duration::from_millis(20));
        assert!(journal.borrow().is_empty());
    }

    #[test]
    fn overflowing_deadline_leaves_timer_disarmed() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let timer = register_recording(&event_base, &journal, "timer");

        event_base.arm(timer, Duration::from_millis(10), Priority::NORMAL);
        event_base.arm(timer, Duration::MAX, Priority::NORMAL);

        assert_eq!(event_base.armed_count(), 0);
        assert_eq!(event_base.run(), 0);
    }

    #[test]
    #[should_panic]
    fn advance_requires_manual_clock() {
        EventBase::new().advance(Duration::from_millis(1));
    }

    #[test]
    #[should_panic]
    fn arming_unknown_timer_panics() {
        EventBase::with_manual_clock().arm(TimerId::new(3), Duration::ZERO, Priority::NORMAL);
    }

    #[test]
    fn rearming_behind_long_lived_timer_keeps_queue_bounded() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();

        let long_lived = register_recording(&event_base, &journal, "long_lived");
        let churned = register_recording(&event_base, &journal, "churned");

        // The churned timer always expires after the long-lived one, so its stale entries are
        // never at the top of the queue.
        event_base.arm(long_lived, Duration::from_secs(60), Priority::NORMAL);

        let mut warmed_up_allocation = None;

        for iteration in 0..100_000 {
            event_base.arm(churned, Duration::from_secs(120), Priority::NORMAL);
            event_base.disarm(churned);

            if iteration % 1000 == 0 {
                assert_eq!(event_base.dispatch_due(), 0);
            }

            if iteration == 1000 {
                warmed_up_allocation = Some(queue_allocation(&event_base));
            }

            assert!(queue_len(&event_base) <= queue_limit(&event_base));
        }

        assert_eq!(warmed_up_allocation, Some(queue_allocation(&event_base)));
        assert_eq!(event_base.armed_count(), 1);

        assert_eq!(event_base.run(), 1);
        assert_eq!(*journal.borrow(), vec!["long_lived"]);
        assert_eq!(queue_len(&event_base), 0);
    }

    #[test]
    fn hotel_lease_churn_keeps_queue_bounded() {
        let event_base = EventBase::with_manual_clock();
        let evictions = Rc::new(Cell::new(0_usize));

        let hotel = Hotel::<u32>::builder()
            .capacity(2)
            .scheduler(event_base.clone())
            .eviction_timeout(Duration::from_secs(60))
            .on_evict({
                let evictions = Rc::clone(&evictions);
                move |_, _, _| evictions.set(evictions.get() + 1)
            })
            .build()
            .unwrap();

        let resident = hotel.check_in(0).unwrap();

        for guest in 1..=100_000 {
            let room = hotel.check_in(guest).unwrap();
            hotel.check_out(room).unwrap();

            if guest % 1000 == 0 {
                assert_eq!(event_base.dispatch_due(), 0);
            }

            assert!(queue_len(&event_base) <= queue_limit(&event_base));
        }

        assert_eq!(event_base.armed_count(), 1);
        assert_eq!(evictions.get(), 0);

        event_base.advance(Duration::from_secs(60));

        assert_eq!(evictions.get(), 1);
        assert!(!hotel.is_occupied(resident));
        assert_eq!(queue_len(&event_base), 0);
    }

    #[test]
    fn next_deadline_skips_disarmed_top() {
        let event_base = EventBase::with_manual_clock();
        let journal = Journal::default();
        let start = event_base.now();

        let early = register_recording(&event_base, &journal, "early");
        let late = register_recording(&event_base, &journal, "late");

        event_base.arm(early, Duration::from_millis(10), Priority::NORMAL);
        event_base.arm(late, Duration::from_millis(30), Priority::NORMAL);
        event_base.disarm(early);

        assert_eq!(
            event_base.next_deadline(),
            Some(start + Duration::from_millis(30))
        );
        assert_eq!(queue_len(&event_base), 1);
    }
}
