use std::time::{Duration, Instant};

/// The time source behind an [`EventBase`][crate::EventBase].
///
/// The real clock follows the operating system's monotonic clock. The manual clock only moves
/// when told to, which makes timer expiry deterministic in tests and simulations.
#[derive(Debug)]
pub(crate) enum ClockFacade {
    Real,

    Manual { origin: Instant, elapsed: Duration },
}

impl ClockFacade {
    pub(crate) const fn real() -> Self {
        Self::Real
    }

    pub(crate) fn manual() -> Self {
        Self::Manual {
            origin: Instant::now(),
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) const fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }

    #[must_use]
    pub(crate) fn now(&self) -> Instant {
        match self {
            Self::Real => Instant::now(),
            Self::Manual { origin, elapsed } => origin
                .checked_add(*elapsed)
                .expect("manual clock only advances to instants that exist"),
        }
    }

    /// Moves a manual clock forward to `instant`. Never moves the clock backwards.
    ///
    /// # Panics
    ///
    /// Panics if this is the real clock.
    pub(crate) fn advance_to(&mut self, instant: Instant) {
        match self {
            Self::Real => panic!("cannot move the real clock, only a manual clock can be advanced"),
            Self::Manual { origin, elapsed } => {
                *elapsed = (*elapsed).max(instant.saturating_duration_since(*origin));
            }
        }
    }
}
