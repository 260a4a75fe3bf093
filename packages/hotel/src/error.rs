use std::fmt::{self, Debug};

use thiserror::Error;

/// Errors that can occur when building or operating a [`Hotel`][crate::Hotel].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The hotel configuration was rejected. No hotel was created.
    #[error("invalid hotel configuration: {problem}")]
    InvalidArgument {
        /// A human-readable description of the problem.
        problem: &'static str,
    },

    /// Every room is occupied, so nobody else can check in until a room is vacated.
    #[error("no vacancy: all {capacity} rooms are occupied")]
    CapacityExhausted {
        /// The fixed number of rooms in the hotel.
        capacity: usize,
    },

    /// The caller referred to a room that does not exist or that has no occupant.
    #[error("invalid room {room} in hotel of {capacity} rooms: {problem}")]
    InvalidHandle {
        /// The room index the caller provided.
        room: usize,

        /// The fixed number of rooms in the hotel.
        capacity: usize,

        /// A human-readable description of the problem.
        problem: &'static str,
    },
}

/// A specialized `Result` type for hotel operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

/// Returned by [`Hotel::check_in()`][crate::Hotel::check_in] when every room is occupied.
///
/// The would-be occupant is handed back to the caller, who may retry later. Converts into
/// [`Error::CapacityExhausted`] when the occupant is no longer of interest.
#[derive(Error)]
#[error("no vacancy: all {capacity} rooms are occupied")]
pub struct NoVacancy<T> {
    occupant: T,
    capacity: usize,
}

impl<T> NoVacancy<T> {
    pub(crate) const fn new(occupant: T, capacity: usize) -> Self {
        Self { occupant, capacity }
    }

    /// The fixed number of rooms in the hotel that turned the occupant away.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the occupant that could not be checked in.
    #[must_use]
    pub fn into_occupant(self) -> T {
        self.occupant
    }
}

impl<T> Debug for NoVacancy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoVacancy")
            .field(
                "occupant_type",
                &format_args!("{}", std::any::type_name::<T>()),
            )
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> From<NoVacancy<T>> for Error {
    fn from(value: NoVacancy<T>) -> Self {
        Self::CapacityExhausted {
            capacity: value.capacity,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::rc::Rc;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);
    assert_impl_all!(NoVacancy<u64>: Send, Sync, Debug);

    #[test]
    fn no_vacancy_returns_occupant() {
        let occupant = Rc::new("guest");
        let error = NoVacancy::new(Rc::clone(&occupant), 4);

        assert_eq!(error.capacity(), 4);
        assert!(Rc::ptr_eq(&error.into_occupant(), &occupant));
    }

    #[test]
    fn no_vacancy_converts_to_capacity_exhausted() {
        let error: Error = NoVacancy::new(42_u32, 8).into();

        assert!(matches!(error, Error::CapacityExhausted { capacity: 8 }));
        assert_eq!(error.to_string(), "no vacancy: all 8 rooms are occupied");
    }

    #[test]
    fn invalid_handle_mentions_room() {
        let error = Error::InvalidHandle {
            room: 7,
            capacity: 2,
            problem: "room does not exist",
        };

        assert_eq!(
            error.to_string(),
            "invalid room 7 in hotel of 2 rooms: room does not exist"
        );
    }
}
