/// The stack of vacant room indices in a hotel.
///
/// Rooms are checked in by popping the top of the stack and returned by pushing onto it, so the
/// most recently vacated room is the next one to be handed out. On a fresh stack the top holds
/// room 0, followed by room 1 and so on.
///
/// The stack has a fixed capacity equal to the number of rooms. Pushing onto a full stack means
/// some room was vacated twice, which is a consistency violation and panics instead of handing
/// out the same room to two occupants later.
#[derive(Debug)]
pub(crate) struct FreeList {
    /// Only the first `vacant` entries are meaningful. The top of the stack is at `vacant - 1`.
    rooms: Box<[usize]>,

    vacant: usize,
}

impl FreeList {
    /// Creates a stack holding every room of a hotel with `capacity` rooms.
    #[must_use]
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            rooms: (0..capacity).rev().collect(),
            vacant: capacity,
        }
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.rooms.len()
    }

    /// Number of vacant rooms on the stack.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.vacant
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.vacant == 0
    }

    /// Position of the top of the stack, or `None` if there are no vacant rooms.
    #[must_use]
    pub(crate) fn top(&self) -> Option<usize> {
        self.vacant.checked_sub(1)
    }

    /// Takes the most recently vacated room, if any.
    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<usize> {
        let top = self.top()?;

        let room = *self
            .rooms
            .get(top)
            .expect("top is always below vacant count which never exceeds capacity");

        self.vacant = top;
        Some(room)
    }

    /// # Panics
    ///
    /// Panics if every room is already on the stack.
    pub(crate) fn push(&mut self, room: usize) {
        assert!(
            self.vacant < self.capacity(),
            "free list overflow when returning room {room}: all {} rooms are already vacant",
            self.capacity()
        );

        *self
            .rooms
            .get_mut(self.vacant)
            .expect("guarded by overflow assertion above") = room;

        self.vacant = self
            .vacant
            .checked_add(1)
            .expect("guarded by overflow assertion above");
    }

    /// The vacant rooms, from the bottom of the stack to the top.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.rooms
            .get(..self.vacant)
            .expect("vacant count never exceeds capacity")
            .iter()
            .copied()
    }
}
