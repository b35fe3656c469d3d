/// Fixed-depth history of the most recent elements (frames, actions).
///
/// Starts out filled with a blank element; every [Self::add] evicts the oldest entry.
#[derive(Clone, Debug)]
pub struct FrameRingBuffer<T> {
    /// `capacity` most recent elements
    buffer: Vec<T>,
    next_slot: usize,
    added: usize,
}

impl<T: Clone> FrameRingBuffer<T> {
    pub fn new(
        capacity: usize,
        blank: T,
    ) -> Self {
        assert!(capacity > 0, "ring buffer needs at least one slot");
        Self {
            buffer: vec![blank; capacity],
            next_slot: 0,
            added: 0,
        }
    }
}

impl<T> FrameRingBuffer<T> {
    pub fn add(
        &mut self,
        element: T,
    ) {
        self.buffer[self.next_slot] = element;
        self.next_slot = (self.next_slot + 1) % self.buffer.len();
        self.added += 1;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// All slots hold real elements (no blanks left)
    pub fn is_full(&self) -> bool {
        self.added >= self.buffer.len()
    }

    pub fn added(&self) -> usize {
        self.added
    }

    /// `0` is the newest element
    pub fn get(
        &self,
        steps_into_history: usize,
    ) -> &T {
        let len = self.buffer.len();
        assert!(steps_into_history < len, "available steps into history: 0..{}", len - 1);
        let slot = (self.next_slot + len - 1 - steps_into_history) % len;
        &self.buffer[slot]
    }

    pub fn newest(&self) -> &T {
        self.get(0)
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let len = self.buffer.len();
        (0..len).map(move |i| &self.buffer[(self.next_slot + i) % len])
    }
}
