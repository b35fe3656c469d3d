use rand::rngs::StdRng;
use rand::Rng;

/// Bounded buffer for approximate shuffling.
///
/// Elements are drawn uniformly at random, but only once at least `min_after_dequeue` elements
/// would remain buffered after the draw. The window is bounded, so the shuffle is not global.
pub struct ShuffleBuffer<T> {
    capacity: usize,
    min_after_dequeue: usize,
    buffer: Vec<T>,
    rng: StdRng,
}

impl<T> ShuffleBuffer<T> {
    pub fn new(
        capacity: usize,
        min_after_dequeue: usize,
        rng: StdRng,
    ) -> Self {
        assert!(capacity > 0);
        assert!(min_after_dequeue < capacity);
        Self {
            capacity,
            min_after_dequeue,
            buffer: Vec::with_capacity(capacity),
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hands the element back when the buffer is full
    pub fn push(
        &mut self,
        element: T,
    ) -> Result<(), T> {
        if self.is_full() {
            return Err(element);
        }
        self.buffer.push(element);
        Ok(())
    }

    pub fn can_draw(
        &self,
        n: usize,
    ) -> bool {
        self.buffer.len() >= self.min_after_dequeue + n
    }

    /// Removes `n` distinct, uniformly chosen elements.
    ///
    /// Ignores `min_after_dequeue`; callers check [Self::can_draw] unless they are draining.
    pub fn draw(
        &mut self,
        n: usize,
    ) -> Vec<T> {
        assert!(n <= self.buffer.len(), "cannot draw {n} of {} elements", self.buffer.len());
        (0..n)
            .map(|_| {
                let slot = self.rng.gen_range(0..self.buffer.len());
                self.buffer.swap_remove(slot)
            })
            .collect()
    }
}
