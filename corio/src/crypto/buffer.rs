/// A growable byte buffer with a read cursor.
///
/// Producers [`reserve`](Self::reserve) space, write into it, then
/// [`commit`](Self::commit) what they wrote. Consumers look at
/// [`obtain`](Self::obtain) and [`evict`](Self::evict) what they used.
/// Unread bytes are compacted to the front before the buffer grows.
#[derive(Debug, Default)]
pub struct SmartBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl SmartBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            start: 0,
            end: 0,
        }
    }

    /// The unread bytes.
    pub fn obtain(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Drops `n` unread bytes from the front.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` bytes are unread.
    pub fn evict(&mut self, n: usize) {
        assert!(n <= self.len(), "evicting more than is buffered");

        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Returns at least `n` bytes of writable space after the unread data.
    pub fn reserve(&mut self, n: usize) -> &mut [u8] {
        if self.data.len() - self.end < n {
            if self.start > 0 {
                self.data.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }

            if self.data.len() - self.end < n {
                let wanted = (self.end + n).max(self.data.len() * 2);
                self.data.resize(wanted, 0);
            }
        }

        &mut self.data[self.end..]
    }

    /// Marks `n` bytes of the reserved space as written.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the reserved space.
    pub fn commit(&mut self, n: usize) {
        assert!(self.end + n <= self.data.len(), "committing past reserved space");
        self.end += n;
    }

    /// Appends `bytes`.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len())[..bytes.len()].copy_from_slice(bytes);
        self.commit(bytes.len());
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}
