use parhash_core::Error;
use portable_atomic::{AtomicU64, Ordering};

/// Round-robin cursor shared by every request the server handles.
///
/// Each [`pick`](Self::pick) claims a distinct cursor value with a single
/// fetch-and-add, so any window of `K` consecutive picks lands on each of the
/// `N` backends `floor(K/N)` or `ceil(K/N)` times, whether the picks come from
/// one request or from many concurrent ones.
#[derive(Debug)]
pub struct RoundRobin {
    cursor: AtomicU64,
    len: u64,
}

impl RoundRobin {
    /// Creates a selector over `len` backends. The first pick returns `0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `len` is zero.
    pub fn new(len: usize) -> Result<Self, Error> {
        if len == 0 {
            return Err(Error::InvalidConfig {
                reason: "at least one backend is required".to_string(),
            });
        }

        Ok(Self {
            cursor: AtomicU64::new(0),
            len: len as u64,
        })
    }

    /// Returns the index of the next backend to receive work.
    ///
    /// Uses a relaxed atomic increment: only the uniqueness of each claimed
    /// value matters, not its ordering relative to other memory.
    pub fn pick(&self) -> usize {
        (self.cursor.fetch_add(1, Ordering::Relaxed) % self.len) as usize
    }

    /// Number of backends this selector cycles over.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
