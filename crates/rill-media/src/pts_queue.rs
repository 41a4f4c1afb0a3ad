use parking_lot::Mutex;

/// Ordered multiset of presentation timestamps buffered on the hardware
/// decode path.
///
/// Hardware decode loses the packet→frame association, so the driver records
/// every submitted packet's timestamp here and the frame consumer pops the
/// minimum. Duplicates are legal. Guarded by its own lock because the
/// renderer pops from a different thread than the decode pump inserts on.
#[derive(Debug, Default)]
pub struct PtsQueue {
    // kept sorted ascending by total order
    inner: Mutex<Vec<f64>>,
}

impl PtsQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pts: f64) {
        let mut list = self.inner.lock();
        let at = list.partition_point(|&v| v.total_cmp(&pts).is_lt());
        list.insert(at, pts);
    }

    /// Remove and return the smallest buffered timestamp.
    #[must_use]
    pub fn pop_min(&self) -> Option<f64> {
        let mut list = self.inner.lock();
        if list.is_empty() {
            return None;
        }
        Some(list.remove(0))
    }

    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.inner.lock().first().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
