use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{CacheLayout, POLL_INTERVAL};

/// Outcome of waiting for a byte range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The requested range (clamped to the stream length) is cached.
    Ready,
    /// The wait position is at or past the end of the stream.
    Eof,
}

/// Terminal conditions that end a wait without data.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("stream faulted")]
    Faulted,

    #[error("stream quit requested")]
    Quit,

    #[error("wait aborted")]
    Interrupted,
}

struct BlockMap {
    blocks: BTreeMap<u64, Bytes>,
}

struct Inner {
    layout: CacheLayout,
    whole_download: bool,
    url: Mutex<Url>,

    state: Mutex<BlockMap>,
    /// Notified on insert, on `mark_ready` and on terminal flag writes.
    changed: Condvar,

    // Written once before `ready` flips; read lock-free afterwards.
    len: AtomicU64,
    block_count: AtomicU64,

    /// Consumer cursor. The downloader only snapshots it.
    read_head: AtomicU64,

    ready: AtomicBool,
    faulted: AtomicBool,
    quit: AtomicBool,
    suspended: AtomicBool,
    interrupt_exempt: AtomicBool,
    live_ended: AtomicBool,
    live_private: AtomicBool,

    // Livestream sequence markers, -1 until parsed from response headers.
    seq_head: AtomicI64,
    seq_id: AtomicI64,

    waiting_status: Mutex<Option<&'static str>>,
}

/// One remote resource: URL identity, block cache and playback cursor.
///
/// Clone is cheap; all clones refer to the same stream. Destruction is by
/// refcount: [`request_quit`](Self::request_quit) is the tombstone that makes
/// the downloader drop its clone and stop scheduling the stream.
#[derive(Clone)]
pub struct RemoteStream {
    inner: Arc<Inner>,
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("url", &*self.inner.url.lock())
            .field("whole_download", &self.inner.whole_download)
            .field("ready", &self.is_ready())
            .field("len", &self.inner.len.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl RemoteStream {
    #[must_use]
    pub fn new(url: Url, whole_download: bool, layout: CacheLayout) -> Self {
        Self {
            inner: Arc::new(Inner {
                layout,
                whole_download,
                url: Mutex::new(url),
                state: Mutex::new(BlockMap {
                    blocks: BTreeMap::new(),
                }),
                changed: Condvar::new(),
                len: AtomicU64::new(0),
                block_count: AtomicU64::new(0),
                read_head: AtomicU64::new(0),
                ready: AtomicBool::new(false),
                faulted: AtomicBool::new(false),
                quit: AtomicBool::new(false),
                suspended: AtomicBool::new(false),
                interrupt_exempt: AtomicBool::new(false),
                live_ended: AtomicBool::new(false),
                live_private: AtomicBool::new(false),
                seq_head: AtomicI64::new(-1),
                seq_id: AtomicI64::new(-1),
                waiting_status: Mutex::new(None),
            }),
        }
    }

    // -- identity -----------------------------------------------------------

    #[must_use]
    pub fn url(&self) -> Url {
        self.inner.url.lock().clone()
    }

    /// Persist the post-redirect URL so later fetches skip the redirect chain.
    pub fn set_url(&self, url: Url) {
        *self.inner.url.lock() = url;
    }

    #[must_use]
    pub fn is_whole_download(&self) -> bool {
        self.inner.whole_download
    }

    #[must_use]
    pub fn layout(&self) -> CacheLayout {
        self.inner.layout
    }

    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.inner.layout.block_size
    }

    // -- size state ---------------------------------------------------------

    /// Publish the total byte length and mark the stream ready.
    ///
    /// `len` and the derived block count are fixed for the rest of the
    /// stream's life; a second call is ignored.
    pub fn mark_ready(&self, len: u64) {
        if self.inner.ready.load(Ordering::Acquire) {
            warn!(len, "mark_ready on an already-ready stream ignored");
            return;
        }
        self.inner.len.store(len, Ordering::Release);
        self.inner
            .block_count
            .store(self.inner.layout.block_count(len), Ordering::Release);
        self.inner.ready.store(true, Ordering::Release);
        self.inner.changed.notify_all();
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Total length in bytes; 0 until [`is_ready`](Self::is_ready).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.inner.block_count.load(Ordering::Acquire)
    }

    // -- cursor -------------------------------------------------------------

    #[must_use]
    pub fn read_head(&self) -> u64 {
        self.inner.read_head.load(Ordering::SeqCst)
    }

    pub fn set_read_head(&self, pos: u64) {
        self.inner.read_head.store(pos, Ordering::SeqCst);
    }

    pub fn advance_read_head(&self, by: u64) -> u64 {
        self.inner.read_head.fetch_add(by, Ordering::SeqCst) + by
    }

    // -- status flags -------------------------------------------------------

    /// Tombstone the stream after a network or protocol failure. Monotone.
    pub fn fault(&self) {
        self.inner.faulted.store(true, Ordering::Release);
        self.inner.changed.notify_all();
    }

    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.inner.faulted.load(Ordering::Acquire)
    }

    /// Ask the downloader to drop its handle at the next visit. Monotone.
    pub fn request_quit(&self) {
        self.inner.quit.store(true, Ordering::Release);
        self.inner.changed.notify_all();
    }

    #[must_use]
    pub fn is_quit_requested(&self) -> bool {
        self.inner.quit.load(Ordering::Acquire)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.inner.suspended.store(suspended, Ordering::Release);
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::Acquire)
    }

    /// Exempt this stream from consumer-side interrupt aborts.
    pub fn set_interrupt_exempt(&self, exempt: bool) {
        self.inner.interrupt_exempt.store(exempt, Ordering::Release);
    }

    #[must_use]
    pub fn is_interrupt_exempt(&self) -> bool {
        self.inner.interrupt_exempt.load(Ordering::Acquire)
    }

    pub fn mark_live_ended(&self) {
        self.inner.live_ended.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_live_ended(&self) -> bool {
        self.inner.live_ended.load(Ordering::Acquire)
    }

    pub fn mark_live_private(&self) {
        self.inner.live_private.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_live_private(&self) -> bool {
        self.inner.live_private.load(Ordering::Acquire)
    }

    pub fn set_sequence(&self, head: i64, id: i64) {
        self.inner.seq_head.store(head, Ordering::Release);
        self.inner.seq_id.store(id, Ordering::Release);
    }

    /// Livestream sequence markers `(head, id)`; `(-1, -1)` until known.
    #[must_use]
    pub fn sequence(&self) -> (i64, i64) {
        (
            self.inner.seq_head.load(Ordering::Acquire),
            self.inner.seq_id.load(Ordering::Acquire),
        )
    }

    pub fn set_waiting_status(&self, status: Option<&'static str>) {
        *self.inner.waiting_status.lock() = status;
    }

    /// Human-readable description of what the consumer is blocked on.
    #[must_use]
    pub fn waiting_status(&self) -> Option<&'static str> {
        *self.inner.waiting_status.lock()
    }

    // -- block cache --------------------------------------------------------

    /// Whether `[start, start + size)` is fully cached.
    #[must_use]
    pub fn is_available(&self, start: u64, size: u64) -> bool {
        if !self.is_ready() {
            return false;
        }
        let len = self.len();
        let Some(end) = start.checked_add(size) else {
            return false;
        };
        if end > len {
            return false;
        }
        if size == 0 {
            return true;
        }
        let state = self.inner.state.lock();
        self.blocks_cover(&state, start, size)
    }

    /// Read exactly `size` bytes at `start`, assembled from cached blocks.
    ///
    /// Returns `None` when [`is_available`](Self::is_available) does not
    /// hold; an empty request yields an empty buffer.
    #[must_use]
    pub fn read(&self, start: u64, size: u64) -> Option<Bytes> {
        if !self.is_ready() {
            return None;
        }
        if size == 0 {
            return Some(Bytes::new());
        }
        if start.checked_add(size)? > self.len() {
            return None;
        }

        let block_size = self.block_size();
        let end = start + size - 1;
        let state = self.inner.state.lock();

        let mut out = BytesMut::with_capacity(size as usize);
        for block in start / block_size..=end / block_size {
            let data = state.blocks.get(&block)?;
            let base = block * block_size;
            let from = start.max(base) - base;
            let to = (end + 1).min(base + block_size) - base;
            if to as usize > data.len() {
                return None;
            }
            out.extend_from_slice(&data[from as usize..to as usize]);
        }
        Some(out.freeze())
    }

    /// Insert one block unconditionally; evicts exactly one block when the
    /// cache bound is exceeded.
    ///
    /// Eviction keeps the look-ahead window: with `h = read_head / B`, the
    /// minimum cached index is dropped when it lies behind `h`, the maximum
    /// otherwise.
    pub fn insert(&self, block_index: u64, data: Bytes) {
        {
            let mut state = self.inner.state.lock();
            state.blocks.insert(block_index, data);

            if state.blocks.len() > self.inner.layout.max_cached_blocks {
                let head_block = self.read_head() / self.block_size();
                let min = state
                    .blocks
                    .first_key_value()
                    .map(|(&idx, _)| idx)
                    .unwrap_or_default();
                let evicted = if min < head_block {
                    state.blocks.pop_first()
                } else {
                    state.blocks.pop_last()
                };
                if let Some((idx, _)) = evicted {
                    debug!(block = idx, head_block, "evicted cache block");
                }
            }
        }
        self.inner.changed.notify_all();
    }

    /// Number of cached blocks.
    #[must_use]
    pub fn cached_blocks(&self) -> usize {
        self.inner.state.lock().blocks.len()
    }

    /// Lowest block index in `[from, from + window)` that is not cached,
    /// never past the end of the stream. `None` means there is nothing to
    /// fetch inside the window (all present, window bound hit, or the range
    /// starts past the last block).
    #[must_use]
    pub fn first_absent_block(&self, from: u64, window: u64) -> Option<u64> {
        if !self.is_ready() {
            return None;
        }
        let cap = self.block_count().min(from.saturating_add(window));
        let state = self.inner.state.lock();
        (from..cap).find(|block| !state.blocks.contains_key(block))
    }

    /// Percentage of the resource currently cached, in `[0, 100]`.
    #[must_use]
    pub fn download_percent(&self) -> f64 {
        if !self.is_ready() || self.is_empty() {
            return 0.0;
        }
        let covered: u64 = {
            let state = self.inner.state.lock();
            state.blocks.values().map(|b| b.len() as u64).sum()
        };
        (covered as f64 / self.len() as f64 * 100.0).min(100.0)
    }

    /// Per-segment cache coverage over `segments` equal byte ranges of
    /// `[0, len)`, each in `[0, 100]`.
    #[must_use]
    pub fn progress_bar(&self, segments: usize) -> Vec<f64> {
        if segments == 0 {
            return Vec::new();
        }
        if !self.is_ready() || self.is_empty() {
            return vec![0.0; segments];
        }

        let len = self.len();
        let block_size = self.block_size();
        let state = self.inner.state.lock();

        let mut out = vec![0.0; segments];
        let mut blocks = state.blocks.iter().peekable();
        for (i, slot) in out.iter_mut().enumerate() {
            let seg_start = len * i as u64 / segments as u64;
            let seg_end = (len * (i as u64 + 1) / segments as u64).min(len);
            if seg_end <= seg_start {
                continue;
            }

            let mut covered = 0u64;
            while let Some(&(&index, data)) = blocks.peek() {
                let block_start = index * block_size;
                let block_end = block_start + data.len() as u64;
                if block_end <= seg_start {
                    blocks.next();
                } else if block_start >= seg_end {
                    break;
                } else {
                    covered += block_end.min(seg_end) - block_start.max(seg_start);
                    if block_end >= seg_end {
                        break;
                    }
                    blocks.next();
                }
            }
            *slot = covered as f64 / (seg_end - seg_start) as f64 * 100.0;
        }
        out
    }

    // -- waiting ------------------------------------------------------------

    /// Block until `[start, start + size)` (clamped to the stream length) is
    /// cached, the position turns out to be at/past EOF, or a terminal
    /// condition ends the wait.
    ///
    /// `abort` is polled on every wakeup, at least every 20 ms; returning
    /// `true` ends the wait with [`WaitError::Interrupted`].
    pub fn wait_range<A>(&self, start: u64, size: u64, mut abort: A) -> Result<WaitOutcome, WaitError>
    where
        A: FnMut() -> bool,
    {
        let inner = &*self.inner;
        let mut state = inner.state.lock();
        loop {
            if inner.faulted.load(Ordering::Acquire) {
                return Err(WaitError::Faulted);
            }
            if inner.quit.load(Ordering::Acquire) {
                return Err(WaitError::Quit);
            }
            if inner.ready.load(Ordering::Acquire) {
                let len = inner.len.load(Ordering::Acquire);
                if start >= len {
                    return Ok(WaitOutcome::Eof);
                }
                let clamped = size.min(len - start);
                if clamped == 0 || self.blocks_cover(&state, start, clamped) {
                    return Ok(WaitOutcome::Ready);
                }
            }
            if abort() {
                return Err(WaitError::Interrupted);
            }
            inner.changed.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    /// Block until the stream length is known.
    pub fn wait_ready<A>(&self, mut abort: A) -> Result<(), WaitError>
    where
        A: FnMut() -> bool,
    {
        let inner = &*self.inner;
        let mut state = inner.state.lock();
        loop {
            if inner.faulted.load(Ordering::Acquire) {
                return Err(WaitError::Faulted);
            }
            if inner.quit.load(Ordering::Acquire) {
                return Err(WaitError::Quit);
            }
            if inner.ready.load(Ordering::Acquire) {
                return Ok(());
            }
            if abort() {
                return Err(WaitError::Interrupted);
            }
            inner.changed.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    fn blocks_cover(&self, state: &BlockMap, start: u64, size: u64) -> bool {
        let block_size = self.block_size();
        let end = start + size - 1;
        (start / block_size..=end / block_size).all(|block| state.blocks.contains_key(&block))
    }
}
