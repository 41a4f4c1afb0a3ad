use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};

use rill_cache::{RemoteStream, WaitError, WaitOutcome};
use tracing::{debug, trace, warn};

use crate::{CpuReserve, InterruptFlags, NoopReserve};

/// Blocking byte-stream view of a [`RemoteStream`] for a demuxer.
///
/// The read cursor is the stream's own `read_head`: the downloader watches
/// it to decide what to prefetch, and seeks issued by the decode layer move
/// it directly.
pub struct StreamReader {
    stream: RemoteStream,
    flags: Arc<InterruptFlags>,
    reserve: Arc<dyn CpuReserve>,
}

impl StreamReader {
    #[must_use]
    pub fn new(stream: RemoteStream, flags: Arc<InterruptFlags>) -> Self {
        Self {
            stream,
            flags,
            reserve: Arc::new(NoopReserve),
        }
    }

    /// Install a platform CPU reservation hook.
    #[must_use]
    pub fn with_reserve(mut self, reserve: Arc<dyn CpuReserve>) -> Self {
        self.reserve = reserve;
        self
    }

    #[must_use]
    pub fn stream(&self) -> &RemoteStream {
        &self.stream
    }

    /// Total stream length, once known (the demuxer's size query).
    #[must_use]
    pub fn byte_len(&self) -> Option<u64> {
        self.stream.is_ready().then(|| self.stream.len())
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let stream = &self.stream;

        loop {
            let head = stream.read_head();

            // Fast path: the range is already cached.
            if stream.is_ready() {
                let len = stream.len();
                if head >= len {
                    trace!(head, len, "read at EOF");
                    return Ok(0);
                }
                let want = (buf.len() as u64).min(len - head);
                if let Some(data) = stream.read(head, want) {
                    buf[..data.len()].copy_from_slice(&data);
                    stream.advance_read_head(data.len() as u64);
                    trace!(head, n = data.len(), "read served from cache");
                    return Ok(data.len());
                }
            }

            stream.set_waiting_status(Some("Reading stream"));
            let mut raised = false;
            let outcome = stream.wait_range(head, buf.len() as u64, || {
                // exemption is re-read every wakeup; an interrupted read
                // aborts before the reservation is ever touched
                if !stream.is_interrupt_exempt() && self.flags.is_interrupted() {
                    return true;
                }
                if !raised {
                    raised = true;
                    self.reserve.raise();
                }
                false
            });
            stream.set_waiting_status(None);
            if raised {
                self.reserve.release();
            }

            match outcome {
                // Loop back through the fast path; a concurrent eviction may
                // have invalidated the range again.
                Ok(WaitOutcome::Ready) => {}
                Ok(WaitOutcome::Eof) => return Ok(0),
                Err(WaitError::Interrupted) => {
                    debug!(head, "read interrupted, requesting session reinit");
                    self.flags.mark_need_reinit();
                    return Ok(0);
                }
                Err(err @ (WaitError::Faulted | WaitError::Quit)) => {
                    warn!(head, ?err, "read on a dead stream");
                    return Ok(0);
                }
            }
        }
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let stream = &self.stream;

        // Seeking needs the total length; block until the first response
        // established it.
        if !stream.is_ready() {
            stream.set_waiting_status(Some("Reading stream (init, seek)"));
            let ready = stream.wait_ready(|| false);
            stream.set_waiting_status(None);
            if let Err(err) = ready {
                debug!(?err, "seek on a dead stream");
                return Err(io::Error::other("stream terminated before seek"));
            }
        }

        let len = stream.len();
        let target: i128 = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::Current(delta) => i128::from(stream.read_head()) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(len) + i128::from(delta),
        };

        if target < 0 || target as u64 > len {
            debug!(target, len, "seek out of bounds");
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek position outside the stream",
            ));
        }

        stream.set_read_head(target as u64);
        Ok(target as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use bytes::Bytes;
    use rill_cache::CacheLayout;
    use rstest::rstest;

    use super::*;

    const B: u64 = 64;

    fn stream() -> RemoteStream {
        RemoteStream::new(
            "http://example.com/media".parse().unwrap(),
            false,
            CacheLayout::default().with_block_size(B),
        )
    }

    fn filled_stream(blocks: u64) -> RemoteStream {
        let s = stream();
        s.mark_ready(blocks * B);
        for i in 0..blocks {
            s.insert(i, Bytes::from(vec![i as u8; B as usize]));
        }
        s
    }

    fn reader(s: &RemoteStream) -> StreamReader {
        StreamReader::new(s.clone(), Arc::new(InterruptFlags::new()))
    }

    #[test]
    fn read_advances_the_shared_head() {
        let s = filled_stream(2);
        let mut r = reader(&s);

        let mut buf = [0u8; 100];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(n, 100);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[B as usize], 1);
        assert_eq!(s.read_head(), 100);

        let n = r.read(&mut buf).unwrap();
        assert_eq!(n, 28);
        assert_eq!(s.read_head(), 2 * B);

        // at EOF now
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert_eq!(r.byte_len(), Some(2 * B));
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[test]
    fn read_blocks_until_data_arrives() {
        let s = stream();
        let writer = s.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            writer.mark_ready(B);
            writer.insert(0, Bytes::from(vec![9u8; B as usize]));
        });

        let mut r = reader(&s);
        let mut buf = [0u8; 16];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(buf, [9u8; 16]);
        handle.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[test]
    fn interrupt_aborts_with_need_reinit() {
        let s = stream();
        let flags = Arc::new(InterruptFlags::new());
        let mut r = StreamReader::new(s.clone(), Arc::clone(&flags));

        flags.interrupt();
        let mut buf = [0u8; 16];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert!(flags.needs_reinit());
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[test]
    fn exemption_revoked_mid_wait_aborts() {
        let s = stream();
        s.set_interrupt_exempt(true);
        let flags = Arc::new(InterruptFlags::new());
        flags.interrupt();

        let toggler = s.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            toggler.set_interrupt_exempt(false);
        });

        let mut r = StreamReader::new(s.clone(), Arc::clone(&flags));
        let mut buf = [0u8; 8];
        // the revocation is noticed on a later poll, not just at read entry
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert!(flags.needs_reinit());
        handle.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[test]
    fn exempt_stream_outlives_interrupt() {
        let s = stream();
        s.set_interrupt_exempt(true);
        let flags = Arc::new(InterruptFlags::new());
        flags.interrupt();

        let writer = s.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            writer.mark_ready(B);
            writer.insert(0, Bytes::from(vec![3u8; B as usize]));
        });

        let mut r = StreamReader::new(s.clone(), Arc::clone(&flags));
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).unwrap(), 8);
        assert!(!flags.needs_reinit());
        handle.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[test]
    fn dead_streams_read_as_eof() {
        let faulted = stream();
        faulted.fault();
        let mut buf = [0u8; 8];
        assert_eq!(reader(&faulted).read(&mut buf).unwrap(), 0);

        let quit = stream();
        quit.request_quit();
        assert_eq!(reader(&quit).read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn seek_resolves_all_whences() {
        let s = filled_stream(4);
        let mut r = reader(&s);

        assert_eq!(r.seek(SeekFrom::Start(10)).unwrap(), 10);
        assert_eq!(s.read_head(), 10);
        assert_eq!(r.seek(SeekFrom::Current(5)).unwrap(), 15);
        assert_eq!(r.seek(SeekFrom::Current(-15)).unwrap(), 0);
        assert_eq!(r.seek(SeekFrom::End(-6)).unwrap(), 4 * B - 6);
        // seeking exactly to the end is allowed
        assert_eq!(r.seek(SeekFrom::End(0)).unwrap(), 4 * B);
    }

    #[rstest]
    #[case::past_end(SeekFrom::Start(4 * B + 1))]
    #[case::negative(SeekFrom::Current(-1))]
    fn seek_rejects_out_of_bounds(#[case] pos: SeekFrom) {
        let s = filled_stream(4);
        let err = reader(&s).seek(pos).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[test]
    fn seek_waits_for_length() {
        let s = stream();
        let writer = s.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            writer.mark_ready(10 * B);
        });

        let mut r = reader(&s);
        assert_eq!(r.seek(SeekFrom::End(-8)).unwrap(), 10 * B - 8);
        handle.join().unwrap();
    }

    #[derive(Default)]
    struct CountingReserve {
        raised: AtomicUsize,
        released: AtomicUsize,
    }

    impl CpuReserve for CountingReserve {
        fn raise(&self) {
            self.raised.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[test]
    fn reserve_raised_once_per_blocked_read_and_released() {
        let s = stream();
        let reserve = Arc::new(CountingReserve::default());
        let mut r = StreamReader::new(s.clone(), Arc::new(InterruptFlags::new()))
            .with_reserve(Arc::clone(&reserve) as Arc<dyn CpuReserve>);

        let writer = s.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(80));
            writer.mark_ready(B);
            writer.insert(0, Bytes::from(vec![1u8; B as usize]));
        });

        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).unwrap(), 8);
        assert_eq!(reserve.raised.load(Ordering::SeqCst), 1);
        assert_eq!(reserve.released.load(Ordering::SeqCst), 1);

        // cached reads never touch the reservation
        assert_eq!(r.read(&mut buf).unwrap(), 8);
        assert_eq!(reserve.raised.load(Ordering::SeqCst), 1);
        handle.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    #[test]
    fn interrupted_read_never_touches_the_reservation() {
        let s = stream();
        let flags = Arc::new(InterruptFlags::new());
        flags.interrupt();
        let reserve = Arc::new(CountingReserve::default());
        let mut r = StreamReader::new(s.clone(), Arc::clone(&flags))
            .with_reserve(Arc::clone(&reserve) as Arc<dyn CpuReserve>);

        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert!(flags.needs_reinit());
        assert_eq!(reserve.raised.load(Ordering::SeqCst), 0);
        assert_eq!(reserve.released.load(Ordering::SeqCst), 0);
    }
}
