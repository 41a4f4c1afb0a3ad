use std::sync::Arc;

use parking_lot::Mutex;
use rill_cache::{POLL_INTERVAL, RemoteStream};
use rill_net::{Net, RangeSpec};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::parse;

struct Shared {
    net: Arc<dyn Net>,
    slots: Mutex<Vec<Option<RemoteStream>>>,
    cancel: CancellationToken,
}

/// Fetch scheduler over an index-stable slot table of streams.
///
/// Clone is cheap; all clones control the same slot table and task.
#[derive(Clone)]
pub struct Downloader {
    shared: Arc<Shared>,
}

impl Downloader {
    #[must_use]
    pub fn new(net: Arc<dyn Net>, cancel: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                net,
                slots: Mutex::new(Vec::new()),
                cancel,
            }),
        }
    }

    /// Add a stream to the slot table, reusing the first free slot.
    pub fn register(&self, stream: &RemoteStream) -> usize {
        let mut slots = self.shared.slots.lock();
        let index = slots.iter().position(Option::is_none).unwrap_or_else(|| {
            slots.push(None);
            slots.len() - 1
        });
        slots[index] = Some(stream.clone());
        debug!(index, url = %stream.url(), "stream registered");
        index
    }

    /// Start the background fetch loop.
    pub fn spawn(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(run(shared))
    }

    /// Request loop exit. Remaining streams are marked quit by the loop on
    /// its way out.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    /// Mark every registered stream quit and clear the table immediately.
    pub fn detach_all(&self) {
        let mut slots = self.shared.slots.lock();
        for slot in slots.iter_mut() {
            if let Some(stream) = slot.take() {
                stream.request_quit();
            }
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }
}

async fn run(shared: Arc<Shared>) {
    debug!("downloader loop started");
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let Some((stream, read_head)) = pick(&shared) else {
            tokio::select! {
                () = shared.cancel.cancelled() => break,
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            continue;
        };

        if stream.is_whole_download() {
            fetch_whole(&*shared.net, &stream).await;
        } else {
            fetch_block(&*shared.net, &stream, read_head).await;
        }
    }

    debug!("downloader loop exiting");
    let mut slots = shared.slots.lock();
    for slot in slots.iter_mut() {
        if let Some(stream) = slot.take() {
            stream.request_quit();
        }
    }
}

/// Select the stream to serve this iteration, together with the snapshot of
/// its read head the decision was made against.
///
/// Priority: any stream with unknown length first (lowest index); otherwise
/// the ranged stream with the smallest margin between its playhead and its
/// first missing block inside the prefetch window. Quit-requested slots are
/// dropped in passing; faulted and suspended streams are skipped.
fn pick(shared: &Shared) -> Option<(RemoteStream, u64)> {
    let mut slots = shared.slots.lock();
    let mut best: Option<(f64, RemoteStream, u64)> = None;

    for (index, slot) in slots.iter_mut().enumerate() {
        let Some(stream) = slot.clone() else { continue };

        if stream.is_quit_requested() {
            debug!(index, "dropping quit-requested stream");
            *slot = None;
            continue;
        }
        if stream.is_faulted() || stream.is_suspended() {
            continue;
        }
        if !stream.is_ready() {
            let head = stream.read_head();
            return Some((stream, head));
        }
        if stream.is_whole_download() {
            // its entire body was cached when it became ready
            continue;
        }

        let layout = stream.layout();
        let read_head = stream.read_head();
        let head_block = read_head / layout.block_size;
        let Some(missing) = stream.first_absent_block(head_block, layout.max_forward_blocks)
        else {
            continue;
        };

        let margin = if missing == head_block {
            0.0
        } else {
            (missing * layout.block_size - read_head) as f64 / stream.len() as f64 * 100.0
        };
        if best.as_ref().is_none_or(|(m, _, _)| margin < *m) {
            best = Some((margin, stream, read_head));
        }
    }

    best.map(|(margin, stream, head)| {
        trace!(margin, "picked stream");
        (stream, head)
    })
}

/// Map livestream-terminating HTTP statuses onto stream state.
fn apply_live_status(stream: &RemoteStream, status: Option<u16>) {
    match status {
        // returned when reading beyond the current end of the livestream
        Some(204 | 404) => stream.mark_live_ended(),
        // returned for an ended livestream without an archive
        Some(403) => stream.mark_live_private(),
        _ => {}
    }
}

/// One unranged GET caching the entire body (livestream segment mode).
async fn fetch_whole(net: &dyn Net, stream: &RemoteStream) {
    let response = match net.get(stream.url(), None).await {
        Ok(response) if !response.body.is_empty() => response,
        Ok(response) => {
            warn!(status = response.status, "whole fetch returned no content");
            apply_live_status(stream, Some(response.status));
            stream.fault();
            return;
        }
        Err(e) => {
            warn!(error = %e, "whole fetch failed");
            apply_live_status(stream, e.status());
            stream.fault();
            return;
        }
    };

    stream.set_url(response.final_url.clone());

    let head = response
        .header("x-head-seqnum")
        .and_then(parse::sequence_number);
    let id = response
        .header("x-sequence-num")
        .and_then(parse::sequence_number);
    if head.is_none() {
        warn!("failed to acquire x-head-seqnum");
    }
    if id.is_none() {
        warn!("failed to acquire x-sequence-num");
    }
    stream.set_sequence(head.unwrap_or(-1), id.unwrap_or(-1));
    if head.is_none() || id.is_none() {
        stream.fault();
        return;
    }

    let body = response.body;
    let block_size = stream.block_size() as usize;
    let mut index = 0u64;
    let mut offset = 0usize;
    while offset < body.len() {
        let end = (offset + block_size).min(body.len());
        stream.insert(index, body.slice(offset..end));
        index += 1;
        offset = end;
    }
    stream.mark_ready(body.len() as u64);
    trace!(len = body.len(), "whole fetch cached");
}

/// One ranged GET for the lowest missing block at or after the read head.
async fn fetch_block(net: &dyn Net, stream: &RemoteStream, read_head: u64) {
    let block_size = stream.block_size();
    let head_block = read_head / block_size;
    let ready = stream.is_ready();

    let block = if ready {
        match stream.first_absent_block(head_block, u64::MAX) {
            Some(block) => block,
            None => {
                // every block through the end is present, yet the scheduler
                // sent us here
                warn!("no block to fetch at or after the read head");
                stream.fault();
                return;
            }
        }
    } else {
        head_block
    };

    let start = block * block_size;
    // Until the length is known the end may overshoot; Content-Range tells
    // us the truth and the body length is authoritative for the write.
    let end = if ready {
        ((block + 1) * block_size).min(stream.len())
    } else {
        (block + 1) * block_size
    };
    let expected = end - start;

    trace!(block, start, end, "fetching block");
    let response = match net
        .get_range(stream.url(), RangeSpec::new(start, Some(end - 1)), None)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, block, "range fetch failed");
            stream.fault();
            return;
        }
    };

    stream.set_url(response.final_url.clone());

    if ready {
        if response.body.len() as u64 != expected {
            warn!(
                expected,
                got = response.body.len(),
                "range size discrepancy"
            );
            stream.fault();
            return;
        }
    } else {
        let Some(total) = response
            .header("Content-Range")
            .and_then(parse::content_range_total)
        else {
            warn!("missing or malformed Content-Range in first response");
            stream.fault();
            return;
        };
        stream.mark_ready(total);
    }

    stream.insert(block, response.body);
}
