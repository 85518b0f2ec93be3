//! Serializing render queue.
//!
//! Every rasterization request (page change, zoom change, rotation change,
//! thumbnail) goes through this queue. Exactly one render is active at a
//! time; requests arriving while one is in flight are queued in arrival
//! order. A request for a key already queued coalesces into the existing
//! slot (latest parameters win, original queue position kept), and a
//! request for the key currently rendering cancels the outstanding task so
//! the same page never has two renders running to completion.

use std::collections::VecDeque;

use crate::cancel::CancellationToken;

/// Monotonic identifier for a started render job.
pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderKind {
    Page,
    Thumbnail,
}

/// Coalescing key: one queue slot per (page, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderJobKey {
    pub page_index: u16,
    pub kind: RenderKind,
}

/// Parameters a render runs with. Integers so keys stay hashable; the
/// editor maps its zoom ladder to percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderParams {
    pub zoom_percent: u16,
    pub rotation_degrees: u16,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self { zoom_percent: 100, rotation_degrees: 0 }
    }
}

/// A started render with its cancellation token.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub id: JobId,
    pub key: RenderJobKey,
    pub params: RenderParams,
    pub token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct RenderQueue {
    next_id: JobId,
    pending: VecDeque<(RenderJobKey, RenderParams)>,
    in_flight: Option<RenderJob>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a render request.
    ///
    /// Coalesces with a pending request for the same key; cancels an
    /// in-flight render of the same key before queueing the replacement.
    pub fn request(&mut self, key: RenderJobKey, params: RenderParams) {
        if let Some(active) = &self.in_flight {
            if active.key == key {
                tracing::debug!(page_index = key.page_index, "superseding in-flight render");
                active.token.cancel();
            }
        }

        if let Some(slot) = self.pending.iter_mut().find(|(pending, _)| *pending == key) {
            slot.1 = params;
            return;
        }

        self.pending.push_back((key, params));
    }

    /// Start the next queued render, if none is active.
    ///
    /// Returns `None` while a render is in flight or the queue is empty;
    /// this is what keeps renders strictly serialized.
    pub fn start_next(&mut self) -> Option<RenderJob> {
        if self.in_flight.is_some() {
            return None;
        }

        let (key, params) = self.pending.pop_front()?;
        self.next_id += 1;
        let job = RenderJob { id: self.next_id, key, params, token: CancellationToken::new() };
        self.in_flight = Some(job.clone());
        Some(job)
    }

    /// Mark a started job as finished.
    ///
    /// Returns `false` for an id that is no longer the active job; callers
    /// use that to discard results that resolved after cancellation.
    pub fn complete(&mut self, id: JobId) -> bool {
        match &self.in_flight {
            Some(active) if active.id == id => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel the active render and drop everything queued.
    pub fn cancel_all(&mut self) {
        if let Some(active) = &self.in_flight {
            active.token.cancel();
        }
        self.in_flight = None;
        self.pending.clear();
    }

    pub fn in_flight(&self) -> Option<&RenderJob> {
        self.in_flight.as_ref()
    }

    pub fn is_page_in_flight(&self, page_index: u16) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|job| job.key.page_index == page_index)
    }

    /// Number of queued (not yet started) requests.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: u16) -> RenderJobKey {
        RenderJobKey { page_index: index, kind: RenderKind::Page }
    }

    fn params(zoom: u16) -> RenderParams {
        RenderParams { zoom_percent: zoom, rotation_degrees: 0 }
    }

    #[test]
    fn only_one_render_runs_at_a_time() {
        let mut queue = RenderQueue::new();
        queue.request(page(0), params(100));
        queue.request(page(1), params(100));

        let first = queue.start_next().expect("first job should start");
        assert!(queue.start_next().is_none(), "second render must wait");

        assert!(queue.complete(first.id));
        let second = queue.start_next().expect("second job should start after first");
        assert_eq!(second.key.page_index, 1);
    }

    #[test]
    fn queued_requests_run_in_arrival_order() {
        let mut queue = RenderQueue::new();
        for index in [4, 1, 2] {
            queue.request(page(index), params(100));
        }

        let mut order = Vec::new();
        while let Some(job) = queue.start_next() {
            order.push(job.key.page_index);
            queue.complete(job.id);
        }
        assert_eq!(order, vec![4, 1, 2]);
    }

    #[test]
    fn same_key_coalesces_keeping_queue_position() {
        let mut queue = RenderQueue::new();
        queue.request(page(0), params(100));
        queue.request(page(1), params(100));
        queue.request(page(0), params(150));

        assert_eq!(queue.pending_len(), 2);
        let first = queue.start_next().expect("job should start");
        assert_eq!(first.key.page_index, 0);
        assert_eq!(first.params.zoom_percent, 150);
    }

    #[test]
    fn rerequesting_in_flight_page_cancels_outstanding_render() {
        let mut queue = RenderQueue::new();
        queue.request(page(2), params(100));
        let active = queue.start_next().expect("job should start");

        queue.request(page(2), params(200));
        assert!(active.token.is_cancelled());

        // The cancelled job still has to acknowledge completion before the
        // replacement starts, so the page never renders twice concurrently.
        assert!(queue.start_next().is_none());
        queue.complete(active.id);
        let replacement = queue.start_next().expect("replacement should start");
        assert_eq!(replacement.params.zoom_percent, 200);
    }

    #[test]
    fn stale_completion_is_discarded() {
        let mut queue = RenderQueue::new();
        queue.request(page(0), params(100));
        let job = queue.start_next().expect("job should start");

        queue.cancel_all();
        assert!(!queue.complete(job.id), "late result must be ignored");
        assert!(queue.is_idle());
    }

    #[test]
    fn thumbnail_and_page_renders_do_not_coalesce() {
        let mut queue = RenderQueue::new();
        queue.request(page(0), params(100));
        queue.request(
            RenderJobKey { page_index: 0, kind: RenderKind::Thumbnail },
            params(25),
        );

        assert_eq!(queue.pending_len(), 2);
    }
}
