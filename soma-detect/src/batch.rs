//! Batch accumulation state

use crate::submission::Outcome;
use soma_core::Frame;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One caller's frame waiting in a batch
pub(crate) struct Pending {
    pub frame: Frame,
    pub slot: oneshot::Sender<Outcome>,
}

/// Why a batch stopped accepting frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Full,
    WaitElapsed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Full => "full",
            CloseReason::WaitElapsed => "wait_elapsed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// A closed batch, owned by the dispatcher once sent
pub(crate) struct Batch {
    pub id: u64,
    pub items: Vec<Pending>,
    pub opened_at: Instant,
    pub closed_by: CloseReason,
}

struct ActiveBatch {
    id: u64,
    items: Vec<Pending>,
    opened_at: Instant,
    timer: Option<JoinHandle<()>>,
}

impl ActiveBatch {
    fn close(self, reason: CloseReason) -> Batch {
        Batch {
            id: self.id,
            items: self.items,
            opened_at: self.opened_at,
            closed_by: reason,
        }
    }
}

/// The single batch currently accepting submissions.
///
/// Closing moves the batch out, so the accumulator and the batch being
/// detected never alias.
pub(crate) struct Accumulator {
    max_batch_size: usize,
    active: Option<ActiveBatch>,
    next_id: u64,
}

impl Accumulator {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size,
            active: None,
            next_id: 0,
        }
    }

    /// Append a frame. `arm_timer` is called with the id of a freshly opened
    /// batch, unless a single frame already fills it. Returns the batch if
    /// this frame filled it.
    pub fn push<F>(&mut self, pending: Pending, arm_timer: F) -> Option<Batch>
    where
        F: FnOnce(u64) -> Option<JoinHandle<()>>,
    {
        let max_batch_size = self.max_batch_size;
        let next_id = &mut self.next_id;
        let active = self.active.get_or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            ActiveBatch {
                id,
                items: Vec::with_capacity(max_batch_size),
                opened_at: Instant::now(),
                timer: if max_batch_size > 1 { arm_timer(id) } else { None },
            }
        });
        active.items.push(pending);

        if active.items.len() >= max_batch_size {
            self.close_active(CloseReason::Full)
        } else {
            None
        }
    }

    /// Close the active batch and disarm its timer.
    pub fn close_active(&mut self, reason: CloseReason) -> Option<Batch> {
        let mut active = self.active.take()?;
        if let Some(timer) = active.timer.take() {
            timer.abort();
        }
        Some(active.close(reason))
    }

    /// Close the active batch if it is still batch `id`; called by its timer.
    pub fn close_expired(&mut self, id: u64) -> Option<Batch> {
        if self.active.as_ref().map(|a| a.id) != Some(id) {
            return None;
        }
        let mut active = self.active.take()?;
        // the timer is the caller; dropping the handle detaches it
        active.timer.take();
        Some(active.close(CloseReason::WaitElapsed))
    }

    pub fn active_len(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.items.len())
    }
}
