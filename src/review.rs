use log::{debug, info, warn};

use crate::capture::CapturedFrame;
use crate::error::ReviewError;
use crate::models::{ClassificationResult, PersistableRecord, UserRole};
use crate::persistence::{commit_record, RecordStore, SavedRecord};

/// Identifies one capture cycle. Results carrying a stale ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTicket(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct PendingReview {
    pub frame: CapturedFrame,
    pub result: ClassificationResult,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewState {
    Idle,
    Pending(PendingReview),
}

/// Holds a classified capture until the user saves or discards it.
#[derive(Debug)]
pub struct ReviewFlow {
    state: ReviewState,
    generation: u64,
    mounted: bool,
}

impl Default for ReviewFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewFlow {
    pub fn new() -> Self {
        Self {
            state: ReviewState::Idle,
            generation: 0,
            mounted: true,
        }
    }

    pub fn state(&self) -> &ReviewState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, ReviewState::Pending(_))
    }

    pub fn pending(&self) -> Option<&PendingReview> {
        match &self.state {
            ReviewState::Pending(p) => Some(p),
            ReviewState::Idle => None,
        }
    }

    /// Starts a new capture cycle, invalidating whatever is pending.
    pub fn begin_capture(&mut self) -> CaptureTicket {
        self.generation += 1;
        if self.is_pending() {
            debug!("New capture supersedes pending review");
        }
        self.state = ReviewState::Idle;
        CaptureTicket(self.generation)
    }

    /// Enters `Pending` if the ticket is still current. Returns whether the
    /// result was accepted.
    pub fn present(&mut self, ticket: CaptureTicket, frame: CapturedFrame, result: ClassificationResult) -> bool {
        if !self.mounted || ticket.0 != self.generation {
            debug!("Dropping stale classification for ticket {}", ticket.0);
            return false;
        }

        info!("Reviewing {} ({})", result.name, result.condition);
        self.state = ReviewState::Pending(PendingReview {
            display_name: result.name.clone(),
            frame,
            result,
        });
        true
    }

    pub fn rename(&mut self, name: &str) {
        if let ReviewState::Pending(pending) = &mut self.state {
            pending.display_name = name.to_string();
        }
    }

    /// Record that `save` would write for `role`, if anything is pending.
    pub fn record_for(&self, role: UserRole) -> Option<PersistableRecord> {
        self.pending().map(|p| PersistableRecord::for_role(role, p.display_name.trim(), p.result.date))
    }

    /// Writes the pending result. The pending pair is cleared only after the
    /// store confirms. Returns `Ok(None)` when nothing is pending.
    pub async fn save(
        &mut self,
        role: UserRole,
        store: &dyn RecordStore,
        owner_id: &str,
    ) -> Result<Option<SavedRecord>, ReviewError> {
        let Some(record) = self.record_for(role) else {
            debug!("Save ignored, nothing pending");
            return Ok(None);
        };
        if record.name().is_empty() {
            return Err(ReviewError::EmptyName);
        }

        let saved = commit_record(store, owner_id, &record).await.map_err(|e| {
            warn!("Saving {} failed: {}", record.name(), e);
            e
        })?;

        self.state = ReviewState::Idle;
        info!("Saved {}", record.name());
        Ok(Some(saved))
    }

    pub fn discard(&mut self) {
        if self.is_pending() {
            debug!("Discarding pending review");
        }
        self.state = ReviewState::Idle;
    }

    /// Drops any pending pair; later results are ignored.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.generation += 1;
        self.state = ReviewState::Idle;
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }
}
