use log::{debug, error, info};
use shared::{ImagesetId, ImagesetStatus};

use super::StatusStore;
use crate::error::error_chain;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid imageset status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ImagesetStatus,
    pub to: ImagesetStatus,
}

/// Owns the imageset status for the length of one run.
///
/// Transitions are validated in memory first, then written through the
/// store. A failed write is logged and does not undo the decided status.
/// With persistence off (dry run) nothing is ever written.
pub struct StatusMachine<'a, T> {
    store: &'a T,
    imageset_id: ImagesetId,
    current: ImagesetStatus,
    persist: bool,
    transitions: Vec<ImagesetStatus>,
}

impl<'a, T: StatusStore> StatusMachine<'a, T> {
    pub fn new(store: &'a T, imageset_id: ImagesetId, initial: ImagesetStatus, persist: bool) -> Self {
        Self {
            store,
            imageset_id,
            current: initial,
            persist,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> ImagesetStatus {
        self.current
    }

    /// Statuses entered during this run, in order.
    pub fn transitions(&self) -> &[ImagesetStatus] {
        &self.transitions
    }

    pub async fn transition(&mut self, next: ImagesetStatus) -> Result<(), InvalidTransition> {
        if !self.current.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        self.current = next;
        self.transitions.push(next);

        if !self.persist {
            debug!(
                "Dry run, not setting imageset status to {} (imageset_id={})",
                next, self.imageset_id
            );
            return Ok(());
        }

        info!(
            "Setting imageset status to {} (imageset_id={})",
            next, self.imageset_id
        );
        if let Err(e) = self.store.set_status(self.imageset_id, next).await {
            error!(
                "Failed to update status to {} for imageset (imageset_id={}): {}",
                next,
                self.imageset_id,
                error_chain(&e)
            );
        }
        Ok(())
    }
}
