use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::collaborators::{PresenceError, PresenceIndicator};

/// Presence indicator for hosts without a notification surface: the
/// "indicator" is the log stream.
#[derive(Debug, Default)]
pub struct LogPresenceIndicator {
    engaged: AtomicBool,
}

impl LogPresenceIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PresenceIndicator for LogPresenceIndicator {
    async fn engage(&self, title: &str, description: &str) -> Result<(), PresenceError> {
        if self.engaged.swap(true, Ordering::AcqRel) {
            return Err(PresenceError::Platform("indicator already engaged".into()));
        }
        info!(title, description, "presence indicator engaged");
        Ok(())
    }

    async fn update(&self, title: &str, description: &str) -> Result<(), PresenceError> {
        if !self.is_engaged() {
            return Err(PresenceError::Platform("indicator not engaged".into()));
        }
        debug!(title, description, "presence indicator updated");
        Ok(())
    }

    async fn release(&self) -> Result<(), PresenceError> {
        if self.engaged.swap(false, Ordering::AcqRel) {
            info!("presence indicator released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engage_release_cycle() {
        let ind = LogPresenceIndicator::new();
        assert!(ind.update("t", "d").await.is_err());
        ind.engage("t", "d").await.unwrap();
        assert!(ind.is_engaged());
        assert!(ind.engage("t", "d").await.is_err());
        ind.update("t", "d2").await.unwrap();
        ind.release().await.unwrap();
        assert!(!ind.is_engaged());
        ind.release().await.unwrap();
    }
}
