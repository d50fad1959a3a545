use crate::errors::{EngineError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Per-integration exclusivity for sync runs.
#[derive(Debug, Clone, Default)]
pub struct RunLeases {
    active: Arc<Mutex<HashSet<String>>>,
}

/// Held for the duration of a run; releases the integration on drop.
#[derive(Debug)]
pub struct RunLease {
    active: Arc<Mutex<HashSet<String>>>,
    integration_id: String,
}

impl RunLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, integration_id: &str) -> Result<RunLease> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| EngineError::Configuration("run lease registry poisoned".to_string()))?;
        if !active.insert(integration_id.to_string()) {
            return Err(EngineError::AlreadyRunning(integration_id.to_string()));
        }
        Ok(RunLease {
            active: Arc::clone(&self.active),
            integration_id: integration_id.to_string(),
        })
    }

    pub fn is_held(&self, integration_id: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(integration_id))
            .unwrap_or(false)
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.integration_id);
        }
    }
}
