//! Service readiness
//!
//! Lifecycle of the one-time connectivity probe:
//! `Uninitialized -> Ready | Failed`, with `Failed -> Ready` on a later re-probe.

use crate::llm::CompletionService;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ReadinessState {
    Uninitialized,
    Ready,
    Failed(String),
}

pub struct ServiceReadiness {
    state: RwLock<ReadinessState>,
    probe_timeout: Duration,
}

impl ServiceReadiness {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(ReadinessState::Uninitialized),
            probe_timeout,
        }
    }

    pub async fn state(&self) -> ReadinessState {
        self.state.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        *self.state.read().await == ReadinessState::Ready
    }

    /// Probes unconditionally and records the outcome. The state lock is
    /// taken only to store the result, never across the network call.
    pub async fn probe(&self, llm: &dyn CompletionService) -> bool {
        let outcome = match tokio::time::timeout(self.probe_timeout, llm.probe()).await {
            Ok(Ok(())) => ReadinessState::Ready,
            Ok(Err(e)) => ReadinessState::Failed(e.to_string()),
            Err(_) => ReadinessState::Failed(format!("probe timed out after {:?}", self.probe_timeout)),
        };

        match &outcome {
            ReadinessState::Ready => info!("LLM service probe succeeded (model: {})", llm.model()),
            ReadinessState::Failed(reason) => warn!("LLM service probe failed: {}", reason),
            ReadinessState::Uninitialized => {}
        }
        let ready = outcome == ReadinessState::Ready;
        *self.state.write().await = outcome;
        ready
    }

    /// Probes only when not already ready.
    pub async fn ensure(&self, llm: &dyn CompletionService) -> bool {
        if self.is_ready().await {
            return true;
        }
        self.probe(llm).await
    }
}
