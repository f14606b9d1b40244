//! # Capability Registry
//!
//! Maps capability names (e.g. "spam-classify", "ci-log-parse") to
//! invocable handlers. Pure lookup with no ambient global state: the
//! registry is constructed at startup, populated explicitly, and passed
//! into the orchestrator and worker pool.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Failures reported by capability handlers.
///
/// The transient/permanent split drives the retry path: transient errors
/// (and timeouts) are retried with backoff, permanent errors fail the step
/// immediately.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Worth retrying: timeouts, network blips, downstream overload
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// Retrying cannot help: malformed input, rejected by policy
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// An invocable unit of external functionality: one detection or
/// remediation service behind a narrow async interface.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Execute the capability against a step payload. The worker wraps the
    /// call in the step's timeout; implementations need not enforce one.
    async fn invoke(&self, payload: &Value) -> HandlerResult;
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub total_capabilities: usize,
    pub capability_names: Vec<String>,
}

/// Concurrent capability name -> handler mapping
#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: DashMap<String, Arc<dyn CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a capability name. Re-registering a name
    /// replaces the previous handler.
    pub fn register(&self, capability: impl Into<String>, handler: Arc<dyn CapabilityHandler>) {
        let capability = capability.into();
        info!(capability = %capability, "📚 Capability registered");
        self.handlers.insert(capability, handler);
    }

    /// Resolve a capability to its handler, if registered.
    pub fn resolve(&self, capability: &str) -> Option<Arc<dyn CapabilityHandler>> {
        let handler = self.handlers.get(capability).map(|entry| entry.clone());
        if handler.is_none() {
            debug!(capability = capability, "Capability not registered");
        }
        handler
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.handlers.contains_key(capability)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut capability_names: Vec<String> =
            self.handlers.iter().map(|entry| entry.key().clone()).collect();
        capability_names.sort();
        RegistryStats {
            total_capabilities: capability_names.len(),
            capability_names,
        }
    }
}
