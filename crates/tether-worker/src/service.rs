use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_dispatch::RequestMode;
use tether_protocol::RemoteError;
use tether_snapshot::Snapshot;
use tether_types::CancellationSignal;

/// How the worker schedules one language-service method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub mode: RequestMode,
    /// Results depend only on (params, snapshot) and may be cached.
    pub cacheable: bool,
}

impl MethodDescriptor {
    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: RequestMode::ReadOnly,
            cacheable: false,
        }
    }

    pub fn mutating(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: RequestMode::Mutating,
            cacheable: false,
        }
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }
}

/// The analysis capability a worker hosts.
///
/// Resolved once when the worker starts. The worker never looks at what a
/// method computes; it only schedules calls according to
/// [`methods`](Self::methods) and hands each one a pinned snapshot.
#[async_trait]
pub trait LanguageService: Send + Sync + 'static {
    /// Methods this service answers.
    fn methods(&self) -> Vec<MethodDescriptor>;

    /// Run `method` against `snapshot`. Long computations should poll
    /// `cancel` and return [`RemoteError::canceled`] once it fires.
    async fn execute(
        &self,
        method: &str,
        snapshot: Arc<Snapshot>,
        params: Value,
        cancel: CancellationSignal,
    ) -> Result<Value, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_builders() {
        let d = MethodDescriptor::read_only("hover").cacheable();
        assert_eq!(d.mode, RequestMode::ReadOnly);
        assert!(d.cacheable);
        let m = MethodDescriptor::mutating("apply-edit");
        assert!(m.mode.is_mutating());
        assert!(!m.cacheable);
    }
}
