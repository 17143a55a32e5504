//! Completed-iteration probe run against a job's lead pod.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("pod {namespace}/{pod} unreachable: {reason}")]
    Unreachable {
        namespace: String,
        pod: String,
        reason: String,
    },

    #[error("malformed iteration counter: {0:?}")]
    Malformed(String),
}

/// Reads the completed-iteration counter a training process publishes.
#[async_trait]
pub trait IterationProbe: Send + Sync {
    async fn completed_iterations(&self, namespace: &str, pod: &str) -> Result<u64, ProbeError>;
}

/// Parses the plain-text counter printed by the lead pod.
pub fn parse_iteration_output(output: &str) -> Result<u64, ProbeError> {
    output
        .trim()
        .parse()
        .map_err(|_| ProbeError::Malformed(output.to_string()))
}

/// Probe that never reaches anything.
pub struct NoopProbe;

#[async_trait]
impl IterationProbe for NoopProbe {
    async fn completed_iterations(&self, namespace: &str, pod: &str) -> Result<u64, ProbeError> {
        Err(ProbeError::Unreachable {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            reason: "no probe configured".to_string(),
        })
    }
}

/// Probe answering from a fixed table of raw outputs.
#[derive(Default)]
pub struct StaticProbe {
    outputs: Mutex<HashMap<(String, String), String>>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw output for a pod.
    pub fn set(&self, namespace: &str, pod: &str, output: impl Into<String>) {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((namespace.to_string(), pod.to_string()), output.into());
    }

    /// Makes a pod unreachable.
    pub fn remove(&self, namespace: &str, pod: &str) {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(namespace.to_string(), pod.to_string()));
    }
}

#[async_trait]
impl IterationProbe for StaticProbe {
    async fn completed_iterations(&self, namespace: &str, pod: &str) -> Result<u64, ProbeError> {
        let output = self
            .outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned();

        match output {
            Some(output) => parse_iteration_output(&output),
            None => Err(ProbeError::Unreachable {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                reason: "no such pod".to_string(),
            }),
        }
    }
}
