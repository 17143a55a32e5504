//! Node observations and the per-node bookkeeping derived from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    Resource, ResourceList, GPU_MEMORY_RESOURCE, GPU_NUMBER_RESOURCE, NODE_TYPE_LABEL,
};

/// Condition type reporting overall node health.
pub const NODE_READY_CONDITION: &str = "Ready";

/// A node condition as reported by the node source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    /// `"True"`, `"False"` or `"Unknown"`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Effect of a taint on scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// A node taint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

/// A node as delivered by the node watch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeObject {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub capacity: ResourceList,
    #[serde(default)]
    pub allocatable: ResourceList,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub unschedulable: bool,
}

/// Readiness of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Ready,
    NotReady { reason: String },
}

/// A single GPU device on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub id: usize,
    /// Device memory in the unit the node reports.
    pub memory: u64,
}

/// Per-node bookkeeping derived from a [`NodeObject`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    /// `None` until the node has been observed.
    pub node: Option<NodeObject>,
    /// Declared type from [`NODE_TYPE_LABEL`]; `None` means untyped.
    pub node_type: Option<String>,
    pub state: NodeState,
    pub allocatable: Resource,
    pub capacity: Resource,
    pub gpu_devices: BTreeMap<usize, GpuDevice>,
}

impl NodeInfo {
    /// Builds node info from an observed node.
    pub fn new(node: NodeObject) -> Self {
        let node_type = node
            .labels
            .get(NODE_TYPE_LABEL)
            .filter(|t| !t.is_empty())
            .cloned();

        Self {
            name: node.name.clone(),
            node_type,
            state: readiness(&node),
            allocatable: Resource::from_list(&node.allocatable),
            capacity: Resource::from_list(&node.capacity),
            gpu_devices: gpu_devices(&node),
            node: Some(node),
        }
    }

    /// Placeholder for a node that is known by name only.
    #[cfg(test)]
    pub(crate) fn uninitialized(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: None,
            node_type: None,
            state: NodeState::NotReady {
                reason: "UnInitialized".to_string(),
            },
            allocatable: Resource::empty(),
            capacity: Resource::empty(),
            gpu_devices: BTreeMap::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == NodeState::Ready
    }

    /// Ready, not cordoned, and free of hard taints.
    pub fn is_schedulable(&self) -> bool {
        let Some(node) = &self.node else {
            return false;
        };
        self.is_ready()
            && !node.unschedulable
            && !node
                .taints
                .iter()
                .any(|t| matches!(t.effect, TaintEffect::NoSchedule | TaintEffect::NoExecute))
    }
}

/// Taints are ignored here; schedulability is decided separately.
fn readiness(node: &NodeObject) -> NodeState {
    let not_ready = node
        .conditions
        .iter()
        .find(|c| c.condition_type == NODE_READY_CONDITION && c.status != "True");

    match not_ready {
        Some(c) => NodeState::NotReady {
            reason: c.reason.clone().unwrap_or_else(|| "NotReady".to_string()),
        },
        None => NodeState::Ready,
    }
}

fn gpu_devices(node: &NodeObject) -> BTreeMap<usize, GpuDevice> {
    let mut devices = BTreeMap::new();

    let Some(total_memory) = node.capacity.get(GPU_MEMORY_RESOURCE) else {
        return devices;
    };
    let Some(count) = node.capacity.get(GPU_NUMBER_RESOURCE) else {
        return devices;
    };

    let count = count.value();
    if count <= 0 {
        warn!(
            node = %node.name,
            gpu_number = %node.capacity[GPU_NUMBER_RESOURCE],
            "invalid GPU device count"
        );
        return devices;
    }

    let per_device = (total_memory.value().max(0) / count) as u64;
    for id in 0..count as usize {
        devices.insert(
            id,
            GpuDevice {
                id,
                memory: per_device,
            },
        );
    }
    devices
}
