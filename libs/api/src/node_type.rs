//! Node registry and node-type equivalence classes.
//!
//! Nodes sharing a [`crate::NODE_TYPE_LABEL`] value form a class whose
//! representative resource is the component-wise minimum of the members'
//! allocatable resources. Classes are rebuilt wholesale from the registry,
//! never patched incrementally.

use std::collections::BTreeMap;

use stride_id::NodeName;
use tracing::{debug, warn};

use crate::{NodeInfo, NodeObject, Resource, ResourceList, TranslateError, NODE_RESOURCE};

/// One node-type equivalence class.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTypeInfo {
    /// Largest resource every member can offer.
    pub resource: Resource,
    /// Members ordered by node name.
    pub nodes: Vec<NodeInfo>,
}

impl NodeTypeInfo {
    fn new(first: &NodeInfo) -> Self {
        Self {
            resource: first.allocatable.clone(),
            nodes: vec![first.clone()],
        }
    }

    fn add_node(&mut self, node: &NodeInfo) {
        self.resource = self.resource.min(&node.allocatable);
        self.nodes.push(node.clone());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// All node-type classes, keyed by type name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeTypes {
    types: BTreeMap<String, NodeTypeInfo>,
}

impl NodeTypes {
    /// Groups typed nodes into classes. Untyped nodes belong to no class.
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a NodeInfo>) -> Self {
        let mut sorted: Vec<&NodeInfo> = nodes.into_iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut types: BTreeMap<String, NodeTypeInfo> = BTreeMap::new();
        for node in sorted {
            let Some(node_type) = &node.node_type else {
                continue;
            };
            match types.get_mut(node_type) {
                Some(info) => info.add_node(node),
                None => {
                    types.insert(node_type.clone(), NodeTypeInfo::new(node));
                }
            }
        }

        Self { types }
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeTypeInfo> {
        self.types.get(node_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeTypeInfo)> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Replaces a symbolic one-node request with the class's representative
    /// resource.
    ///
    /// Lists without [`NODE_RESOURCE`] (or with a zero amount of it) pass
    /// through unchanged.
    pub fn translate_resources(
        &self,
        list: &ResourceList,
        node_type: Option<&str>,
    ) -> Result<ResourceList, TranslateError> {
        let Some(quantity) = list.get(NODE_RESOURCE) else {
            return Ok(list.clone());
        };
        if quantity.is_zero() {
            return Ok(list.clone());
        }

        if list.len() > 1 {
            return Err(TranslateError::MixedResources {
                resource: NODE_RESOURCE.to_string(),
                others: list
                    .keys()
                    .filter(|k| k.as_str() != NODE_RESOURCE)
                    .cloned()
                    .collect(),
            });
        }

        if quantity.millis() != 1000 {
            return Err(TranslateError::InvalidNodeQuantity {
                resource: NODE_RESOURCE.to_string(),
                quantity: quantity.to_string(),
            });
        }

        let Some(node_type) = node_type.filter(|t| !t.is_empty()) else {
            return Err(TranslateError::MissingNodeType {
                resource: NODE_RESOURCE.to_string(),
            });
        };

        self.types
            .get(node_type)
            .map(|info| info.resource.to_list())
            .ok_or_else(|| TranslateError::UnknownNodeType(node_type.to_string()))
    }
}

/// Per-node bookkeeping plus the node-type classes derived from it.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeName, NodeInfo>,
    types: NodeTypes,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observed node.
    ///
    /// Returns true if the node-type classes were rebuilt: on first sight of a
    /// node, or when its allocatable resource or declared type changed. Nodes
    /// with an invalid name are skipped.
    pub fn add_or_update(&mut self, node: NodeObject) -> bool {
        let name = match NodeName::parse(&node.name) {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "ignoring node with invalid name");
                return false;
            }
        };
        let info = NodeInfo::new(node);

        let membership_changed = match self.nodes.get(&name) {
            None => true,
            Some(old) => {
                !old.allocatable.equal_strict(&info.allocatable) || old.node_type != info.node_type
            }
        };

        self.nodes.insert(name, info);
        if membership_changed {
            self.rebuild();
        }
        membership_changed
    }

    /// Removes a node. Returns true if it was present.
    pub fn delete(&mut self, name: &str) -> bool {
        let Ok(name) = NodeName::parse(name) else {
            return false;
        };
        if self.nodes.remove(&name).is_none() {
            return false;
        }
        self.rebuild();
        true
    }

    /// Recomputes every class from the current node set.
    pub fn rebuild(&mut self) {
        self.types = NodeTypes::build(self.nodes.values());
        debug!(
            nodes = self.nodes.len(),
            node_types = self.types.len(),
            "rebuilt node types"
        );
    }

    pub fn get(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.get(&NodeName::parse(name).ok()?)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_types(&self) -> &NodeTypes {
        &self.types
    }

    pub fn translate_resources(
        &self,
        list: &ResourceList,
        node_type: Option<&str>,
    ) -> Result<ResourceList, TranslateError> {
        self.types.translate_resources(list, node_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Quantity, NODE_TYPE_LABEL};

    fn node(name: &str, node_type: &str, cpu: i64, mem_gi: i64) -> NodeObject {
        let mut allocatable = ResourceList::new();
        allocatable.insert("cpu".to_string(), Quantity::from_value(cpu));
        allocatable.insert(
            "memory".to_string(),
            Quantity::from_value(mem_gi * 1024 * 1024 * 1024),
        );
        NodeObject {
            name: name.to_string(),
            labels: [(NODE_TYPE_LABEL.to_string(), node_type.to_string())].into(),
            allocatable,
            ..Default::default()
        }
    }

    fn one_node() -> ResourceList {
        [(NODE_RESOURCE.to_string(), Quantity::from_value(1))].into()
    }

    #[test]
    fn test_representative_is_component_min() {
        let mut reg = NodeRegistry::new();
        reg.add_or_update(node("a", "v100", 8, 64));
        reg.add_or_update(node("b", "v100", 16, 32));

        let info = reg.node_types().get("v100").unwrap();
        assert_eq!(info.resource.cpu_milli, 8000);
        assert_eq!(info.resource.memory_bytes, 32 * 1024 * 1024 * 1024);
        for member in &info.nodes {
            assert!(info.resource.less_equal(&member.allocatable));
        }
    }

    #[test]
    fn test_members_sorted_by_name() {
        let mut reg = NodeRegistry::new();
        reg.add_or_update(node("z", "cpu", 4, 8));
        reg.add_or_update(node("a", "cpu", 4, 8));
        let names: Vec<_> = reg
            .node_types()
            .get("cpu")
            .unwrap()
            .nodes
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "z"]);
    }

    #[test]
    fn test_rebuild_triggers() {
        let mut reg = NodeRegistry::new();
        assert!(reg.add_or_update(node("a", "cpu", 4, 8)));
        assert!(!reg.add_or_update(node("a", "cpu", 4, 8)));
        assert!(reg.add_or_update(node("a", "cpu", 2, 8)));
        assert!(reg.add_or_update(node("a", "gpu", 2, 8)));
        assert!(reg.delete("a"));
        assert!(!reg.delete("a"));
        assert!(reg.node_types().is_empty());
    }

    #[test]
    fn test_invalid_node_name_skipped() {
        let mut reg = NodeRegistry::new();
        assert!(!reg.add_or_update(node("GPU_Node", "cpu", 4, 8)));
        assert!(reg.is_empty());
        assert!(reg.get("GPU_Node").is_none());
        assert!(!reg.delete("GPU_Node"));

        assert!(reg.add_or_update(node("gpu-node.rack2", "cpu", 4, 8)));
        assert!(reg.get("gpu-node.rack2").is_some());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut reg = NodeRegistry::new();
        reg.add_or_update(node("a", "cpu", 4, 8));
        reg.add_or_update(node("b", "cpu", 2, 16));
        reg.add_or_update(node("c", "gpu", 8, 64));

        reg.rebuild();
        let first = reg.node_types().clone();
        reg.rebuild();
        assert_eq!(&first, reg.node_types());
    }

    #[test]
    fn test_untyped_nodes_have_no_class() {
        let mut reg = NodeRegistry::new();
        reg.add_or_update(node("a", "", 4, 8));
        assert_eq!(reg.len(), 1);
        assert!(reg.node_types().is_empty());
    }

    #[test]
    fn test_translate_passthrough() {
        let reg = NodeRegistry::new();
        let list: ResourceList = [("cpu".to_string(), Quantity::from_value(2))].into();
        assert_eq!(reg.translate_resources(&list, None).unwrap(), list);

        let zero: ResourceList = [(NODE_RESOURCE.to_string(), Quantity::ZERO)].into();
        assert_eq!(reg.translate_resources(&zero, Some("x")).unwrap(), zero);
    }

    #[test]
    fn test_translate_one_node() {
        let mut reg = NodeRegistry::new();
        reg.add_or_update(node("a", "v100", 8, 64));
        let out = reg.translate_resources(&one_node(), Some("v100")).unwrap();
        assert_eq!(out["cpu"], Quantity::from_value(8));
    }

    #[test]
    fn test_translate_errors() {
        let mut reg = NodeRegistry::new();
        reg.add_or_update(node("a", "v100", 8, 64));

        let mut mixed = one_node();
        mixed.insert("cpu".to_string(), Quantity::from_value(1));
        assert!(matches!(
            reg.translate_resources(&mixed, Some("v100")),
            Err(TranslateError::MixedResources { .. })
        ));

        let two: ResourceList = [(NODE_RESOURCE.to_string(), Quantity::from_value(2))].into();
        assert!(matches!(
            reg.translate_resources(&two, Some("v100")),
            Err(TranslateError::InvalidNodeQuantity { .. })
        ));

        assert!(matches!(
            reg.translate_resources(&one_node(), Some("k80")),
            Err(TranslateError::UnknownNodeType(_))
        ));

        assert!(matches!(
            reg.translate_resources(&one_node(), None),
            Err(TranslateError::MissingNodeType { .. })
        ));
    }
}
