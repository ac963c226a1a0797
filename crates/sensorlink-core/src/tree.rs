//! Node → timestamp → field trees.
//!
//! A [`Response`] owns response nodes, each node owns timestamps, each
//! timestamp owns fields. Every level is a [`KeyedSet`]: `add_*` returns the
//! created element or `None` for a duplicate key, `del_*` reports whether
//! anything was removed, and `set_*` replaces the whole level.

use crate::field::{Field, FieldValue};
use crate::keyed::{Keyed, KeyedSet};

/// Identity of a node: id plus optional data source and partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    id: String,
    /// Data source controlling the node (`src`)
    pub source_id: Option<String>,
    /// Partition narrowing the kind of node (`pt`)
    pub partition: Option<String>,
}

impl NodeRef {
    /// Create a node reference with only an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_id: None,
            partition: None,
        }
    }

    /// Create a node reference with all identity attributes.
    #[must_use]
    pub fn with_source(
        id: impl Into<String>,
        source_id: Option<&str>,
        partition: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.map(ToString::to_string),
            partition: partition.map(ToString::to_string),
        }
    }

    /// Node id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Keyed for NodeRef {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Shared node-list behaviour of requests, responses and control messages.
pub trait NodeContainer {
    /// The element type stored per node.
    type Node: Keyed;

    /// The nodes of this container.
    fn node_set(&self) -> &KeyedSet<Self::Node>;

    /// Mutable access to the nodes of this container.
    fn node_set_mut(&mut self) -> &mut KeyedSet<Self::Node>;

    /// Build a node element from its identity.
    fn make_node(node: NodeRef) -> Self::Node;

    /// Add a node.
    ///
    /// Returns `None` if a node with this id already exists.
    fn add_node(
        &mut self,
        id: &str,
        source_id: Option<&str>,
        partition: Option<&str>,
    ) -> Option<&mut Self::Node> {
        if self.node_set().contains(id) {
            tracing::debug!(node_id = id, "Ignoring duplicate node");
            return None;
        }
        let node = Self::make_node(NodeRef::with_source(id, source_id, partition));
        self.node_set_mut().insert(node)
    }

    /// Remove a node, returning whether it existed.
    fn del_node(&mut self, id: &str) -> bool {
        self.node_set_mut().remove(id)
    }

    /// Replace all nodes.
    fn set_nodes(&mut self, nodes: impl IntoIterator<Item = Self::Node>)
    where
        Self: Sized,
    {
        self.node_set_mut().replace_all(nodes);
    }

    /// Remove all nodes.
    fn del_nodes(&mut self) {
        self.node_set_mut().clear();
    }

    /// The nodes in insertion order.
    fn nodes(&self) -> std::slice::Iter<'_, Self::Node> {
        self.node_set().iter()
    }
}

/// A point in time grouping field readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    value: String,
    fields: KeyedSet<Field>,
}

impl Timestamp {
    /// Create an empty timestamp.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            fields: KeyedSet::new(),
        }
    }

    /// The ISO-8601 instant.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Add a field, `None` if the name is taken.
    pub fn add_field(&mut self, field: Field) -> Option<&mut Field> {
        self.fields.insert(field)
    }

    /// Add a flagless field built from a name and value.
    pub fn add_data(&mut self, name: impl Into<String>, value: FieldValue) -> Option<&mut Field> {
        self.add_field(Field::new(name, value))
    }

    /// Remove a field by name.
    pub fn del_field(&mut self, name: &str) -> bool {
        self.fields.remove(name)
    }

    /// Replace all fields.
    pub fn set_fields(&mut self, fields: impl IntoIterator<Item = Field>) {
        self.fields.replace_all(fields);
    }

    /// Remove all fields.
    pub fn del_fields(&mut self) {
        self.fields.clear();
    }

    /// Look a field up by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// The fields in insertion order.
    #[must_use]
    pub fn fields(&self) -> &KeyedSet<Field> {
        &self.fields
    }
}

impl Keyed for Timestamp {
    fn key(&self) -> &str {
        &self.value
    }
}

/// A node in a response, owning its timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseNode {
    node: NodeRef,
    timestamps: KeyedSet<Timestamp>,
}

impl ResponseNode {
    /// Create a node with no timestamps.
    #[must_use]
    pub fn new(node: NodeRef) -> Self {
        Self {
            node,
            timestamps: KeyedSet::new(),
        }
    }

    /// Node identity.
    #[must_use]
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// Node id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.node.id()
    }

    /// Add a timestamp, `None` if the value already exists.
    pub fn add_timestamp(&mut self, value: impl Into<String>) -> Option<&mut Timestamp> {
        self.timestamps.insert(Timestamp::new(value))
    }

    /// Add a fully built timestamp, `None` if the value already exists.
    pub fn insert_timestamp(&mut self, timestamp: Timestamp) -> Option<&mut Timestamp> {
        self.timestamps.insert(timestamp)
    }

    /// Remove a timestamp by value.
    pub fn del_timestamp(&mut self, value: &str) -> bool {
        self.timestamps.remove(value)
    }

    /// Replace all timestamps.
    pub fn set_timestamps(&mut self, timestamps: impl IntoIterator<Item = Timestamp>) {
        self.timestamps.replace_all(timestamps);
    }

    /// Remove all timestamps.
    pub fn del_timestamps(&mut self) {
        self.timestamps.clear();
    }

    /// Get the timestamp with this value, creating it if needed.
    pub fn timestamp_entry(&mut self, value: &str) -> &mut Timestamp {
        self.timestamps
            .get_or_insert_with(value, || Timestamp::new(value))
    }

    /// The timestamps in insertion order.
    #[must_use]
    pub fn timestamps(&self) -> &KeyedSet<Timestamp> {
        &self.timestamps
    }

    /// Merge another node's timestamps into this one.
    ///
    /// Unknown timestamps are appended; fields of known timestamps are added
    /// under the duplicate-name rule.
    pub fn merge(&mut self, other: ResponseNode) {
        for timestamp in other.timestamps {
            if self.timestamps.contains(timestamp.value()) {
                let target = self.timestamp_entry(timestamp.value());
                for field in timestamp.fields {
                    target.add_field(field);
                }
            } else {
                self.timestamps.insert(timestamp);
            }
        }
    }
}

impl Keyed for ResponseNode {
    fn key(&self) -> &str {
        self.node.id()
    }
}

/// Sensor data answering one request, possibly one chunk of several.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    /// Id of the request being answered
    pub id: String,
    /// More chunks follow this one
    pub more: bool,
    nodes: KeyedSet<ResponseNode>,
}

impl Response {
    /// Create an empty response for a request id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            more: false,
            nodes: KeyedSet::new(),
        }
    }

    /// Look a node up by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&ResponseNode> {
        self.nodes.get(id)
    }

    /// Get the node with this identity, creating it if needed.
    pub fn node_entry(&mut self, node: &NodeRef) -> &mut ResponseNode {
        self.nodes
            .get_or_insert_with(node.id(), || ResponseNode::new(node.clone()))
    }

    /// Merge another response into this one, keyed by node id then timestamp.
    pub fn merge(&mut self, other: Response) {
        for node in other.nodes {
            if self.nodes.contains(node.id()) {
                let target = self.node_entry(&node.node().clone());
                target.merge(node);
            } else {
                self.nodes.insert(node);
            }
        }
    }

    /// Total number of fields across all nodes and timestamps.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|node| node.timestamps().iter())
            .map(|timestamp| timestamp.fields().len())
            .sum()
    }

    /// Check if the response carries no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Take the nodes out, leaving this response empty.
    pub fn take_nodes(&mut self) -> KeyedSet<ResponseNode> {
        std::mem::take(&mut self.nodes)
    }
}

impl NodeContainer for Response {
    type Node = ResponseNode;

    fn node_set(&self) -> &KeyedSet<ResponseNode> {
        &self.nodes
    }

    fn node_set_mut(&mut self) -> &mut KeyedSet<ResponseNode> {
        &mut self.nodes
    }

    fn make_node(node: NodeRef) -> ResponseNode {
        ResponseNode::new(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValue;
    use crate::flags::{Category, Quality};

    fn temperature(value: &str) -> Field {
        Field::new("Temperature", FieldValue::quantity(value, Some("K")).unwrap())
    }

    #[test]
    fn build_response_tree() {
        let mut resp = Response::new("1");
        let node = resp.add_node("Device02", None, None).unwrap();
        let ts = node.add_timestamp("2013-03-07T16:24:30").unwrap();
        ts.add_field(
            temperature("-12.42")
                .with_category(Category::Momentary, true)
                .with_quality(Quality::AutomaticReadout, true),
        )
        .unwrap();

        resp.add_node("EmptyDevice", None, None).unwrap();
        resp.add_node("Device04", None, None)
            .unwrap()
            .add_timestamp("EmptyTimestamp");

        let ids: Vec<&str> = resp.nodes().map(ResponseNode::id).collect();
        assert_eq!(ids, vec!["Device02", "EmptyDevice", "Device04"]);
        assert_eq!(resp.field_count(), 1);
    }

    #[test]
    fn duplicate_adds_leave_tree_unchanged() {
        let mut resp = Response::new("1");
        resp.add_node("Device02", Some("src"), None).unwrap();
        let before = resp.clone();

        assert!(resp.add_node("Device02", None, None).is_none());
        assert_eq!(resp, before);

        let node = resp.add_node("Device03", None, None).unwrap();
        node.add_timestamp("2013-03-07T16:24:30").unwrap();
        assert!(node.add_timestamp("2013-03-07T16:24:30").is_none());
        assert_eq!(node.timestamps().len(), 1);

        let ts = node.timestamp_entry("2013-03-07T16:24:30");
        assert!(ts.add_field(temperature("1")).is_some());
        assert!(ts.add_field(temperature("2")).is_none());
        assert_eq!(ts.field("Temperature").unwrap().value().text(), "1");
    }

    #[test]
    fn delete_missing_returns_false() {
        let mut resp = Response::new("1");
        resp.add_node("Device02", None, None).unwrap();

        assert!(!resp.del_node("Nope"));
        assert!(resp.del_node("Device02"));
        assert!(resp.is_empty());

        let mut ts = Timestamp::new("2013-03-07T16:24:30");
        assert!(!ts.del_field("Temperature"));
        ts.add_field(temperature("1"));
        assert!(ts.del_field("Temperature"));
    }

    #[test]
    fn set_nodes_rebuilds_membership() {
        let mut resp = Response::new("1");
        resp.add_node("Old", None, None);
        resp.set_nodes(vec![
            ResponseNode::new(NodeRef::new("A")),
            ResponseNode::new(NodeRef::new("B")),
            ResponseNode::new(NodeRef::new("A")),
        ]);

        let ids: Vec<&str> = resp.nodes().map(ResponseNode::id).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(resp.add_node("Old", None, None).is_some());
        assert!(resp.add_node("A", None, None).is_none());
    }

    #[test]
    fn merge_adds_timestamps_to_open_nodes() {
        let mut first = Response::new("7");
        first
            .add_node("pump1", None, None)
            .unwrap()
            .add_timestamp("2020-01-01T00:00:00")
            .unwrap()
            .add_field(temperature("20"));

        let mut second = Response::new("7");
        let node = second.add_node("pump1", None, None).unwrap();
        node.add_timestamp("2020-01-01T00:00:00")
            .unwrap()
            .add_data("Pressure", FieldValue::quantity("1.2", Some("bar")).unwrap());
        node.add_timestamp("2020-01-01T00:01:00")
            .unwrap()
            .add_field(temperature("21"));
        second.add_node("pump2", None, None);

        first.merge(second);

        let pump1 = first.node("pump1").unwrap();
        assert_eq!(pump1.timestamps().len(), 2);
        let ts = pump1.timestamps().get("2020-01-01T00:00:00").unwrap();
        let names: Vec<&str> = ts.fields().keys().collect();
        assert_eq!(names, vec!["Temperature", "Pressure"]);
        assert!(first.node("pump2").is_some());
        assert_eq!(first.field_count(), 3);
    }
}
