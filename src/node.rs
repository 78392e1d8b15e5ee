use crate::connection::Connection;
use crate::error::{Result, SscError};
use crate::protocol::{self, Limits, ValueType};
use crate::value::DynamicValue;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Discovery state of one parameter address
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    /// Not yet queried
    Unknown,
    /// Schema says this address has sub-addresses, not yet expanded
    UnknownChildren,
    /// Schema says this address is a leaf, value and limits not yet fetched
    UnknownValue,
    /// Expanded branch; order is significant (leaves first, then branches,
    /// alphabetical within each group)
    Children(Vec<ParameterNode>),
    /// Populated leaf
    Value(DynamicValue),
    /// Terminal failure for this node; does not propagate to siblings
    Error(String),
}

/// One address in a device's parameter namespace.
///
/// Nodes form a tree rooted at a synthetic root whose name is not part of
/// any address. Each node carries its full path from the root, so the
/// address a device understands can be produced without walking parents.
/// Children are exclusively owned by their parent's `Children` state.
///
/// Once a node reaches `Children` or `Value` it stays within that state
/// tag: branches re-expand their children, value leaves re-fetch, but a
/// leaf never becomes a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterNode {
    id: Uuid,
    name: String,
    path: Vec<String>,
    limits: Option<Limits>,
    state: NodeState,
}

impl ParameterNode {
    /// Create the synthetic root of a device's parameter tree
    pub fn root() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "/".to_string(),
            path: Vec::new(),
            limits: None,
            state: NodeState::Unknown,
        }
    }

    fn child(parent_path: &[String], name: &str, state: NodeState) -> Self {
        let mut path = parent_path.to_vec();
        path.push(name.to_string());
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            path,
            limits: None,
            state,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address segments the device understands (synthetic root omitted)
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Dotted address for display and logging
    pub fn address(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.join("/")
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn limits(&self) -> Option<&Limits> {
        self.limits.as_ref()
    }

    /// Record a node-local failure in the node's state; transport errors
    /// pass through untouched.
    fn record_failure(&mut self, error: SscError) -> SscError {
        if error.is_node_local() {
            self.state = NodeState::Error(error.to_string());
        }
        error
    }

    /// Discover this node and, optionally, everything below it.
    ///
    /// - `Unknown`/`UnknownChildren`: query the schema, create children and
    ///   re-enter to continue on the freshly created branch.
    /// - `Children`: recurse into each child when `recursive`, otherwise
    ///   leave them unexpanded for on-demand expansion.
    /// - `UnknownValue`: fetch limits, then the value.
    /// - `Value`: re-fetch, decoding by the stored value's tag.
    /// - `Error`: sticky, no retry.
    ///
    /// Node-local failures inside the recursion are recorded on the
    /// failing node and do not stop sibling discovery.
    pub fn populate<'a>(
        &'a mut self,
        connection: &'a Connection,
        recursive: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match &self.state {
                NodeState::Unknown | NodeState::UnknownChildren => {
                    self.populate_internal(connection).await?;
                    self.populate(connection, recursive).await
                }
                NodeState::Children(_) => {
                    if !recursive {
                        return Ok(());
                    }
                    let NodeState::Children(children) = &mut self.state else {
                        return Ok(());
                    };
                    for node in children.iter_mut() {
                        if let Err(e) = node.populate(connection, true).await {
                            if e.is_node_local() {
                                tracing::warn!("Discovery failed for {}: {}", node.address(), e);
                                node.state = NodeState::Error(e.to_string());
                            } else {
                                return Err(e);
                            }
                        }
                    }
                    Ok(())
                }
                NodeState::UnknownValue => self.populate_leaf(connection).await,
                NodeState::Value(_) => self.fetch_leaf(connection).await,
                NodeState::Error(_) => Ok(()),
            }
        })
    }

    /// Expand this node into children from a live schema query
    async fn populate_internal(&mut self, connection: &Connection) -> Result<()> {
        let command = protocol::schema_command(&self.path);
        let sent = connection.send_command(&command).await;
        let reply = sent.map_err(|e| self.record_failure(e))?;
        let parsed = protocol::parse_schema_reply(&reply, &self.path);
        let entries = parsed.map_err(|e| self.record_failure(e))?;

        let mut leaves = Vec::new();
        let mut branches = Vec::new();
        for (name, shape) in &entries {
            match shape {
                Value::Null => {
                    leaves.push(ParameterNode::child(&self.path, name, NodeState::UnknownValue));
                }
                Value::Object(map) if map.is_empty() => {
                    branches.push(ParameterNode::child(
                        &self.path,
                        name,
                        NodeState::UnknownChildren,
                    ));
                }
                _ => {
                    let error = SscError::MalformedResponse(format!(
                        "unexpected schema shape for '{name}'"
                    ));
                    return Err(self.record_failure(error));
                }
            }
        }
        self.state = NodeState::Children(order_children(leaves, branches));
        Ok(())
    }

    /// Fetch limits and the initial value of an undiscovered leaf.
    ///
    /// The limits type, when reported, selects the decode; without it the
    /// value is probed in a fixed order. A leaf that decodes as nothing
    /// ends up in `Error("Unknown type")`.
    async fn populate_leaf(&mut self, connection: &Connection) -> Result<()> {
        let command = protocol::limits_command(&self.path);
        let sent = connection.send_command(&command).await;
        let reply = sent.map_err(|e| self.record_failure(e))?;
        let parsed = protocol::parse_limits_reply(&reply, &self.path);
        self.limits = Some(parsed.map_err(|e| self.record_failure(e))?);

        let raw = self.read_raw(connection).await?;
        let decoded = match self.limits.as_ref().and_then(|l| l.value_type) {
            Some(value_type) => decode_leaf_typed(value_type, &raw),
            None => decode_leaf_probe(&raw),
        };
        match decoded {
            Some(value) => {
                self.state = NodeState::Value(value);
            }
            None => {
                tracing::warn!("Could not type value at {}", self.address());
                self.state = NodeState::Error("Unknown type".to_string());
            }
        }
        Ok(())
    }

    /// Re-fetch a populated leaf, decoding by the stored value's tag.
    /// The type is never re-inferred.
    async fn fetch_leaf(&mut self, connection: &Connection) -> Result<()> {
        let raw = self.read_raw(connection).await?;
        let NodeState::Value(existing) = &self.state else {
            return Ok(());
        };
        let value = DynamicValue::decode_value(&raw, existing)?;
        self.state = NodeState::Value(value);
        Ok(())
    }

    /// Write a populated leaf's value to the device. The reply echoes the
    /// applied value (possibly clipped to the device's limits), which
    /// replaces the stored one.
    pub async fn send_leaf(&mut self, connection: &Connection) -> Result<()> {
        let NodeState::Value(value) = &self.state else {
            return Err(SscError::AddressNotFound);
        };
        let command = protocol::write_command(&self.path, value);
        let reply = connection.send_command(&command).await?;
        let raw = protocol::parse_value_reply(&reply, &self.path)?;
        let applied = DynamicValue::decode_value(&raw, value)?;
        self.state = NodeState::Value(applied);
        Ok(())
    }

    async fn read_raw(&mut self, connection: &Connection) -> Result<Value> {
        let command = protocol::read_command(&self.path);
        let sent = connection.send_command(&command).await;
        let reply = sent.map_err(|e| self.record_failure(e))?;
        let parsed = protocol::parse_value_reply(&reply, &self.path);
        parsed.map_err(|e| self.record_failure(e))
    }

    /// Re-fetch every populated leaf below this node
    pub fn fetch_tree<'a>(&'a mut self, connection: &'a Connection) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match &mut self.state {
                NodeState::Children(children) => {
                    for node in children.iter_mut() {
                        if let Err(e) = node.fetch_tree(connection).await {
                            if e.is_node_local() {
                                tracing::warn!("Fetch failed for {}: {}", node.address(), e);
                            } else {
                                return Err(e);
                            }
                        }
                    }
                    Ok(())
                }
                NodeState::Value(_) => self.fetch_leaf(connection).await,
                _ => Ok(()),
            }
        })
    }

    /// Write every populated leaf below this node
    pub fn send_tree<'a>(&'a mut self, connection: &'a Connection) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match &mut self.state {
                NodeState::Children(children) => {
                    for node in children.iter_mut() {
                        if let Err(e) = node.send_tree(connection).await {
                            if e.is_node_local() {
                                tracing::warn!("Send failed for {}: {}", node.address(), e);
                            } else {
                                return Err(e);
                            }
                        }
                    }
                    Ok(())
                }
                NodeState::Value(_) => self.send_leaf(connection).await,
                _ => Ok(()),
            }
        })
    }

    /// Locate a descendant by address segments
    pub fn get_at_path(&self, segments: &[&str]) -> Option<&ParameterNode> {
        let mut node = self;
        for segment in segments {
            let NodeState::Children(children) = &node.state else {
                return None;
            };
            node = children.iter().find(|c| c.name == *segment)?;
        }
        Some(node)
    }

    pub fn get_at_path_mut(&mut self, segments: &[&str]) -> Option<&mut ParameterNode> {
        let mut node = self;
        for segment in segments {
            let NodeState::Children(children) = &mut node.state else {
                return None;
            };
            node = children.iter_mut().find(|c| c.name == *segment)?;
        }
        Some(node)
    }

    /// Flat lookup by node identity across the whole subtree
    pub fn get_node_by_id(&self, id: Uuid) -> Option<&ParameterNode> {
        if self.id == id {
            return Some(self);
        }
        match &self.state {
            NodeState::Children(children) => {
                children.iter().find_map(|c| c.get_node_by_id(id))
            }
            _ => None,
        }
    }

    pub fn get_node_by_id_mut(&mut self, id: Uuid) -> Option<&mut ParameterNode> {
        if self.id == id {
            return Some(self);
        }
        match &mut self.state {
            NodeState::Children(children) => {
                children.iter_mut().find_map(|c| c.get_node_by_id_mut(id))
            }
            _ => None,
        }
    }

    /// Project the populated tree into a value: branches become objects
    /// keyed by child name, value leaves become their value. Unpopulated
    /// and failed nodes are omitted. Used for backups.
    pub fn to_value(&self) -> Option<DynamicValue> {
        match &self.state {
            NodeState::Value(value) => Some(value.clone()),
            NodeState::Children(children) => {
                let entries: BTreeMap<String, DynamicValue> = children
                    .iter()
                    .filter_map(|c| c.to_value().map(|v| (c.name.clone(), v)))
                    .collect();
                Some(DynamicValue::Object(entries))
            }
            _ => None,
        }
    }

    /// Assign object entries back onto matching-named children; the
    /// inverse of [`to_value`](Self::to_value). Only populated leaves
    /// whose value tag matches are overwritten; structural mismatches are
    /// ignored, not fatal. Used by backup restore.
    pub fn load(&mut self, from: &DynamicValue) {
        match (&mut self.state, from) {
            (NodeState::Children(children), DynamicValue::Object(entries)) => {
                for node in children.iter_mut() {
                    if let Some(entry) = entries.get(&node.name) {
                        node.load(entry);
                    }
                }
            }
            (NodeState::Value(stored), value) => {
                if std::mem::discriminant(stored) == std::mem::discriminant(value) {
                    *stored = value.clone();
                }
            }
            _ => {}
        }
    }

    /// The discovered shape of this subtree, suitable for the schema
    /// cache: leaves become null, branches become objects
    pub fn schema_shape(&self) -> Option<DynamicValue> {
        match &self.state {
            NodeState::Value(_) | NodeState::UnknownValue => Some(DynamicValue::Null),
            NodeState::UnknownChildren => Some(DynamicValue::Object(BTreeMap::new())),
            NodeState::Children(children) => {
                let entries: BTreeMap<String, DynamicValue> = children
                    .iter()
                    .filter_map(|c| c.schema_shape().map(|s| (c.name.clone(), s)))
                    .collect();
                Some(DynamicValue::Object(entries))
            }
            NodeState::Unknown | NodeState::Error(_) => None,
        }
    }

    /// Build the subtree from a cached schema shape, skipping live
    /// discovery. Leaves come up as `UnknownValue`, so values and limits
    /// are still fetched on the next populate.
    pub fn seed_from_shape(&mut self, shape: &DynamicValue) -> Result<()> {
        let DynamicValue::Object(entries) = shape else {
            return Err(SscError::MalformedResponse(
                "cached schema shape is not an object".to_string(),
            ));
        };
        let mut leaves = Vec::new();
        let mut branches = Vec::new();
        for (name, entry) in entries {
            match entry {
                DynamicValue::Null => {
                    leaves.push(ParameterNode::child(&self.path, name, NodeState::UnknownValue));
                }
                DynamicValue::Object(map) if map.is_empty() => {
                    branches.push(ParameterNode::child(
                        &self.path,
                        name,
                        NodeState::UnknownChildren,
                    ));
                }
                DynamicValue::Object(_) => {
                    let mut node = ParameterNode::child(&self.path, name, NodeState::Unknown);
                    node.seed_from_shape(entry)?;
                    branches.push(node);
                }
                _ => {
                    return Err(SscError::MalformedResponse(format!(
                        "unexpected cached shape for '{name}'"
                    )));
                }
            }
        }
        self.state = NodeState::Children(order_children(leaves, branches));
        Ok(())
    }
}

/// Sort rule for a freshly expanded branch: all leaves before all
/// branches, each group alphabetical by name
fn order_children(
    mut leaves: Vec<ParameterNode>,
    mut branches: Vec<ParameterNode>,
) -> Vec<ParameterNode> {
    leaves.sort_by(|a, b| a.name.cmp(&b.name));
    branches.sort_by(|a, b| a.name.cmp(&b.name));
    leaves.extend(branches);
    leaves
}

fn decode_scalar(value_type: ValueType, raw: &Value) -> Option<DynamicValue> {
    match value_type {
        ValueType::Boolean => raw.as_bool().map(DynamicValue::Bool),
        ValueType::Number => raw.as_f64().map(DynamicValue::Number),
        ValueType::String => raw.as_str().map(|s| DynamicValue::String(s.to_string())),
    }
}

fn decode_array(value_type: ValueType, raw: &Value) -> Option<DynamicValue> {
    let items = raw.as_array()?;
    items
        .iter()
        .map(|item| decode_scalar(value_type, item))
        .collect::<Option<Vec<_>>>()
        .map(DynamicValue::Array)
}

/// Decode a leaf whose type the limits query reported: scalar first, then
/// the homogeneous array of the same type
fn decode_leaf_typed(value_type: ValueType, raw: &Value) -> Option<DynamicValue> {
    decode_scalar(value_type, raw).or_else(|| decode_array(value_type, raw))
}

/// Decode a leaf with no reported type by probing in a fixed order:
/// bool, number, string, then the three array forms.
///
/// The order is part of the protocol contract with existing devices and
/// must not be reordered, even though probing is inherently ambiguous for
/// payloads that parse under more than one branch.
fn decode_leaf_probe(raw: &Value) -> Option<DynamicValue> {
    decode_scalar(ValueType::Boolean, raw)
        .or_else(|| decode_scalar(ValueType::Number, raw))
        .or_else(|| decode_scalar(ValueType::String, raw))
        .or_else(|| decode_array(ValueType::Boolean, raw))
        .or_else(|| decode_array(ValueType::Number, raw))
        .or_else(|| decode_array(ValueType::String, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(json: serde_json::Value) -> DynamicValue {
        DynamicValue::from_json(&json).unwrap()
    }

    fn child_names(node: &ParameterNode) -> Vec<&str> {
        match node.state() {
            NodeState::Children(children) => children.iter().map(|c| c.name()).collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn seeded_children_sort_leaves_before_branches() {
        let mut root = ParameterNode::root();
        root.seed_from_shape(&shape(serde_json::json!({
            "ui": {},
            "version": null,
            "audio": {},
            "name": null
        })))
        .unwrap();
        assert_eq!(child_names(&root), vec!["name", "version", "audio", "ui"]);
    }

    #[test]
    fn seeding_builds_paths_from_the_root() {
        let mut root = ParameterNode::root();
        root.seed_from_shape(&shape(serde_json::json!({
            "audio": {"out": {"level": null}}
        })))
        .unwrap();
        let level = root.get_at_path(&["audio", "out", "level"]).unwrap();
        assert_eq!(level.path(), ["audio", "out", "level"]);
        assert_eq!(level.address(), "audio/out/level");
        assert!(matches!(level.state(), NodeState::UnknownValue));
    }

    #[test]
    fn schema_shape_round_trips_through_seed() {
        let original = shape(serde_json::json!({
            "audio": {"out": {"level": null, "mute": null}},
            "device": {"name": null}
        }));
        let mut root = ParameterNode::root();
        root.seed_from_shape(&original).unwrap();
        assert_eq!(root.schema_shape(), Some(original));
    }

    #[test]
    fn node_lookup_by_id_spans_the_subtree() {
        let mut root = ParameterNode::root();
        root.seed_from_shape(&shape(serde_json::json!({
            "audio": {"out": {"level": null}}
        })))
        .unwrap();
        let id = root.get_at_path(&["audio", "out"]).unwrap().id();
        let found = root.get_node_by_id(id).unwrap();
        assert_eq!(found.name(), "out");
        assert!(root.get_node_by_id(Uuid::new_v4()).is_none());
    }

    #[test]
    fn probe_order_is_bool_number_string_then_arrays() {
        assert_eq!(
            decode_leaf_probe(&serde_json::json!(true)),
            Some(DynamicValue::Bool(true))
        );
        assert_eq!(
            decode_leaf_probe(&serde_json::json!(1)),
            Some(DynamicValue::Number(1.0))
        );
        assert_eq!(
            decode_leaf_probe(&serde_json::json!("aes3")),
            Some(DynamicValue::String("aes3".to_string()))
        );
        assert_eq!(
            decode_leaf_probe(&serde_json::json!([true, false])),
            Some(DynamicValue::Array(vec![
                DynamicValue::Bool(true),
                DynamicValue::Bool(false)
            ]))
        );
        assert_eq!(decode_leaf_probe(&serde_json::json!({"x": 1})), None);
        assert_eq!(decode_leaf_probe(&serde_json::json!([[1]])), None);
    }

    #[test]
    fn typed_decode_tries_scalar_then_array() {
        assert_eq!(
            decode_leaf_typed(ValueType::Number, &serde_json::json!(54.0)),
            Some(DynamicValue::Number(54.0))
        );
        assert_eq!(
            decode_leaf_typed(ValueType::Number, &serde_json::json!([0.0, -3.0])),
            Some(DynamicValue::Array(vec![
                DynamicValue::Number(0.0),
                DynamicValue::Number(-3.0)
            ]))
        );
        assert_eq!(
            decode_leaf_typed(ValueType::Boolean, &serde_json::json!(54.0)),
            None
        );
    }

    #[test]
    fn load_assigns_matching_leaves_and_ignores_mismatches() {
        let mut root = ParameterNode::root();
        root.seed_from_shape(&shape(serde_json::json!({
            "audio": {"out": {"level": null, "mute": null}}
        })))
        .unwrap();
        // Populate the leaves by hand, as a fetch would
        let level = root.get_at_path_mut(&["audio", "out", "level"]).unwrap();
        level.state = NodeState::Value(DynamicValue::Number(54.0));
        let mute = root.get_at_path_mut(&["audio", "out", "mute"]).unwrap();
        mute.state = NodeState::Value(DynamicValue::Bool(false));

        root.load(&shape(serde_json::json!({
            "audio": {"out": {
                "level": 60.0,
                "mute": 3.0,
                "ghost": 1.0
            }}
        })));

        let level = root.get_at_path(&["audio", "out", "level"]).unwrap();
        assert_eq!(level.state(), &NodeState::Value(DynamicValue::Number(60.0)));
        // Tag mismatch is ignored, not fatal
        let mute = root.get_at_path(&["audio", "out", "mute"]).unwrap();
        assert_eq!(mute.state(), &NodeState::Value(DynamicValue::Bool(false)));
    }

    #[test]
    fn to_value_projects_populated_leaves_only() {
        let mut root = ParameterNode::root();
        root.seed_from_shape(&shape(serde_json::json!({
            "audio": {"out": {"level": null, "mute": null}}
        })))
        .unwrap();
        let level = root.get_at_path_mut(&["audio", "out", "level"]).unwrap();
        level.state = NodeState::Value(DynamicValue::Number(54.0));

        let projected = root.to_value().unwrap();
        assert_eq!(
            projected.get("audio").and_then(|a| a.get("out")),
            Some(&shape(serde_json::json!({"level": 54.0})))
        );
    }
}
