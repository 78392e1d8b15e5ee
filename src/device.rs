use crate::cache::{BackupStore, SchemaCache};
use crate::connection::Connection;
use crate::error::{Result, SscError};
use crate::node::ParameterNode;
use crate::protocol;
use crate::types::{DeviceIdentity, DeviceStatus, Endpoint, EqState, KhState, EQ_GROUPS};
use crate::value::DynamicValue;
use serde_json::{json, Value};

/// One networked monitor: its connection, its discovered parameter tree
/// and the typed snapshot of the well-known parameters.
///
/// The typed snapshot mirrors a fixed subset of leaves (level, mute, logo
/// brightness, the two EQ groups) and is read and written through typed
/// protocol commands independent of the discovered tree. Everything else
/// the device exposes is reachable only through the tree.
///
/// All operations on one device run sequentially; the group layer only
/// parallelizes across devices.
pub struct Device {
    connection: Connection,
    root: ParameterNode,
    identity: Option<DeviceIdentity>,
    state: KhState,
    /// Last snapshot known to be applied on the device; `send` diffs
    /// against this so unchanged fields cost no wire traffic
    mirrored: KhState,
    status: DeviceStatus,
}

impl Device {
    /// Create a device for an endpoint; nothing is contacted until an
    /// operation runs
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            connection: Connection::new(endpoint),
            root: ParameterNode::root(),
            identity: None,
            state: KhState::default(),
            mirrored: KhState::default(),
            status: DeviceStatus::Ready,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.connection.endpoint()
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    /// Identity as fetched by [`identify`](Self::identify); `None` until then
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// The current typed snapshot
    pub fn state(&self) -> &KhState {
        &self.state
    }

    /// Root of the discovered parameter tree
    pub fn root(&self) -> &ParameterNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut ParameterNode {
        &mut self.root
    }

    /// Close the control connection
    pub async fn disconnect(&self) {
        self.connection.close().await;
    }

    fn finish(&mut self, result: &Result<()>) {
        match result {
            Ok(()) => self.status = DeviceStatus::Ready,
            Err(e) => self.status = DeviceStatus::Error(e.to_string()),
        }
    }

    /// Fetch the parameters that make up the device identity.
    ///
    /// Required once per device lifetime before the parameter tree or the
    /// schema cache can be trusted.
    pub async fn identify(&mut self) -> Result<DeviceIdentity> {
        self.connection.open().await?;
        let name: String = self.read_typed(&path(&["device", "name"]), "string").await?;
        let serial: String = self
            .read_typed(&path(&["device", "identity", "serial"]), "string")
            .await?;
        let product: String = self
            .read_typed(&path(&["device", "identity", "product"]), "string")
            .await?;
        let identity = DeviceIdentity {
            name,
            serial,
            product,
        };
        tracing::info!("Identified {} at {}", identity, self.endpoint());
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    /// Identify the device and build its parameter tree.
    ///
    /// A schema-cache hit seeds the tree without live discovery; a miss
    /// discovers recursively and writes the shape back. Cache failures
    /// are logged and discovery proceeds live.
    pub async fn setup(&mut self, schema_cache: &mut dyn SchemaCache) -> Result<()> {
        self.status = DeviceStatus::Busy("Setting up".to_string());
        let result = self.setup_inner(schema_cache).await;
        self.finish(&result);
        result
    }

    async fn setup_inner(&mut self, schema_cache: &mut dyn SchemaCache) -> Result<()> {
        self.connection.open().await?;
        let identity = match self.identity.clone() {
            Some(identity) => identity,
            None => self.identify().await?,
        };

        let cached = match schema_cache.get(&identity) {
            Ok(shape) => shape,
            Err(e) => {
                tracing::warn!("Schema cache read failed for {}: {}", identity, e);
                None
            }
        };
        if let Some(shape) = cached {
            self.root = ParameterNode::root();
            match self.root.seed_from_shape(&shape) {
                Ok(()) => {
                    tracing::info!("Seeded parameter tree for {} from schema cache", identity);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Cached schema for {} is unusable: {}", identity, e);
                }
            }
        }

        tracing::info!("Discovering parameter tree for {}", identity);
        self.root = ParameterNode::root();
        self.root.populate(&self.connection, true).await?;
        if let Some(shape) = self.root.schema_shape() {
            if let Err(e) = schema_cache.put(&identity, shape) {
                tracing::warn!("Schema cache write failed for {}: {}", identity, e);
            }
        }
        Ok(())
    }

    /// Read the well-known parameters into the typed snapshot
    pub async fn fetch(&mut self) -> Result<()> {
        self.status = DeviceStatus::Busy("Fetching".to_string());
        let result = self.fetch_inner().await;
        self.finish(&result);
        result
    }

    async fn fetch_inner(&mut self) -> Result<()> {
        self.connection.open().await?;
        let volume = self.read_typed(&path(&["audio", "out", "level"]), "number").await?;
        let muted = self.read_typed(&path(&["audio", "out", "mute"]), "boolean").await?;
        let logo_brightness = self
            .read_typed(&path(&["ui", "logo", "brightness"]), "number")
            .await?;
        let eq2 = self.fetch_eq(EQ_GROUPS[0].0).await?;
        let eq3 = self.fetch_eq(EQ_GROUPS[1].0).await?;

        let snapshot = KhState {
            volume,
            muted,
            logo_brightness,
            eqs: [eq2, eq3],
        };
        self.state = snapshot.clone();
        self.mirrored = snapshot;
        Ok(())
    }

    async fn fetch_eq(&self, group: &str) -> Result<EqState> {
        Ok(EqState {
            boost: self.read_typed(&eq_path(group, "boost"), "number array").await?,
            enabled: self
                .read_typed(&eq_path(group, "enabled"), "boolean array")
                .await?,
            frequency: self
                .read_typed(&eq_path(group, "frequency"), "number array")
                .await?,
            gain: self.read_typed(&eq_path(group, "gain"), "number array").await?,
            // Per band, Q is a number or a switch
            q: self
                .read_typed(&eq_path(group, "q"), "number or boolean array")
                .await?,
            kind: self.read_typed(&eq_path(group, "type"), "string array").await?,
        })
    }

    /// Write the fields of `new_state` that differ from the last
    /// device-mirrored snapshot, one command per changed field.
    ///
    /// Issues no traffic for unchanged fields. A failure aborts the
    /// remaining writes of this batch without rolling back the applied
    /// ones; the mirrored snapshot is only advanced after a fully
    /// successful round.
    pub async fn send(&mut self, new_state: &KhState) -> Result<()> {
        self.status = DeviceStatus::Busy("Sending".to_string());
        let result = self.send_inner(new_state).await;
        self.finish(&result);
        result
    }

    async fn send_inner(&mut self, new_state: &KhState) -> Result<()> {
        self.connection.open().await?;
        if new_state.volume != self.mirrored.volume {
            self.write_value(&path(&["audio", "out", "level"]), json!(new_state.volume))
                .await?;
        }
        if new_state.muted != self.mirrored.muted {
            self.write_value(&path(&["audio", "out", "mute"]), json!(new_state.muted))
                .await?;
        }
        if new_state.logo_brightness != self.mirrored.logo_brightness {
            self.write_value(
                &path(&["ui", "logo", "brightness"]),
                json!(new_state.logo_brightness),
            )
            .await?;
        }
        for (index, (group, _)) in EQ_GROUPS.iter().enumerate() {
            let new_eq = &new_state.eqs[index];
            let old_eq = &self.mirrored.eqs[index];
            if new_eq.boost != old_eq.boost {
                self.write_value(&eq_path(group, "boost"), json!(new_eq.boost))
                    .await?;
            }
            if new_eq.enabled != old_eq.enabled {
                self.write_value(&eq_path(group, "enabled"), json!(new_eq.enabled))
                    .await?;
            }
            if new_eq.frequency != old_eq.frequency {
                self.write_value(&eq_path(group, "frequency"), json!(new_eq.frequency))
                    .await?;
            }
            if new_eq.gain != old_eq.gain {
                self.write_value(&eq_path(group, "gain"), json!(new_eq.gain))
                    .await?;
            }
            if new_eq.q != old_eq.q {
                self.write_value(&eq_path(group, "q"), json!(new_eq.q))
                    .await?;
            }
            if new_eq.kind != old_eq.kind {
                self.write_value(&eq_path(group, "type"), json!(new_eq.kind))
                    .await?;
            }
        }
        self.mirrored = new_state.clone();
        self.state = new_state.clone();
        Ok(())
    }

    /// Discover the full parameter tree (live, recursive)
    pub async fn populate_parameters(&mut self) -> Result<()> {
        self.status = DeviceStatus::Busy("Discovering parameters".to_string());
        let result = self.populate_parameters_inner().await;
        self.finish(&result);
        result
    }

    async fn populate_parameters_inner(&mut self) -> Result<()> {
        self.connection.open().await?;
        self.root.populate(&self.connection, true).await
    }

    /// Re-read every populated leaf of the parameter tree
    pub async fn fetch_parameter_tree(&mut self) -> Result<()> {
        self.status = DeviceStatus::Busy("Fetching parameters".to_string());
        let result = self.fetch_parameter_tree_inner().await;
        self.finish(&result);
        result
    }

    async fn fetch_parameter_tree_inner(&mut self) -> Result<()> {
        self.connection.open().await?;
        self.root.fetch_tree(&self.connection).await
    }

    /// Write every populated leaf of the parameter tree
    pub async fn send_parameter_tree(&mut self) -> Result<()> {
        self.status = DeviceStatus::Busy("Sending parameters".to_string());
        let result = self.send_parameter_tree_inner().await;
        self.finish(&result);
        result
    }

    async fn send_parameter_tree_inner(&mut self) -> Result<()> {
        self.connection.open().await?;
        self.root.send_tree(&self.connection).await
    }

    /// Populate or re-read a single node of the tree, bypassing the
    /// typed snapshot. Used for ad-hoc parameter inspection.
    pub async fn fetch_node(&mut self, segments: &[&str]) -> Result<()> {
        self.connection.open().await?;
        let node = self
            .root
            .get_at_path_mut(segments)
            .ok_or(SscError::AddressNotFound)?;
        node.populate(&self.connection, false).await
    }

    /// Write a single populated leaf of the tree
    pub async fn send_node(&mut self, segments: &[&str]) -> Result<()> {
        self.connection.open().await?;
        let node = self
            .root
            .get_at_path_mut(segments)
            .ok_or(SscError::AddressNotFound)?;
        node.send_leaf(&self.connection).await
    }

    /// Snapshot the populated tree into the backup store
    pub fn backup(&self, store: &mut dyn BackupStore, name: &str) -> Result<()> {
        let snapshot = self.root.to_value().ok_or_else(|| {
            SscError::Store("parameter tree is not populated".to_string())
        })?;
        store.write(name, snapshot.encode().as_bytes())?;
        Ok(())
    }

    /// Load a backup blob onto the tree's matching leaves.
    ///
    /// Only assigns values; call
    /// [`send_parameter_tree`](Self::send_parameter_tree) to push them to
    /// the device.
    pub fn restore(&mut self, store: &dyn BackupStore, name: &str) -> Result<()> {
        let bytes = store.read(name)?;
        let raw: Value = serde_json::from_slice(&bytes)?;
        let value = DynamicValue::from_json(&raw)?;
        self.root.load(&value);
        Ok(())
    }

    async fn read_typed<T: serde::de::DeserializeOwned>(
        &self,
        segments: &[String],
        expected: &str,
    ) -> Result<T> {
        let reply = self
            .connection
            .send_command(&protocol::read_command(segments))
            .await?;
        let raw = protocol::parse_value_reply(&reply, segments)?;
        serde_json::from_value(raw).map_err(|_| SscError::IncorrectSchema(expected.to_string()))
    }

    async fn write_value(&self, segments: &[String], value: Value) -> Result<()> {
        self.connection
            .send_command(&protocol::write_json_command(segments, &value))
            .await?;
        Ok(())
    }
}

fn path(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

fn eq_path(group: &str, field: &str) -> Vec<String> {
    vec![
        "audio".to_string(),
        "out".to_string(),
        group.to_string(),
        field.to_string(),
    ]
}
