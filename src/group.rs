use crate::cache::{ConnectionCache, DiscoveryService, SchemaCache};
use crate::device::Device;
use crate::error::Result;
use crate::types::{DeviceStatus, KhState};
use futures_util::future::join_all;
use std::time::Duration;

/// Scan length used when setup has no cached endpoints to fall back on
const DEFAULT_SCAN: Duration = Duration::from_secs(5);

/// A set of devices operated as one.
///
/// Devices are kept in discovery order. Fan-out operations run one
/// concurrent task per device over disjoint borrows and always wait for
/// every device; a failure on one device shows up in that device's
/// status and never cancels its siblings.
pub struct DeviceGroup {
    devices: Vec<Device>,
    discovery: Box<dyn DiscoveryService>,
    endpoints: Box<dyn ConnectionCache>,
    schemas: Box<dyn SchemaCache>,
    scan_status: Option<DeviceStatus>,
}

impl DeviceGroup {
    pub fn new(
        discovery: Box<dyn DiscoveryService>,
        endpoints: Box<dyn ConnectionCache>,
        schemas: Box<dyn SchemaCache>,
    ) -> Self {
        Self {
            devices: Vec::new(),
            discovery,
            endpoints,
            schemas,
            scan_status: None,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    /// Aggregated status across all devices.
    ///
    /// An empty scan pins the status to `Error("No devices found")` until
    /// the next successful scan.
    pub fn status(&self) -> DeviceStatus {
        if let Some(status) = &self.scan_status {
            return status.clone();
        }
        let statuses: Vec<DeviceStatus> =
            self.devices.iter().map(|d| d.status().clone()).collect();
        DeviceStatus::aggregate(&statuses)
    }

    /// Listen for device advertisements and rebuild the device list.
    ///
    /// The endpoint cache is replaced with whatever the scan heard. An
    /// empty scan leaves previously set up devices untouched and only
    /// flags the group status.
    pub async fn scan(&mut self, duration: Duration) -> Result<()> {
        tracing::info!("Scanning for devices for {:?}", duration);
        let found = self.discovery.scan(duration).await?;
        if found.is_empty() {
            tracing::warn!("Scan finished without finding any devices");
            self.scan_status = Some(DeviceStatus::Error("No devices found".to_string()));
            return Ok(());
        }
        tracing::info!("Scan found {} device(s)", found.len());
        self.scan_status = None;
        if let Err(e) = self.endpoints.put(&found) {
            tracing::warn!("Endpoint cache write failed: {}", e);
        }
        self.devices = found.into_iter().map(Device::new).collect();
        Ok(())
    }

    /// Set up every device and fetch its typed state.
    ///
    /// Without devices, endpoints come from the connection cache, falling
    /// back to a scan when the cache is empty. Per-device setup runs
    /// sequentially: the schema cache is not safe for concurrent access
    /// across devices. The fetch afterwards is parallel.
    pub async fn setup(&mut self) -> Result<()> {
        if self.devices.is_empty() {
            let cached = match self.endpoints.get() {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    tracing::warn!("Endpoint cache read failed: {}", e);
                    Vec::new()
                }
            };
            if cached.is_empty() {
                self.scan(DEFAULT_SCAN).await?;
            } else {
                tracing::info!("Using {} cached endpoint(s)", cached.len());
                self.devices = cached.into_iter().map(Device::new).collect();
            }
        }

        for device in self.devices.iter_mut() {
            if let Err(e) = device.setup(self.schemas.as_mut()).await {
                tracing::warn!("Setup failed for {}: {}", device.endpoint(), e);
            }
        }
        self.fetch().await;
        Ok(())
    }

    /// Fetch every device's typed state in parallel and return the first
    /// device's state as the group representative.
    ///
    /// "First" is deliberately device index 0 after all fetches complete,
    /// not whichever finished first. Per-device failures are reflected in
    /// the device statuses.
    pub async fn fetch(&mut self) -> KhState {
        let _ = join_all(self.devices.iter_mut().map(|d| d.fetch())).await;
        self.devices
            .first()
            .map(|d| d.state().clone())
            .unwrap_or_default()
    }

    /// Send a typed state to every device in parallel; each device writes
    /// only its own changed fields
    pub async fn send(&mut self, state: &KhState) {
        let _ = join_all(self.devices.iter_mut().map(|d| d.send(state))).await;
    }

    /// Discover the full parameter tree on every device in parallel
    pub async fn populate_parameters(&mut self) {
        let _ = join_all(
            self.devices
                .iter_mut()
                .map(|d| d.populate_parameters()),
        )
        .await;
    }

    /// Re-read every populated tree leaf on every device in parallel
    pub async fn fetch_parameter_tree(&mut self) {
        let _ = join_all(
            self.devices
                .iter_mut()
                .map(|d| d.fetch_parameter_tree()),
        )
        .await;
    }

    /// Write every populated tree leaf on every device in parallel
    pub async fn send_parameter_tree(&mut self) {
        let _ = join_all(
            self.devices
                .iter_mut()
                .map(|d| d.send_parameter_tree()),
        )
        .await;
    }
}
