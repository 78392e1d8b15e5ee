//! Rust library for controlling Neumann KH series networked studio monitors
//!
//! This library speaks SSC, the JSON-addressed control protocol of
//! networked Neumann/Sennheiser audio devices. It supports:
//!
//! - Reading and writing nested parameters over a persistent TCP connection
//! - Runtime discovery of the parameter namespace (schema and limits queries)
//! - A typed snapshot of the well-known monitor parameters (level, mute,
//!   logo brightness, parametric EQ bands) with diffed, minimal writes
//! - Operating several monitors as one group with parallel fan-out and a
//!   single aggregated status
//! - Parameter tree backup and restore through a pluggable blob store
//!
//! # Quick Start
//!
//! ```no_run
//! use neumann_ssc::{Device, Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut device = Device::new(Endpoint::with_default_port("192.168.1.40"));
//!     device.fetch().await?;
//!
//!     // Lower the output level; only the changed field goes on the wire
//!     let mut state = device.state().clone();
//!     state.volume = 54.0;
//!     device.send(&state).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Group Control
//!
//! ```no_run
//! use neumann_ssc::{DeviceGroup, MemoryConnectionCache, MemorySchemaCache};
//! # use neumann_ssc::{DiscoveryService, Endpoint};
//! # struct NoDiscovery;
//! # #[async_trait::async_trait]
//! # impl DiscoveryService for NoDiscovery {
//! #     async fn scan(&mut self, _d: std::time::Duration) -> neumann_ssc::Result<Vec<Endpoint>> {
//! #         Ok(vec![])
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut group = DeviceGroup::new(
//!         Box::new(NoDiscovery),
//!         Box::new(MemoryConnectionCache::new()),
//!         Box::new(MemorySchemaCache::new()),
//!     );
//!     group.setup().await?;
//!
//!     let mut state = group.fetch().await;
//!     state.muted = true;
//!     group.send(&state).await;
//!     println!("{}", group.status());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **DeviceGroup**: multi-device orchestration and status aggregation
//! - **Device**: one monitor's connection, parameter tree and typed state
//! - **ParameterNode**: the discovered parameter tree and its population
//!   state machine
//! - **Connection**: low-level newline-terminated TCP transactions
//! - **Protocol**: SSC command envelopes and reply navigation
//! - **DynamicValue**: the schema-guided dynamic value model
//!
//! Persistent caches, the advertisement listener and backup storage are
//! external collaborators behind the [`SchemaCache`], [`ConnectionCache`],
//! [`DiscoveryService`] and [`BackupStore`] traits.

mod cache;
mod connection;
mod device;
mod error;
mod group;
mod node;
mod protocol;
mod types;
mod value;

// Public exports
pub use cache::{
    BackupStore, CacheError, ConnectionCache, DiscoveryService, MemoryBackupStore,
    MemoryConnectionCache, MemorySchemaCache, SchemaCache,
};
pub use connection::Connection;
pub use device::Device;
pub use error::{Result, SscError};
pub use group::DeviceGroup;
pub use node::{NodeState, ParameterNode};
pub use protocol::{Limits, ValueType, DEFAULT_PORT};
pub use types::{DeviceIdentity, DeviceStatus, Endpoint, EqState, KhState, QValue, EQ_GROUPS};
pub use value::DynamicValue;
