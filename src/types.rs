use serde::{Deserialize, Serialize};
use std::fmt;

/// Network endpoint of an SSC device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on the default SSC control port
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, crate::protocol::DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity of a device, discovered via the protocol.
///
/// Name and serial key the schema cache; the tree is only trusted after
/// these have been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub serial: String,
    pub product: String,
}

impl DeviceIdentity {
    /// Cache key for schema lookups
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.name, self.serial)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.serial)
    }
}

/// The two parametric EQ groups and their band counts
pub const EQ_GROUPS: [(&str, usize); 2] = [("eq2", 10), ("eq3", 20)];

/// Q of one EQ band.
///
/// A band's Q is a number for most filter types; some report a switch
/// instead, so the wire carries a number or a boolean per band. The
/// untagged representation probes number first, then boolean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QValue {
    Number(f64),
    Bool(bool),
}

/// One parametric EQ group, all bands
///
/// Each field mirrors one array-valued leaf under `audio/out/eqN/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqState {
    pub boost: Vec<f64>,
    pub enabled: Vec<bool>,
    pub frequency: Vec<f64>,
    pub gain: Vec<f64>,
    pub q: Vec<QValue>,
    /// Band filter types; "type" on the wire
    pub kind: Vec<String>,
}

impl EqState {
    /// A flat (no-op) EQ with the given number of bands
    pub fn flat(bands: usize) -> Self {
        Self {
            boost: vec![0.0; bands],
            enabled: vec![false; bands],
            frequency: vec![1000.0; bands],
            gain: vec![0.0; bands],
            q: vec![QValue::Number(0.7); bands],
            kind: vec!["parametric".to_string(); bands],
        }
    }

    pub fn bands(&self) -> usize {
        self.boost.len()
    }
}

/// Typed snapshot of the well-known device parameters.
///
/// This mirrors a fixed subset of leaves in the parameter tree and is what
/// UI code binds against; everything else is reachable only through the
/// discovered tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KhState {
    /// Output level in dB SPL (`audio/out/level`)
    pub volume: f64,
    /// Output mute (`audio/out/mute`)
    pub muted: bool,
    /// Front logo brightness (`ui/logo/brightness`)
    pub logo_brightness: f64,
    /// The two parametric EQ groups
    pub eqs: [EqState; 2],
}

impl Default for KhState {
    fn default() -> Self {
        Self {
            volume: 0.0,
            muted: false,
            logo_brightness: 0.0,
            eqs: [EqState::flat(EQ_GROUPS[0].1), EqState::flat(EQ_GROUPS[1].1)],
        }
    }
}

/// Human-readable status of a device or device group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Ready,
    Busy(String),
    Error(String),
}

impl DeviceStatus {
    /// Fold a list of per-device statuses into one group status.
    ///
    /// Busy dominates error when mixed: an in-progress device should not
    /// be reported as failed. Messages are comma-joined in list order.
    pub fn aggregate(statuses: &[DeviceStatus]) -> DeviceStatus {
        if statuses.is_empty() {
            return DeviceStatus::Error("No devices".to_string());
        }
        statuses
            .iter()
            .cloned()
            .reduce(DeviceStatus::combine)
            .unwrap_or(DeviceStatus::Ready)
    }

    fn combine(self, other: DeviceStatus) -> DeviceStatus {
        use DeviceStatus::{Busy, Error, Ready};
        match (self, other) {
            (Ready, s) | (s, Ready) => s,
            (Busy(a), Busy(b)) => Busy(format!("{a}, {b}")),
            (Error(a), Error(b)) => Error(format!("{a}, {b}")),
            (Busy(a), Error(b)) | (Error(a), Busy(b)) => Busy(format!("{a}, {b}")),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DeviceStatus::Error(_))
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Ready => write!(f, "Ready"),
            DeviceStatus::Busy(message) => write!(f, "Busy: {message}"),
            DeviceStatus::Error(message) => write!(f, "Error: {message}"),
        }
    }
}
