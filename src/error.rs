use thiserror::Error;

/// Result type for SSC operations
pub type Result<T> = std::result::Result<T, SscError>;

/// Errors that can occur when interacting with SSC devices
#[derive(Error, Debug)]
pub enum SscError {
    /// No connection or reply within the transaction deadline
    #[error("No response from device")]
    NoResponse,

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Device reported that the addressed parameter does not exist (SSC 404)
    #[error("Address not found")]
    AddressNotFound,

    /// Device could not parse the command (SSC 400)
    #[error("Message not understood")]
    MessageNotUnderstood,

    /// Wire payload cannot follow the structure the schema promises
    #[error("Schema mismatch: expected {0}")]
    SchemaMismatch(String),

    /// Wire payload disagrees with the type the schema promises
    #[error("Incorrect schema: expected {0}")]
    IncorrectSchema(String),

    /// Arrays of arrays, arrays of objects and arrays containing null
    /// are outside the value model
    #[error("Nested arrays are not supported")]
    NestedArrayUnsupported,

    /// Schema or limits reply does not have the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// External store (cache or backup) failure
    #[error("Store error: {0}")]
    Store(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SscError {
    /// Whether this error is contained at a single parameter node.
    ///
    /// Node-local errors leave sibling discovery running; everything else
    /// (transport failures, JSON-level breakage) aborts the current batch.
    pub fn is_node_local(&self) -> bool {
        matches!(
            self,
            SscError::AddressNotFound
                | SscError::MessageNotUnderstood
                | SscError::SchemaMismatch(_)
                | SscError::IncorrectSchema(_)
                | SscError::NestedArrayUnsupported
                | SscError::MalformedResponse(_)
        )
    }
}
