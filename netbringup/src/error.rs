//! Error types for netbringup.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for netbringup operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Remote shell transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Pattern matching errors on an open session
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// First-boot wizard errors
    #[error("Wizard error: {0}")]
    Wizard(#[from] WizardError),

    /// Command template expansion errors
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Inventory loading and lookup errors
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Appliance management API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Host network setup errors
    #[error("Host setup error: {0}")]
    Host(#[from] HostError),

    /// A device worker ran past its deadline
    #[error("Worker did not finish within {0:?}")]
    Deadline(Duration),

    /// A device worker's task panicked or was cancelled
    #[error("Worker aborted: {0}")]
    Aborted(String),

    /// Settings file errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Transport layer errors (TCP connection, telnet handshake).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The connection did not complete within the setup timeout
    #[error("Connection to {host}:{port} not established within {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    Closed,

    /// Operation on a session that was already closed
    #[error("Session is not open")]
    NotOpen,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors (pattern matching over accumulated output).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Pattern not seen before the deadline; carries what was collected
    #[error("Pattern {pattern:?} not found within {timeout:?}")]
    PatternTimeout {
        pattern: String,
        timeout: Duration,
        buffer: String,
    },

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Wizard automaton errors.
#[derive(Error, Debug)]
pub enum WizardError {
    /// Attempt budget exhausted without reaching a terminal state
    #[error("No recognizable prompt within attempt budget ({attempts} attempts, last state {state})")]
    ProtocolMismatch { state: String, attempts: u32 },

    /// Every known credential was rejected
    #[error("All credentials rejected for user '{user}'")]
    AuthenticationFailed { user: String },

    /// The device refused an apply step
    #[error("Device configuration failed: {message}")]
    Configuration { message: String },
}

/// Command template errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    /// Template references a placeholder with no supplied value
    #[error("No value for placeholder '{{{placeholder}}}' in template {template:?}")]
    MissingValue {
        placeholder: String,
        template: String,
    },

    /// Unbalanced brace in the template
    #[error("Unterminated placeholder in template {template:?}")]
    Unterminated { template: String },
}

/// Inventory errors.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// Failed to read the inventory file
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed YAML document
    #[error("Failed to parse inventory: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Required key is absent
    #[error("Device '{device}' has no '{key}'")]
    NotFound { device: String, key: String },

    /// Interface address is not a valid `a.b.c.d/len`
    #[error("Invalid address {value:?} on {device} {interface}")]
    InvalidAddress {
        device: String,
        interface: String,
        value: String,
    },
}

/// Appliance management API errors.
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from an endpoint
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// API never became reachable
    #[error("API not reachable within {timeout:?}")]
    NotReady { timeout: Duration },

    /// Response body did not have the expected shape
    #[error("Unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// Request schema refused by the device
    #[error("Request rejected: {message}")]
    Rejected { message: String },
}

/// Host network setup errors.
#[derive(Error, Debug)]
pub enum HostError {
    /// No host device in the inventory
    #[error("Host device '{name}' not found in inventory")]
    MissingHost { name: String },

    /// Command could not be spawned
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Command exited non-zero with an unexpected error
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

/// Settings errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the settings file
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed YAML document
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value parsed but cannot be used
    #[error("Invalid setting: {message}")]
    Invalid { message: String },
}

/// Result type alias using netbringup's Error.
pub type Result<T> = std::result::Result<T, Error>;
