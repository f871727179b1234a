use crate::link::PropertyPath;
use crate::port::{PortAddress, PortType};
use procflow_property::PropertyError;
use std::fmt;
use thiserror::Error;

/// Rejected network mutations and lookups.
///
/// A failed mutation never leaves the network partially modified.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("processor \"{0}\" already exists in the network")]
    DuplicateProcessor(String),

    #[error("processor not found: {0}")]
    ProcessorNotFound(String),

    #[error("processor identifier must not be empty")]
    EmptyIdentifier,

    #[error("processor identifier \"{0}\" must not contain '.'")]
    InvalidIdentifier(String),

    #[error("processor \"{processor}\" has no port \"{port}\"")]
    PortNotFound { processor: String, port: String },

    #[error("processor \"{processor}\" already has a port named \"{port}\"")]
    DuplicatePort { processor: String, port: String },

    #[error("processor \"{processor}\" requires unsupported tags: {}", tags.join(", "))]
    UnsupportedTags { processor: String, tags: Vec<String> },

    #[error("inport {inport} is already connected to {existing}")]
    InportAlreadyConnected {
        inport: PortAddress,
        existing: PortAddress,
    },

    #[error("connection {outport} -> {inport} already exists")]
    ConnectionExists {
        outport: PortAddress,
        inport: PortAddress,
    },

    #[error("connecting {outport} -> {inport} would create a cycle")]
    CycleDetected {
        outport: PortAddress,
        inport: PortAddress,
    },

    #[error("cannot connect {outport} ({from}) to {inport} ({to})")]
    IncompatiblePorts {
        outport: PortAddress,
        inport: PortAddress,
        from: PortType,
        to: PortType,
    },

    #[error("link {from} -> {to} already exists")]
    LinkExists { from: PropertyPath, to: PropertyPath },

    #[error("cannot link {from} to {to}: {reason}")]
    InvalidLink {
        from: PropertyPath,
        to: PropertyPath,
        reason: String,
    },

    #[error("property not found: {0}")]
    PropertyNotFound(PropertyPath),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error("processor class \"{0}\" is already registered")]
    DuplicateClassIdentifier(String),

    #[error("invalid processor class identifier \"{0}\"")]
    InvalidClassIdentifier(String),

    #[error("unknown processor class \"{0}\"")]
    UnknownClass(String),

    #[error("no background job dispatcher is attached to this network")]
    NoJobDispatcher,

    #[error("failed to start the background pool: {0}")]
    Pool(String),

    #[error("failed to start the timer thread: {0}")]
    TimerThread(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    History(String),
}

/// A single problem found while loading a workspace document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeserializationError {
    #[error("unknown processor class \"{class}\" for processor \"{identifier}\"")]
    UnknownProcessorClass { identifier: String, class: String },

    #[error("processor \"{identifier}\" ({class}) could not be added: {reason}")]
    ProcessorRejected {
        identifier: String,
        class: String,
        reason: String,
    },

    #[error("property \"{property}\" of processor \"{identifier}\" ({class}) could not be restored: {reason}")]
    PropertyRejected {
        identifier: String,
        class: String,
        property: String,
        reason: String,
    },

    #[error("connection {outport} -> {inport} references missing processor \"{identifier}\" ({class})")]
    MissingProcessor {
        outport: PortAddress,
        inport: PortAddress,
        identifier: String,
        class: String,
    },

    #[error("connection references missing port \"{port}\" on processor \"{identifier}\" ({class})")]
    MissingPort {
        identifier: String,
        class: String,
        port: String,
    },

    #[error("port group of processor \"{identifier}\" ({class}) names missing port \"{port}\"")]
    UnknownGroupedPort {
        identifier: String,
        class: String,
        port: String,
    },

    #[error("connection {outport} -> {inport} rejected: {reason}")]
    ConnectionRejected {
        outport: PortAddress,
        inport: PortAddress,
        reason: String,
    },

    #[error("link {from} -> {to} rejected: {reason}")]
    LinkRejected {
        from: PropertyPath,
        to: PropertyPath,
        reason: String,
    },

    #[error("workspace version {found} is not supported (newest known version is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("no converter from workspace version {0}")]
    MissingConverter(u32),

    #[error("malformed workspace document: {0}")]
    Malformed(String),
}

/// All problems collected while loading a workspace. Loading does not stop
/// at the first problem; everything that could be restored is in the network.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceLoadError {
    pub errors: Vec<DeserializationError>,
}

impl fmt::Display for WorkspaceLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} problem(s) while loading workspace", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for WorkspaceLoadError {}

impl From<DeserializationError> for WorkspaceLoadError {
    fn from(error: DeserializationError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value \"{value}\" for {key}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
