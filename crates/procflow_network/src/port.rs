use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased, shared, read-only data flowing from an outport to inports.
pub type PortData = Arc<dyn Any + Send + Sync>;

/// Port types used to validate connections
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value")]
pub enum PortType {
    #[default]
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "object")]
    Object(String),
    #[serde(rename = "array")]
    Array(Box<PortType>),
    #[serde(rename = "option")]
    Option(Box<PortType>),
}

impl PortType {
    /// Whether an inport of type `self` accepts data from an outport of type `source`.
    pub fn accepts(&self, source: &PortType) -> bool {
        match (self, source) {
            (PortType::Any, _) | (_, PortType::Any) => true,
            (a, b) if a == b => true,
            (PortType::Array(a), PortType::Array(b)) => a.accepts(b),
            (PortType::Option(inner), other) => inner.accepts(other),
            _ => false,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::Any => write!(f, "any"),
            PortType::Boolean => write!(f, "boolean"),
            PortType::Integer => write!(f, "integer"),
            PortType::Float => write!(f, "float"),
            PortType::String => write!(f, "string"),
            PortType::Object(name) => write!(f, "object<{}>", name),
            PortType::Array(inner) => write!(f, "array<{}>", inner),
            PortType::Option(inner) => write!(f, "option<{}>", inner),
        }
    }
}

/// A `processor.port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortAddress {
    pub processor: String,
    pub port: String,
}

impl PortAddress {
    pub fn new(processor: &str, port: &str) -> Self {
        Self {
            processor: processor.to_string(),
            port: port.to_string(),
        }
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.processor, self.port)
    }
}

/// Produces data for any number of connected inports.
///
/// An outport is ready when it holds data and its processor is valid.
pub struct Outport {
    identifier: String,
    port_type: PortType,
    data: Option<PortData>,
    valid: bool,
    changed: bool,
    pub(crate) connected_inports: Vec<PortAddress>,
}

impl Outport {
    pub fn new(identifier: &str, port_type: PortType) -> Self {
        Self {
            identifier: identifier.to_string(),
            port_type,
            data: None,
            valid: false,
            changed: false,
            connected_inports: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn port_type(&self) -> &PortType {
        &self.port_type
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&PortData> {
        self.data.as_ref()
    }

    pub fn data_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data.clone().and_then(|data| data.downcast::<T>().ok())
    }

    pub fn set_data<T: Any + Send + Sync>(&mut self, value: T) {
        self.set_port_data(Arc::new(value));
    }

    pub fn set_port_data(&mut self, data: PortData) {
        self.data = Some(data);
        self.changed = true;
    }

    /// Drops the held data; connected inports stop being ready.
    pub fn clear(&mut self) {
        if self.data.take().is_some() {
            self.changed = true;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.valid && self.data.is_some()
    }

    pub fn is_connected(&self) -> bool {
        !self.connected_inports.is_empty()
    }

    pub fn connected_inports(&self) -> &[PortAddress] {
        &self.connected_inports
    }

    pub(crate) fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

impl fmt::Debug for Outport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outport")
            .field("identifier", &self.identifier)
            .field("port_type", &self.port_type)
            .field("has_data", &self.data.is_some())
            .field("valid", &self.valid)
            .field("connected_inports", &self.connected_inports)
            .finish()
    }
}

/// Consumes data from at most one outport.
#[derive(Debug)]
pub struct Inport {
    identifier: String,
    port_type: PortType,
    optional: bool,
    pub(crate) source: Option<PortAddress>,
    pub(crate) changed: bool,
}

impl Inport {
    pub fn new(identifier: &str, port_type: PortType) -> Self {
        Self {
            identifier: identifier.to_string(),
            port_type,
            optional: false,
            source: None,
            changed: false,
        }
    }

    /// An optional inport does not block its processor while unconnected.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn port_type(&self) -> &PortType {
        &self.port_type
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    pub fn source(&self) -> Option<&PortAddress> {
        self.source.as_ref()
    }

    /// New data arrived since the processor last ran.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

/// What a processor sees of one inport during a call: a stable data handle
/// taken before the call began.
#[derive(Clone)]
pub(crate) struct InportSnapshot {
    pub(crate) identifier: String,
    pub(crate) data: Option<PortData>,
    pub(crate) changed: bool,
    pub(crate) connected: bool,
}
