//! Saving and loading networks as versioned JSON workspace documents.

use crate::error::{DeserializationError, WorkspaceLoadError};
use crate::factory::ProcessorFactory;
use crate::link::PropertyPath;
use crate::network::ProcessorNetwork;
use crate::port::PortAddress;
use crate::processor::DEFAULT_PORT_GROUP;
use procflow_property::{MetaDataMap, PropertyError, PropertyState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Version written by [`ProcessorNetwork::serialize`].
pub const WORKSPACE_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDocument {
    pub version: u32,
    #[serde(default)]
    pub processors: Vec<ProcessorState>,
    #[serde(default)]
    pub connections: Vec<ConnectionState>,
    #[serde(default)]
    pub links: Vec<LinkState>,
}

impl Default for WorkspaceDocument {
    fn default() -> Self {
        Self {
            version: WORKSPACE_VERSION,
            processors: Vec::new(),
            connections: Vec::new(),
            links: Vec::new(),
        }
    }
}

impl WorkspaceDocument {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a document of any known version, upgrading it with
    /// `converters` first.
    pub fn from_json(
        text: &str,
        converters: &[Box<dyn VersionConverter>],
    ) -> Result<Self, DeserializationError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|error| DeserializationError::Malformed(error.to_string()))?;
        upgrade_document(value, converters)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorState {
    #[serde(rename = "type")]
    pub class: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "MetaDataMap::is_empty")]
    pub metadata: MetaDataMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyState>,
    /// Port to group, for ports outside the default group.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_groups: BTreeMap<String, String>,
}

/// A port as recorded in a document. The class is kept so that a dangling
/// reference can still be reported with the processor type it used to have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortReference {
    pub processor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub port: String,
}

impl PortReference {
    fn address(&self) -> PortAddress {
        PortAddress::new(&self.processor, &self.port)
    }

    fn class_name(&self) -> String {
        self.class.clone().unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub outport: PortReference,
    pub inport: PortReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    pub source: PropertyPath,
    pub destination: PropertyPath,
}

/// Upgrades a raw document from `from_version()` to the next version.
pub trait VersionConverter: Send + Sync {
    fn from_version(&self) -> u32;

    fn convert(&self, document: &mut Value) -> Result<(), DeserializationError>;
}

/// Version 1 stored links under `propertyLinks` as dotted strings
/// (`"Processor.property.child"`).
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkFormatConverter;

impl VersionConverter for LinkFormatConverter {
    fn from_version(&self) -> u32 {
        1
    }

    fn convert(&self, document: &mut Value) -> Result<(), DeserializationError> {
        let Some(root) = document.as_object_mut() else {
            return Err(DeserializationError::Malformed(
                "workspace root is not an object".to_string(),
            ));
        };
        let Some(links) = root.remove("propertyLinks") else {
            return Ok(());
        };
        let Value::Array(links) = links else {
            return Err(DeserializationError::Malformed(
                "propertyLinks is not a list".to_string(),
            ));
        };

        let mut converted = Vec::with_capacity(links.len());
        for link in links {
            let path = |field: &str| -> Result<Value, DeserializationError> {
                let text = link.get(field).and_then(Value::as_str).ok_or_else(|| {
                    DeserializationError::Malformed(format!("link without {}", field))
                })?;
                let path = PropertyPath::parse(text).ok_or_else(|| {
                    DeserializationError::Malformed(format!("bad property path \"{}\"", text))
                })?;
                serde_json::to_value(path)
                    .map_err(|error| DeserializationError::Malformed(error.to_string()))
            };
            converted.push(serde_json::json!({
                "source": path("source")?,
                "destination": path("destination")?,
            }));
        }
        root.insert("links".to_string(), Value::Array(converted));
        Ok(())
    }
}

/// Brings a raw document up to [`WORKSPACE_VERSION`] and decodes it.
///
/// A document without a version field is taken to be version 1. For every
/// older version each converter registered for it runs in order; a version
/// with no converter at all is an error.
pub fn upgrade_document(
    mut document: Value,
    converters: &[Box<dyn VersionConverter>],
) -> Result<WorkspaceDocument, DeserializationError> {
    let mut version = match document.get("version") {
        None => 1,
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| DeserializationError::Malformed(format!("bad version {}", value)))?,
    };
    if version > WORKSPACE_VERSION {
        return Err(DeserializationError::UnsupportedVersion {
            found: version,
            supported: WORKSPACE_VERSION,
        });
    }

    while version < WORKSPACE_VERSION {
        let mut applicable = converters
            .iter()
            .filter(|converter| converter.from_version() == version)
            .peekable();
        if applicable.peek().is_none() {
            return Err(DeserializationError::MissingConverter(version));
        }
        for converter in applicable {
            converter.convert(&mut document)?;
        }
        version += 1;
        if let Some(root) = document.as_object_mut() {
            root.insert("version".to_string(), Value::from(version));
        }
        debug!(version, "workspace document upgraded");
    }

    serde_json::from_value(document).map_err(|error| DeserializationError::Malformed(error.to_string()))
}

impl ProcessorNetwork {
    /// Snapshot of the network. Processors appear in insertion order.
    pub fn serialize(&self) -> WorkspaceDocument {
        let class_of = |processor: &str| {
            self.processors
                .get(processor)
                .map(|node| node.class_identifier().to_string())
        };
        let reference = |address: &PortAddress| PortReference {
            processor: address.processor.clone(),
            class: class_of(&address.processor),
            port: address.port.clone(),
        };

        WorkspaceDocument {
            version: WORKSPACE_VERSION,
            processors: self
                .processors()
                .into_iter()
                .map(|node| ProcessorState {
                    class: node.class_identifier().to_string(),
                    identifier: node.identifier().to_string(),
                    metadata: node.metadata.clone(),
                    properties: node.properties.states(),
                    port_groups: node
                        .port_groups
                        .iter()
                        .filter(|(_, group)| group != DEFAULT_PORT_GROUP)
                        .cloned()
                        .collect(),
                })
                .collect(),
            connections: self
                .connections
                .iter()
                .map(|connection| ConnectionState {
                    outport: reference(&connection.outport),
                    inport: reference(&connection.inport),
                })
                .collect(),
            links: self
                .links
                .iter()
                .map(|link| LinkState {
                    source: link.source.clone(),
                    destination: link.destination.clone(),
                })
                .collect(),
        }
    }

    /// Replaces the network's contents with `document`.
    ///
    /// Loading does not stop at a bad entry: processors, connections and
    /// links that resolve are restored and every problem is reported in the
    /// returned [`WorkspaceLoadError`]. Links are resolved after all
    /// processors exist, so their order in the document does not matter.
    pub fn deserialize(
        &mut self,
        document: &WorkspaceDocument,
        factory: &ProcessorFactory,
    ) -> Result<(), WorkspaceLoadError> {
        if document.version != WORKSPACE_VERSION {
            return Err(DeserializationError::UnsupportedVersion {
                found: document.version,
                supported: WORKSPACE_VERSION,
            }
            .into());
        }

        let errors = self.batch(|network| {
            network.clear();
            let mut errors = Vec::new();
            for state in &document.processors {
                if let Err(error) = network.restore_processor(state, factory) {
                    errors.extend(error);
                }
            }
            for state in &document.connections {
                if let Err(error) = network.restore_connection(state) {
                    errors.push(error);
                }
            }
            for state in &document.links {
                if let Err(error) = network.add_link(&state.source, &state.destination) {
                    errors.push(DeserializationError::LinkRejected {
                        from: state.source.clone(),
                        to: state.destination.clone(),
                        reason: error.to_string(),
                    });
                }
            }
            errors
        });
        self.modified = false;

        for error in &errors {
            warn!(%error, "workspace problem");
        }
        info!(
            processors = self.len(),
            connections = self.connections.len(),
            links = self.links.len(),
            problems = errors.len(),
            "workspace loaded"
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorkspaceLoadError { errors })
        }
    }

    fn restore_processor(
        &mut self,
        state: &ProcessorState,
        factory: &ProcessorFactory,
    ) -> Result<(), Vec<DeserializationError>> {
        let processor = factory.create(&state.class).ok_or_else(|| {
            vec![DeserializationError::UnknownProcessorClass {
                identifier: state.identifier.clone(),
                class: state.class.clone(),
            }]
        })?;
        self.add_boxed_processor(&state.identifier, processor)
            .map_err(|error| {
                vec![DeserializationError::ProcessorRejected {
                    identifier: state.identifier.clone(),
                    class: state.class.clone(),
                    reason: error.to_string(),
                }]
            })?;

        let Some(node) = self.processors.get_mut(&state.identifier) else {
            return Ok(());
        };
        node.metadata = state.metadata.clone();
        let mut problems: Vec<DeserializationError> = node
            .properties
            .apply_states(&state.properties)
            .into_iter()
            .map(|error| DeserializationError::PropertyRejected {
                identifier: state.identifier.clone(),
                class: state.class.clone(),
                property: property_of(&error),
                reason: error.to_string(),
            })
            .collect();
        for (port, group) in &state.port_groups {
            if !node.set_port_group(port, group) {
                problems.push(DeserializationError::UnknownGroupedPort {
                    identifier: state.identifier.clone(),
                    class: state.class.clone(),
                    port: port.clone(),
                });
            }
        }
        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }

    fn restore_connection(&mut self, state: &ConnectionState) -> Result<(), DeserializationError> {
        let outport = state.outport.address();
        let inport = state.inport.address();

        for (reference, is_outport) in [(&state.outport, true), (&state.inport, false)] {
            let Some(node) = self.processors.get(&reference.processor) else {
                return Err(DeserializationError::MissingProcessor {
                    outport,
                    inport,
                    identifier: reference.processor.clone(),
                    class: reference.class_name(),
                });
            };
            let has_port = if is_outport {
                node.outport(&reference.port).is_some()
            } else {
                node.inport(&reference.port).is_some()
            };
            if !has_port {
                return Err(DeserializationError::MissingPort {
                    identifier: reference.processor.clone(),
                    class: reference.class_name(),
                    port: reference.port.clone(),
                });
            }
        }

        self.add_connection(&outport, &inport)
            .map_err(|error| DeserializationError::ConnectionRejected {
                outport: outport.clone(),
                inport: inport.clone(),
                reason: error.to_string(),
            })
    }
}

fn property_of(error: &PropertyError) -> String {
    match error {
        PropertyError::DuplicateIdentifier(identifier)
        | PropertyError::NotFound(identifier)
        | PropertyError::ReadOnly(identifier)
        | PropertyError::NotAValue(identifier)
        | PropertyError::NotAComposite(identifier)
        | PropertyError::InvalidIdentifier(identifier)
        | PropertyError::TypeMismatch { identifier, .. } => identifier.clone(),
        PropertyError::EmptyIdentifier => String::new(),
    }
}
