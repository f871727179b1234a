use crate::config::NetworkConfig;
use crate::connection::PortConnection;
use crate::error::NetworkError;
use crate::link::{PropertyLink, PropertyPath};
use crate::pool::{JobContext, JobDispatcher};
use crate::port::{InportSnapshot, PortAddress};
use crate::processor::{ProcessContext, Processor, ProcessorHandle, ProcessorNode};
use procflow_property::{
    InteractionEvent, InvalidationLevel, MetaDataMap, Observers, Property, Subscription,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Structural and scheduling notifications published by a [`ProcessorNetwork`].
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    WillAddProcessor(String),
    DidAddProcessor(String),
    WillRemoveProcessor(String),
    DidRemoveProcessor(String),
    ProcessorRenamed { old: String, new: String },
    WillAddConnection(PortConnection),
    DidAddConnection(PortConnection),
    WillRemoveConnection(PortConnection),
    DidRemoveConnection(PortConnection),
    WillAddLink(PropertyLink),
    DidAddLink(PropertyLink),
    WillRemoveLink(PropertyLink),
    DidRemoveLink(PropertyLink),
    /// Some processor became invalid and the network wants to be evaluated.
    EvaluateRequest,
    /// Anything about the network's structure changed.
    Changed,
}

/// A directed acyclic graph of processors connected port to port, plus
/// property links between them.
///
/// The network is the single owner of every processor. All mutation happens
/// on the thread that owns it; other threads post work through a
/// [`FrontSender`](crate::FrontSender).
///
/// # Example
///
/// ```no_run
/// use procflow_network::{NetworkConfig, PortAddress, ProcessorNetwork};
/// # fn source() -> Box<dyn procflow_network::Processor> { unimplemented!() }
/// # fn sink() -> Box<dyn procflow_network::Processor> { unimplemented!() }
///
/// let mut network = ProcessorNetwork::new(NetworkConfig::default());
/// network.add_boxed_processor("Source", source()).unwrap();
/// network.add_boxed_processor("Sink", sink()).unwrap();
/// network
///     .add_connection(&PortAddress::new("Source", "out"), &PortAddress::new("Sink", "in"))
///     .unwrap();
/// ```
pub struct ProcessorNetwork {
    pub(crate) config: NetworkConfig,
    pub(crate) processors: HashMap<String, ProcessorNode>,
    pub(crate) handles: HashMap<ProcessorHandle, String>,
    next_handle: u64,
    next_order: u64,
    pub(crate) connections: Vec<PortConnection>,
    pub(crate) links: Vec<PropertyLink>,
    pub(crate) linking: bool,
    pub(crate) observers: Observers<NetworkEvent>,
    lock_count: usize,
    pending_request: bool,
    pub(crate) evaluating: bool,
    pub(crate) evaluation_requested: bool,
    pub(crate) modified: bool,
    pub(crate) dispatcher: Option<JobDispatcher>,
}

impl ProcessorNetwork {
    /// A network without a background pool; `dispatch_one` fails with
    /// [`NetworkError::NoJobDispatcher`].
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            processors: HashMap::new(),
            handles: HashMap::new(),
            next_handle: 1,
            next_order: 0,
            connections: Vec::new(),
            links: Vec::new(),
            linking: false,
            observers: Observers::new(),
            lock_count: 0,
            pending_request: false,
            evaluating: false,
            evaluation_requested: false,
            modified: false,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(config: NetworkConfig, dispatcher: JobDispatcher) -> Self {
        let mut network = Self::new(config);
        network.dispatcher = Some(dispatcher);
        network
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn subscribe(&self, callback: impl Fn(&NetworkEvent) + Send + Sync + 'static) -> Subscription {
        self.observers.subscribe(callback)
    }

    // ----- processors -----

    pub fn add_processor(
        &mut self,
        identifier: &str,
        processor: impl Processor,
    ) -> Result<ProcessorHandle, NetworkError> {
        self.add_boxed_processor(identifier, Box::new(processor))
    }

    /// Adds a processor under `identifier`, or under a unique identifier
    /// derived from its display name when `identifier` is empty.
    ///
    /// The new processor starts at [`InvalidationLevel::InvalidResources`].
    pub fn add_boxed_processor(
        &mut self,
        identifier: &str,
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorHandle, NetworkError> {
        let info = processor.info();
        let identifier = if identifier.is_empty() {
            self.unique_identifier(&info.display_name)
        } else {
            identifier.to_string()
        };
        check_identifier(&identifier)?;
        if self.processors.contains_key(&identifier) {
            warn!(processor = %identifier, "duplicate processor identifier rejected");
            return Err(NetworkError::DuplicateProcessor(identifier));
        }

        let unsupported = self.unsupported_tags(&info.tags);
        if !unsupported.is_empty() {
            warn!(processor = %identifier, tags = ?unsupported, "processor requires unsupported tags");
            return Err(NetworkError::UnsupportedTags {
                processor: identifier,
                tags: unsupported,
            });
        }

        let handle = ProcessorHandle(self.next_handle);
        let node = ProcessorNode::new(&identifier, processor, handle, self.next_order)?;
        self.next_handle += 1;
        self.next_order += 1;

        self.observers
            .notify(&NetworkEvent::WillAddProcessor(identifier.clone()));
        self.handles.insert(handle, identifier.clone());
        self.processors.insert(identifier.clone(), node);
        self.modified = true;
        debug!(processor = %identifier, "processor added");
        self.observers
            .notify(&NetworkEvent::DidAddProcessor(identifier.clone()));
        self.observers.notify(&NetworkEvent::Changed);

        self.invalidate_cascade(&identifier, InvalidationLevel::InvalidResources);
        Ok(handle)
    }

    fn unsupported_tags(&self, tags: &[String]) -> Vec<String> {
        if self.config.supported_tags.is_empty() {
            return Vec::new();
        }
        tags.iter()
            .filter(|tag| !self.config.supported_tags.contains(tag))
            .cloned()
            .collect()
    }

    /// Removes a processor together with its connections and links and
    /// hands the behaviour back. Jobs still in flight are stopped and their
    /// results discarded.
    pub fn remove_processor(&mut self, identifier: &str) -> Option<Box<dyn Processor>> {
        if !self.processors.contains_key(identifier) {
            return None;
        }
        self.observers
            .notify(&NetworkEvent::WillRemoveProcessor(identifier.to_string()));

        let connections: Vec<PortConnection> = self
            .connections
            .iter()
            .filter(|connection| connection.involves_processor(identifier))
            .cloned()
            .collect();
        for connection in connections {
            self.remove_connection(&connection.outport, &connection.inport);
        }
        let links: Vec<PropertyLink> = self
            .links
            .iter()
            .filter(|link| link.involves_processor(identifier))
            .cloned()
            .collect();
        for link in links {
            self.remove_link(&link.source, &link.destination);
        }

        let mut node = self.processors.remove(identifier)?;
        node.jobs.cancel();
        self.handles.remove(&node.handle);
        self.modified = true;
        debug!(processor = %identifier, "processor removed");
        self.observers
            .notify(&NetworkEvent::DidRemoveProcessor(identifier.to_string()));
        self.observers.notify(&NetworkEvent::Changed);
        Some(node.processor)
    }

    /// Removes every processor, connection and link.
    pub fn clear(&mut self) {
        self.batch(|network| {
            for identifier in network.processor_identifiers() {
                network.remove_processor(&identifier);
            }
        });
        self.evaluation_requested = false;
    }

    pub fn rename_processor(&mut self, old: &str, new: &str) -> Result<(), NetworkError> {
        check_identifier(new)?;
        if old == new {
            return Ok(());
        }
        if self.processors.contains_key(new) {
            return Err(NetworkError::DuplicateProcessor(new.to_string()));
        }
        let mut node = self
            .processors
            .remove(old)
            .ok_or_else(|| NetworkError::ProcessorNotFound(old.to_string()))?;
        node.identifier = new.to_string();
        self.handles.insert(node.handle, new.to_string());
        self.processors.insert(new.to_string(), node);

        for node in self.processors.values_mut() {
            for inport in &mut node.inports {
                if let Some(source) = &mut inport.source {
                    if source.processor == old {
                        source.processor = new.to_string();
                    }
                }
            }
            for outport in &mut node.outports {
                for address in &mut outport.connected_inports {
                    if address.processor == old {
                        address.processor = new.to_string();
                    }
                }
            }
        }
        for connection in &mut self.connections {
            connection.rename_processor(old, new);
        }
        for link in &mut self.links {
            link.rename_processor(old, new);
        }

        self.modified = true;
        self.observers.notify(&NetworkEvent::ProcessorRenamed {
            old: old.to_string(),
            new: new.to_string(),
        });
        self.observers.notify(&NetworkEvent::Changed);
        Ok(())
    }

    /// `base` if free, otherwise `base 2`, `base 3`, ... Dots are dropped.
    pub fn unique_identifier(&self, base: &str) -> String {
        let base = base.replace('.', "");
        let base = base.trim();
        if !self.processors.contains_key(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{} {}", base, n))
            .find(|candidate| !self.processors.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn processor(&self, identifier: &str) -> Option<&ProcessorNode> {
        self.processors.get(identifier)
    }

    pub fn processor_by_handle(&self, handle: ProcessorHandle) -> Option<&ProcessorNode> {
        self.processors.get(self.handles.get(&handle)?)
    }

    /// Typed access to a processor's behaviour.
    pub fn processor_as<T: Processor>(&self, identifier: &str) -> Option<&T> {
        self.processors.get(identifier)?.processor_as::<T>()
    }

    pub fn processor_as_mut<T: Processor>(&mut self, identifier: &str) -> Option<&mut T> {
        self.processors.get_mut(identifier)?.processor_as_mut::<T>()
    }

    /// Processors in the order they were added.
    pub fn processors(&self) -> Vec<&ProcessorNode> {
        let mut nodes: Vec<&ProcessorNode> = self.processors.values().collect();
        nodes.sort_by_key(|node| node.order);
        nodes
    }

    pub fn processor_identifiers(&self) -> Vec<String> {
        self.processors()
            .into_iter()
            .map(|node| node.identifier.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn processor_metadata_mut(&mut self, identifier: &str) -> Option<&mut MetaDataMap> {
        let node = self.processors.get_mut(identifier)?;
        self.modified = true;
        Some(&mut node.metadata)
    }

    /// Shows or hides a canvas widget. Showing a hidden canvas that is still
    /// dirty asks for an evaluation.
    pub fn set_processor_visible(&mut self, identifier: &str, visible: bool) -> Result<(), NetworkError> {
        let node = self
            .processors
            .get_mut(identifier)
            .ok_or_else(|| NetworkError::ProcessorNotFound(identifier.to_string()))?;
        node.visible = visible;
        if visible && !node.is_valid() {
            self.request_evaluation();
        }
        Ok(())
    }

    pub fn set_evaluate_when_hidden(&mut self, identifier: &str, evaluate: bool) -> Result<(), NetworkError> {
        let node = self
            .processors
            .get_mut(identifier)
            .ok_or_else(|| NetworkError::ProcessorNotFound(identifier.to_string()))?;
        node.evaluate_when_hidden = evaluate;
        Ok(())
    }

    /// Adds a property at runtime; it is saved with its definition.
    pub fn add_dynamic_property(&mut self, identifier: &str, property: Property) -> Result<(), NetworkError> {
        let node = self
            .processors
            .get_mut(identifier)
            .ok_or_else(|| NetworkError::ProcessorNotFound(identifier.to_string()))?;
        node.properties.add_dynamic_property(property)?;
        self.modified = true;
        self.invalidate_cascade(identifier, InvalidationLevel::InvalidOutput);
        Ok(())
    }

    /// Removes a property (at any depth) and every link touching it.
    pub fn remove_property(&mut self, path: &PropertyPath) -> Option<Property> {
        let node = self.processors.get_mut(&path.processor)?;
        let removed = node.properties.remove_property_at(&path.path)?;

        let links: Vec<PropertyLink> = self
            .links
            .iter()
            .filter(|link| link.involves_property(path))
            .cloned()
            .collect();
        for link in links {
            self.remove_link(&link.source, &link.destination);
        }
        self.modified = true;
        self.invalidate_cascade(&path.processor, InvalidationLevel::InvalidOutput);
        Some(removed)
    }

    /// Routes an interaction event to the processor's event properties.
    /// Returns whether some property consumed it.
    pub fn invoke_event(&mut self, identifier: &str, event: &mut InteractionEvent) -> Result<bool, NetworkError> {
        let node = self
            .processors
            .get_mut(identifier)
            .ok_or_else(|| NetworkError::ProcessorNotFound(identifier.to_string()))?;
        match node.properties.invoke_event(event) {
            Some(level) => {
                self.invalidate_cascade(identifier, level);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Offers `event` to `identifier` and then, while nobody used it, to the
    /// producers feeding its inports, walking upstream depth first in inport
    /// order. Each processor is offered the event at most once.
    pub fn propagate_event(&mut self, identifier: &str, event: &mut InteractionEvent) -> Result<bool, NetworkError> {
        if !self.processors.contains_key(identifier) {
            return Err(NetworkError::ProcessorNotFound(identifier.to_string()));
        }
        let mut visited = HashSet::new();
        self.propagate_event_from(identifier, event, &mut visited);
        Ok(event.is_used())
    }

    fn propagate_event_from(
        &mut self,
        identifier: &str,
        event: &mut InteractionEvent,
        visited: &mut HashSet<String>,
    ) {
        if !visited.insert(identifier.to_string()) {
            return;
        }
        if let Ok(true) = self.invoke_event(identifier, event) {
            trace!(processor = %identifier, event = event.name(), "event used");
            return;
        }
        let producers: Vec<String> = self
            .processors
            .get(identifier)
            .map(|node| {
                node.inports
                    .iter()
                    .filter_map(|inport| inport.source.as_ref())
                    .map(|source| source.processor.clone())
                    .collect()
            })
            .unwrap_or_default();
        for producer in producers {
            self.propagate_event_from(&producer, event, visited);
            if event.is_used() {
                return;
            }
        }
    }

    // ----- connections -----

    /// Connects `outport` to `inport`.
    ///
    /// Rejected without modifying the network when either end is missing,
    /// the inport already has a producer, the port types are incompatible or
    /// the edge would close a cycle.
    pub fn add_connection(&mut self, outport: &PortAddress, inport: &PortAddress) -> Result<(), NetworkError> {
        self.check_connection(outport, inport).inspect_err(|error| {
            warn!(%outport, %inport, %error, "connection rejected");
        })?;

        let connection = PortConnection::new(outport.clone(), inport.clone());
        self.observers
            .notify(&NetworkEvent::WillAddConnection(connection.clone()));

        if let Some(port) = self
            .processors
            .get_mut(&outport.processor)
            .and_then(|node| node.outport_mut(&outport.port))
        {
            port.connected_inports.push(inport.clone());
        }
        if let Some(port) = self
            .processors
            .get_mut(&inport.processor)
            .and_then(|node| node.inport_mut(&inport.port))
        {
            port.source = Some(outport.clone());
            port.changed = true;
        }
        self.connections.push(connection.clone());
        self.modified = true;
        self.observers
            .notify(&NetworkEvent::DidAddConnection(connection));
        self.observers.notify(&NetworkEvent::Changed);

        self.invalidate_cascade(&inport.processor, InvalidationLevel::InvalidOutput);
        Ok(())
    }

    fn check_connection(&self, outport: &PortAddress, inport: &PortAddress) -> Result<(), NetworkError> {
        let source = self
            .processors
            .get(&outport.processor)
            .ok_or_else(|| NetworkError::ProcessorNotFound(outport.processor.clone()))?
            .outport(&outport.port)
            .ok_or_else(|| NetworkError::PortNotFound {
                processor: outport.processor.clone(),
                port: outport.port.clone(),
            })?;
        let target = self
            .processors
            .get(&inport.processor)
            .ok_or_else(|| NetworkError::ProcessorNotFound(inport.processor.clone()))?
            .inport(&inport.port)
            .ok_or_else(|| NetworkError::PortNotFound {
                processor: inport.processor.clone(),
                port: inport.port.clone(),
            })?;

        if let Some(existing) = target.source() {
            return Err(if existing == outport {
                NetworkError::ConnectionExists {
                    outport: outport.clone(),
                    inport: inport.clone(),
                }
            } else {
                NetworkError::InportAlreadyConnected {
                    inport: inport.clone(),
                    existing: existing.clone(),
                }
            });
        }
        if !target.port_type().accepts(source.port_type()) {
            return Err(NetworkError::IncompatiblePorts {
                outport: outport.clone(),
                inport: inport.clone(),
                from: source.port_type().clone(),
                to: target.port_type().clone(),
            });
        }
        if self.is_downstream(&inport.processor, &outport.processor) {
            return Err(NetworkError::CycleDetected {
                outport: outport.clone(),
                inport: inport.clone(),
            });
        }
        Ok(())
    }

    /// Whether `target` is `start` or reachable from it along connections.
    pub(crate) fn is_downstream(&self, start: &str, target: &str) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            stack.extend(self.successors(current));
        }
        false
    }

    /// Processors directly fed by `identifier`, deduplicated, in connection order.
    pub(crate) fn successors(&self, identifier: &str) -> Vec<&str> {
        let mut result: Vec<&str> = Vec::new();
        for connection in &self.connections {
            if connection.outport.processor == identifier
                && !result.contains(&connection.inport.processor.as_str())
            {
                result.push(connection.inport.processor.as_str());
            }
        }
        result
    }

    /// Disconnects the pair and invalidates the consumer. `None` if they were
    /// not connected.
    pub fn remove_connection(&mut self, outport: &PortAddress, inport: &PortAddress) -> Option<PortConnection> {
        let index = self
            .connections
            .iter()
            .position(|c| &c.outport == outport && &c.inport == inport)?;
        let connection = self.connections[index].clone();
        self.observers
            .notify(&NetworkEvent::WillRemoveConnection(connection.clone()));

        if let Some(port) = self
            .processors
            .get_mut(&outport.processor)
            .and_then(|node| node.outport_mut(&outport.port))
        {
            port.connected_inports.retain(|address| address != inport);
        }
        if let Some(port) = self
            .processors
            .get_mut(&inport.processor)
            .and_then(|node| node.inport_mut(&inport.port))
        {
            port.source = None;
            port.changed = true;
        }
        self.connections.remove(index);
        self.modified = true;
        self.observers
            .notify(&NetworkEvent::DidRemoveConnection(connection.clone()));
        self.observers.notify(&NetworkEvent::Changed);

        self.invalidate_cascade(&inport.processor, InvalidationLevel::InvalidOutput);
        Some(connection)
    }

    pub fn connections(&self) -> &[PortConnection] {
        &self.connections
    }

    pub fn is_connected(&self, outport: &PortAddress, inport: &PortAddress) -> bool {
        self.connections
            .iter()
            .any(|c| &c.outport == outport && &c.inport == inport)
    }

    /// Whether the inport's producer currently offers data: always true for
    /// an unconnected optional inport.
    pub fn is_inport_ready(&self, processor: &str, inport: &str) -> bool {
        self.processors
            .get(processor)
            .and_then(|node| node.inport(inport))
            .is_some_and(|port| match port.source() {
                None => port.is_optional(),
                Some(source) => self
                    .processors
                    .get(&source.processor)
                    .and_then(|node| node.outport(&source.port))
                    .is_some_and(|outport| outport.is_ready()),
            })
    }

    /// Every inport is ready, so `process` may run.
    pub fn is_processor_ready(&self, identifier: &str) -> bool {
        self.processors.get(identifier).is_some_and(|node| {
            node.inports
                .iter()
                .all(|inport| self.is_inport_ready(identifier, inport.identifier()))
        })
    }

    // ----- invalidation and scheduling -----

    /// Raises the processor to `level` and everything downstream of it to
    /// [`InvalidationLevel::InvalidOutput`].
    pub fn invalidate_processor(&mut self, identifier: &str, level: InvalidationLevel) -> Result<(), NetworkError> {
        if !self.processors.contains_key(identifier) {
            return Err(NetworkError::ProcessorNotFound(identifier.to_string()));
        }
        self.invalidate_cascade(identifier, level);
        Ok(())
    }

    pub(crate) fn invalidate_cascade(&mut self, identifier: &str, level: InvalidationLevel) {
        if level.is_valid() {
            return;
        }
        let mut pending = vec![(identifier.to_string(), level)];
        let mut visited: HashSet<String> = HashSet::new();
        let mut needs_evaluation = false;

        while let Some((current, level)) = pending.pop() {
            let Some(node) = self.processors.get_mut(&current) else {
                continue;
            };
            node.invalidate(level);
            needs_evaluation |= node.is_end_processor();
            if !visited.insert(current.clone()) {
                continue;
            }
            // Consumers hear about it when the new result is set.
            if node.options.delay_invalidation {
                needs_evaluation = true;
                continue;
            }
            for outport in &node.outports {
                for address in &outport.connected_inports {
                    pending.push((address.processor.clone(), InvalidationLevel::InvalidOutput));
                }
            }
        }

        if needs_evaluation {
            self.request_evaluation();
        }
    }

    /// Processors above [`InvalidationLevel::Valid`], in insertion order.
    pub fn dirty_processors(&self) -> Vec<String> {
        self.processors()
            .into_iter()
            .filter(|node| !node.is_valid())
            .map(|node| node.identifier.clone())
            .collect()
    }

    pub fn request_evaluation(&mut self) {
        if self.is_locked() {
            self.pending_request = true;
            return;
        }
        if self.evaluating {
            return;
        }
        self.evaluation_requested = true;
        self.observers.notify(&NetworkEvent::EvaluateRequest);
    }

    pub fn evaluation_requested(&self) -> bool {
        self.evaluation_requested
    }

    /// Runs `f` with the network locked. Evaluation requests raised inside
    /// are coalesced into one, delivered when the outermost batch ends.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut ProcessorNetwork) -> R) -> R {
        self.lock_count += 1;
        let result = f(self);
        self.lock_count -= 1;
        if self.lock_count == 0 && std::mem::take(&mut self.pending_request) {
            self.request_evaluation();
        }
        result
    }

    pub fn is_locked(&self) -> bool {
        self.lock_count > 0
    }

    /// Set by every structural change; cleared by the host, e.g. after saving.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    // ----- calling into processors -----

    fn input_snapshots(&self, identifier: &str) -> Option<Vec<InportSnapshot>> {
        let node = self.processors.get(identifier)?;
        Some(
            node.inports
                .iter()
                .map(|inport| InportSnapshot {
                    identifier: inport.identifier().to_string(),
                    data: inport.source().and_then(|source| {
                        self.processors
                            .get(&source.processor)?
                            .outport(&source.port)?
                            .data()
                            .cloned()
                    }),
                    changed: inport.is_changed(),
                    connected: inport.is_connected(),
                })
                .collect(),
        )
    }

    /// Calls into a processor's behaviour with a fresh [`ProcessContext`],
    /// then pushes changed outputs downstream and evaluates links from any
    /// property the processor wrote.
    pub(crate) fn call_processor<R>(
        &mut self,
        identifier: &str,
        call: impl FnOnce(&mut dyn Processor, &mut ProcessContext<'_>) -> R,
    ) -> Option<R> {
        let inputs = self.input_snapshots(identifier)?;
        let dispatcher = self.dispatcher.as_ref();
        let node = self.processors.get_mut(identifier)?;
        let ProcessorNode {
            identifier: node_identifier,
            handle,
            processor,
            properties,
            outports,
            metadata,
            liveness,
            jobs,
            options,
            ..
        } = node;

        let mut ctx = ProcessContext {
            identifier: node_identifier.as_str(),
            inputs: &inputs,
            outports,
            properties,
            metadata,
            jobs: JobContext {
                dispatcher,
                state: jobs,
                handle: *handle,
                liveness,
                options: *options,
            },
            property_writes: Vec::new(),
        };
        let result = call(&mut **processor, &mut ctx);
        let writes = std::mem::take(&mut ctx.property_writes);
        drop(ctx);

        self.propagate_outputs(identifier);
        for path in writes {
            let path = PropertyPath {
                processor: identifier.to_string(),
                path,
            };
            self.propagate_links(&path);
        }
        Some(result)
    }

    /// Marks consumers of every outport that got new data as changed and
    /// invalidates them.
    fn propagate_outputs(&mut self, identifier: &str) {
        let Some(node) = self.processors.get_mut(identifier) else {
            return;
        };
        let targets: Vec<PortAddress> = node
            .outports
            .iter_mut()
            .filter_map(|outport| outport.take_changed().then(|| outport.connected_inports.clone()))
            .flatten()
            .collect();
        for address in targets {
            if let Some(inport) = self
                .processors
                .get_mut(&address.processor)
                .and_then(|node| node.inport_mut(&address.port))
            {
                inport.changed = true;
            }
            self.invalidate_cascade(&address.processor, InvalidationLevel::InvalidOutput);
        }
    }
}

impl std::fmt::Debug for ProcessorNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorNetwork")
            .field("processors", &self.processor_identifiers())
            .field("connections", &self.connections)
            .field("links", &self.links)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Processor identifiers double as the first segment of property paths, so
/// they may not be empty or contain the path separator.
fn check_identifier(identifier: &str) -> Result<(), NetworkError> {
    if identifier.is_empty() {
        return Err(NetworkError::EmptyIdentifier);
    }
    if identifier.contains('.') {
        warn!(processor = %identifier, "processor identifier contains '.'");
        return Err(NetworkError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}
