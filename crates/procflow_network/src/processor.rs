use crate::error::NetworkError;
use crate::pool::{JobContext, JobId, JobOutput, JobState, PoolOptions, Progress, Stop};
use crate::port::{Inport, InportSnapshot, Outport, PortData};
use procflow_property::{
    InvalidationLevel, MetaDataMap, MetaDataOwner, Property, PropertyError, PropertyOwner,
    PropertyValue,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Stable identity of a processor for as long as it is in a network.
/// Survives renames; never reused within one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorHandle(pub(crate) u64);

/// Held by the network for each live processor. Background work keeps a
/// weak reference and checks it before touching the processor.
#[derive(Debug)]
pub(crate) struct Liveness;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CodeState {
    Broken,
    Experimental,
    #[default]
    Stable,
    Deprecated,
}

/// Static description of a processor class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorInfo {
    /// Globally unique, reverse-DNS style, e.g. `org.procflow.VolumeSource`.
    pub class_identifier: String,
    pub display_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub code_state: CodeState,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub help: String,
    /// Listed by the factory for interactive creation.
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl ProcessorInfo {
    pub fn new(class_identifier: &str, display_name: &str) -> Self {
        Self {
            class_identifier: class_identifier.to_string(),
            display_name: display_name.to_string(),
            category: String::new(),
            code_state: CodeState::default(),
            tags: Vec::new(),
            help: String::new(),
            visible: true,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_code_state(mut self, code_state: CodeState) -> Self {
        self.code_state = code_state;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Group of every port declared without one.
pub const DEFAULT_PORT_GROUP: &str = "default";

/// Ports and properties a processor declares when it joins a network.
#[derive(Debug, Default)]
pub struct ProcessorSetup {
    pub(crate) inports: Vec<Inport>,
    pub(crate) outports: Vec<Outport>,
    pub(crate) port_groups: Vec<(String, String)>,
    pub(crate) properties: PropertyOwner,
}

impl ProcessorSetup {
    fn has_port(&self, identifier: &str) -> bool {
        self.inports.iter().any(|p| p.identifier() == identifier)
            || self.outports.iter().any(|p| p.identifier() == identifier)
    }

    fn duplicate(&self, identifier: &str) -> NetworkError {
        NetworkError::DuplicatePort {
            processor: String::new(),
            port: identifier.to_string(),
        }
    }

    /// Port identifiers are unique across inports and outports.
    pub fn add_inport(&mut self, inport: Inport) -> Result<&mut Self, NetworkError> {
        self.add_inport_to_group(inport, DEFAULT_PORT_GROUP)
    }

    pub fn add_outport(&mut self, outport: Outport) -> Result<&mut Self, NetworkError> {
        self.add_outport_to_group(outport, DEFAULT_PORT_GROUP)
    }

    /// Adds an inport to a named port group, for processors whose ports form
    /// independent sets.
    pub fn add_inport_to_group(&mut self, inport: Inport, group: &str) -> Result<&mut Self, NetworkError> {
        if self.has_port(inport.identifier()) {
            return Err(self.duplicate(inport.identifier()));
        }
        self.port_groups
            .push((inport.identifier().to_string(), group.to_string()));
        self.inports.push(inport);
        Ok(self)
    }

    pub fn add_outport_to_group(&mut self, outport: Outport, group: &str) -> Result<&mut Self, NetworkError> {
        if self.has_port(outport.identifier()) {
            return Err(self.duplicate(outport.identifier()));
        }
        self.port_groups
            .push((outport.identifier().to_string(), group.to_string()));
        self.outports.push(outport);
        Ok(self)
    }

    pub fn add_property(&mut self, property: Property) -> Result<&mut Self, NetworkError> {
        self.properties.add_property(property)?;
        Ok(self)
    }
}

/// Behaviour of a node in a [`ProcessorNetwork`](crate::ProcessorNetwork).
///
/// The network owns ports, properties and scheduling state; an implementation
/// only declares its ports in [`Processor::setup`] and computes outputs in
/// [`Processor::process`].
///
/// ```no_run
/// use procflow_network::{Inport, Outport, PortType, ProcessContext, Processor, ProcessorInfo, ProcessorSetup, NetworkError};
/// use procflow_property::Property;
///
/// struct Scale;
///
/// impl Processor for Scale {
///     fn info(&self) -> ProcessorInfo {
///         ProcessorInfo::new("org.procflow.Scale", "Scale")
///     }
///
///     fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
///         setup
///             .add_inport(Inport::new("in", PortType::Float))?
///             .add_outport(Outport::new("out", PortType::Float))?
///             .add_property(Property::new("factor", "Factor", 2.0))?;
///         Ok(())
///     }
///
///     fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
///         let input = ctx.input_as::<f64>("in").ok_or_else(|| anyhow::anyhow!("no input"))?;
///         let factor = ctx.value("factor").and_then(|v| v.as_float()).unwrap_or(1.0);
///         ctx.set_output("out", *input * factor)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Processor: Any {
    fn info(&self) -> ProcessorInfo;

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError>;

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()>;

    /// Called instead of `process` while some required inport is not ready.
    fn do_if_not_ready(&mut self, _ctx: &mut ProcessContext<'_>) {}

    /// Receives the result of a background job on the front thread.
    fn job_finished(
        &mut self,
        _ctx: &mut ProcessContext<'_>,
        _output: JobOutput,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn pool_options(&self) -> PoolOptions {
        PoolOptions::default()
    }

    /// Canvas processors are skipped while their widget is hidden.
    fn is_canvas(&self) -> bool {
        false
    }
}

/// What a processor may touch while the network calls into it.
///
/// Input data handles are taken before the call and stay stable for its
/// duration.
pub struct ProcessContext<'a> {
    pub(crate) identifier: &'a str,
    pub(crate) inputs: &'a [InportSnapshot],
    pub(crate) outports: &'a mut [Outport],
    pub(crate) properties: &'a mut PropertyOwner,
    pub(crate) metadata: &'a MetaDataMap,
    pub(crate) jobs: JobContext<'a>,
    pub(crate) property_writes: Vec<Vec<String>>,
}

impl ProcessContext<'_> {
    pub fn identifier(&self) -> &str {
        self.identifier
    }

    fn input(&self, port: &str) -> Option<&InportSnapshot> {
        self.inputs.iter().find(|input| input.identifier == port)
    }

    pub fn input_data(&self, port: &str) -> Option<&PortData> {
        self.input(port).and_then(|input| input.data.as_ref())
    }

    /// Typed input data, `None` when missing or of another type.
    pub fn input_as<T: Any + Send + Sync>(&self, port: &str) -> Option<Arc<T>> {
        self.input_data(port)
            .cloned()
            .and_then(|data| data.downcast::<T>().ok())
    }

    pub fn is_changed(&self, port: &str) -> bool {
        self.input(port).is_some_and(|input| input.changed)
    }

    pub fn is_connected(&self, port: &str) -> bool {
        self.input(port).is_some_and(|input| input.connected)
    }

    pub fn outport(&self, port: &str) -> Option<&Outport> {
        self.outports.iter().find(|outport| outport.identifier() == port)
    }

    pub fn outport_mut(&mut self, port: &str) -> Result<&mut Outport, NetworkError> {
        let processor = self.identifier.to_string();
        self.outports
            .iter_mut()
            .find(|outport| outport.identifier() == port)
            .ok_or_else(|| NetworkError::PortNotFound {
                processor,
                port: port.to_string(),
            })
    }

    pub fn set_output<T: Any + Send + Sync>(&mut self, port: &str, value: T) -> Result<(), NetworkError> {
        self.outport_mut(port)?.set_data(value);
        Ok(())
    }

    pub fn set_output_data(&mut self, port: &str, data: PortData) -> Result<(), NetworkError> {
        self.outport_mut(port)?.set_port_data(data);
        Ok(())
    }

    pub fn clear_output(&mut self, port: &str) -> Result<(), NetworkError> {
        self.outport_mut(port)?.clear();
        Ok(())
    }

    pub fn properties(&self) -> &PropertyOwner {
        &*self.properties
    }

    pub fn property(&self, identifier: &str) -> Option<&Property> {
        self.properties.property(identifier)
    }

    pub fn value(&self, identifier: &str) -> Option<&PropertyValue> {
        self.properties.property(identifier).map(Property::value)
    }

    /// Writes one of the processor's own properties. Links leaving it are
    /// evaluated once the call returns.
    pub fn set_property(&mut self, path: &[&str], value: impl Into<PropertyValue>) -> Result<(), PropertyError> {
        if self.properties.set_value(path, value.into())?.is_some() {
            self.property_writes
                .push(path.iter().map(|segment| segment.to_string()).collect());
        }
        Ok(())
    }

    pub fn metadata(&self) -> &MetaDataMap {
        self.metadata
    }

    /// Runs `job` on the background pool. Its return value reaches
    /// [`Processor::job_finished`] later, unless the processor is gone, the job
    /// was stopped, or a newer job superseded it.
    pub fn dispatch_one<T, F>(&mut self, job: F) -> Result<JobId, NetworkError>
    where
        T: Send + 'static,
        F: FnOnce(&Stop, &Progress) -> T + Send + 'static,
    {
        self.jobs.dispatch(job)
    }

    /// Stops running jobs and drops a held-back dispatch.
    pub fn stop_jobs(&mut self) {
        self.jobs.state.cancel();
    }

    pub fn has_jobs(&self) -> bool {
        self.jobs.state.has_jobs()
    }
}

/// A processor as owned by the network: behaviour plus ports, properties,
/// metadata and scheduling state.
pub struct ProcessorNode {
    pub(crate) identifier: String,
    pub(crate) handle: ProcessorHandle,
    pub(crate) order: u64,
    pub(crate) info: ProcessorInfo,
    pub(crate) processor: Box<dyn Processor>,
    pub(crate) properties: PropertyOwner,
    pub(crate) inports: Vec<Inport>,
    pub(crate) outports: Vec<Outport>,
    /// `(port, group)` in declaration order.
    pub(crate) port_groups: Vec<(String, String)>,
    pub(crate) metadata: MetaDataMap,
    pub(crate) liveness: Arc<Liveness>,
    pub(crate) jobs: JobState,
    pub(crate) options: PoolOptions,
    pub(crate) canvas: bool,
    pub(crate) visible: bool,
    pub(crate) evaluate_when_hidden: bool,
    pub(crate) error: Option<String>,
}

impl ProcessorNode {
    pub(crate) fn new(
        identifier: &str,
        processor: Box<dyn Processor>,
        handle: ProcessorHandle,
        order: u64,
    ) -> Result<Self, NetworkError> {
        let mut setup = ProcessorSetup::default();
        processor.setup(&mut setup).map_err(|error| match error {
            NetworkError::DuplicatePort { port, .. } => NetworkError::DuplicatePort {
                processor: identifier.to_string(),
                port,
            },
            other => other,
        })?;

        let mut properties = setup.properties;
        properties.invalidate(InvalidationLevel::InvalidResources);

        Ok(Self {
            identifier: identifier.to_string(),
            handle,
            order,
            info: processor.info(),
            options: processor.pool_options(),
            canvas: processor.is_canvas(),
            processor,
            properties,
            inports: setup.inports,
            outports: setup.outports,
            port_groups: setup.port_groups,
            metadata: MetaDataMap::new(),
            liveness: Arc::new(Liveness),
            jobs: JobState::default(),
            visible: true,
            evaluate_when_hidden: false,
            error: None,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn handle(&self) -> ProcessorHandle {
        self.handle
    }

    pub fn info(&self) -> &ProcessorInfo {
        &self.info
    }

    pub fn class_identifier(&self) -> &str {
        &self.info.class_identifier
    }

    pub fn properties(&self) -> &PropertyOwner {
        &self.properties
    }

    pub fn inports(&self) -> &[Inport] {
        &self.inports
    }

    pub fn outports(&self) -> &[Outport] {
        &self.outports
    }

    pub fn inport(&self, identifier: &str) -> Option<&Inport> {
        self.inports.iter().find(|p| p.identifier() == identifier)
    }

    pub fn outport(&self, identifier: &str) -> Option<&Outport> {
        self.outports.iter().find(|p| p.identifier() == identifier)
    }

    pub(crate) fn inport_mut(&mut self, identifier: &str) -> Option<&mut Inport> {
        self.inports.iter_mut().find(|p| p.identifier() == identifier)
    }

    pub(crate) fn outport_mut(&mut self, identifier: &str) -> Option<&mut Outport> {
        self.outports.iter_mut().find(|p| p.identifier() == identifier)
    }

    pub fn port_group(&self, port: &str) -> Option<&str> {
        self.port_groups
            .iter()
            .find(|(identifier, _)| identifier == port)
            .map(|(_, group)| group.as_str())
    }

    /// Every group with at least one port, sorted.
    pub fn port_groups(&self) -> Vec<&str> {
        let groups: BTreeSet<&str> = self
            .port_groups
            .iter()
            .map(|(_, group)| group.as_str())
            .collect();
        groups.into_iter().collect()
    }

    /// Ports of `group` in declaration order, inports and outports mixed.
    pub fn ports_in_group(&self, group: &str) -> Vec<&str> {
        self.port_groups
            .iter()
            .filter(|(_, g)| g == group)
            .map(|(port, _)| port.as_str())
            .collect()
    }

    /// Ports sharing `port`'s group, `port` included. Empty for an unknown port.
    pub fn ports_in_same_group(&self, port: &str) -> Vec<&str> {
        self.port_group(port)
            .map(|group| self.ports_in_group(group))
            .unwrap_or_default()
    }

    /// Moves `port` to `group`. False when the processor has no such port.
    pub(crate) fn set_port_group(&mut self, port: &str, group: &str) -> bool {
        match self.port_groups.iter_mut().find(|(identifier, _)| identifier == port) {
            Some((_, current)) => {
                *current = group.to_string();
                true
            }
            None => false,
        }
    }

    pub fn invalidation_level(&self) -> InvalidationLevel {
        self.properties.invalidation_level()
    }

    pub fn is_valid(&self) -> bool {
        self.properties.is_valid()
    }

    /// Processors without outports terminate the network.
    pub fn is_end_processor(&self) -> bool {
        self.outports.is_empty()
    }

    pub fn all_inports_connected(&self) -> bool {
        self.inports.iter().all(Inport::is_connected)
    }

    pub fn is_canvas(&self) -> bool {
        self.canvas
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn evaluates_when_hidden(&self) -> bool {
        self.evaluate_when_hidden
    }

    /// Message of the last failed `process` or job, cleared by the next success.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_jobs(&self) -> bool {
        self.jobs.has_jobs()
    }

    pub fn job_progress(&self) -> f32 {
        self.jobs.progress.get()
    }

    pub fn processor(&self) -> &dyn Processor {
        &*self.processor
    }

    pub fn processor_as<T: Processor>(&self) -> Option<&T> {
        let processor: &dyn Processor = &*self.processor;
        let processor: &dyn Any = processor;
        processor.downcast_ref::<T>()
    }

    pub(crate) fn processor_as_mut<T: Processor>(&mut self) -> Option<&mut T> {
        let processor: &mut dyn Processor = &mut *self.processor;
        let processor: &mut dyn Any = processor;
        processor.downcast_mut::<T>()
    }

    /// Raises the invalidation level. Outports stop being ready as soon as
    /// the processor is invalid, unless it delays invalidation until its
    /// next job result.
    pub(crate) fn invalidate(&mut self, level: InvalidationLevel) {
        self.properties.invalidate(level);
        if !self.properties.is_valid() && !self.options.delay_invalidation {
            self.set_outports_valid(false);
        }
    }

    /// Marks the processor processed. Outports of a processor that still has
    /// jobs in flight stay pending until a result is applied.
    pub(crate) fn set_valid(&mut self) {
        self.properties.set_valid();
        for inport in &mut self.inports {
            inport.changed = false;
        }
        let pending = self.jobs.has_jobs() && !self.options.delay_invalidation;
        self.set_outports_valid(!pending);
    }

    pub(crate) fn set_outports_valid(&mut self, valid: bool) {
        for outport in &mut self.outports {
            outport.set_valid(valid);
        }
    }

    /// Releases pending outports once a valid processor has no work left.
    pub(crate) fn settle_outports(&mut self) {
        if self.is_valid() && !self.jobs.has_jobs() {
            self.set_outports_valid(true);
        }
    }
}

impl MetaDataOwner for ProcessorNode {
    fn metadata(&self) -> &MetaDataMap {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut MetaDataMap {
        &mut self.metadata
    }
}

impl std::fmt::Debug for ProcessorNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorNode")
            .field("identifier", &self.identifier)
            .field("class", &self.info.class_identifier)
            .field("level", &self.invalidation_level())
            .field("inports", &self.inports)
            .field("outports", &self.outports)
            .finish()
    }
}
