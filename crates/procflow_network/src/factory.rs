use crate::error::NetworkError;
use crate::processor::{Processor, ProcessorInfo};
use crate::workspace::VersionConverter;
use std::collections::BTreeMap;
use tracing::debug;

pub type ProcessorConstructor = Box<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

struct FactoryEntry {
    info: ProcessorInfo,
    constructor: ProcessorConstructor,
}

/// Creates processors by class identifier. Used when loading workspaces
/// and when a host builds networks from names.
#[derive(Default)]
pub struct ProcessorFactory {
    entries: BTreeMap<String, FactoryEntry>,
}

impl ProcessorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `P` using its `Default` impl.
    pub fn register<P: Processor + Default>(&mut self) -> Result<(), NetworkError> {
        let info = P::default().info();
        self.register_with(info, || Box::new(P::default()))
    }

    pub fn register_with(
        &mut self,
        info: ProcessorInfo,
        constructor: impl Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    ) -> Result<(), NetworkError> {
        let class = info.class_identifier.clone();
        if class.is_empty() || class.chars().any(char::is_whitespace) {
            return Err(NetworkError::InvalidClassIdentifier(class));
        }
        if self.entries.contains_key(&class) {
            return Err(NetworkError::DuplicateClassIdentifier(class));
        }
        debug!(class = %class, "processor class registered");
        self.entries.insert(
            class,
            FactoryEntry {
                info,
                constructor: Box::new(constructor),
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, class_identifier: &str) -> bool {
        self.entries.remove(class_identifier).is_some()
    }

    pub fn create(&self, class_identifier: &str) -> Option<Box<dyn Processor>> {
        self.entries
            .get(class_identifier)
            .map(|entry| (entry.constructor)())
    }

    pub fn has(&self, class_identifier: &str) -> bool {
        self.entries.contains_key(class_identifier)
    }

    pub fn info(&self, class_identifier: &str) -> Option<&ProcessorInfo> {
        self.entries.get(class_identifier).map(|entry| &entry.info)
    }

    /// Info of every visible class, sorted by class identifier.
    pub fn infos(&self) -> Vec<&ProcessorInfo> {
        self.entries
            .values()
            .map(|entry| &entry.info)
            .filter(|info| info.visible)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ProcessorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorFactory")
            .field("classes", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What a module can contribute while it is being registered.
pub struct ModuleRegistry<'a> {
    pub(crate) factory: &'a mut ProcessorFactory,
    pub(crate) converters: &'a mut Vec<Box<dyn VersionConverter>>,
}

impl ModuleRegistry<'_> {
    pub fn register_processor<P: Processor + Default>(&mut self) -> Result<(), NetworkError> {
        self.factory.register::<P>()
    }

    pub fn register_processor_with(
        &mut self,
        info: ProcessorInfo,
        constructor: impl Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    ) -> Result<(), NetworkError> {
        self.factory.register_with(info, constructor)
    }

    pub fn register_converter(&mut self, converter: impl VersionConverter + 'static) {
        self.converters.push(Box::new(converter));
    }
}

/// A bundle of processor classes and workspace converters.
pub trait Module {
    fn name(&self) -> &str;

    fn register(&self, registry: &mut ModuleRegistry<'_>) -> Result<(), NetworkError>;
}
