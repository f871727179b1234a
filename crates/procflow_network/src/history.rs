use crate::config::HistoryConfig;
use crate::error::NetworkError;
use crate::link::PropertyPath;
use crate::network::ProcessorNetwork;
use crate::port::PortAddress;
use procflow_property::PropertyValue;
use tracing::{debug, warn};

/// An undoable network edit.
pub trait Command {
    fn execute(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError>;
    fn undo(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError>;

    fn description(&self) -> String {
        String::from("Edit")
    }
}

/// Composite command for grouping multiple commands into a single transaction
pub struct CompositeCommand {
    commands: Vec<Box<dyn Command>>,
    description: String,
}

impl CompositeCommand {
    pub fn new(description: &str) -> Self {
        Self {
            commands: Vec::new(),
            description: description.to_string(),
        }
    }

    pub fn add_command(&mut self, command: Box<dyn Command>) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Command for CompositeCommand {
    /// Runs the commands in order inside one network batch. When one fails
    /// the ones already executed are undone.
    fn execute(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.batch(|network| {
            for (index, command) in self.commands.iter().enumerate() {
                if let Err(error) = command.execute(network) {
                    for done in self.commands[..index].iter().rev() {
                        if let Err(undo_error) = done.undo(network) {
                            warn!(%undo_error, "rollback of composite command failed");
                        }
                    }
                    return Err(error);
                }
            }
            Ok(())
        })
    }

    fn undo(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.batch(|network| {
            for command in self.commands.iter().rev() {
                command.undo(network)?;
            }
            Ok(())
        })
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Bounded undo/redo stacks over network commands.
pub struct NetworkHistory {
    undo_stack: Vec<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
    max_history: Option<usize>,
}

impl Default for NetworkHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkHistory {
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_history: None,
        }
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            max_history: Some(max_history),
            ..Self::new()
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self {
            max_history: config.max_history,
            ..Self::new()
        }
    }

    pub fn execute(
        &mut self,
        command: Box<dyn Command>,
        network: &mut ProcessorNetwork,
    ) -> Result<(), NetworkError> {
        command.execute(network)?;
        debug!(command = %command.description(), "executed");
        self.undo_stack.push(command);
        if let Some(max) = self.max_history {
            while self.undo_stack.len() > max {
                self.undo_stack.remove(0);
            }
        }
        self.redo_stack.clear();
        Ok(())
    }

    pub fn undo(&mut self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        let command = self
            .undo_stack
            .pop()
            .ok_or_else(|| NetworkError::History("No operations to undo".to_string()))?;
        command.undo(network)?;
        self.redo_stack.push(command);
        Ok(())
    }

    pub fn redo(&mut self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        let command = self
            .redo_stack
            .pop()
            .ok_or_else(|| NetworkError::History("No operations to redo".to_string()))?;
        command.execute(network)?;
        self.undo_stack.push(command);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Description of the command `undo` would revert.
    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.last().map(|command| command.description())
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn begin_transaction(&self) -> CompositeCommand {
        CompositeCommand::new("Transaction")
    }

    pub fn commit_transaction(
        &mut self,
        transaction: CompositeCommand,
        network: &mut ProcessorNetwork,
    ) -> Result<(), NetworkError> {
        self.execute(Box::new(transaction), network)
    }
}

// Connection operations
pub struct AddConnectionCommand {
    outport: PortAddress,
    inport: PortAddress,
}

impl AddConnectionCommand {
    pub fn new(outport: PortAddress, inport: PortAddress) -> Self {
        Self { outport, inport }
    }
}

impl Command for AddConnectionCommand {
    fn execute(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.add_connection(&self.outport, &self.inport)
    }

    fn undo(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.remove_connection(&self.outport, &self.inport);
        Ok(())
    }

    fn description(&self) -> String {
        format!("Connect {} -> {}", self.outport, self.inport)
    }
}

pub struct RemoveConnectionCommand {
    outport: PortAddress,
    inport: PortAddress,
}

impl RemoveConnectionCommand {
    pub fn new(outport: PortAddress, inport: PortAddress) -> Self {
        Self { outport, inport }
    }
}

impl Command for RemoveConnectionCommand {
    fn execute(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network
            .remove_connection(&self.outport, &self.inport)
            .map(|_| ())
            .ok_or_else(|| NetworkError::History(format!("{} -> {} is not connected", self.outport, self.inport)))
    }

    fn undo(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.add_connection(&self.outport, &self.inport)
    }

    fn description(&self) -> String {
        format!("Disconnect {} -> {}", self.outport, self.inport)
    }
}

// Link operations
pub struct AddLinkCommand {
    source: PropertyPath,
    destination: PropertyPath,
}

impl AddLinkCommand {
    pub fn new(source: PropertyPath, destination: PropertyPath) -> Self {
        Self {
            source,
            destination,
        }
    }
}

impl Command for AddLinkCommand {
    fn execute(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.add_link(&self.source, &self.destination)
    }

    fn undo(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.remove_link(&self.source, &self.destination);
        Ok(())
    }

    fn description(&self) -> String {
        format!("Link {} -> {}", self.source, self.destination)
    }
}

pub struct RemoveLinkCommand {
    source: PropertyPath,
    destination: PropertyPath,
}

impl RemoveLinkCommand {
    pub fn new(source: PropertyPath, destination: PropertyPath) -> Self {
        Self {
            source,
            destination,
        }
    }
}

impl Command for RemoveLinkCommand {
    fn execute(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network
            .remove_link(&self.source, &self.destination)
            .map(|_| ())
            .ok_or_else(|| NetworkError::History(format!("{} -> {} is not linked", self.source, self.destination)))
    }

    fn undo(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.add_link(&self.source, &self.destination)
    }

    fn description(&self) -> String {
        format!("Unlink {} -> {}", self.source, self.destination)
    }
}

// Property operations
pub struct SetPropertyCommand {
    path: PropertyPath,
    old_value: PropertyValue,
    new_value: PropertyValue,
}

impl SetPropertyCommand {
    /// Captures the current value of `path` so the change can be reverted.
    pub fn new(
        network: &ProcessorNetwork,
        path: PropertyPath,
        new_value: impl Into<PropertyValue>,
    ) -> Result<Self, NetworkError> {
        let old_value = network
            .property(&path)
            .ok_or_else(|| NetworkError::PropertyNotFound(path.clone()))?
            .value()
            .clone();
        Ok(Self {
            path,
            old_value,
            new_value: new_value.into(),
        })
    }
}

impl Command for SetPropertyCommand {
    fn execute(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.set_property_value(&self.path, self.new_value.clone())
    }

    fn undo(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.set_property_value(&self.path, self.old_value.clone())
    }

    fn description(&self) -> String {
        format!("Set {}", self.path)
    }
}

pub struct RenameProcessorCommand {
    old: String,
    new: String,
}

impl RenameProcessorCommand {
    pub fn new(old: &str, new: &str) -> Self {
        Self {
            old: old.to_string(),
            new: new.to_string(),
        }
    }
}

impl Command for RenameProcessorCommand {
    fn execute(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.rename_processor(&self.old, &self.new)
    }

    fn undo(&self, network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        network.rename_processor(&self.new, &self.old)
    }

    fn description(&self) -> String {
        format!("Rename {} to {}", self.old, self.new)
    }
}
