//! Processor networks for procflow: a dataflow graph of processors joined
//! port to port, a scheduler that re-runs only what was invalidated, and the
//! supporting background pool, timers and workspace persistence.
//!
//! All network state lives on one thread. Background jobs and timers reach it
//! by posting to a [`FrontQueue`], which that thread drains.

pub mod application;
pub mod config;
pub mod connection;
pub mod error;
pub mod evaluator;
pub mod factory;
pub mod front;
pub mod history;
pub mod link;
pub mod network;
pub mod pool;
pub mod port;
pub mod processor;
pub mod timer;
pub mod workspace;

pub use application::Application;
pub use config::{AppConfig, HistoryConfig, NetworkConfig, PoolConfig};
pub use connection::PortConnection;
pub use error::{ConfigError, DeserializationError, NetworkError, WorkspaceLoadError};
pub use evaluator::{EvaluationReport, EvaluatorState, ProcessorNetworkEvaluator};
pub use factory::{Module, ModuleRegistry, ProcessorConstructor, ProcessorFactory};
pub use front::{FrontQueue, FrontSender};
pub use history::{
    AddConnectionCommand, AddLinkCommand, Command, CompositeCommand, NetworkHistory,
    RemoveConnectionCommand, RemoveLinkCommand, RenameProcessorCommand, SetPropertyCommand,
};
pub use link::{PropertyLink, PropertyPath};
pub use network::{NetworkEvent, ProcessorNetwork};
pub use pool::{JobDispatcher, JobId, JobOutput, PoolOptions, Progress, Stop};
pub use port::{Inport, Outport, PortAddress, PortData, PortType};
pub use processor::{
    CodeState, DEFAULT_PORT_GROUP, ProcessContext, Processor, ProcessorHandle, ProcessorInfo,
    ProcessorNode, ProcessorSetup,
};
pub use timer::{Delay, Timer, TimerCallback, TimerHandle, TimerThread};
pub use workspace::{
    upgrade_document, ConnectionState, LinkFormatConverter, LinkState, PortReference,
    ProcessorState, VersionConverter, WorkspaceDocument, WORKSPACE_VERSION,
};

pub use procflow_property as property;
