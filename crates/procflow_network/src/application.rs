use crate::config::AppConfig;
use crate::error::{NetworkError, WorkspaceLoadError};
use crate::evaluator::{EvaluationReport, ProcessorNetworkEvaluator};
use crate::factory::{Module, ModuleRegistry, ProcessorFactory};
use crate::front::{FrontQueue, FrontSender};
use crate::history::{Command, NetworkHistory};
use crate::network::ProcessorNetwork;
use crate::pool::JobDispatcher;
use crate::timer::TimerThread;
use crate::workspace::{LinkFormatConverter, VersionConverter, WorkspaceDocument};
use anyhow::Context;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything a host needs to run a network: factory, network, evaluator,
/// background pool, timer thread and the front queue that ties them to the
/// owning thread.
///
/// Created once per host and dropped in a fixed order: timers stop first,
/// then outstanding jobs are drained, then the network is cleared.
///
/// # Example
///
/// ```no_run
/// use procflow_network::{AppConfig, Application};
///
/// let mut app = Application::new(AppConfig::load()?)?;
/// app.load_workspace_file("scene.json")?;
/// app.wait_for_network(0, std::time::Duration::from_secs(10));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Application {
    config: AppConfig,
    factory: ProcessorFactory,
    converters: Vec<Box<dyn VersionConverter>>,
    modules: Vec<String>,
    timers: TimerThread,
    network: ProcessorNetwork,
    evaluator: ProcessorNetworkEvaluator,
    history: NetworkHistory,
    front: FrontQueue,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self, NetworkError> {
        config
            .validate()
            .map_err(|error| NetworkError::Config(error.to_string()))?;

        let front = FrontQueue::new();
        let timers = TimerThread::new(front.sender())?;
        let dispatcher = JobDispatcher::new(&config.pool, front.sender())?.with_timers(timers.handle());
        info!(threads = dispatcher.threads(), "application started");

        Ok(Self {
            network: ProcessorNetwork::with_dispatcher(config.network.clone(), dispatcher),
            history: NetworkHistory::from_config(&config.history),
            evaluator: ProcessorNetworkEvaluator::new(),
            factory: ProcessorFactory::new(),
            converters: vec![Box::new(LinkFormatConverter)],
            modules: Vec::new(),
            timers,
            front,
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Registers a module's processor classes and converters. Classes
    /// registered before a failure stay registered.
    pub fn register_module(&mut self, module: &dyn Module) -> Result<(), NetworkError> {
        let mut registry = ModuleRegistry {
            factory: &mut self.factory,
            converters: &mut self.converters,
        };
        module.register(&mut registry)?;
        info!(module = module.name(), "module registered");
        self.modules.push(module.name().to_string());
        Ok(())
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn factory(&self) -> &ProcessorFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut ProcessorFactory {
        &mut self.factory
    }

    pub fn network(&self) -> &ProcessorNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut ProcessorNetwork {
        &mut self.network
    }

    pub fn evaluator(&self) -> &ProcessorNetworkEvaluator {
        &self.evaluator
    }

    pub fn history(&self) -> &NetworkHistory {
        &self.history
    }

    pub fn front_sender(&self) -> FrontSender {
        self.front.sender()
    }

    pub fn timer_thread(&self) -> &TimerThread {
        &self.timers
    }

    /// Runs everything posted to the front queue so far.
    pub fn process_front(&mut self) -> usize {
        self.front.process(&mut self.network)
    }

    /// Drains the front queue, then evaluates if anything asked for it.
    pub fn process_events(&mut self) -> EvaluationReport {
        self.process_front();
        if self.network.evaluation_requested() {
            self.evaluate()
        } else {
            EvaluationReport::default()
        }
    }

    pub fn evaluate(&mut self) -> EvaluationReport {
        self.evaluator.evaluate(&mut self.network)
    }

    /// Waits until every dispatched job has reported back. Returns false
    /// when `timeout` ran out first.
    pub fn wait_for_pool(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_front();
            if self.network.running_background_jobs() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.front
                .process_timeout(&mut self.network, (deadline - now).min(POLL_INTERVAL));
        }
    }

    /// Polls front events and evaluation until at most `threshold` jobs are
    /// still running and no evaluation is pending.
    pub fn wait_for_network(&mut self, threshold: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_events();
            if self.network.running_background_jobs() <= threshold
                && !self.network.evaluation_requested()
            {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    jobs = self.network.running_background_jobs(),
                    "network did not settle in time"
                );
                return false;
            }
            self.front
                .process_timeout(&mut self.network, (deadline - now).min(POLL_INTERVAL));
        }
    }

    pub fn execute(&mut self, command: Box<dyn Command>) -> Result<(), NetworkError> {
        self.history.execute(command, &mut self.network)
    }

    pub fn undo(&mut self) -> Result<(), NetworkError> {
        self.history.undo(&mut self.network)
    }

    pub fn redo(&mut self) -> Result<(), NetworkError> {
        self.history.redo(&mut self.network)
    }

    pub fn save_workspace(&mut self) -> Result<String, serde_json::Error> {
        let json = self.network.serialize().to_json()?;
        self.network.set_modified(false);
        Ok(json)
    }

    /// Replaces the network with a saved workspace of any known version.
    /// Undo history is cleared even when some entries failed to load.
    pub fn load_workspace(&mut self, json: &str) -> Result<(), WorkspaceLoadError> {
        let document = WorkspaceDocument::from_json(json, &self.converters)?;
        self.history.clear();
        self.network.deserialize(&document, &self.factory)
    }

    pub fn save_workspace_file(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = self.save_workspace()?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write workspace {}", path.display()))?;
        Ok(())
    }

    pub fn load_workspace_file(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read workspace {}", path.display()))?;
        self.load_workspace(&json)?;
        Ok(())
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.timers.shutdown();
        for identifier in self.network.processor_identifiers() {
            if let Err(error) = self.network.stop_jobs(&identifier) {
                warn!(processor = %identifier, %error, "failed to stop jobs at shutdown");
            }
        }
        if !self.wait_for_pool(DRAIN_TIMEOUT) {
            warn!(
                jobs = self.network.running_background_jobs(),
                "background jobs still running at shutdown"
            );
        }
        self.network.clear();
        debug!("application shut down");
    }
}
