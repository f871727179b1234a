use crate::network::ProcessorNetwork;
use crate::pool::panic_message;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluatorState {
    #[default]
    Idle,
    Collecting,
    Ordering,
    Running,
}

/// What happened during one [`ProcessorNetworkEvaluator::evaluate`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// Processors whose `process` succeeded, in execution order.
    pub executed: Vec<String>,
    /// Processors that had an unready inport and ran `do_if_not_ready`.
    pub not_ready: Vec<String>,
    /// Hidden canvases that were skipped.
    pub hidden: Vec<String>,
    /// Processors whose `process` returned an error or panicked.
    pub failed: Vec<(String, String)>,
    pub passes: usize,
    /// The network was locked; nothing ran.
    pub deferred: bool,
}

impl EvaluationReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.not_ready.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RunOutcome {
    AlreadyValid,
    Hidden,
    NotReady,
    Executed,
    Failed(String),
}

/// Brings a network back to a valid state by running its dirty processors
/// in dependency order.
///
/// One pass collects every invalid processor and everything downstream of
/// it, orders that set topologically (ties broken by the order processors
/// were added) and runs each processor whose inputs are ready. Passes repeat
/// while they make progress, up to the configured maximum.
#[derive(Debug, Default)]
pub struct ProcessorNetworkEvaluator {
    state: EvaluatorState,
    last_order: Vec<String>,
}

impl ProcessorNetworkEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EvaluatorState {
        self.state
    }

    /// Execution order computed by the most recent pass.
    pub fn last_order(&self) -> &[String] {
        &self.last_order
    }

    pub fn evaluate(&mut self, network: &mut ProcessorNetwork) -> EvaluationReport {
        let mut report = EvaluationReport::default();
        if network.is_locked() {
            debug!("network locked, evaluation deferred");
            report.deferred = true;
            return report;
        }

        network.evaluation_requested = false;
        network.evaluating = true;
        let max_passes = network.config.max_evaluation_passes.max(1);

        loop {
            self.state = EvaluatorState::Collecting;
            let dirty = network.dirty_processors();
            if dirty.is_empty() {
                break;
            }

            self.state = EvaluatorState::Ordering;
            let order = Self::execution_order(network, &dirty);
            self.last_order = order.clone();

            self.state = EvaluatorState::Running;
            report.passes += 1;
            let mut progressed = false;
            for identifier in &order {
                if report.failed.iter().any(|(failed, _)| failed == identifier)
                    || report.hidden.contains(identifier)
                {
                    continue;
                }
                // Not-ready processors are told once per evaluation.
                if report.not_ready.contains(identifier) && !network.is_processor_ready(identifier) {
                    continue;
                }
                match Self::run_processor(network, identifier) {
                    RunOutcome::AlreadyValid => {}
                    RunOutcome::Hidden => push_unique(&mut report.hidden, identifier),
                    RunOutcome::NotReady => push_unique(&mut report.not_ready, identifier),
                    RunOutcome::Executed => {
                        progressed = true;
                        report.executed.push(identifier.clone());
                    }
                    RunOutcome::Failed(message) => {
                        report.failed.push((identifier.clone(), message));
                    }
                }
            }

            if !progressed {
                break;
            }
            if report.passes >= max_passes {
                warn!(passes = report.passes, "evaluation stopped at the pass limit");
                break;
            }
        }

        network.evaluating = false;
        self.state = EvaluatorState::Idle;
        if !report.executed.is_empty() {
            info!(
                executed = report.executed.len(),
                passes = report.passes,
                "network evaluated"
            );
        }
        report
    }

    /// Topological order of `dirty` plus everything downstream of it.
    ///
    /// Among processors whose predecessors are all scheduled, the one added
    /// to the network first runs first.
    pub fn execution_order(network: &ProcessorNetwork, dirty: &[String]) -> Vec<String> {
        let mut scheduled: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = dirty.iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if network.processors.contains_key(current) && scheduled.insert(current) {
                stack.extend(network.successors(current));
            }
        }

        let order_of = |identifier: &str| {
            network
                .processors
                .get(identifier)
                .map_or(u64::MAX, |node| node.order)
        };

        let mut in_degree: HashMap<&str, usize> =
            scheduled.iter().map(|&identifier| (identifier, 0)).collect();
        for connection in &network.connections {
            let from = connection.outport.processor.as_str();
            let to = connection.inport.processor.as_str();
            if scheduled.contains(from) && scheduled.contains(to) {
                if let Some(degree) = in_degree.get_mut(to) {
                    *degree += 1;
                }
            }
        }

        let mut ready: BTreeSet<(u64, &str)> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&identifier, _)| (order_of(identifier), identifier))
            .collect();
        let mut order = Vec::with_capacity(scheduled.len());

        while let Some(entry) = ready.pop_first() {
            let (_, identifier) = entry;
            order.push(identifier.to_string());
            for connection in &network.connections {
                if connection.outport.processor != identifier {
                    continue;
                }
                let to = connection.inport.processor.as_str();
                if let Some(degree) = in_degree.get_mut(to) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((order_of(to), to));
                    }
                }
            }
        }

        if order.len() < scheduled.len() {
            error!("cycle among scheduled processors, running the remainder in insertion order");
            let mut rest: Vec<&str> = scheduled
                .into_iter()
                .filter(|identifier| !order.iter().any(|done| done == identifier))
                .collect();
            rest.sort_by_key(|identifier| order_of(identifier));
            order.extend(rest.into_iter().map(str::to_string));
        }
        order
    }

    fn run_processor(network: &mut ProcessorNetwork, identifier: &str) -> RunOutcome {
        let Some(node) = network.processors.get(identifier) else {
            return RunOutcome::AlreadyValid;
        };
        if node.is_valid() {
            return RunOutcome::AlreadyValid;
        }
        if node.is_canvas()
            && !node.is_visible()
            && !node.evaluates_when_hidden()
            && !network.config.evaluate_hidden_canvases
        {
            debug!(processor = %identifier, "hidden canvas skipped");
            return RunOutcome::Hidden;
        }

        if !network.is_processor_ready(identifier) {
            debug!(processor = %identifier, "inports not ready");
            network.call_processor(identifier, |processor, ctx| processor.do_if_not_ready(ctx));
            return RunOutcome::NotReady;
        }

        let result = network.call_processor(identifier, |processor, ctx| {
            panic::catch_unwind(AssertUnwindSafe(|| processor.process(ctx)))
        });
        let message = match result {
            None => return RunOutcome::AlreadyValid,
            Some(Ok(Ok(()))) => {
                if let Some(node) = network.processors.get_mut(identifier) {
                    node.set_valid();
                    node.error = None;
                }
                debug!(processor = %identifier, "processed");
                return RunOutcome::Executed;
            }
            Some(Ok(Err(e))) => format!("{:#}", e),
            Some(Err(payload)) => panic_message(payload.as_ref()),
        };
        error!(processor = %identifier, error = %message, "process failed");
        if let Some(node) = network.processors.get_mut(identifier) {
            node.error = Some(message.clone());
        }
        RunOutcome::Failed(message)
    }
}

fn push_unique(list: &mut Vec<String>, identifier: &str) {
    if !list.iter().any(|entry| entry == identifier) {
        list.push(identifier.to_string());
    }
}
