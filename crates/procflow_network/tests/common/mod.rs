#![allow(dead_code)]

use parking_lot::Mutex;
use procflow_network::property::{InvalidationLevel, Property};
use procflow_network::{
    Inport, JobOutput, NetworkConfig, NetworkError, Outport, PoolOptions, PortAddress, PortType,
    ProcessContext, Processor, ProcessorFactory, ProcessorInfo, ProcessorNetwork,
    ProcessorSetup,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared call log so tests can check what ran and in which order.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }
}

pub const SOURCE: &str = "org.procflow.test.Source";
pub const ADD_ONE: &str = "org.procflow.test.AddOne";
pub const SINK: &str = "org.procflow.test.Sink";

/// Emits its `value` property on `out`.
pub struct Source {
    pub recorder: Recorder,
}

impl Processor for Source {
    fn info(&self) -> ProcessorInfo {
        ProcessorInfo::new(SOURCE, "Source").with_category("Test")
    }

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
        setup
            .add_outport(Outport::new("out", PortType::Integer))?
            .add_property(Property::new("value", "Value", 1_i64))?
            .add_property(Property::new("label", "Label", "source"))?;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
        let value = ctx.value("value").and_then(|v| v.as_int()).unwrap_or_default();
        ctx.set_output("out", value)?;
        self.recorder.push(ctx.identifier());
        Ok(())
    }
}

/// `out = in + offset`.
pub struct AddOne {
    pub recorder: Recorder,
}

impl Processor for AddOne {
    fn info(&self) -> ProcessorInfo {
        ProcessorInfo::new(ADD_ONE, "Add One").with_category("Test")
    }

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
        setup
            .add_inport(Inport::new("in", PortType::Integer))?
            .add_outport(Outport::new("out", PortType::Integer))?
            .add_property(Property::new("offset", "Offset", 1_i64).with_range(-100_i64, 100_i64))?;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
        let input = ctx
            .input_as::<i64>("in")
            .ok_or_else(|| anyhow::anyhow!("missing input"))?;
        let offset = ctx.value("offset").and_then(|v| v.as_int()).unwrap_or_default();
        ctx.set_output("out", *input + offset)?;
        self.recorder.push(ctx.identifier());
        Ok(())
    }

    fn do_if_not_ready(&mut self, ctx: &mut ProcessContext<'_>) {
        let _ = ctx.clear_output("out");
        self.recorder.push(format!("{}:not-ready", ctx.identifier()));
    }
}

/// Records every value it receives.
pub struct Sink {
    pub recorder: Recorder,
    pub received: Arc<Mutex<Vec<i64>>>,
}

impl Sink {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            recorder: recorder.clone(),
            received: Arc::default(),
        }
    }
}

impl Processor for Sink {
    fn info(&self) -> ProcessorInfo {
        ProcessorInfo::new(SINK, "Sink").with_category("Test")
    }

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
        setup.add_inport(Inport::new("in", PortType::Integer))?;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
        if let Some(value) = ctx.input_as::<i64>("in") {
            self.received.lock().push(*value);
        }
        self.recorder.push(ctx.identifier());
        Ok(())
    }

    fn do_if_not_ready(&mut self, ctx: &mut ProcessContext<'_>) {
        self.recorder.push(format!("{}:not-ready", ctx.identifier()));
    }
}

/// Fails while its `fail` property is set; panics while `panic` is set.
pub struct Failing {
    pub recorder: Recorder,
}

impl Processor for Failing {
    fn info(&self) -> ProcessorInfo {
        ProcessorInfo::new("org.procflow.test.Failing", "Failing")
    }

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
        setup
            .add_property(Property::new("fail", "Fail", true))?
            .add_property(Property::new("panic", "Panic", false))?;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
        if ctx.value("panic").and_then(|v| v.as_bool()) == Some(true) {
            panic!("boom");
        }
        if ctx.value("fail").and_then(|v| v.as_bool()) == Some(true) {
            anyhow::bail!("bad parameters");
        }
        self.recorder.push(ctx.identifier());
        Ok(())
    }
}

/// A canvas drawing whatever reaches its optional inport.
pub struct Canvas {
    pub recorder: Recorder,
}

impl Processor for Canvas {
    fn info(&self) -> ProcessorInfo {
        ProcessorInfo::new("org.procflow.test.Canvas", "Canvas").with_tags(&["GL"])
    }

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
        setup.add_inport(Inport::new("in", PortType::Integer).optional())?;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
        self.recorder.push(ctx.identifier());
        Ok(())
    }

    fn is_canvas(&self) -> bool {
        true
    }
}

/// Copies its input into its own `seen` property, a post-processing write
/// that links can carry elsewhere.
pub struct Watcher {
    pub recorder: Recorder,
}

impl Processor for Watcher {
    fn info(&self) -> ProcessorInfo {
        ProcessorInfo::new("org.procflow.test.Watcher", "Watcher")
    }

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
        setup
            .add_inport(Inport::new("in", PortType::Integer))?
            .add_property(
                Property::new("seen", "Seen", 0_i64)
                    .with_invalidation_level(InvalidationLevel::Valid),
            )?;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
        let input = ctx
            .input_as::<i64>("in")
            .ok_or_else(|| anyhow::anyhow!("missing input"))?;
        ctx.set_property(&["seen"], *input)?;
        self.recorder.push(ctx.identifier());
        Ok(())
    }
}

pub const MIXER: &str = "org.procflow.test.Mixer";

/// Main ports in the default group, overlay ports in their own.
pub struct Mixer;

impl Processor for Mixer {
    fn info(&self) -> ProcessorInfo {
        ProcessorInfo::new(MIXER, "Mixer")
    }

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
        setup
            .add_inport(Inport::new("in", PortType::Integer).optional())?
            .add_inport_to_group(Inport::new("mask", PortType::Integer).optional(), "overlay")?
            .add_outport(Outport::new("out", PortType::Integer))?
            .add_outport_to_group(Outport::new("preview", PortType::Integer), "overlay")?;
        Ok(())
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Squares its input on the background pool once `gate` opens. `runs`
/// counts jobs that actually started on the pool.
pub struct SlowSquare {
    pub recorder: Recorder,
    pub gate: Arc<AtomicBool>,
    pub options: PoolOptions,
    pub runs: Arc<AtomicUsize>,
}

impl SlowSquare {
    pub fn new(recorder: &Recorder, gate: &Arc<AtomicBool>) -> Self {
        Self {
            recorder: recorder.clone(),
            gate: Arc::clone(gate),
            options: PoolOptions::default(),
            runs: Arc::default(),
        }
    }

    pub fn with_options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }
}

impl Processor for SlowSquare {
    fn info(&self) -> ProcessorInfo {
        ProcessorInfo::new("org.procflow.test.SlowSquare", "Slow Square")
    }

    fn setup(&self, setup: &mut ProcessorSetup) -> Result<(), NetworkError> {
        setup
            .add_inport(Inport::new("in", PortType::Integer))?
            .add_outport(Outport::new("out", PortType::Integer))?;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> anyhow::Result<()> {
        let input = ctx
            .input_as::<i64>("in")
            .ok_or_else(|| anyhow::anyhow!("missing input"))?;
        let gate = Arc::clone(&self.gate);
        let runs = Arc::clone(&self.runs);
        ctx.dispatch_one(move |stop, progress| {
            runs.fetch_add(1, Ordering::SeqCst);
            while !gate.load(Ordering::SeqCst) && !stop.is_stopped() {
                std::thread::sleep(Duration::from_millis(1));
            }
            progress.report(0.5);
            *input * *input
        })?;
        self.recorder.push(format!("{}:dispatched", ctx.identifier()));
        Ok(())
    }

    fn job_finished(&mut self, ctx: &mut ProcessContext<'_>, output: JobOutput) -> anyhow::Result<()> {
        let value = output
            .downcast::<i64>()
            .ok_or_else(|| anyhow::anyhow!("unexpected job output"))?;
        ctx.set_output("out", value)?;
        self.recorder.push(format!("{}:finished", ctx.identifier()));
        Ok(())
    }

    fn pool_options(&self) -> PoolOptions {
        self.options
    }
}

pub fn network() -> ProcessorNetwork {
    init_tracing();
    ProcessorNetwork::new(NetworkConfig::default())
}

pub fn connect(network: &mut ProcessorNetwork, from: &str, to: &str) -> Result<(), NetworkError> {
    network.add_connection(&PortAddress::new(from, "out"), &PortAddress::new(to, "in"))
}

/// `A (Source) -> B (AddOne) -> C (Sink)`.
pub fn linear_network(recorder: &Recorder) -> Result<(ProcessorNetwork, Arc<Mutex<Vec<i64>>>), NetworkError> {
    let mut network = network();
    let sink = Sink::new(recorder);
    let received = Arc::clone(&sink.received);
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("B", AddOne { recorder: recorder.clone() })?;
    network.add_processor("C", sink)?;
    connect(&mut network, "A", "B")?;
    connect(&mut network, "B", "C")?;
    Ok((network, received))
}

/// Factory knowing the Source, AddOne and Sink classes.
pub fn factory(recorder: &Recorder) -> Result<ProcessorFactory, NetworkError> {
    let mut factory = ProcessorFactory::new();
    let r = recorder.clone();
    factory.register_with(ProcessorInfo::new(SOURCE, "Source"), move || {
        Box::new(Source { recorder: r.clone() })
    })?;
    let r = recorder.clone();
    factory.register_with(ProcessorInfo::new(ADD_ONE, "Add One"), move || {
        Box::new(AddOne { recorder: r.clone() })
    })?;
    let r = recorder.clone();
    factory.register_with(ProcessorInfo::new(SINK, "Sink"), move || Box::new(Sink::new(&r)))?;
    Ok(factory)
}
