mod common;

use common::*;
use procflow_network::property::PropertyValue;
use procflow_network::{
    AddConnectionCommand, AddLinkCommand, AppConfig, Application, Command, HistoryConfig,
    NetworkError, NetworkHistory, PortAddress, ProcessorNetwork, PropertyPath,
    RemoveConnectionCommand, RenameProcessorCommand, SetPropertyCommand, WorkspaceDocument,
};

fn value(network: &ProcessorNetwork, path: &PropertyPath) -> Option<PropertyValue> {
    network.property(path).map(|p| p.value().clone())
}

#[test]
fn test_connect_undo_redo() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("S", Sink::new(&recorder))?;
    let out = PortAddress::new("A", "out");
    let inp = PortAddress::new("S", "in");

    let mut history = NetworkHistory::new();
    history.execute(Box::new(AddConnectionCommand::new(out.clone(), inp.clone())), &mut network)?;
    assert!(network.is_connected(&out, &inp));
    assert_eq!(history.undo_description(), Some("Connect A.out -> S.in".to_string()));

    history.undo(&mut network)?;
    assert!(!network.is_connected(&out, &inp));
    assert!(history.can_redo());

    history.redo(&mut network)?;
    assert!(network.is_connected(&out, &inp));
    assert!(!history.can_redo());

    history.execute(Box::new(RemoveConnectionCommand::new(out.clone(), inp.clone())), &mut network)?;
    assert!(network.connections().is_empty());
    history.undo(&mut network)?;
    assert!(network.is_connected(&out, &inp));
    Ok(())
}

#[test]
fn test_failed_command_is_not_recorded() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder })?;

    let mut history = NetworkHistory::new();
    let result = history.execute(
        Box::new(AddConnectionCommand::new(
            PortAddress::new("A", "out"),
            PortAddress::new("Ghost", "in"),
        )),
        &mut network,
    );
    assert_eq!(result, Err(NetworkError::ProcessorNotFound("Ghost".to_string())));
    assert!(!history.can_undo());
    assert_eq!(
        history.undo(&mut network),
        Err(NetworkError::History("No operations to undo".to_string()))
    );
    Ok(())
}

#[test]
fn test_set_property_undo_restores_old_value() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let (mut network, _) = linear_network(&recorder)?;
    let offset = PropertyPath::new("B", &["offset"]);

    let mut history = NetworkHistory::new();
    let command = SetPropertyCommand::new(&network, offset.clone(), 7_i64)?;
    history.execute(Box::new(command), &mut network)?;
    assert_eq!(value(&network, &offset), Some(PropertyValue::Int(7)));

    history.undo(&mut network)?;
    assert_eq!(value(&network, &offset), Some(PropertyValue::Int(1)));

    assert!(matches!(
        SetPropertyCommand::new(&network, PropertyPath::new("B", &["missing"]), 1_i64),
        Err(NetworkError::PropertyNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_failed_transaction_rolls_back() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("B", AddOne { recorder: recorder.clone() })?;
    network.add_processor("C", Sink::new(&recorder))?;

    let mut history = NetworkHistory::new();
    let mut transaction = history.begin_transaction();
    transaction.add_command(Box::new(AddConnectionCommand::new(
        PortAddress::new("A", "out"),
        PortAddress::new("B", "in"),
    )));
    transaction.add_command(Box::new(AddLinkCommand::new(
        PropertyPath::new("A", &["value"]),
        PropertyPath::new("B", &["offset"]),
    )));
    transaction.add_command(Box::new(AddConnectionCommand::new(
        PortAddress::new("B", "out"),
        PortAddress::new("Missing", "in"),
    )));
    assert_eq!(transaction.len(), 3);

    assert!(history.commit_transaction(transaction, &mut network).is_err());
    assert!(network.connections().is_empty());
    assert!(network.links().is_empty());
    assert!(!history.can_undo());
    Ok(())
}

/// Executes fine but can never be undone.
struct Irreversible;

impl Command for Irreversible {
    fn execute(&self, _network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        Ok(())
    }

    fn undo(&self, _network: &mut ProcessorNetwork) -> Result<(), NetworkError> {
        Err(NetworkError::ProcessorNotFound("irreversible".into()))
    }
}

#[test]
fn test_rollback_continues_past_failing_undo() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("B", AddOne { recorder: recorder.clone() })?;

    let mut history = NetworkHistory::new();
    let mut transaction = history.begin_transaction();
    transaction.add_command(Box::new(AddConnectionCommand::new(
        PortAddress::new("A", "out"),
        PortAddress::new("B", "in"),
    )));
    transaction.add_command(Box::new(Irreversible));
    transaction.add_command(Box::new(AddConnectionCommand::new(
        PortAddress::new("B", "out"),
        PortAddress::new("Missing", "in"),
    )));

    let error = history
        .commit_transaction(transaction, &mut network)
        .expect_err("third command fails");
    assert_ne!(error, NetworkError::ProcessorNotFound("irreversible".into()));
    assert!(network.connections().is_empty());
    assert!(!history.can_undo());
    Ok(())
}

#[test]
fn test_transaction_undoes_as_one_step() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("B", AddOne { recorder: recorder.clone() })?;
    network.add_processor("C", Sink::new(&recorder))?;

    let mut history = NetworkHistory::new();
    let mut transaction = history.begin_transaction();
    transaction.add_command(Box::new(AddConnectionCommand::new(
        PortAddress::new("A", "out"),
        PortAddress::new("B", "in"),
    )));
    transaction.add_command(Box::new(AddConnectionCommand::new(
        PortAddress::new("B", "out"),
        PortAddress::new("C", "in"),
    )));
    history.commit_transaction(transaction, &mut network)?;
    assert_eq!(network.connections().len(), 2);
    assert_eq!(history.undo_description(), Some("Transaction".to_string()));

    history.undo(&mut network)?;
    assert!(network.connections().is_empty());
    assert!(!history.can_undo());
    Ok(())
}

#[test]
fn test_history_is_bounded() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder })?;
    let path = PropertyPath::new("A", &["value"]);

    let mut history = NetworkHistory::from_config(&HistoryConfig {
        max_history: Some(2),
    });
    for next in 2..=4_i64 {
        let command = SetPropertyCommand::new(&network, path.clone(), next)?;
        history.execute(Box::new(command), &mut network)?;
    }
    history.undo(&mut network)?;
    history.undo(&mut network)?;
    assert!(history.undo(&mut network).is_err());
    assert_eq!(value(&network, &path), Some(PropertyValue::Int(2)));
    Ok(())
}

#[test]
fn test_application_history_and_rename() -> anyhow::Result<()> {
    init_tracing();
    let recorder = Recorder::default();
    let mut app = Application::new(AppConfig::default())?;
    app.network_mut().add_processor("A", Source { recorder })?;

    app.execute(Box::new(RenameProcessorCommand::new("A", "Origin")))?;
    assert!(app.network().processor("Origin").is_some());
    assert!(app.history().can_undo());

    app.undo()?;
    assert!(app.network().processor("A").is_some());
    app.redo()?;
    assert!(app.network().processor("Origin").is_some());

    app.load_workspace(&WorkspaceDocument::default().to_json()?)?;
    assert!(!app.history().can_undo());
    assert!(app.network().is_empty());
    Ok(())
}
