mod common;

use common::*;
use parking_lot::Mutex;
use procflow_network::property::{MetaDataOwner, Property, PropertyValue};
use procflow_network::property::InteractionEvent;
use procflow_network::{
    DEFAULT_PORT_GROUP, NetworkConfig, NetworkError, NetworkEvent, PortAddress, ProcessorNetwork,
    ProcessorNetworkEvaluator, PropertyPath,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn snapshot(network: &ProcessorNetwork) -> Vec<String> {
    network.connections().iter().map(ToString::to_string).collect()
}

#[test]
fn test_second_producer_is_rejected() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("X", Source { recorder: recorder.clone() })?;
    network.add_processor("W", Source { recorder: recorder.clone() })?;
    network.add_processor("Y", Sink::new(&recorder))?;
    let x = PortAddress::new("X", "out");
    let w = PortAddress::new("W", "out");
    let y = PortAddress::new("Y", "in");

    network.add_connection(&x, &y)?;
    assert!(matches!(
        network.add_connection(&x, &y),
        Err(NetworkError::ConnectionExists { .. })
    ));
    assert_eq!(
        network.add_connection(&w, &y),
        Err(NetworkError::InportAlreadyConnected {
            inport: y.clone(),
            existing: x.clone(),
        })
    );
    assert_eq!(network.connections().len(), 1);
    assert_eq!(
        network.processor("Y").and_then(|node| node.inport("in")?.source().cloned()),
        Some(x)
    );
    Ok(())
}

#[test]
fn test_cycle_is_rejected_and_network_unchanged() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    for name in ["P", "Q", "R"] {
        network.add_processor(name, AddOne { recorder: recorder.clone() })?;
    }
    connect(&mut network, "P", "Q")?;
    connect(&mut network, "Q", "R")?;
    let before = snapshot(&network);

    assert!(matches!(
        connect(&mut network, "R", "P"),
        Err(NetworkError::CycleDetected { .. })
    ));
    assert!(matches!(
        connect(&mut network, "P", "P"),
        Err(NetworkError::CycleDetected { .. })
    ));
    assert_eq!(snapshot(&network), before);
    assert!(network.processor("P").is_some_and(|node| node.inport("in").is_some_and(|p| !p.is_connected())));
    Ok(())
}

#[test]
fn test_incompatible_and_missing_ports() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("Source", Source { recorder: recorder.clone() })?;
    network.add_processor("Sink", Sink::new(&recorder))?;

    assert_eq!(
        network.add_connection(&PortAddress::new("Source", "nope"), &PortAddress::new("Sink", "in")),
        Err(NetworkError::PortNotFound {
            processor: "Source".to_string(),
            port: "nope".to_string(),
        })
    );
    assert_eq!(
        network.add_connection(&PortAddress::new("Ghost", "out"), &PortAddress::new("Sink", "in")),
        Err(NetworkError::ProcessorNotFound("Ghost".to_string()))
    );
    // Outports are not inports.
    assert!(network
        .add_connection(&PortAddress::new("Source", "out"), &PortAddress::new("Source", "out"))
        .is_err());
    assert!(network.connections().is_empty());
    Ok(())
}

#[test]
fn test_remove_connection_invalidates_consumer() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let (mut network, _) = linear_network(&recorder)?;
    procflow_network::ProcessorNetworkEvaluator::new().evaluate(&mut network);

    let removed = network.remove_connection(&PortAddress::new("B", "out"), &PortAddress::new("C", "in"));
    assert!(removed.is_some());
    assert!(network.processor("C").is_some_and(|node| !node.is_valid()));
    assert!(network.processor("B").is_some_and(|node| node.is_valid()));
    assert!(network
        .remove_connection(&PortAddress::new("B", "out"), &PortAddress::new("C", "in"))
        .is_none());
    Ok(())
}

#[test]
fn test_duplicate_identifiers_and_unique_names() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("Source", Source { recorder: recorder.clone() })?;
    assert_eq!(
        network.add_processor("Source", Source { recorder: recorder.clone() }),
        Err(NetworkError::DuplicateProcessor("Source".to_string()))
    );
    assert_eq!(network.unique_identifier("Source"), "Source 2");

    network.add_processor("", Source { recorder: recorder.clone() })?;
    network.add_processor("", Source { recorder: recorder.clone() })?;
    assert_eq!(network.processor_identifiers(), vec!["Source", "Source 2", "Source 3"]);
    Ok(())
}

#[test]
fn test_identifiers_with_dots_are_rejected() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    assert_eq!(
        network.add_processor("Volume.Source", Source { recorder: recorder.clone() }),
        Err(NetworkError::InvalidIdentifier("Volume.Source".to_string()))
    );
    assert!(network.is_empty());

    network.add_processor("Source", Source { recorder: recorder.clone() })?;
    assert_eq!(
        network.rename_processor("Source", "a.b"),
        Err(NetworkError::InvalidIdentifier("a.b".to_string()))
    );
    assert_eq!(network.processor_identifiers(), vec!["Source"]);
    assert_eq!(network.unique_identifier("Vol. Source"), "Vol Source");
    Ok(())
}

#[test]
fn test_port_groups() -> anyhow::Result<()> {
    let mut network = network();
    network.add_processor("M", Mixer)?;
    let m = network.processor("M").ok_or_else(|| anyhow::anyhow!("missing M"))?;

    assert_eq!(m.port_group("in"), Some(DEFAULT_PORT_GROUP));
    assert_eq!(m.port_group("preview"), Some("overlay"));
    assert_eq!(m.port_group("missing"), None);
    assert_eq!(m.port_groups(), vec!["default", "overlay"]);
    assert_eq!(m.ports_in_group("overlay"), vec!["mask", "preview"]);
    assert_eq!(m.ports_in_same_group("out"), vec!["in", "out"]);
    assert!(m.ports_in_same_group("missing").is_empty());
    assert!(m.ports_in_group("nothing").is_empty());
    Ok(())
}

#[test]
fn test_events_travel_upstream_until_used() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let (mut network, _) = linear_network(&recorder)?;
    network.add_dynamic_property("A", Property::event("reset", "Reset", "key-r"))?;
    network.add_dynamic_property("B", Property::event("pick", "Pick", "mouse-press"))?;
    network.add_dynamic_property("A", Property::event("pick", "Pick", "mouse-press"))?;

    let resets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resets);
    let _reset = network
        .property(&PropertyPath::new("A", &["reset"]))
        .ok_or_else(|| anyhow::anyhow!("missing reset"))?
        .subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let picks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&picks);
    let _pick = network
        .property(&PropertyPath::new("A", &["pick"]))
        .ok_or_else(|| anyhow::anyhow!("missing pick"))?
        .subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    ProcessorNetworkEvaluator::new().evaluate(&mut network);

    // C has no listener, B does not know the key, A does.
    let mut event = InteractionEvent::new("key-r");
    assert!(network.propagate_event("C", &mut event)?);
    assert_eq!(resets.load(Ordering::SeqCst), 1);
    assert!(!network.processor("A").is_some_and(|node| node.is_valid()));

    // B uses the press first, so it never reaches A.
    let mut event = InteractionEvent::new("mouse-press");
    assert!(network.propagate_event("C", &mut event)?);
    assert_eq!(picks.load(Ordering::SeqCst), 0);

    let mut event = InteractionEvent::new("wheel");
    assert!(!network.propagate_event("C", &mut event)?);
    assert!(!network.invoke_event("C", &mut InteractionEvent::new("key-r"))?);
    assert_eq!(
        network.propagate_event("Missing", &mut InteractionEvent::new("key-r")),
        Err(NetworkError::ProcessorNotFound("Missing".to_string()))
    );
    Ok(())
}

#[test]
fn test_update_property_edits_in_place() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let (mut network, _) = linear_network(&recorder)?;
    ProcessorNetworkEvaluator::new().evaluate(&mut network);
    assert!(network.dirty_processors().is_empty());

    let value = PropertyPath::new("A", &["value"]);
    network.update_property(&value, |property| property.set_read_only(true))?;
    assert!(network.dirty_processors().is_empty());
    assert!(network.property(&value).is_some_and(|p| p.is_read_only()));

    let offset = PropertyPath::new("B", &["offset"]);
    let changed = network.update_property(&offset, |property| property.set(7_i64))?;
    assert_eq!(changed, Ok(true));
    assert_eq!(network.dirty_processors(), vec!["B", "C"]);
    assert!(matches!(
        network.update_property(&PropertyPath::new("B", &["missing"]), |_| ()),
        Err(NetworkError::PropertyNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_unsupported_tags_are_rejected() {
    let recorder = Recorder::default();
    let mut network = ProcessorNetwork::new(NetworkConfig {
        supported_tags: vec!["CPU".to_string()],
        ..NetworkConfig::default()
    });
    assert_eq!(
        network.add_processor("Canvas", Canvas { recorder }),
        Err(NetworkError::UnsupportedTags {
            processor: "Canvas".to_string(),
            tags: vec!["GL".to_string()],
        })
    );
    assert!(network.is_empty());
}

#[test]
fn test_rename_updates_connections_and_links() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let (mut network, _) = linear_network(&recorder)?;
    network.add_link(
        &PropertyPath::new("A", &["value"]),
        &PropertyPath::new("B", &["offset"]),
    )?;
    let handle = network.processor("B").map(|node| node.handle());

    network.rename_processor("B", "Middle")?;
    assert!(network.processor("B").is_none());
    assert_eq!(network.processor("Middle").map(|node| node.handle()), handle);
    assert!(network.is_connected(&PortAddress::new("A", "out"), &PortAddress::new("Middle", "in")));
    assert!(network.is_connected(&PortAddress::new("Middle", "out"), &PortAddress::new("C", "in")));
    assert!(network.is_linked(
        &PropertyPath::new("A", &["value"]),
        &PropertyPath::new("Middle", &["offset"])
    ));
    assert_eq!(
        network.rename_processor("Middle", "A"),
        Err(NetworkError::DuplicateProcessor("A".to_string()))
    );
    Ok(())
}

#[test]
fn test_structural_events_are_published_in_order() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = network.subscribe(move |event| {
        if *event != NetworkEvent::Changed && *event != NetworkEvent::EvaluateRequest {
            sink.lock().push(event.clone());
        }
    });

    network.add_processor("Source", Source { recorder: recorder.clone() })?;
    network.remove_processor("Source");
    assert_eq!(
        *events.lock(),
        vec![
            NetworkEvent::WillAddProcessor("Source".to_string()),
            NetworkEvent::DidAddProcessor("Source".to_string()),
            NetworkEvent::WillRemoveProcessor("Source".to_string()),
            NetworkEvent::DidRemoveProcessor("Source".to_string()),
        ]
    );

    drop(subscription);
    network.add_processor("Other", Source { recorder })?;
    assert_eq!(events.lock().len(), 4);
    assert!(network.is_modified());
    Ok(())
}

#[test]
fn test_links_propagate_transitively_and_terminate_on_cycles() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    for name in ["A", "B", "C"] {
        network.add_processor(name, Source { recorder: recorder.clone() })?;
    }
    let a = PropertyPath::new("A", &["value"]);
    let b = PropertyPath::new("B", &["value"]);
    let c = PropertyPath::new("C", &["value"]);
    network.add_link(&a, &b)?;
    network.add_link(&b, &a)?;
    network.add_link(&b, &c)?;
    assert!(network.is_linked_bidirectional(&a, &b));
    assert_eq!(network.properties_linked_to(&a), vec![b.clone(), c.clone()]);

    network.set_property_value(&a, 42_i64)?;
    for path in [&a, &b, &c] {
        assert_eq!(network.property(path).map(|p| p.value().clone()), Some(PropertyValue::Int(42)));
    }
    assert!(!network.is_linking());
    assert_eq!(network.links_between_processors("A", "B").len(), 2);
    Ok(())
}

#[test]
fn test_link_validation() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("B", AddOne { recorder: recorder.clone() })?;
    let value = PropertyPath::new("A", &["value"]);
    let label = PropertyPath::new("A", &["label"]);
    let offset = PropertyPath::new("B", &["offset"]);

    assert!(matches!(
        network.add_link(&value, &value),
        Err(NetworkError::InvalidLink { .. })
    ));
    assert!(matches!(
        network.add_link(&value, &label),
        Err(NetworkError::InvalidLink { .. })
    ));
    assert_eq!(
        network.add_link(&value, &PropertyPath::new("A", &["missing"])),
        Err(NetworkError::PropertyNotFound(PropertyPath::new("A", &["missing"])))
    );
    network.add_link(&value, &offset)?;
    assert_eq!(
        network.add_link(&value, &offset),
        Err(NetworkError::LinkExists {
            from: value.clone(),
            to: offset.clone(),
        })
    );
    Ok(())
}

#[test]
fn test_link_values_are_clamped_at_destination() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("B", AddOne { recorder: recorder.clone() })?;
    let value = PropertyPath::new("A", &["value"]);
    let offset = PropertyPath::new("B", &["offset"]);
    network.add_link(&value, &offset)?;

    network.set_property_value(&value, 500_i64)?;
    assert_eq!(network.property(&offset).map(|p| p.value().clone()), Some(PropertyValue::Int(100)));
    Ok(())
}

#[test]
fn test_removing_a_dynamic_property_drops_its_links() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("B", Source { recorder: recorder.clone() })?;
    network.add_dynamic_property("B", Property::new("gain", "Gain", 1.0))?;
    let gain = PropertyPath::new("B", &["gain"]);
    network.add_link(&PropertyPath::new("A", &["value"]), &gain)?;
    assert_eq!(network.property(&gain).map(|p| p.value().clone()), Some(PropertyValue::Float(1.0)));

    assert!(network.remove_property(&gain).is_some());
    assert!(network.links().is_empty());
    assert!(network.remove_property(&gain).is_none());
    Ok(())
}

#[test]
fn test_removing_a_processor_drops_its_links() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder: recorder.clone() })?;
    network.add_processor("B", Source { recorder: recorder.clone() })?;
    network.add_link(&PropertyPath::new("A", &["value"]), &PropertyPath::new("B", &["value"]))?;
    network.remove_processor("B");
    assert!(network.links().is_empty());
    Ok(())
}

#[test]
fn test_processor_metadata_type_mismatch_reads_as_absent() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let mut network = network();
    network.add_processor("A", Source { recorder })?;
    let metadata = network
        .processor_metadata_mut("A")
        .ok_or_else(|| anyhow::anyhow!("missing processor"))?;
    metadata.set("position", [10.0, 20.0]);

    let node = network.processor("A").ok_or_else(|| anyhow::anyhow!("missing processor"))?;
    assert_eq!(node.get_metadata("position", [0.0, 0.0]), [10.0, 20.0]);
    assert_eq!(node.get_metadata("position", String::from("none")), "none");
    assert!(!node.has_metadata::<i64>("position"));
    Ok(())
}
