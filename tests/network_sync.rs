//! Scenario tests for graph/pipeline mirroring: the binding bijection, the
//! atomicity of failed mutations, and the running-state event machine.

use std::sync::{Arc, Mutex};

use serde_json::json;

use pixflow::{ComponentLibrary, Graph, Network, PixelFormat, PixflowError, Rect};

fn bijection_holds(network: &Network) -> bool {
    let nodes: Vec<_> = network.graph().nodes().keys().collect();
    let bindings: Vec<_> = network.bindings().keys().collect();
    nodes == bindings
}

#[test]
fn bijection_survives_an_editing_session() {
    let lib = ComponentLibrary::new();
    let mut network = Network::new(Graph::new("session/main"), &lib).unwrap();

    network.add_node(&lib, "bg", "canvas/solid").unwrap();
    network.add_node(&lib, "fg", "canvas/solid").unwrap();
    network.add_node(&lib, "mix", "comp/over").unwrap();
    network.add_node(&lib, "out", "filter/invert").unwrap();
    assert!(bijection_holds(&network));

    network.add_edge(&lib, "bg", "output", "mix", "input").unwrap();
    network.add_edge(&lib, "fg", "output", "mix", "aux").unwrap();
    network.add_edge(&lib, "mix", "output", "out", "input").unwrap();
    network.add_iip(&lib, "bg", "width", json!(4)).unwrap();
    network.add_iip(&lib, "bg", "height", json!(4)).unwrap();
    network.add_iip(&lib, "fg", "width", json!(2)).unwrap();
    network.add_iip(&lib, "fg", "height", json!(2)).unwrap();
    assert!(bijection_holds(&network));

    // Rewire: replace the mix input, drop a node, re-add it.
    network.add_edge(&lib, "fg", "output", "out", "input").unwrap();
    network.remove_node("mix").unwrap();
    assert!(bijection_holds(&network));
    network.add_node(&lib, "mix", "comp/over").unwrap();
    assert!(bijection_holds(&network));

    network.remove_edge("fg", "output", "out", "input");
    network.remove_edge("fg", "output", "out", "input"); // idempotent
    network.remove_iip("bg", "width");
    network.remove_iip("bg", "width"); // idempotent
    assert!(bijection_holds(&network));
}

#[test]
fn failed_cycle_edge_leaves_both_models_untouched() {
    let lib = ComponentLibrary::new();
    let mut network = Network::new(Graph::new("cycle/main"), &lib).unwrap();
    network.add_node(&lib, "src", "canvas/solid").unwrap();
    network.add_node(&lib, "a", "filter/passthrough").unwrap();
    network.add_node(&lib, "b", "filter/passthrough").unwrap();
    network.add_edge(&lib, "src", "output", "a", "input").unwrap();
    network.add_edge(&lib, "a", "output", "b", "input").unwrap();
    network.add_iip(&lib, "src", "width", json!(2)).unwrap();
    network.add_iip(&lib, "src", "height", json!(2)).unwrap();

    let before = network
        .processor_for("b")
        .unwrap()
        .blit(PixelFormat::Rgba8, None)
        .unwrap();

    let err = network.add_edge(&lib, "b", "output", "a", "input").unwrap_err();
    assert!(matches!(err, PixflowError::CycleDetected(_)));
    assert_eq!(network.graph().edges().len(), 2);

    // The pipeline still renders the same output: nothing was invalidated.
    let after = network
        .processor_for("b")
        .unwrap()
        .blit(PixelFormat::Rgba8, None)
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn replacing_a_driven_port_keeps_one_binding() {
    let lib = ComponentLibrary::new();
    let mut network = Network::new(Graph::new("replace/main"), &lib).unwrap();
    network.add_node(&lib, "n1", "filter/opacity").unwrap();
    network.add_node(&lib, "n2", "canvas/solid").unwrap();

    network.add_iip(&lib, "n1", "input", json!(5)).unwrap();
    network.add_edge(&lib, "n2", "output", "n1", "input").unwrap();

    let graph = network.graph();
    let driving_edges = graph
        .edges()
        .iter()
        .filter(|e| e.dst.node == "n1" && e.dst.port == "input")
        .count();
    let driving_iips = graph
        .iips()
        .iter()
        .filter(|i| i.dst.node == "n1" && i.dst.port == "input")
        .count();
    assert_eq!((driving_edges, driving_iips), (1, 0));
}

#[test]
fn stop_drops_pending_invalidations_until_restart() {
    let lib = ComponentLibrary::new();
    let mut network = Network::new(Graph::new("relay/main"), &lib).unwrap();
    let seen: Arc<Mutex<Vec<(String, Rect)>>> = Arc::default();
    let sink = seen.clone();
    network.set_invalidation_listener(Box::new(move |node, rect| {
        sink.lock().unwrap().push((node.to_owned(), rect));
    }));

    network.add_node(&lib, "src", "canvas/solid").unwrap();
    network.set_running(true);
    network.add_iip(&lib, "src", "width", json!(8)).unwrap();
    assert!(!seen.lock().unwrap().is_empty());

    seen.lock().unwrap().clear();
    network.set_running(false);
    network.add_iip(&lib, "src", "height", json!(8)).unwrap();
    assert!(seen.lock().unwrap().is_empty(), "stopped network drops events");

    network.set_running(true);
    network.add_iip(&lib, "src", "color", json!("#112233")).unwrap();
    assert!(
        !seen.lock().unwrap().is_empty(),
        "restart resumes forwarding, without replaying dropped events"
    );
}

#[test]
fn state_events_fire_once_per_transition() {
    let lib = ComponentLibrary::new();
    let mut network = Network::new(Graph::new("state/main"), &lib).unwrap();
    let count = Arc::new(Mutex::new(0usize));
    let sink = count.clone();
    network.set_state_listener(Box::new(move |_, _| *sink.lock().unwrap() += 1));

    network.set_running(true);
    network.set_running(true);
    network.set_running(true);
    assert_eq!(*count.lock().unwrap(), 1);

    network.set_running(false);
    network.set_running(false);
    assert_eq!(*count.lock().unwrap(), 2);
}
