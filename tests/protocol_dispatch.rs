//! A full protocol session against the runtime dispatcher: discovery,
//! component management, live graph edits, and preview rendering.

use std::sync::{Arc, Mutex};

use serde_json::json;

use pixflow::{Message, PixelFormat, Rect, Runtime, RuntimeConfig};

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig {
        hostname: "preview.test".to_owned(),
        external_port: 8080,
    })
}

fn msg(protocol: &str, command: &str, payload: serde_json::Value) -> Message {
    Message::new(protocol, command, payload)
}

fn dispatch(rt: &mut Runtime, protocol: &str, command: &str, payload: serde_json::Value) {
    let out = rt.handle_message(&msg(protocol, command, payload));
    assert!(
        out.iter().all(|m| m.command != "error"),
        "unexpected error response: {out:?}"
    );
}

#[test]
fn editing_session_builds_a_renderable_graph() {
    let mut rt = runtime();

    let out = rt.handle_message(&msg("runtime", "getruntime", json!(null)));
    assert_eq!(out[0].payload["version"], json!("0.4"));

    dispatch(&mut rt, "graph", "clear", json!({"id": "session"}));
    dispatch(
        &mut rt,
        "graph",
        "addnode",
        json!({"graph": "session", "id": "bg", "component": "canvas/solid"}),
    );
    dispatch(
        &mut rt,
        "graph",
        "addnode",
        json!({"graph": "session", "id": "neg", "component": "filter/invert"}),
    );
    dispatch(
        &mut rt,
        "graph",
        "addedge",
        json!({"graph": "session",
               "src": {"node": "bg", "port": "output"},
               "tgt": {"node": "neg", "port": "input"}}),
    );
    for (port, data) in [("width", json!(2)), ("height", json!(2)), ("color", json!("#102030"))] {
        dispatch(
            &mut rt,
            "graph",
            "addinitial",
            json!({"graph": "session",
                   "src": {"data": data},
                   "tgt": {"node": "bg", "port": port}}),
        );
    }
    // Visual metadata updates are accepted and ignored.
    dispatch(
        &mut rt,
        "graph",
        "changenode",
        json!({"graph": "session", "id": "bg", "metadata": {"x": 10, "y": 20}}),
    );

    let (rect, pixels) = rt
        .process_blit("session", "neg", PixelFormat::Rgba8, None)
        .unwrap();
    assert_eq!(rect, Rect::new(0, 0, 2, 2));
    assert_eq!(&pixels[..4], &[0xef, 0xdf, 0xcf, 0xff]);
}

#[test]
fn cycle_is_reported_not_applied() {
    let mut rt = runtime();
    dispatch(&mut rt, "graph", "clear", json!({"id": "g"}));
    dispatch(
        &mut rt,
        "graph",
        "addnode",
        json!({"graph": "g", "id": "a", "component": "filter/passthrough"}),
    );
    dispatch(
        &mut rt,
        "graph",
        "addnode",
        json!({"graph": "g", "id": "b", "component": "filter/passthrough"}),
    );
    dispatch(
        &mut rt,
        "graph",
        "addedge",
        json!({"graph": "g",
               "src": {"node": "a", "port": "output"},
               "tgt": {"node": "b", "port": "input"}}),
    );

    let out = rt.handle_message(&msg(
        "graph",
        "addedge",
        json!({"graph": "g",
               "src": {"node": "b", "port": "output"},
               "tgt": {"node": "a", "port": "input"}}),
    ));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].protocol, "graph");
    assert_eq!(out[0].command, "error");
    assert_eq!(rt.network("g").unwrap().graph().edges().len(), 1);
}

#[test]
fn derived_components_flow_through_source_commands() {
    let mut rt = runtime();

    let out = rt.handle_message(&msg(
        "component",
        "source",
        json!({"name": "my/blue",
               "code": "{\"base\":\"canvas/solid\",\"defaults\":{\"color\":\"#0000ff\"}}"}),
    ));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].command, "component");
    assert_eq!(out[0].payload["name"], json!("my/blue"));

    // The new component shows up in the list alongside the builtins.
    let list = rt.handle_message(&msg("component", "list", json!(null)));
    assert!(list.iter().any(|m| m.payload["name"] == json!("my/blue")));

    // And its source round-trips.
    let out = rt.handle_message(&msg("component", "getsource", json!({"name": "my/blue"})));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].command, "source");
    let code = out[0].payload["code"].as_str().unwrap();
    assert!(code.contains("canvas/solid"));

    // Instances of it render with the baked-in default.
    dispatch(&mut rt, "graph", "clear", json!({"id": "g"}));
    dispatch(
        &mut rt,
        "graph",
        "addnode",
        json!({"graph": "g", "id": "src", "component": "my/blue"}),
    );
    for (port, data) in [("width", json!(1)), ("height", json!(1))] {
        dispatch(
            &mut rt,
            "graph",
            "addinitial",
            json!({"graph": "g", "src": {"data": data}, "tgt": {"node": "src", "port": port}}),
        );
    }
    let (_, pixels) = rt.process_blit("g", "src", PixelFormat::Rgba8, None).unwrap();
    assert_eq!(&pixels, &[0x00, 0x00, 0xff, 0xff]);
}

#[test]
fn cyclic_component_redefinition_cannot_wedge_a_graph() {
    let mut rt = runtime();
    dispatch(
        &mut rt,
        "component",
        "source",
        json!({"name": "my/a", "code": "{\"base\":\"filter/invert\"}"}),
    );
    dispatch(
        &mut rt,
        "component",
        "source",
        json!({"name": "my/b", "code": "{\"base\":\"my/a\"}"}),
    );

    // Closing my/a -> my/b -> my/a is rejected, not applied.
    let out = rt.handle_message(&msg(
        "component",
        "source",
        json!({"name": "my/a", "code": "{\"base\":\"my/b\"}"}),
    ));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].command, "error");

    // Nodes of the chained components stay fully usable: add, render, remove.
    dispatch(&mut rt, "graph", "clear", json!({"id": "g"}));
    dispatch(
        &mut rt,
        "graph",
        "addnode",
        json!({"graph": "g", "id": "x", "component": "my/b"}),
    );
    let network = rt.network("g").unwrap();
    assert_eq!(network.graph().nodes().len(), network.bindings().len());
    dispatch(
        &mut rt,
        "graph",
        "removenode",
        json!({"graph": "g", "id": "x"}),
    );
    assert!(rt.network("g").unwrap().graph().nodes().is_empty());
}

#[test]
fn main_graph_source_is_its_document() {
    use pixflow::{ComponentLibrary, Graph, GraphDocument, Network};

    let mut rt = runtime();
    let lib = ComponentLibrary::new();
    let mut graph = Graph::new("default/main");
    graph.add_node(&lib, "bg", "canvas/solid").unwrap();
    let network = Network::new(graph, &lib).unwrap();
    rt.set_default_network(network);

    let out = rt.handle_message(&msg(
        "component",
        "getsource",
        json!({"name": "default/main"}),
    ));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].command, "source");
    assert_eq!(out[0].payload["name"], json!("main"));
    let doc = GraphDocument::from_json(out[0].payload["code"].as_str().unwrap()).unwrap();
    assert_eq!(doc.id, "default/main");
    assert_eq!(doc.nodes.len(), 1);
}

#[test]
fn preview_urls_use_the_external_address() {
    let mut rt = runtime();
    let seen: Arc<Mutex<Vec<Message>>> = Arc::default();
    let sink = seen.clone();
    rt.set_client(Box::new(move |m| sink.lock().unwrap().push(m)));

    dispatch(&mut rt, "graph", "clear", json!({"id": "g"}));
    dispatch(
        &mut rt,
        "graph",
        "addnode",
        json!({"graph": "g", "id": "src", "component": "canvas/solid"}),
    );
    dispatch(&mut rt, "network", "start", json!({"graph": "g"}));
    dispatch(
        &mut rt,
        "graph",
        "addinitial",
        json!({"graph": "g", "src": {"data": 4}, "tgt": {"node": "src", "port": "width"}}),
    );

    let events = seen.lock().unwrap();
    let output = events
        .iter()
        .find(|m| m.protocol == "network" && m.command == "output")
        .expect("edit on a running network produced a preview");
    assert_eq!(output.payload["type"], json!("previewurl"));
    assert_eq!(
        output.payload["url"],
        json!("http://preview.test:8080/process?graph=g&node=src")
    );
}

#[test]
fn detached_client_drops_events_without_failing() {
    let mut rt = runtime();
    let seen: Arc<Mutex<Vec<Message>>> = Arc::default();
    let sink = seen.clone();
    rt.set_client(Box::new(move |m| sink.lock().unwrap().push(m)));

    dispatch(&mut rt, "graph", "clear", json!({"id": "g"}));
    dispatch(&mut rt, "network", "start", json!({"graph": "g"}));
    assert!(!seen.lock().unwrap().is_empty());

    seen.lock().unwrap().clear();
    rt.clear_client();
    dispatch(&mut rt, "network", "stop", json!({"graph": "g"}));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn unknown_messages_are_ignored() {
    let mut rt = runtime();
    assert!(rt.handle_message(&msg("trace", "start", json!(null))).is_empty());
    assert!(rt.handle_message(&msg("graph", "renamenode", json!(null))).is_empty());
    dispatch(&mut rt, "graph", "clear", json!({"id": "g"}));
    assert!(rt.handle_message(&msg("network", "debug", json!({"graph": "g"}))).is_empty());
}
