//! Protocol dispatcher: inbound messages map 1:1 onto the graph/network
//! mutation API; network events flow back out through a registered client
//! sink.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{info, warn};

use crate::foundation::core::{PixelFormat, Rect};
use crate::foundation::error::{PixflowError, PixflowResult};
use crate::graph::model::Graph;
use crate::library::components::{ComponentDescriptor, ComponentLibrary, PortDirection};
use crate::network::Network;
use crate::protocol::message::{
    AddInitialPayload, ClearPayload, EdgePayload, GetSourcePayload, Message, NetworkPayload,
    NodePayload, RemoveInitialPayload, SourcePayload,
};

/// How the runtime describes itself to clients and builds preview URLs.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub hostname: String,
    /// Port clients reach the HTTP endpoint on (may differ from the bind
    /// port behind a proxy).
    pub external_port: u16,
}

/// Shared outbound sink for asynchronous (non-response) messages. Empty when
/// no client is attached; events are then dropped, matching the protocol's
/// at-most-one-client model.
pub type ClientSink = Arc<Mutex<Option<Box<dyn FnMut(Message) + Send>>>>;

fn send(sink: &ClientSink, message: Message) {
    if let Some(f) = sink.lock().expect("client sink poisoned").as_mut() {
        f(message);
    }
}

/// The runtime: component library, named networks, and the protocol
/// dispatcher over them. One instance per process, owned behind the server's
/// single lock.
pub struct Runtime {
    config: RuntimeConfig,
    library: ComponentLibrary,
    networks: BTreeMap<String, Network>,
    main_network: Option<String>,
    sink: ClientSink,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            library: ComponentLibrary::new(),
            networks: BTreeMap::new(),
            main_network: None,
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn library(&self) -> &ComponentLibrary {
        &self.library
    }

    pub fn network(&self, graph_id: &str) -> Option<&Network> {
        self.networks.get(graph_id)
    }

    /// Attach the (single) connected client; replaces any previous sink.
    pub fn set_client(&mut self, client: Box<dyn FnMut(Message) + Send>) {
        *self.sink.lock().expect("client sink poisoned") = Some(client);
    }

    /// Detach the client; subsequent events are dropped.
    pub fn clear_client(&mut self) {
        *self.sink.lock().expect("client sink poisoned") = None;
    }

    /// Register a network under a graph id and install the event listeners
    /// that republish its state changes and invalidations to the client.
    pub fn add_network(&mut self, network: Network) {
        let graph_id = network.graph().id().to_owned();
        let mut network = network;

        let sink = self.sink.clone();
        network.set_state_listener(Box::new(move |graph, state| {
            let command = if state.running { "started" } else { "stopped" };
            send(
                &sink,
                Message::new(
                    "network",
                    command,
                    json!({
                        "graph": graph,
                        "started": state.running,
                        "running": state.processing,
                    }),
                ),
            );
        }));

        let sink = self.sink.clone();
        let url_base = format!(
            "http://{}:{}/process",
            self.config.hostname, self.config.external_port
        );
        let graph_for_url = graph_id.clone();
        network.set_invalidation_listener(Box::new(move |node, _rect| {
            let url = format!("{url_base}?graph={graph_for_url}&node={node}");
            send(
                &sink,
                Message::new(
                    "network",
                    "output",
                    json!({ "type": "previewurl", "url": url }),
                ),
            );
        }));

        self.networks.insert(graph_id, network);
    }

    /// Install `network` as the default ("main") network and start it.
    pub fn set_default_network(&mut self, network: Network) {
        let id = network.graph().id().to_owned();
        self.add_network(network);
        self.main_network = Some(id.clone());
        let network = self
            .networks
            .get_mut(&id)
            .expect("network registered above");
        network.set_running(true);
        info!(graph = id, "default network running");
    }

    /// Render one node of one graph; the HTTP process endpoint calls this.
    pub fn process_blit(
        &mut self,
        graph_id: &str,
        node: &str,
        format: PixelFormat,
        roi: Option<Rect>,
    ) -> PixflowResult<(Rect, Vec<u8>)> {
        let network = self
            .networks
            .get_mut(graph_id)
            .ok_or_else(|| PixflowError::not_found(format!("graph '{graph_id}'")))?;
        network.processor_for(node)?.blit(format, roi)
    }

    /// Dispatch one inbound message, returning direct responses in order.
    /// Mutation failures become `error` responses on the same protocol; they
    /// never terminate the runtime.
    pub fn handle_message(&mut self, message: &Message) -> Vec<Message> {
        let result = match (message.protocol.as_str(), message.command.as_str()) {
            ("graph", command) => self.handle_graph(command, message),
            ("network", command) => self.handle_network(command, message),
            ("component", "list") => Ok(self.component_list()),
            ("component", "source") => self.component_source(message),
            ("component", "getsource") => self.component_getsource(message),
            ("runtime", "getruntime") => Ok(vec![self.runtime_info()]),
            (protocol, command) => {
                warn!(protocol, command, "unhandled protocol message");
                Ok(Vec::new())
            }
        };
        match result {
            Ok(responses) => responses,
            Err(e) => vec![Message::error(&message.protocol, e)],
        }
    }

    fn handle_graph(&mut self, command: &str, message: &Message) -> PixflowResult<Vec<Message>> {
        match command {
            "clear" => {
                let p: ClearPayload = message.parse_payload()?;
                let network = Network::new(Graph::new(p.id), &self.library)?;
                self.add_network(network);
                Ok(Vec::new())
            }
            "addnode" => {
                let p: NodePayload = message.parse_payload()?;
                let (library, network) = self.library_and_network_mut(&p.graph)?;
                network.add_node(library, &p.id, &p.component)?;
                Ok(Vec::new())
            }
            "removenode" => {
                let p: NodePayload = message.parse_payload()?;
                self.network_mut(&p.graph)?.remove_node(&p.id)?;
                Ok(Vec::new())
            }
            // Visual metadata only; the core model does not keep it.
            "changenode" => Ok(Vec::new()),
            "addedge" => {
                let p: EdgePayload = message.parse_payload()?;
                let (library, network) = self.library_and_network_mut(&p.graph)?;
                network.add_edge(library, &p.src.node, &p.src.port, &p.tgt.node, &p.tgt.port)?;
                Ok(Vec::new())
            }
            "removeedge" => {
                let p: EdgePayload = message.parse_payload()?;
                self.network_mut(&p.graph)?
                    .remove_edge(&p.src.node, &p.src.port, &p.tgt.node, &p.tgt.port);
                Ok(Vec::new())
            }
            "addinitial" => {
                let p: AddInitialPayload = message.parse_payload()?;
                let (library, network) = self.library_and_network_mut(&p.graph)?;
                network.add_iip(library, &p.tgt.node, &p.tgt.port, p.src.data)?;
                Ok(Vec::new())
            }
            "removeinitial" => {
                let p: RemoveInitialPayload = message.parse_payload()?;
                self.network_mut(&p.graph)?
                    .remove_iip(&p.tgt.node, &p.tgt.port);
                Ok(Vec::new())
            }
            other => {
                warn!(command = other, "unhandled graph command");
                Ok(Vec::new())
            }
        }
    }

    fn handle_network(&mut self, command: &str, message: &Message) -> PixflowResult<Vec<Message>> {
        let p: NetworkPayload = message.parse_payload()?;
        let network = self.network_mut(&p.graph)?;
        match command {
            "start" => {
                network.set_running(true);
                Ok(Vec::new())
            }
            "stop" => {
                network.set_running(false);
                Ok(Vec::new())
            }
            "getstatus" => Ok(vec![Message::new(
                "network",
                "status",
                json!({
                    "graph": p.graph,
                    "started": network.running(),
                    "running": network.processing(),
                }),
            )]),
            // Not implemented; accepted for protocol compatibility.
            "debug" => Ok(Vec::new()),
            other => {
                warn!(command = other, "unhandled network command");
                Ok(Vec::new())
            }
        }
    }

    fn component_list(&self) -> Vec<Message> {
        self.library
            .list()
            .map(|d| Message::new("component", "component", component_payload(d)))
            .collect()
    }

    fn component_source(&mut self, message: &Message) -> PixflowResult<Vec<Message>> {
        let p: SourcePayload = message.parse_payload()?;
        let descriptor = self.library.set_source(&p.name, &p.code)?;
        Ok(vec![Message::new(
            "component",
            "component",
            component_payload(descriptor),
        )])
    }

    fn component_getsource(&mut self, message: &Message) -> PixflowResult<Vec<Message>> {
        let p: GetSourcePayload = message.parse_payload()?;
        // The main graph is itself addressable as a component; its source is
        // the serialized graph document.
        if self.main_network.as_deref() == Some(p.name.as_str()) {
            let network = self
                .networks
                .get(&p.name)
                .expect("main network must be registered");
            let code = network.graph().to_document().to_json()?;
            return Ok(vec![Message::new(
                "component",
                "source",
                json!({
                    "name": "main",
                    "library": "default",
                    "language": "json",
                    "code": code,
                }),
            )]);
        }
        let code = self.library.get_source(&p.name)?;
        Ok(vec![Message::new(
            "component",
            "source",
            json!({
                "name": p.name,
                "library": "pixflow",
                "language": "json",
                "code": code,
            }),
        )])
    }

    fn runtime_info(&self) -> Message {
        Message::new(
            "runtime",
            "runtime",
            json!({
                "version": "0.4",
                "type": "pixflow",
                "graph": self.main_network,
                "capabilities": [
                    "protocol:component",
                    "protocol:graph",
                    "protocol:network",
                    "component:getsource",
                    "component:setsource",
                ],
            }),
        )
    }

    fn network_mut(&mut self, graph_id: &str) -> PixflowResult<&mut Network> {
        self.networks
            .get_mut(graph_id)
            .ok_or_else(|| PixflowError::not_found(format!("graph '{graph_id}'")))
    }

    /// Split borrow for mutations that need the library alongside a network.
    fn library_and_network_mut(
        &mut self,
        graph_id: &str,
    ) -> PixflowResult<(&ComponentLibrary, &mut Network)> {
        let network = self
            .networks
            .get_mut(graph_id)
            .ok_or_else(|| PixflowError::not_found(format!("graph '{graph_id}'")))?;
        Ok((&self.library, network))
    }
}

fn component_payload(descriptor: &ComponentDescriptor) -> serde_json::Value {
    let ports = |direction: PortDirection| -> Vec<serde_json::Value> {
        descriptor
            .ports
            .iter()
            .filter(|p| p.direction == direction)
            .map(|p| json!({ "id": p.name, "type": p.kind, "required": p.required }))
            .collect()
    };
    json!({
        "name": descriptor.name,
        "description": descriptor.description,
        "inPorts": ports(PortDirection::In),
        "outPorts": ports(PortDirection::Out),
    })
}
