//! Live network: one [`Graph`] kept in lockstep with a [`PipelineEngine`].
//!
//! The central invariant: the set of binding keys equals the set of graph
//! node ids after every call. Each mutation entry point applies the graph
//! mutation first (which validates and either fully applies or fully fails)
//! and mirrors to the engine only on success, so the pair stays atomic. A
//! violation of the bijection is a programming defect and panics.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::foundation::core::Rect;
use crate::foundation::error::{PixflowError, PixflowResult};
use crate::graph::model::{Displaced, Graph};
use crate::library::components::ComponentLibrary;
use crate::pipeline::engine::{OpId, PipelineEngine};
use crate::processor::Processor;

/// Per-node binding of a graph node to its live operation instance. The
/// network exclusively owns the instantiated operation; it is created when
/// the node is added and destroyed when the node is removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineBinding {
    pub node: String,
    pub op: OpId,
}

/// Snapshot sent with state-changed events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    /// The network forwards invalidations while started.
    pub running: bool,
    /// A render is currently in flight.
    pub processing: bool,
}

/// Listener for start/stop transitions: `(graph id, state)`.
pub type StateListener = Box<dyn FnMut(&str, StateChange) + Send>;

/// Listener for per-node staleness: `(node id, last output rectangle)`.
pub type InvalidationListener = Box<dyn FnMut(&str, Rect) + Send>;

/// Owns a graph plus the full set of pipeline bindings; mirrors every graph
/// mutation into the live pipeline and republishes pipeline invalidations as
/// node-level notifications.
pub struct Network {
    graph: Graph,
    engine: PipelineEngine,
    bindings: BTreeMap<String, PipelineBinding>,
    running: bool,
    pub(crate) processing: bool,
    on_state_changed: Option<StateListener>,
    on_invalidated: Option<InvalidationListener>,
}

impl Network {
    /// Take ownership of a graph and build one binding per existing node,
    /// then mirror its edges and IIPs into the engine. Starts stopped.
    pub fn new(graph: Graph, library: &ComponentLibrary) -> PixflowResult<Self> {
        let mut network = Self {
            graph: Graph::new(""),
            engine: PipelineEngine::new(),
            bindings: BTreeMap::new(),
            running: false,
            processing: false,
            on_state_changed: None,
            on_invalidated: None,
        };

        for (id, spec) in graph.nodes() {
            let op = network.instantiate(library, &spec.component)?;
            network.bindings.insert(
                id.clone(),
                PipelineBinding {
                    node: id.clone(),
                    op,
                },
            );
        }
        for edge in graph.edges() {
            let src = network.binding_op(&edge.src.node);
            let dst = network.binding_op(&edge.dst.node);
            network
                .engine
                .connect(src, &edge.src.port, dst, &edge.dst.port);
        }
        for iip in graph.iips() {
            let op = network.binding_op(&iip.dst.node);
            network
                .engine
                .set_literal(op, &iip.dst.port, iip.value.clone());
        }
        // Construction-time events have no observer and the network is
        // stopped; drop them.
        network.engine.take_invalidations();

        network.graph = graph;
        debug!(graph = network.graph.id(), nodes = network.bindings.len(), "network built");
        Ok(network)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn processing(&self) -> bool {
        self.processing
    }

    /// Bindings, keyed by node id.
    pub fn bindings(&self) -> &BTreeMap<String, PipelineBinding> {
        &self.bindings
    }

    /// Register the single state-change listener.
    pub fn set_state_listener(&mut self, listener: StateListener) {
        self.on_state_changed = Some(listener);
    }

    /// Register the single invalidation listener.
    pub fn set_invalidation_listener(&mut self, listener: InvalidationListener) {
        self.on_invalidated = Some(listener);
    }

    /// Transition the running state. A transition to the current state is a
    /// no-op and emits no duplicate event. Stopping suppresses invalidation
    /// forwarding; pending events are dropped, not queued.
    pub fn set_running(&mut self, running: bool) {
        if self.running == running {
            return;
        }
        self.running = running;
        debug!(graph = self.graph.id(), running, "network state changed");
        if !running {
            // Anything queued between the last pump and now is dropped.
            self.engine.take_invalidations();
        }
        let state = StateChange {
            running,
            processing: self.processing,
        };
        let id = self.graph.id().to_owned();
        if let Some(listener) = self.on_state_changed.as_mut() {
            listener(&id, state);
        }
    }

    /// Mirrored counterpart of [`Graph::add_node`]. The instantiation plan is
    /// resolved before the graph is touched, so a component the engine cannot
    /// instantiate leaves both sides unchanged.
    pub fn add_node(
        &mut self,
        library: &ComponentLibrary,
        id: &str,
        component: &str,
    ) -> PixflowResult<()> {
        let plan = library.instantiation_plan(component)?;
        self.graph.add_node(library, id, component)?;
        let op = self.engine.instantiate(plan.kind, &plan.defaults);
        self.bindings.insert(
            id.to_owned(),
            PipelineBinding {
                node: id.to_owned(),
                op,
            },
        );
        self.pump_events();
        Ok(())
    }

    /// Mirrored counterpart of [`Graph::remove_node`]: unwires cascaded
    /// edges/IIPs and destroys the bound operation.
    pub fn remove_node(&mut self, id: &str) -> PixflowResult<()> {
        self.graph.remove_node(id)?;
        let binding = self
            .bindings
            .remove(id)
            .expect("binding bijection broken: graph node without binding");
        // Destroy drops the operation's connections in the engine, including
        // the cascaded ones.
        self.engine.destroy(binding.op);
        self.pump_events();
        Ok(())
    }

    /// Mirrored counterpart of [`Graph::add_edge`].
    pub fn add_edge(
        &mut self,
        library: &ComponentLibrary,
        src_node: &str,
        src_port: &str,
        dst_node: &str,
        dst_port: &str,
    ) -> PixflowResult<()> {
        let displaced = self
            .graph
            .add_edge(library, src_node, src_port, dst_node, dst_port)?;
        self.unwire(&displaced);
        let src = self.binding_op(src_node);
        let dst = self.binding_op(dst_node);
        self.engine.connect(src, src_port, dst, dst_port);
        self.pump_events();
        Ok(())
    }

    /// Mirrored counterpart of [`Graph::remove_edge`] (idempotent).
    pub fn remove_edge(
        &mut self,
        src_node: &str,
        src_port: &str,
        dst_node: &str,
        dst_port: &str,
    ) {
        if self.graph.remove_edge(src_node, src_port, dst_node, dst_port) {
            let src = self.binding_op(src_node);
            let dst = self.binding_op(dst_node);
            self.engine.disconnect(src, src_port, dst, dst_port);
            self.pump_events();
        }
    }

    /// Mirrored counterpart of [`Graph::add_iip`].
    pub fn add_iip(
        &mut self,
        library: &ComponentLibrary,
        node: &str,
        port: &str,
        value: Value,
    ) -> PixflowResult<()> {
        let displaced = self.graph.add_iip(library, node, port, value.clone())?;
        self.unwire(&displaced);
        let op = self.binding_op(node);
        self.engine.set_literal(op, port, value);
        self.pump_events();
        Ok(())
    }

    /// Mirrored counterpart of [`Graph::remove_iip`] (idempotent).
    pub fn remove_iip(&mut self, node: &str, port: &str) {
        if let Some(iip) = self.graph.remove_iip(node, port) {
            let op = self.binding_op(&iip.dst.node);
            self.engine.clear_literal(op, port);
            self.pump_events();
        }
    }

    /// Reset to an empty graph with the same id, destroying every binding's
    /// operation.
    pub fn clear(&mut self) {
        for (_, binding) in std::mem::take(&mut self.bindings) {
            self.engine.destroy(binding.op);
        }
        self.graph.clear();
        self.pump_events();
    }

    /// Reverse lookup from a live operation to its graph node id; used when
    /// translating pipeline-level events back to graph-level identifiers.
    pub fn find_node_by_binding(&self, op: OpId) -> Option<&str> {
        self.bindings
            .values()
            .find(|b| b.op == op)
            .map(|b| b.node.as_str())
    }

    /// A transient render handle for one node.
    pub fn processor_for(&mut self, node: &str) -> PixflowResult<Processor<'_>> {
        if !self.bindings.contains_key(node) {
            return Err(PixflowError::not_found(format!("node '{node}'")));
        }
        Ok(Processor::new(self, node.to_owned()))
    }

    pub(crate) fn binding_op(&self, node: &str) -> OpId {
        self.bindings
            .get(node)
            .expect("binding bijection broken: graph node without binding")
            .op
    }

    pub(crate) fn engine_mut(&mut self) -> &mut PipelineEngine {
        &mut self.engine
    }

    /// Drain engine invalidations. While running they are forwarded to the
    /// registered listener as `(node id, rect)`; while stopped they are
    /// dropped. Called at the tail of every mutating entry point, after the
    /// mutation is fully applied, which keeps "graph changed" causally
    /// before "output changed".
    pub(crate) fn pump_events(&mut self) {
        let events = self.engine.take_invalidations();
        if !self.running || events.is_empty() {
            return;
        }
        for event in events {
            // Operations destroyed later in the same call may no longer have
            // a binding; those events are meaningless to clients.
            let Some(node) = self.find_node_by_binding(event.op).map(str::to_owned) else {
                continue;
            };
            if let Some(listener) = self.on_invalidated.as_mut() {
                listener(&node, event.rect);
            }
        }
    }

    fn instantiate(&mut self, library: &ComponentLibrary, component: &str) -> PixflowResult<OpId> {
        let plan = library.instantiation_plan(component)?;
        Ok(self.engine.instantiate(plan.kind, &plan.defaults))
    }

    /// Engine-side cleanup for a displaced edge or IIP.
    fn unwire(&mut self, displaced: &Displaced) {
        if let Some(edge) = &displaced.edge {
            let src = self.binding_op(&edge.src.node);
            let dst = self.binding_op(&edge.dst.node);
            self.engine.disconnect(src, &edge.src.port, dst, &edge.dst.port);
        }
        if let Some(iip) = &displaced.iip {
            let op = self.binding_op(&iip.dst.node);
            self.engine.clear_literal(op, &iip.dst.port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn lib() -> ComponentLibrary {
        ComponentLibrary::new()
    }

    fn assert_bijection(network: &Network) {
        let node_ids: Vec<&String> = network.graph().nodes().keys().collect();
        let binding_ids: Vec<&String> = network.bindings().keys().collect();
        assert_eq!(node_ids, binding_ids);
    }

    #[test]
    fn bindings_stay_bijective_across_mutations() {
        let lib = lib();
        let mut network = Network::new(Graph::new("net/main"), &lib).unwrap();
        assert_bijection(&network);

        network.add_node(&lib, "a", "canvas/solid").unwrap();
        network.add_node(&lib, "b", "filter/passthrough").unwrap();
        assert_bijection(&network);

        network.add_edge(&lib, "a", "output", "b", "input").unwrap();
        network.add_iip(&lib, "a", "width", json!(2)).unwrap();
        assert_bijection(&network);

        network.remove_node("a").unwrap();
        assert_bijection(&network);

        // Failed mutations change nothing on either side.
        assert!(network.add_node(&lib, "b", "canvas/solid").is_err());
        assert!(network.remove_node("missing").is_err());
        assert_bijection(&network);

        network.clear();
        assert_bijection(&network);
        assert!(network.bindings().is_empty());
    }

    #[test]
    fn rejected_add_node_leaves_no_trace() {
        let lib = lib();
        let mut network = Network::new(Graph::new("net/reject"), &lib).unwrap();
        assert!(matches!(
            network.add_node(&lib, "x", "no/such"),
            Err(PixflowError::UnknownComponent(_))
        ));
        assert!(network.graph().nodes().is_empty());
        assert!(network.bindings().is_empty());
        // The untouched network keeps working.
        network.add_node(&lib, "x", "canvas/solid").unwrap();
        network.remove_node("x").unwrap();
        assert_bijection(&network);
    }

    #[test]
    fn new_adopts_prebuilt_graph() {
        let lib = lib();
        let mut g = Graph::new("net/adopted");
        g.add_node(&lib, "src", "canvas/solid").unwrap();
        g.add_node(&lib, "out", "filter/passthrough").unwrap();
        g.add_edge(&lib, "src", "output", "out", "input").unwrap();
        g.add_iip(&lib, "src", "width", json!(2)).unwrap();
        g.add_iip(&lib, "src", "height", json!(2)).unwrap();

        let mut network = Network::new(g, &lib).unwrap();
        assert_bijection(&network);

        let mut processor = network.processor_for("out").unwrap();
        let (rect, _) = processor
            .blit(crate::PixelFormat::Rgba8, None)
            .unwrap();
        assert_eq!(rect, Rect::new(0, 0, 2, 2));
    }

    #[test]
    fn state_machine_emits_once_per_transition() {
        let lib = lib();
        let mut network = Network::new(Graph::new("net/state"), &lib).unwrap();
        let seen: Arc<Mutex<Vec<StateChange>>> = Arc::default();
        let sink = seen.clone();
        network.set_state_listener(Box::new(move |_, s| sink.lock().unwrap().push(s)));

        network.set_running(true);
        network.set_running(true); // same state, no event
        network.set_running(false);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].running);
        assert!(!events[1].running);
    }

    #[test]
    fn invalidations_flow_only_while_running() {
        let lib = lib();
        let mut network = Network::new(Graph::new("net/relay"), &lib).unwrap();
        let seen: Arc<Mutex<Vec<(String, Rect)>>> = Arc::default();
        let sink = seen.clone();
        network.set_invalidation_listener(Box::new(move |node, rect| {
            sink.lock().unwrap().push((node.to_owned(), rect));
        }));

        network.add_node(&lib, "a", "canvas/solid").unwrap();
        assert!(
            seen.lock().unwrap().is_empty(),
            "stopped networks drop invalidations"
        );

        network.set_running(true);
        network.add_iip(&lib, "a", "width", json!(4)).unwrap();
        let events = seen.lock().unwrap().clone();
        assert!(events.iter().any(|(n, _)| n == "a"));

        seen.lock().unwrap().clear();
        network.set_running(false);
        network.add_iip(&lib, "a", "height", json!(4)).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn processor_for_unknown_node_fails() {
        let lib = lib();
        let mut network = Network::new(Graph::new("net/missing"), &lib).unwrap();
        assert!(matches!(
            network.processor_for("ghost"),
            Err(PixflowError::NotFound(_))
        ));
    }
}
