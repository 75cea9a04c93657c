//! Declarative graph of processing nodes, edges and literal inputs.
//!
//! Every mutation is validated before anything is applied; a failed call
//! leaves the graph exactly as it was. Cross-references are by node id, never
//! by live reference, so removals cannot dangle.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::foundation::error::{PixflowError, PixflowResult};
use crate::library::components::{ComponentLibrary, PortKind};

/// A node: a named instance of a component.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeSpec {
    pub component: String,
}

/// One end of an edge or the target of an IIP.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Endpoint {
    pub node: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
        }
    }
}

/// A directed connection from an output port to an input port.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Edge {
    pub src: Endpoint,
    pub dst: Endpoint,
}

/// A literal value bound directly to an input port (initial packet).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Iip {
    pub dst: Endpoint,
    pub value: Value,
}

/// What an `add_edge`/`add_iip` displaced on the destination port, so the
/// owning network can unwire the live pipeline to match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Displaced {
    pub edge: Option<Edge>,
    pub iip: Option<Iip>,
}

/// Edges and IIPs removed as a side effect of `remove_node`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeRemoval {
    pub edges: Vec<Edge>,
    pub iips: Vec<Iip>,
}

/// The declarative, mutable description of a processing pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
    id: String,
    nodes: BTreeMap<String, NodeSpec>,
    edges: Vec<Edge>,
    iips: Vec<Iip>,
}

impl Graph {
    /// An empty graph with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            iips: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nodes(&self) -> &BTreeMap<String, NodeSpec> {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn iips(&self) -> &[Iip] {
        &self.iips
    }

    /// Insert a node. Fails with `DuplicateId` if the id is taken and with
    /// `UnknownComponent` if the registry cannot resolve the component.
    pub fn add_node(
        &mut self,
        library: &ComponentLibrary,
        id: impl Into<String>,
        component: impl Into<String>,
    ) -> PixflowResult<()> {
        let id = id.into();
        let component = component.into();
        if self.nodes.contains_key(&id) {
            return Err(PixflowError::duplicate_id(format!("node '{id}'")));
        }
        library.resolve(&component)?;
        self.nodes.insert(id, NodeSpec { component });
        Ok(())
    }

    /// Remove a node, cascading removal of every edge and IIP touching it.
    /// The removal record tells the caller what was cascaded away.
    pub fn remove_node(&mut self, id: &str) -> PixflowResult<NodeRemoval> {
        if !self.nodes.contains_key(id) {
            return Err(PixflowError::not_found(format!("node '{id}'")));
        }
        let mut removal = NodeRemoval::default();
        self.edges.retain(|e| {
            if e.src.node == id || e.dst.node == id {
                removal.edges.push(e.clone());
                false
            } else {
                true
            }
        });
        self.iips.retain(|iip| {
            if iip.dst.node == id {
                removal.iips.push(iip.clone());
                false
            } else {
                true
            }
        });
        self.nodes.remove(id);
        Ok(removal)
    }

    /// Connect an output port to an input port.
    ///
    /// Any previous edge or IIP on the destination port is displaced (replace
    /// semantics). Fails with `CycleDetected` when the edge would make the
    /// node-level dependency graph cyclic; nothing is changed on failure.
    pub fn add_edge(
        &mut self,
        library: &ComponentLibrary,
        src_node: &str,
        src_port: &str,
        dst_node: &str,
        dst_port: &str,
    ) -> PixflowResult<Displaced> {
        let src_component = self.component_of(src_node)?;
        let dst_component = self.component_of(dst_node)?;

        let src_desc = library.resolve(&src_component)?;
        let out = src_desc.out_port(src_port).ok_or_else(|| {
            PixflowError::unknown_port(format!(
                "node '{src_node}' ({src_component}) has no output port '{src_port}'"
            ))
        })?;
        if out.kind != PortKind::Buffer {
            return Err(PixflowError::unknown_port(format!(
                "port '{src_port}' of '{src_component}' does not carry buffers"
            )));
        }

        let dst_desc = library.resolve(&dst_component)?;
        dst_desc.in_port(dst_port).ok_or_else(|| {
            PixflowError::unknown_port(format!(
                "node '{dst_node}' ({dst_component}) has no input port '{dst_port}'"
            ))
        })?;

        if src_node == dst_node || self.can_reach(dst_node, src_node) {
            return Err(PixflowError::cycle_detected(format!(
                "{src_node}:{src_port} -> {dst_node}:{dst_port}"
            )));
        }

        let displaced = self.displace(dst_node, dst_port);
        self.edges.push(Edge {
            src: Endpoint::new(src_node, src_port),
            dst: Endpoint::new(dst_node, dst_port),
        });
        Ok(displaced)
    }

    /// Remove an edge. Removing an edge that does not exist is not an error
    /// (idempotent, client retries are expected); the return value says
    /// whether anything was removed.
    pub fn remove_edge(
        &mut self,
        src_node: &str,
        src_port: &str,
        dst_node: &str,
        dst_port: &str,
    ) -> bool {
        let before = self.edges.len();
        self.edges.retain(|e| {
            !(e.src.node == src_node
                && e.src.port == src_port
                && e.dst.node == dst_node
                && e.dst.port == dst_port)
        });
        self.edges.len() != before
    }

    /// Bind a literal to an input port, displacing any previous edge or IIP
    /// on that port.
    pub fn add_iip(
        &mut self,
        library: &ComponentLibrary,
        node: &str,
        port: &str,
        value: Value,
    ) -> PixflowResult<Displaced> {
        let component = self.component_of(node)?;
        let desc = library.resolve(&component)?;
        desc.in_port(port).ok_or_else(|| {
            PixflowError::unknown_port(format!(
                "node '{node}' ({component}) has no input port '{port}'"
            ))
        })?;

        let displaced = self.displace(node, port);
        self.iips.push(Iip {
            dst: Endpoint::new(node, port),
            value,
        });
        Ok(displaced)
    }

    /// Remove the IIP on an input port, if any (idempotent).
    pub fn remove_iip(&mut self, node: &str, port: &str) -> Option<Iip> {
        let idx = self
            .iips
            .iter()
            .position(|iip| iip.dst.node == node && iip.dst.port == port)?;
        Some(self.iips.remove(idx))
    }

    /// Reset to an empty graph with the same id.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.iips.clear();
    }

    fn component_of(&self, node: &str) -> PixflowResult<String> {
        self.nodes
            .get(node)
            .map(|n| n.component.clone())
            .ok_or_else(|| PixflowError::not_found(format!("node '{node}'")))
    }

    /// Remove whatever currently drives `node:port`.
    fn displace(&mut self, node: &str, port: &str) -> Displaced {
        let mut displaced = Displaced::default();
        if let Some(idx) = self
            .edges
            .iter()
            .position(|e| e.dst.node == node && e.dst.port == port)
        {
            displaced.edge = Some(self.edges.remove(idx));
        }
        displaced.iip = self.remove_iip(node, port);
        displaced
    }

    /// True when `to` is reachable from `from` along node-level edges.
    fn can_reach(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut visited: Vec<&str> = Vec::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if visited.contains(&node) {
                continue;
            }
            visited.push(node);
            for e in &self.edges {
                if e.src.node == node {
                    stack.push(&e.dst.node);
                }
            }
        }
        false
    }
}
