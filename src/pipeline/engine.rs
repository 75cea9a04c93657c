//! Live pipeline of instantiated operations.
//!
//! The engine implements the narrow contract the graph layer builds on:
//! instantiate / connect / disconnect / set_literal / destroy / render, plus
//! an invalidation queue the owning [`crate::Network`] drains after every
//! mutating call. Operation handles are never dangling by construction: all
//! cross-references go through [`OpId`] lookups.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::trace;

use crate::foundation::core::{PixelFormat, Rect};
use crate::foundation::error::{PixflowError, PixflowResult};
use crate::pipeline::ops::{self, OpKind, OpOutput};

/// Handle to one instantiated operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(u64);

/// A queued staleness event: this operation's output must be recomputed
/// before being served. `rect` is the last rectangle the operation produced,
/// zero-area if it never rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Invalidation {
    pub op: OpId,
    pub rect: Rect,
}

struct Operation {
    kind: OpKind,
    literals: BTreeMap<String, Value>,
    /// Incoming buffer connections: destination port -> (source op, port).
    inputs: BTreeMap<String, (OpId, String)>,
    cache: Option<OpOutput>,
    dirty: bool,
    last_rect: Rect,
}

/// Arena of live operations with dirty tracking and per-operation output
/// caching.
#[derive(Default)]
pub struct PipelineEngine {
    ops: BTreeMap<OpId, Operation>,
    next_id: u64,
    events: Vec<Invalidation>,
}

impl PipelineEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new operation with the given default literals. The new
    /// operation starts dirty and produces no invalidation event until
    /// something downstream can observe it.
    pub fn instantiate(&mut self, kind: OpKind, defaults: &BTreeMap<String, Value>) -> OpId {
        let id = OpId(self.next_id);
        self.next_id += 1;
        self.ops.insert(
            id,
            Operation {
                kind,
                literals: defaults.clone(),
                inputs: BTreeMap::new(),
                cache: None,
                dirty: true,
                last_rect: Rect::zero(),
            },
        );
        trace!(op = id.0, ?kind, "instantiated operation");
        id
    }

    /// Destroy an operation. Downstream operations that referenced it lose
    /// that connection and are invalidated.
    pub fn destroy(&mut self, op: OpId) {
        self.ops
            .remove(&op)
            .expect("pipeline binding invariant broken: destroying unknown operation");
        let mut orphaned = Vec::new();
        for (id, other) in &mut self.ops {
            let before = other.inputs.len();
            other.inputs.retain(|_, (src, _)| *src != op);
            if other.inputs.len() != before {
                orphaned.push(*id);
            }
        }
        for id in orphaned {
            self.mark_dirty(id);
        }
    }

    /// Wire `src:src_port` into `dst:dst_port`, replacing any previous
    /// connection on that destination port.
    pub fn connect(&mut self, src: OpId, src_port: &str, dst: OpId, dst_port: &str) {
        assert!(
            self.ops.contains_key(&src),
            "pipeline binding invariant broken: connect from unknown operation"
        );
        self.op_mut(dst)
            .inputs
            .insert(dst_port.to_owned(), (src, src_port.to_owned()));
        self.mark_dirty(dst);
    }

    /// Remove the connection into `dst:dst_port` if it matches `src:src_port`.
    pub fn disconnect(&mut self, src: OpId, src_port: &str, dst: OpId, dst_port: &str) {
        let operation = self.op_mut(dst);
        if operation
            .inputs
            .get(dst_port)
            .is_some_and(|(s, p)| *s == src && p == src_port)
        {
            operation.inputs.remove(dst_port);
            self.mark_dirty(dst);
        }
    }

    /// Push a literal value onto a port.
    pub fn set_literal(&mut self, op: OpId, port: &str, value: Value) {
        self.op_mut(op).literals.insert(port.to_owned(), value);
        self.mark_dirty(op);
    }

    /// Remove a literal from a port, if present.
    pub fn clear_literal(&mut self, op: OpId, port: &str) {
        if self.op_mut(op).literals.remove(port).is_some() {
            self.mark_dirty(op);
        }
    }

    /// Drain queued invalidation events in generation order.
    pub fn take_invalidations(&mut self) -> Vec<Invalidation> {
        std::mem::take(&mut self.events)
    }

    /// Pull-render one operation: compute stale dependencies depth-first,
    /// serve cached results for everything untouched since the last render.
    pub fn render(
        &mut self,
        op: OpId,
        format: PixelFormat,
        roi: Option<Rect>,
    ) -> PixflowResult<(Rect, Vec<u8>)> {
        let order = self.evaluation_order(op);
        for id in order {
            let current = self.op_ref(id);
            if !current.dirty && current.cache.is_some() {
                continue;
            }
            let mut inputs = BTreeMap::new();
            for (port, (src, _)) in current.inputs.clone() {
                let upstream = self.op_ref(src);
                let output = upstream.cache.clone().ok_or_else(|| {
                    PixflowError::render_failed(format!("input '{port}' has no computed output"))
                })?;
                inputs.insert(port, output);
            }
            let literals = self.op_ref(id).literals.clone();
            let kind = self.op_ref(id).kind;
            let output = ops::execute(kind, &literals, &inputs)?;
            trace!(op = id.0, rect = ?output.rect, "computed operation output");
            let operation = self.op_mut(id);
            operation.last_rect = output.rect;
            operation.cache = Some(output);
            operation.dirty = false;
        }

        let cached = self
            .op_ref(op)
            .cache
            .as_ref()
            .expect("render completed without a cached output");
        Ok(ops::convert(cached, format, roi))
    }

    fn op_ref(&self, op: OpId) -> &Operation {
        self.ops
            .get(&op)
            .expect("pipeline binding invariant broken: unknown operation")
    }

    fn op_mut(&mut self, op: OpId) -> &mut Operation {
        self.ops
            .get_mut(&op)
            .expect("pipeline binding invariant broken: unknown operation")
    }

    /// Mark `op` and its transitive downstream dirty, queuing one
    /// invalidation per operation touched by this call.
    fn mark_dirty(&mut self, op: OpId) {
        let mut visited = Vec::new();
        let mut stack = vec![op];
        while let Some(id) = stack.pop() {
            if visited.contains(&id) {
                continue;
            }
            visited.push(id);
            self.op_mut(id).dirty = true;
            let rect = self.op_ref(id).last_rect;
            self.events.push(Invalidation { op: id, rect });
            for (next, other) in &self.ops {
                if other.inputs.values().any(|(src, _)| *src == id) {
                    stack.push(*next);
                }
            }
        }
    }

    /// Dependencies of `op` in evaluation order (upstream first), `op` last.
    fn evaluation_order(&self, op: OpId) -> Vec<OpId> {
        let mut order = Vec::new();
        let mut visited = Vec::new();
        self.visit(op, &mut visited, &mut order);
        order
    }

    fn visit(&self, op: OpId, visited: &mut Vec<OpId>, order: &mut Vec<OpId>) {
        if visited.contains(&op) {
            return;
        }
        visited.push(op);
        for (src, _) in self.op_ref(op).inputs.values() {
            self.visit(*src, visited, order);
        }
        order.push(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn solid(engine: &mut PipelineEngine, w: u32, h: u32, color: &str) -> OpId {
        let op = engine.instantiate(OpKind::Solid, &BTreeMap::new());
        engine.set_literal(op, "width", json!(w));
        engine.set_literal(op, "height", json!(h));
        engine.set_literal(op, "color", json!(color));
        op
    }

    #[test]
    fn render_pulls_through_a_chain() {
        let mut engine = PipelineEngine::new();
        let src = solid(&mut engine, 2, 2, "#ff0000");
        let pass = engine.instantiate(OpKind::Passthrough, &BTreeMap::new());
        engine.connect(src, "output", pass, "input");

        let (rect, buf) = engine.render(pass, PixelFormat::Rgba8, None).unwrap();
        assert_eq!(rect, Rect::new(0, 0, 2, 2));
        assert_eq!(&buf[..4], &[0xff, 0, 0, 0xff]);
    }

    #[test]
    fn unconnected_required_input_fails() {
        let mut engine = PipelineEngine::new();
        let pass = engine.instantiate(OpKind::Passthrough, &BTreeMap::new());
        let err = engine.render(pass, PixelFormat::Rgba8, None).unwrap_err();
        assert!(matches!(err, PixflowError::RenderFailed(_)));
    }

    #[test]
    fn literal_change_invalidates_downstream() {
        let mut engine = PipelineEngine::new();
        let src = solid(&mut engine, 2, 2, "#ff0000");
        let pass = engine.instantiate(OpKind::Passthrough, &BTreeMap::new());
        engine.connect(src, "output", pass, "input");
        engine.render(pass, PixelFormat::Rgba8, None).unwrap();
        engine.take_invalidations();

        engine.set_literal(src, "color", json!("#00ff00"));
        let events = engine.take_invalidations();
        let touched: Vec<OpId> = events.iter().map(|e| e.op).collect();
        assert!(touched.contains(&src));
        assert!(touched.contains(&pass));
        // Downstream already rendered once, so its event carries a real rect.
        let pass_event = events.iter().find(|e| e.op == pass).unwrap();
        assert_eq!(pass_event.rect, Rect::new(0, 0, 2, 2));

        let (_, buf) = engine.render(pass, PixelFormat::Rgba8, None).unwrap();
        assert_eq!(&buf[..4], &[0, 0xff, 0, 0xff]);
    }

    #[test]
    fn clean_operations_serve_from_cache() {
        let mut engine = PipelineEngine::new();
        let src = solid(&mut engine, 1, 1, "#123456");
        let first = engine.render(src, PixelFormat::Rgba8, None).unwrap();
        engine.take_invalidations();
        let second = engine.render(src, PixelFormat::Rgba8, None).unwrap();
        assert_eq!(first, second);
        assert!(engine.take_invalidations().is_empty(), "cache hits emit no events");
    }

    #[test]
    fn destroy_orphans_and_invalidates_dependents() {
        let mut engine = PipelineEngine::new();
        let src = solid(&mut engine, 1, 1, "#ffffff");
        let pass = engine.instantiate(OpKind::Passthrough, &BTreeMap::new());
        engine.connect(src, "output", pass, "input");
        engine.render(pass, PixelFormat::Rgba8, None).unwrap();
        engine.take_invalidations();

        engine.destroy(src);
        let events = engine.take_invalidations();
        assert!(events.iter().any(|e| e.op == pass));
        let err = engine.render(pass, PixelFormat::Rgba8, None).unwrap_err();
        assert!(matches!(err, PixflowError::RenderFailed(_)));
    }
}
