//! Pixflow is a live-editable image-processing dataflow runtime.
//!
//! Clients connect over a WebSocket carrying FBP-style protocol messages,
//! construct and mutate a directed graph of image operations at run time, and
//! pull rendered pixel output for any node on demand over HTTP.
//!
//! # Engine overview
//!
//! 1. **Describe**: a [`Graph`] is the declarative, mutable description of
//!    nodes, edges and literal inputs (IIPs), validated against a
//!    [`ComponentLibrary`].
//! 2. **Mirror**: a [`Network`] owns one `Graph` plus one
//!    [`PipelineBinding`] per node and projects every graph mutation onto a
//!    live [`PipelineEngine`], keeping the two in lockstep.
//! 3. **Invalidate**: structural and literal changes dirty downstream
//!    operations; while running, the network republishes those events as
//!    per-node "output changed" notifications.
//! 4. **Blit**: a [`Processor`] pulls the current output of one node into a
//!    pixel buffer, recomputing only what was invalidated since the last
//!    pull.
//!
//! The key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Single-threaded cooperative**: all mutation, relay and render calls
//!   run on one logical thread (the server serializes them behind one lock);
//!   the core types carry no locking of their own.
//! - **Atomic mutations**: a mutation that fails validation leaves both the
//!   graph and the live pipeline unchanged.
//! - **Straight RGBA8 end-to-end**: operations exchange non-premultiplied
//!   RGBA8 buffers; format conversion happens at blit time.
#![forbid(unsafe_code)]

mod foundation;
mod graph;
mod library;
mod network;
mod pipeline;
mod processor;
mod protocol;
mod registry;
mod server;

pub use foundation::core::{PixelFormat, Rect, Rgba8};
pub use foundation::error::{PixflowError, PixflowResult};
pub use graph::document::GraphDocument;
pub use graph::model::{Edge, Endpoint, Graph, Iip, NodeSpec};
pub use library::components::{
    ComponentDescriptor, ComponentLibrary, DerivedSpec, PortDescriptor, PortDirection, PortKind,
};
pub use network::{Network, PipelineBinding, StateChange};
pub use pipeline::engine::{Invalidation, OpId, PipelineEngine};
pub use pipeline::ops::OpKind;
pub use processor::Processor;
pub use protocol::message::Message;
pub use protocol::runtime::{Runtime, RuntimeConfig};
pub use registry::{Registry, RuntimeInfo};
pub use server::http::{AppState, run_server};
