//! Pull-based render handle for one node of a running network.

use tracing::debug;

use crate::foundation::core::{PixelFormat, Rect};
use crate::foundation::error::PixflowResult;
use crate::network::Network;

/// A transient, non-owning handle over one pipeline binding, used only to
/// issue blit calls. Carries no state beyond the node it points at; caching
/// lives in the pipeline engine.
pub struct Processor<'a> {
    network: &'a mut Network,
    node: String,
}

impl<'a> Processor<'a> {
    pub(crate) fn new(network: &'a mut Network, node: String) -> Self {
        Self { network, node }
    }

    /// The node this processor renders.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Synchronously pull the current output of the bound node.
    ///
    /// On success returns the tight bounding rectangle of valid pixel data
    /// and a buffer of `width * height * bytes_per_pixel` in the requested
    /// format, recomputed only if the node was invalidated since the last
    /// blit. A node with no valid output (unconnected required input,
    /// upstream error) fails with `RenderFailed`; callers should degrade
    /// that to "no image available". A zero-area rectangle with an empty
    /// buffer is a valid success ("nothing to display").
    ///
    /// The call blocks until computation completes or fails; it is not
    /// cancellable. The owning network reports `processing = true` for
    /// exactly its duration.
    pub fn blit(
        &mut self,
        format: PixelFormat,
        roi_hint: Option<Rect>,
    ) -> PixflowResult<(Rect, Vec<u8>)> {
        let op = self.network.binding_op(&self.node);
        self.network.processing = true;
        let result = self.network.engine_mut().render(op, format, roi_hint);
        self.network.processing = false;
        // A blit can flush freshly-computed rectangles to subscribers.
        self.network.pump_events();
        match &result {
            Ok((rect, _)) => debug!(node = %self.node, ?rect, "blit complete"),
            Err(e) => debug!(node = %self.node, error = %e, "blit failed"),
        }
        result
    }
}
