//! HTTP and WebSocket surface of the runtime.
//!
//! `/ws` carries FBP protocol messages, `/process` renders one node to PNG,
//! `/` serves a small page linking the runtime into an FBP IDE. All requests
//! funnel through one `Mutex<Runtime>`: mutations and renders are strictly
//! serialized, so the core types need no locking of their own. A render
//! blocks every other request for its duration; that is the documented
//! single-threaded cooperative model, not an oversight.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::foundation::core::PixelFormat;
use crate::protocol::message::Message;
use crate::protocol::runtime::Runtime;

/// Shared server state: the whole runtime behind one lock.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Mutex<Runtime>>,
}

/// Serve the runtime until the listener fails.
pub async fn run_server(state: AppState, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/", get(frontpage))
        .route("/ws", get(ws_handler))
        .route("/process", get(process_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    info!(%addr, "runtime listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn frontpage() -> Html<&'static str> {
    // Mirrors the runtime's live-URL convention: same origin, ws:// scheme.
    Html(
        r#"<a id="ide_url">Open in IDE</a>
<script>
  var addr = window.location.origin.replace("http://", "ws://").replace("https://", "ws://");
  var ide = "http://app.flowhub.io";
  document.getElementById("ide_url").href =
    ide + "/#runtime/endpoint?protocol=websocket&address=" + encodeURIComponent(addr + "/ws");
</script>
"#,
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Both direct responses and network events go out through one channel,
    // so their relative order is what the runtime produced.
    {
        let event_tx = tx.clone();
        let mut runtime = state.runtime.lock().await;
        runtime.set_client(Box::new(move |message| {
            let _ = event_tx.send(message);
        }));
    }
    info!("protocol client connected");

    let forward = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = message.to_json() else {
                continue;
            };
            debug!(%text, "send");
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(inbound)) = receiver.next().await {
        let WsMessage::Text(text) = inbound else {
            continue;
        };
        debug!(text = %text.as_str(), "recv");
        let message = match Message::from_json(text.as_str()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "ignoring unparseable protocol message");
                continue;
            }
        };
        let responses = state.runtime.lock().await.handle_message(&message);
        for response in responses {
            if tx.send(response).is_err() {
                break;
            }
        }
    }

    state.runtime.lock().await.clear_client();
    forward.abort();
    info!("protocol client disconnected");
}

/// `GET /process?graph=..&node=..`: blit the node and encode it as PNG.
///
/// Unknown graph/node, a failed render and a zero-area result all map to
/// 400, matching the preview contract: the URL is only useful while the
/// node has output.
async fn process_handler(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let Some(graph) = params.get("graph") else {
        return (StatusCode::BAD_REQUEST, "'graph' not specified").into_response();
    };
    let Some(node) = params.get("node") else {
        return (StatusCode::BAD_REQUEST, "'node' not specified").into_response();
    };

    let result = state
        .runtime
        .lock()
        .await
        .process_blit(graph, node, PixelFormat::Rgba8, None);

    let (rect, pixels) = match result {
        Ok(ok) => ok,
        Err(e) => {
            debug!(graph, node, error = %e, "process request failed");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    if rect.is_zero_area() {
        return (StatusCode::BAD_REQUEST, "node has no output").into_response();
    }

    match encode_png(rect.width, rect.height, &pixels) {
        Ok(png) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            png,
        )
            .into_response(),
        Err(e) => {
            warn!(graph, node, error = %e, "png encode failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "encode failed").into_response()
        }
    }
}

fn encode_png(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image::write_buffer_with_format(
        &mut out,
        rgba,
        width,
        height,
        image::ExtendedColorType::Rgba8,
        image::ImageFormat::Png,
    )?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_encode_produces_signature() {
        let pixels = vec![255u8; 2 * 2 * 4];
        let png = encode_png(2, 2, &pixels).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }
}
