//! C7: the development-mode live-reload channel. `/__bialet_reload` upgrades
//! to an SSE stream; every reload-trigger firing broadcasts an unnamed
//! message event to every open connection. Production mode never registers
//! this route (see `server.rs`).

use crate::server::AppState;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};

/// The 1-liner injected into HTML responses in development mode so the
/// client reloads itself on receipt of a reload-trigger message.
pub const RELOAD_SCRIPT_TAG: &str = "<script>new EventSource('/__bialet_reload').onmessage=()=>location.reload()</script>";

pub async fn reload_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.reload.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(receiver)
        .filter_map(|result| result.ok())
        .map(|_| Ok(Event::default().data("reload")));

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}
