//! Wires the `/events` SSE endpoint: an [`EventSource`] whose `accept`
//! handler is registered with the router, and whose emitting half ticks a
//! heartbeat comment on its own schedule as a liveness demo.

use std::sync::Arc;
use std::time::Duration;

use siteforge_server::{EventSource, EventSourceConfig, Reconnect, Router, ServerConfig, TokioClock};

/// Registers the `/events` route on `router` and returns the [`EventSource`]
/// handle so callers can wire its `close` into [`siteforge_server::Server::on_shutdown`].
pub fn register(router: &mut Router, config: &ServerConfig) -> Arc<EventSource> {
    let reconnect = match config.sse_reconnect_delay {
        Some(delay) => Reconnect::Advertise(delay.as_millis() as u64),
        None => Reconnect::Suppress,
    };

    let (source, handler) = EventSource::new(
        EventSourceConfig {
            heartbeat: config.sse_heartbeat_interval.or(Some(Duration::from_secs(15))),
            reconnect,
        },
        &TokioClock,
    );

    router.route("/events", handler);
    source
}
