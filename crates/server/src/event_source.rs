//! The SSE "event source" middleware factory: accepts long-lived streams,
//! maintains a roster of subscribers, and exposes `emit`/`ping`/`close`
//! capabilities to application code holding the returned [`EventSource`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use siteforge_exchange::{ErrorKind, Exchange, ExchangeError, ExchangeTransport, Handler, Response, StreamCloseReason};
use siteforge_media_type::{match_for_quality, parse_accept, MediaType};

/// Starts (and later stops) a periodic callback. Injected so tests can
/// drive heartbeats deterministically instead of waiting on a real clock.
pub trait EventSourceClock: Send + Sync {
    /// Begins calling `on_tick` every `interval`, returning a closure that
    /// stops further scheduling when invoked.
    fn start(&self, interval: Duration, on_tick: Arc<dyn Fn() + Send + Sync>) -> Box<dyn FnOnce() + Send>;
}

/// An [`EventSourceClock`] backed by a real `tokio::time::interval`.
#[derive(Debug, Default)]
pub struct TokioClock;

impl EventSourceClock for TokioClock {
    fn start(&self, interval: Duration, on_tick: Arc<dyn Fn() + Send + Sync>) -> Box<dyn FnOnce() + Send> {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                on_tick();
            }
        });
        Box::new(move || stopped.store(true, Ordering::SeqCst))
    }
}

/// The reconnect directive sent at the start of each stream. `Advertise`
/// emits `retry: <ms>`; `Suppress` (a negative delay) emits the `:start`
/// comment instead.
#[derive(Debug, Clone, Copy)]
pub enum Reconnect {
    /// Sent as `retry: <ms>\n\n`.
    Advertise(u64),
    /// No retry directive; an informational `:start\n\n` comment instead.
    Suppress,
}

/// Configuration for an [`EventSource`].
#[derive(Debug, Clone)]
pub struct EventSourceConfig {
    /// Heartbeat interval; `None` disables heartbeats entirely.
    pub heartbeat: Option<Duration>,
    /// The reconnect directive advertised to new subscribers.
    pub reconnect: Reconnect,
}

/// The payload of an emitted event: no data, a single scalar line, or
/// multiple lines (each becomes its own `data:` line).
#[derive(Debug, Clone)]
pub enum EventData {
    /// No `data:` line at all.
    None,
    /// A single `data:` line.
    Scalar(String),
    /// One `data:` line per element.
    Lines(Vec<String>),
}

impl EventData {
    fn is_present(&self) -> bool {
        match self {
            EventData::None => false,
            EventData::Scalar(_) => true,
            EventData::Lines(lines) => !lines.is_empty(),
        }
    }

    fn lines(&self) -> Vec<&str> {
        match self {
            EventData::None => Vec::new(),
            EventData::Scalar(line) => vec![line.as_str()],
            EventData::Lines(lines) => lines.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Clone)]
struct Subscriber {
    exchange: Arc<Exchange>,
    transport: Arc<dyn ExchangeTransport>,
    disconnected: Arc<AtomicBool>,
}

/// A live SSE endpoint: holds the subscriber roster and exposes the
/// `emit`/`ping`/`close` capabilities described in the event-source
/// contract. The paired [`Handler`] returned by [`EventSource::new`]
/// performs the accept handshake and registers new subscribers here.
pub struct EventSource {
    subscribers: Mutex<Vec<Subscriber>>,
    armed: AtomicBool,
    reconnect: Reconnect,
    stop_timer: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl EventSource {
    /// Builds an event source and its accept-handshake middleware.
    /// `clock` drives the heartbeat timer; pass [`TokioClock`] in
    /// production.
    pub fn new(config: EventSourceConfig, clock: &dyn EventSourceClock) -> (Arc<Self>, Handler) {
        let source = Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            armed: AtomicBool::new(true),
            reconnect: config.reconnect,
            stop_timer: Mutex::new(None),
        });

        if let Some(interval) = config.heartbeat.filter(|interval| !interval.is_zero()) {
            let heartbeat_source = source.clone();
            let stop = clock.start(interval, Arc::new(move || heartbeat_source.heartbeat()));
            *source.stop_timer.lock().expect("event source mutex poisoned") = Some(stop);
        }

        let handler_source = source.clone();
        let handler: Handler = Arc::new(move |exchange, _next| {
            let source = handler_source.clone();
            Box::pin(async move { source.accept(exchange).await })
        });

        (source, handler)
    }

    async fn accept(self: &Arc<Self>, exchange: Arc<Exchange>) -> Result<(), ExchangeError> {
        let method = exchange.request().method();
        if !method.eq_ignore_ascii_case("GET") && !method.eq_ignore_ascii_case("HEAD") {
            exchange.fail(Some(ErrorKind::MethodNotAllowed.status()), None).await;
            return Ok(());
        }

        if let Some(accept) = exchange.request().headers().get("accept") {
            let target = MediaType::parse_one("text/event-stream").expect("literal media type always parses");
            let ranges = parse_accept(accept);
            if match_for_quality(&target, &ranges) <= 0.0 {
                exchange.fail(Some(ErrorKind::NotAcceptable.status()), None).await;
                return Ok(());
            }
        }

        let mut response = Response::new();
        response.headers_mut().insert("content-type", "text/event-stream");
        response.headers_mut().insert("cache-control", "no-store, no-transform");

        let Some(transport) = exchange.begin_streaming(response).await else {
            return Ok(());
        };

        let preamble = match self.reconnect {
            Reconnect::Advertise(ms) => format!("retry: {ms}\n\n"),
            Reconnect::Suppress => ":start\n\n".to_string(),
        };
        if let Err(err) = transport.write_raw(Bytes::from(preamble)).await {
            tracing::warn!(error = %err, "failed writing SSE preamble");
            exchange.mark_done();
            return Ok(());
        }

        self.subscribers.lock().expect("event source mutex poisoned").push(Subscriber {
            exchange,
            transport,
            disconnected: Arc::new(AtomicBool::new(false)),
        });

        Ok(())
    }

    /// Formats and writes an event to every live subscriber. A no-op if
    /// `id`, `event`, and `data` are all absent.
    pub async fn emit(&self, id: Option<&str>, event: Option<&str>, data: EventData) {
        if id.is_none() && event.is_none() && !data.is_present() {
            return;
        }
        let frame = render_frame(id, event, &data);
        self.broadcast(&frame).await;
    }

    /// Writes a heartbeat comment to every live subscriber.
    pub async fn ping(&self) {
        self.heartbeat();
        // `heartbeat()` spawns its own write; nothing further to await here.
    }

    fn heartbeat(&self) {
        if !self.armed.load(Ordering::SeqCst) {
            return;
        }
        let subscribers = self.subscribers.lock().expect("event source mutex poisoned").clone();
        tokio::spawn(async move {
            let frame = Bytes::from_static(b":lub-dub\n\n");
            for subscriber in subscribers {
                if subscriber.transport.write_raw(frame.clone()).await.is_err() {
                    subscriber.disconnected.store(true, Ordering::SeqCst);
                }
            }
        });
    }

    async fn broadcast(&self, frame: &str) {
        let live = {
            let mut subscribers = self.subscribers.lock().expect("event source mutex poisoned");
            subscribers.retain(|subscriber| !subscriber.disconnected.load(Ordering::SeqCst));
            subscribers.clone()
        };
        let bytes = Bytes::copy_from_slice(frame.as_bytes());
        for subscriber in &live {
            if subscriber.transport.write_raw(bytes.clone()).await.is_err() {
                subscriber.disconnected.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Disarms the heartbeat timer, emits a final `close` event, then
    /// requests every subscriber's stream be closed and empties the
    /// roster. Idempotent: a second call finds an empty roster and a
    /// timer already stopped.
    pub async fn close(&self) {
        self.armed.store(false, Ordering::SeqCst);
        if let Some(stop) = self.stop_timer.lock().expect("event source mutex poisoned").take() {
            stop();
        }

        let frame = render_frame(None, Some("close"), &EventData::Scalar("now!".to_string()));
        self.broadcast(&frame).await;

        let subscribers = std::mem::take(&mut *self.subscribers.lock().expect("event source mutex poisoned"));
        for subscriber in subscribers {
            if let Err(err) = subscriber.transport.close_stream(StreamCloseReason::EventSourceClosed).await {
                tracing::warn!(error = %err, "failed closing SSE subscriber stream");
            }
            subscriber.exchange.mark_done();
        }
    }
}

fn render_frame(id: Option<&str>, event: Option<&str>, data: &EventData) -> String {
    let mut out = String::new();
    if let Some(id) = id {
        out.push_str("id: ");
        out.push_str(id);
        out.push('\n');
    }
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in data.lines() {
        if line.is_empty() {
            out.push_str("data:\n");
        } else {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_exchange::{BoxFuture, Headers, Request};
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        writes: StdMutex<Vec<Bytes>>,
        closed: AtomicBool,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: StdMutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            })
        }
    }

    impl ExchangeTransport for RecordingTransport {
        fn deliver(&self, _response: Response) -> BoxFuture<'static, Result<(), ExchangeError>> {
            Box::pin(async { Ok(()) })
        }
        fn begin_streaming(&self, _response: Response) -> BoxFuture<'static, Result<(), ExchangeError>> {
            Box::pin(async { Ok(()) })
        }
        fn write_raw(&self, bytes: Bytes) -> BoxFuture<'static, Result<(), ExchangeError>> {
            self.writes.lock().unwrap().push(bytes);
            Box::pin(async { Ok(()) })
        }
        fn close_stream(&self, _reason: StreamCloseReason) -> BoxFuture<'static, Result<(), ExchangeError>> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    struct ManualClock {
        tick: StdMutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self { tick: StdMutex::new(None) })
        }

        fn fire(&self) {
            if let Some(tick) = self.tick.lock().unwrap().as_ref() {
                tick();
            }
        }
    }

    impl EventSourceClock for ManualClock {
        fn start(&self, _interval: Duration, on_tick: Arc<dyn Fn() + Send + Sync>) -> Box<dyn FnOnce() + Send> {
            *self.tick.lock().unwrap() = Some(on_tick);
            Box::new(|| {})
        }
    }

    fn request_with_accept(accept: Option<&str>) -> Request {
        let mut headers = Headers::new();
        headers.insert(":method", "GET");
        headers.insert(":path", "/events");
        if let Some(accept) = accept {
            headers.insert("accept", accept);
        }
        Request::new(headers, None)
    }

    #[tokio::test]
    async fn accept_rejects_non_get_head() {
        let clock = ManualClock::new();
        let (_source, handler) = EventSource::new(
            EventSourceConfig { heartbeat: None, reconnect: Reconnect::Suppress },
            clock.as_ref(),
        );
        let transport = RecordingTransport::new();
        let mut headers = Headers::new();
        headers.insert(":method", "POST");
        headers.insert(":path", "/events");
        let exchange = Exchange::new("https://example.test", Request::new(headers, None), transport.clone(), true);

        exchange.clone().handle_with(vec![handler]).await;

        assert_eq!(exchange.stage(), siteforge_exchange::Stage::Done);
    }

    #[tokio::test]
    async fn accept_rejects_unacceptable_media_type() {
        let clock = ManualClock::new();
        let (_source, handler) = EventSource::new(
            EventSourceConfig { heartbeat: None, reconnect: Reconnect::Suppress },
            clock.as_ref(),
        );
        let transport = RecordingTransport::new();
        let exchange = Exchange::new(
            "https://example.test",
            request_with_accept(Some("application/json")),
            transport.clone(),
            true,
        );

        exchange.clone().handle_with(vec![handler]).await;

        assert_eq!(exchange.stage(), siteforge_exchange::Stage::Done);
    }

    #[tokio::test]
    async fn emit_with_nothing_set_is_a_no_op() {
        let clock = ManualClock::new();
        let (source, handler) = EventSource::new(
            EventSourceConfig { heartbeat: None, reconnect: Reconnect::Suppress },
            clock.as_ref(),
        );
        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_accept(None), transport.clone(), true);
        exchange.handle_with(vec![handler]).await;

        let before = transport.writes.lock().unwrap().len();
        source.emit(None, None, EventData::None).await;
        assert_eq!(transport.writes.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn heartbeat_writes_lub_dub() {
        let clock = ManualClock::new();
        let (source, handler) = EventSource::new(
            EventSourceConfig { heartbeat: Some(Duration::from_secs(1)), reconnect: Reconnect::Suppress },
            clock.as_ref(),
        );
        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_accept(None), transport.clone(), true);
        exchange.handle_with(vec![handler]).await;

        clock.fire();
        tokio::task::yield_now().await;

        let writes = transport.writes.lock().unwrap();
        assert!(writes.iter().any(|chunk| chunk.as_ref() == b":lub-dub\n\n"));
        let _ = source;
    }

    #[tokio::test]
    async fn close_emits_final_event_and_closes_subscribers() {
        let clock = ManualClock::new();
        let (source, handler) = EventSource::new(
            EventSourceConfig { heartbeat: Some(Duration::from_secs(1)), reconnect: Reconnect::Suppress },
            clock.as_ref(),
        );
        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_accept(None), transport.clone(), true);
        exchange.handle_with(vec![handler]).await;

        source.close().await;

        assert!(transport.closed.load(Ordering::SeqCst));
        let writes = transport.writes.lock().unwrap();
        let last = String::from_utf8(writes.last().unwrap().to_vec()).unwrap();
        assert_eq!(last, "event: close\ndata: now!\n\n");

        // Disarmed: a heartbeat fired after close must not write anything further.
        drop(writes);
        let before = transport.writes.lock().unwrap().len();
        source.close().await;
        assert_eq!(transport.writes.lock().unwrap().len(), before);
    }
}
