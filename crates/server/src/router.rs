//! Linear-scan middleware dispatch: each registered route pattern is tried
//! in registration order, and every handler whose pattern matches the
//! exchange's normalized path joins the chain `handle_with` drives.

use std::sync::Arc;

use siteforge_exchange::{Exchange, Handler, MatchKind, RoutePattern};

/// A registered `(pattern, handler)` table, dispatched per exchange.
#[derive(Default)]
pub struct Router {
    routes: Vec<(RoutePattern, Handler)>,
}

impl Router {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `pattern` (see [`RoutePattern::parse`] for
    /// the pattern grammar). Routes are tried in registration order.
    pub fn route(&mut self, pattern: &str, handler: Handler) -> &mut Self {
        self.routes.push((RoutePattern::parse(pattern), handler));
        self
    }

    /// Builds the handler chain for `exchange` — every registered handler
    /// whose pattern matches its normalized path, in registration order —
    /// and drives it via [`Exchange::handle_with`]. If the request path
    /// failed to sanitize, only wildcard (`*`) handlers run, since there is
    /// no normalized path to match a narrower pattern against.
    pub async fn dispatch(&self, exchange: Arc<Exchange>) {
        let path = exchange.parsed_path().ok().map(|parsed| parsed.path().to_string());

        let handlers: Vec<Handler> = self
            .routes
            .iter()
            .filter(|(pattern, _)| match &path {
                Some(path) => pattern.matches(path),
                None => pattern.kind() == MatchKind::All,
            })
            .map(|(_, handler)| handler.clone())
            .collect();

        exchange.handle_with(handlers).await;
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("routes", &self.routes.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_exchange::{ExchangeTransport, Headers, Request};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NullTransport;

    impl ExchangeTransport for NullTransport {
        fn deliver(&self, _response: siteforge_exchange::Response) -> siteforge_exchange::BoxFuture<'static, Result<(), siteforge_exchange::ExchangeError>> {
            Box::pin(async { Ok(()) })
        }
        fn begin_streaming(&self, _response: siteforge_exchange::Response) -> siteforge_exchange::BoxFuture<'static, Result<(), siteforge_exchange::ExchangeError>> {
            Box::pin(async { Ok(()) })
        }
        fn write_raw(&self, _bytes: bytes::Bytes) -> siteforge_exchange::BoxFuture<'static, Result<(), siteforge_exchange::ExchangeError>> {
            Box::pin(async { Ok(()) })
        }
        fn close_stream(&self, _reason: siteforge_exchange::StreamCloseReason) -> siteforge_exchange::BoxFuture<'static, Result<(), siteforge_exchange::ExchangeError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn exchange_for(path: &str) -> Arc<Exchange> {
        let mut headers = Headers::new();
        headers.insert(":method", "GET");
        headers.insert(":path", path);
        Exchange::new("https://example.test", Request::new(headers, None), Arc::new(NullTransport), true)
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |exchange, next| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                next.call(exchange).await
            })
        })
    }

    #[tokio::test]
    async fn only_matching_route_runs() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router.route("/static/*", {
            let calls = calls.clone();
            Arc::new(move |exchange, next| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.lock().unwrap().push("static");
                    next.call(exchange).await
                })
            })
        });
        router.route("/api", {
            let calls = calls.clone();
            Arc::new(move |exchange, next| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.lock().unwrap().push("api");
                    next.call(exchange).await
                })
            })
        });

        router.dispatch(exchange_for("/static/app.js")).await;

        assert_eq!(*calls.lock().unwrap(), vec!["static"]);
    }

    #[tokio::test]
    async fn wildcard_handler_runs_even_on_unparseable_path() {
        let global_calls = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router.route("*", counting_handler(global_calls.clone()));
        router.route("/answer", counting_handler(Arc::new(AtomicUsize::new(0))));

        router.dispatch(exchange_for("/a%2fb")).await;

        assert_eq!(global_calls.load(Ordering::SeqCst), 1);
    }
}
