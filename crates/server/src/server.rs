//! The top-level [`Server`]: binds a TLS listener, accepts HTTP/2 sessions,
//! and coordinates shutdown across them.
//!
//! Session concurrency and shutdown bookkeeping are delegated to a
//! [`siteforge_executor::Executor`] rather than a bespoke active-session
//! set: each accepted connection becomes one executor task, `close()` is
//! `Executor::stop()`, a session's own shutdown notice is
//! `Executor::on_stop_requested()`, and "every session has closed" is
//! `Executor::on_stopped()`.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use siteforge_executor::{Executor, SignalWait};
use siteforge_exchange::BoxFuture;

use crate::config::ServerConfig;
use crate::router::Router;
use crate::session::{next_session_id, run_session};
use crate::tls::CertificatePair;

/// A capability a registered middleware exposes that must run during
/// shutdown — notably [`crate::event_source::EventSource::close`].
pub type ShutdownHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// The HTTP/2-over-TLS listener and session scheduler.
pub struct Server {
    config: ServerConfig,
    router: Arc<Router>,
    executor: Executor,
    shutdown_hooks: StdMutex<Vec<ShutdownHook>>,
    origin: Arc<str>,
}

impl Server {
    /// Builds a server from `config` and `router`. Call [`Server::listen`]
    /// to start accepting connections.
    pub fn new(config: ServerConfig, router: Router) -> Arc<Self> {
        let origin: Arc<str> = format!("https://{}:{}", config.bind_ip, config.port).into();
        let capacity = config.capacity.max(1);
        Arc::new(Self {
            config,
            router: Arc::new(router),
            executor: Executor::new(capacity),
            shutdown_hooks: StdMutex::new(Vec::new()),
            origin,
        })
    }

    /// Registers a shutdown hook invoked once, in registration order, when
    /// [`Server::close`] runs.
    pub fn on_shutdown(&self, hook: ShutdownHook) {
        self.shutdown_hooks.lock().expect("server mutex poisoned").push(hook);
    }

    /// Opens the TLS listener on the configured address and accepts
    /// sessions until [`Server::close`] is called. Each accepted
    /// connection runs as one executor task; once capacity is reached,
    /// further connections wait for a slot the same way queued executor
    /// work does.
    pub async fn listen(self: &Arc<Self>) -> Result<(), anyhow::Error> {
        let certificate = CertificatePair::load(&self.config.tls_cert_path, &self.config.tls_key_path)?;
        let tls_config = certificate.into_rustls_config()?;
        let acceptor = TlsAcceptor::from(tls_config);

        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        tracing::info!(addr = %self.config.bind_addr(), "listening");

        loop {
            let stop_requested = self.executor.on_stop_requested();
            tokio::select! {
                biased;
                () = stop_requested.wait() => {
                    tracing::info!("server closing, no longer accepting new sessions");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed accepting TCP connection");
                            continue;
                        }
                    };
                    self.spawn_session(acceptor.clone(), stream, peer);
                }
            }
        }

        Ok(())
    }

    fn spawn_session(self: &Arc<Self>, acceptor: TlsAcceptor, stream: tokio::net::TcpStream, peer: std::net::SocketAddr) {
        let router = self.router.clone();
        let origin = self.origin.clone();
        let production = self.config.production;
        let stop_requested = self.executor.on_stop_requested();

        let submitted = self.executor.submit(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "TLS handshake failed");
                    return;
                }
            };
            let id = next_session_id();
            run_session(id, tls_stream, peer, origin, router, production, stop_requested).await;
        });

        if submitted.is_err() {
            tracing::info!(peer = %peer, "server is shutting down, dropping newly accepted connection");
        }
    }

    /// Stops accepting new sessions, runs every registered shutdown hook,
    /// and notifies in-flight sessions to close gracefully. The returned
    /// waiter resolves once every session has finished.
    pub async fn close(&self) -> SignalWait {
        self.executor.stop();

        let hooks = self.shutdown_hooks.lock().expect("server mutex poisoned").clone();
        for hook in hooks {
            hook().await;
        }

        self.executor.on_stopped()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("origin", &self.origin)
            .field("executor", &self.executor)
            .finish()
    }
}
