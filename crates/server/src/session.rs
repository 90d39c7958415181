//! Per-connection session lifecycle: driving one HTTP/2 connection to
//! completion, dispatching each of its streams through the router, and
//! tearing the whole session down on a connection-level error.
//!
//! A session-level error (anything [`h2::server::Connection::accept`]
//! surfaces as `Err`) destroys the session: the loop exits and every
//! in-flight stream on that connection is abandoned. Per-stream errors
//! never reach this far — they are turned into a failure response by the
//! exchange before `handle_stream` returns.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use siteforge_executor::SignalWait;
use siteforge_exchange::Exchange;

use crate::errors::{SessionError, SessionErrorStage};
use crate::router::Router;
use crate::transport::{buffer_request_body, exchange_request_from_parts, H2Transport};

/// A monotonically increasing identifier assigned to each accepted
/// connection, carried through its log lines.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next session identifier.
pub fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Drives one HTTP/2 connection: accepts streams and spawns a task per
/// stream to dispatch it through `router`. Once `shutdown` is fulfilled, the
/// connection stops accepting new streams and finishes the ones already in
/// flight before returning.
pub async fn run_session<IO>(
    id: SessionId,
    io: IO,
    peer: SocketAddr,
    origin: Arc<str>,
    router: Arc<Router>,
    production: bool,
    shutdown: SignalWait,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut connection = match h2::server::handshake(io).await {
        Ok(connection) => connection,
        Err(err) => {
            let err = SessionError::new(SessionErrorStage::Handshake, err);
            tracing::warn!(session = id, peer = %peer, error = %err, "session-level error");
            return;
        }
    };

    tracing::debug!(session = id, peer = %peer, "session established");

    let mut draining = false;
    loop {
        let next = if draining {
            connection.accept().await
        } else {
            tokio::select! {
                biased;
                () = shutdown.wait() => {
                    draining = true;
                    connection.graceful_shutdown();
                    continue;
                }
                next = connection.accept() => next,
            }
        };

        match next {
            Some(Ok((request, respond))) => {
                let router = router.clone();
                let origin = origin.clone();
                tokio::spawn(async move {
                    handle_stream(id, request, respond, origin, router, production).await;
                });
            }
            Some(Err(err)) => {
                let err = SessionError::new(SessionErrorStage::Connection, err);
                tracing::warn!(session = id, peer = %peer, error = %err, "session-level error");
                break;
            }
            None => break,
        }
    }

    tracing::debug!(session = id, peer = %peer, "session closed");
}

async fn handle_stream(
    session: SessionId,
    request: http::Request<h2::RecvStream>,
    respond: h2::server::SendResponse<Bytes>,
    origin: Arc<str>,
    router: Arc<Router>,
    production: bool,
) {
    let (parts, body) = request.into_parts();
    let body = match buffer_request_body(body).await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(session, error = %err, "failed reading request body");
            return;
        }
    };

    let exchange_request = exchange_request_from_parts(&parts, body);
    let transport = H2Transport::new(respond);
    let exchange = Exchange::new(origin.as_ref(), exchange_request, transport, production);

    router.dispatch(exchange).await;
}
