//! HTTP/2-over-TLS listener, session/stream lifecycle tracking, linear-scan
//! middleware routing, and the SSE event-source middleware factory.

mod config;
mod errors;
mod event_source;
mod router;
mod server;
mod session;
mod sse_client;
mod tls;
mod transport;

pub use config::{ConfigError, ServerConfig};
pub use errors::{SessionError, SessionErrorStage};
pub use event_source::{EventData, EventSource, EventSourceClock, EventSourceConfig, Reconnect, TokioClock};
pub use router::Router;
pub use server::{Server, ShutdownHook};
pub use session::{next_session_id, run_session, SessionId};
pub use sse_client::{EventSourceClient, SseEvent};
pub use tls::{load_or_provision, CertificatePair, CertificateProvisioner, TlsError, RENEWAL_EPSILON};
pub use transport::H2Transport;
