//! The companion client half of the event-source contract: connects to an
//! SSE endpoint over HTTP/2, parses the wire format line-by-line, dispatches
//! complete events, and reconnects with `last-event-id` on disconnect.
//!
//! Mirrors [`crate::transport::H2Transport`]'s choice to drive `h2` directly
//! rather than through a higher-level HTTP client, since the server side of
//! this connection is this crate's own [`crate::event_source::EventSource`].

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use http::{Request, Uri};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;

/// A fully dispatched SSE event: the accumulated `data:` lines joined by
/// `\n`, the event type (`"message"` if none was set), and the last
/// `id:` seen (carried forward as `last-event-id` on reconnect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The dispatched event's type, defaulting to `"message"`.
    pub event: String,
    /// The joined `data:` lines.
    pub data: String,
    /// The `id:` that accompanied this event, if any.
    pub id: Option<String>,
}

/// Accumulates incoming bytes into dispatched [`SseEvent`]s, per the SSE
/// line-processing algorithm: `id:` sets the last-event-id (rejected if it
/// contains a NUL byte), `event:` sets the pending type, `data:` appends a
/// line to the pending buffer, `retry:` updates the reconnect delay, and an
/// empty line dispatches the accumulated event.
#[derive(Default)]
struct SseDecoder {
    carry: Vec<u8>,
    pending_event: Option<String>,
    pending_data: Vec<String>,
    pending_id: Option<String>,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.carry.extend_from_slice(chunk);
        let mut dispatched = Vec::new();

        loop {
            let Some(newline_at) = self.carry.iter().position(|&b| b == b'\n') else {
                break;
            };
            let mut line: Vec<u8> = self.carry.drain(..=newline_at).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    dispatched.push(event);
                }
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };

            match field {
                "id" if !value.contains('\0') => {
                    self.pending_id = Some(value.to_string());
                }
                "event" => self.pending_event = Some(value.to_string()),
                "data" => self.pending_data.push(value.to_string()),
                "retry" => {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.retry = Some(Duration::from_millis(ms));
                    }
                }
                _ => {}
            }
        }

        dispatched
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.pending_event.is_none() && self.pending_data.is_empty() && self.pending_id.is_none() {
            return None;
        }
        if let Some(id) = self.pending_id.take() {
            self.last_event_id = Some(id);
        }
        let event = SseEvent {
            event: self.pending_event.take().unwrap_or_else(|| "message".to_string()),
            data: self.pending_data.drain(..).collect::<Vec<_>>().join("\n"),
            id: self.last_event_id.clone(),
        };
        Some(event)
    }
}

/// A self-signed-friendly verifier: the dev server's certificate is
/// generated on the fly and never chains to a public root, so the client
/// accepts whatever leaf certificate the server presents. Only appropriate
/// for talking to a server this same toolchain provisioned.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// An SSE client bound to a single `https://` event-source endpoint.
pub struct EventSourceClient {
    uri: Uri,
    tls_config: Arc<ClientConfig>,
    min_retry: Duration,
}

impl EventSourceClient {
    /// Builds a client for `uri`, trusting whatever certificate the server
    /// presents (see [`AcceptAnyServerCert`]).
    pub fn new(uri: Uri) -> Self {
        let tls_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();
        Self {
            uri,
            tls_config: Arc::new(tls_config),
            min_retry: Duration::from_secs(1),
        }
    }

    /// Connects and streams dispatched events to `sink` until the channel's
    /// receiver is dropped. Reconnects on disconnect after the server's
    /// advertised (or last-known) retry delay, resuming with
    /// `last-event-id` set to the most recently seen id.
    pub async fn run(self, sink: mpsc::Sender<SseEvent>) {
        let mut last_event_id: Option<String> = None;
        let mut retry = self.min_retry;

        loop {
            match self.connect_once(last_event_id.as_deref(), &sink).await {
                Ok(outcome) => {
                    last_event_id = outcome.last_event_id.or(last_event_id);
                    retry = outcome.retry.unwrap_or(self.min_retry);
                }
                Err(err) => tracing::warn!(error = %err, "sse connection failed"),
            }
            if sink.is_closed() {
                return;
            }
            tokio::time::sleep(retry).await;
        }
    }

    async fn connect_once(&self, last_event_id: Option<&str>, sink: &mpsc::Sender<SseEvent>) -> anyhow::Result<ConnectOutcome> {
        let host = self.uri.host().ok_or_else(|| anyhow::anyhow!("event source uri has no host"))?;
        let port = self.uri.port_u16().unwrap_or(443);
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("could not resolve {host}:{port}"))?;

        let tcp = TcpStream::connect(addr).await?;
        let server_name = ServerName::try_from(host.to_string())?;
        let connector = TlsConnector::from(self.tls_config.clone());
        let tls = connector.connect(server_name, tcp).await?;

        let (mut client, connection) = h2::client::handshake(tls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(error = %err, "sse client connection task ended");
            }
        });

        let mut request = Request::get(&self.uri).body(()).expect("uri produces a valid request");
        request.headers_mut().insert("accept", "text/event-stream".parse().expect("static header value"));
        if let Some(id) = last_event_id {
            request
                .headers_mut()
                .insert("last-event-id", id.parse().map_err(|_| anyhow::anyhow!("last-event-id is not a valid header value"))?);
        }

        let (response, _send_stream) = client.send_request(request, true)?;
        let response = response.await?;
        let mut body = response.into_body();

        let mut decoder = SseDecoder::default();
        let mut last_seen_id = last_event_id.map(str::to_string);
        while let Some(chunk) = body.data().await {
            let chunk: Bytes = chunk?;
            let _ = body.flow_control().release_capacity(chunk.remaining());
            for event in decoder.feed(&chunk) {
                last_seen_id = event.id.clone().or(last_seen_id);
                if sink.send(event).await.is_err() {
                    return Ok(ConnectOutcome { last_event_id: last_seen_id, retry: decoder.retry });
                }
            }
        }

        Ok(ConnectOutcome { last_event_id: last_seen_id, retry: decoder.retry })
    }
}

/// What survived a single connect/stream/disconnect cycle: the most recent
/// event id (to resume from) and the most recently advertised retry delay.
struct ConnectOutcome {
    last_event_id: Option<String>,
    retry: Option<Duration>,
}
