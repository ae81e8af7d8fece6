//! WS/WSS acceptor (spec §4.1).

use crate::error::{WsError, WsResult};
use crate::stream;
use crate::tls::build_tls_acceptor;
use async_trait::async_trait;
use relaycore_auth::{extract_bearer_token, tokens_match};
use relaycore_model::TlsParams;
use relaycore_transport::{Acceptor, BoxedDuplex, TransportError, TransportResult};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CONSECUTIVE_ERROR_WINDOW: Duration = Duration::from_secs(5);

enum TlsMode {
    Plain,
    Tls(tokio_rustls::TlsAcceptor),
}

/// Accepts upgraded WebSocket connections on a single path, gated on a
/// bearer token matching the owning tunnel's shared secret.
pub struct WsAcceptor {
    listener: TcpListener,
    tls: TlsMode,
    expected_token: String,
    cancel: CancellationToken,
}

impl WsAcceptor {
    pub async fn bind_ws(addr: SocketAddr, expected_token: String) -> WsResult<Self> {
        Self::bind(addr, expected_token, TlsMode::Plain).await
    }

    pub async fn bind_wss(addr: SocketAddr, expected_token: String, tls_params: &TlsParams) -> WsResult<Self> {
        let acceptor = build_tls_acceptor(tls_params)?;
        Self::bind(addr, expected_token, TlsMode::Tls(acceptor)).await
    }

    async fn bind(addr: SocketAddr, expected_token: String, tls: TlsMode) -> WsResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| WsError::BindError {
            address: addr.ip().to_string(),
            port: addr.port(),
            reason: e.to_string(),
        })?;
        info!(%addr, tls = matches!(tls, TlsMode::Tls(_)), "WS acceptor bound");
        Ok(Self { listener, tls, expected_token, cancel: CancellationToken::new() })
    }

    fn auth_callback(expected_token: String) -> impl Fn(&Request, Response) -> Result<Response, Response> {
        move |req: &Request, response: Response| {
            let header = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(extract_bearer_token);
            match header {
                Some(token) if tokens_match(&expected_token, token) => Ok(response),
                _ => {
                    let rejection = Response::builder().status(StatusCode::UNAUTHORIZED).body(None).unwrap();
                    Err(rejection)
                }
            }
        }
    }
}

#[async_trait]
impl Acceptor for WsAcceptor {
    async fn accept(&self) -> TransportResult<(BoxedDuplex, SocketAddr)> {
        let mut first_error_at: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                result = self.listener.accept() => {
                    let (tcp_stream, peer) = match result {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "WS TCP accept failed");
                            let now = Instant::now();
                            let started = *first_error_at.get_or_insert(now);
                            if now.duration_since(started) > CONSECUTIVE_ERROR_WINDOW {
                                return Err(TransportError::Io(e));
                            }
                            continue;
                        }
                    };
                    first_error_at = None;

                    let callback = Self::auth_callback(self.expected_token.clone());
                    let duplex = match &self.tls {
                        TlsMode::Plain => match tokio_tungstenite::accept_hdr_async(tcp_stream, callback).await {
                            Ok(ws) => stream::spawn_duplex(ws),
                            Err(e) => {
                                warn!(error = %e, %peer, "WS handshake failed");
                                continue;
                            }
                        },
                        TlsMode::Tls(acceptor) => {
                            let tls_stream = match acceptor.accept(tcp_stream).await {
                                Ok(s) => s,
                                Err(e) => {
                                    warn!(error = %e, %peer, "TLS handshake failed");
                                    continue;
                                }
                            };
                            match tokio_tungstenite::accept_hdr_async(tls_stream, callback).await {
                                Ok(ws) => stream::spawn_duplex(ws),
                                Err(e) => {
                                    warn!(error = %e, %peer, "WSS handshake failed");
                                    continue;
                                }
                            }
                        }
                    };

                    return Ok((Box::new(duplex), peer));
                }
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }
}
