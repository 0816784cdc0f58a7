/// WebSocket server core — accepts game clients, tracks userscript
/// presence, bridges frames to the dispatcher and the outbound broadcast.
///
/// One task accepts on `/ws`; each connection gets its own reader task that
/// also drains the outbound broadcast channel, so a slow client can only
/// lag itself (Lagged receivers skip ahead). Presence is the count of
/// handshaken `userscript` clients: the 0→1 edge posts WS_CONNECTED and
/// the 1→0 edge posts WS_DISCONNECTED — the latter fires on abrupt socket
/// death just as it does on a clean CLOSE, because the reader task's exit
/// path is the same either way.
///
/// With the `tls` feature the stream is wrapped by a rustls acceptor fed
/// from a generated self-signed certificate; without it, plain TCP for
/// local testing.
use crate::dispatcher::DispatcherHandle;
use crate::events::{EventKind, EventSource};
use crate::ws::protocol::{self, ClientType, WsMessage};
use crate::SystemFlags;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const DEFAULT_WS_PORT: u16 = 3000;
/// Oversize inbound frames are discarded with a WARN.
pub const MAX_FRAME_BYTES: usize = 2048;
pub const WS_PATH: &str = "/ws";

#[derive(Debug, Clone)]
pub struct WsServerConfig {
    pub port: u16,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_WS_PORT }
    }
}

pub async fn run(
    cfg: WsServerConfig,
    dispatcher: DispatcherHandle,
    outbound: broadcast::Sender<String>,
    flags: Arc<SystemFlags>,
) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", cfg.port))
        .await
        .with_context(|| format!("binding WS listener on port {}", cfg.port))?;

    #[cfg(feature = "tls")]
    let acceptor = tls::build_acceptor()?;

    flags.set_server_listening(true);
    flags.set_network_up(true);
    dispatcher.post_simple(EventKind::NetworkConnected, EventSource::System);
    tracing::info!(
        "WS server listening on :{}{} (tls: {})",
        cfg.port,
        WS_PATH,
        cfg!(feature = "tls")
    );

    let client_seq = Arc::new(AtomicU64::new(1));
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                dispatcher.post_simple(EventKind::WsError, EventSource::System);
                continue;
            }
        };
        let id = client_seq.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Client {} connecting from {}", id, peer);

        let dispatcher = dispatcher.clone();
        let outbound_rx = outbound.subscribe();
        let flags = flags.clone();

        #[cfg(feature = "tls")]
        {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        serve_client(id, tls_stream, dispatcher, outbound_rx, flags).await
                    }
                    Err(e) => tracing::warn!("Client {} TLS accept failed: {}", id, e),
                }
            });
        }
        #[cfg(not(feature = "tls"))]
        {
            tokio::spawn(serve_client(id, stream, dispatcher, outbound_rx, flags));
        }
    }
}

/// Per-connection task: WS upgrade, handshake tracking, frame pumping.
/// Generic over the stream so the TLS and plain paths share everything.
async fn serve_client<S>(
    id: u64,
    stream: S,
    dispatcher: DispatcherHandle,
    mut outbound: broadcast::Receiver<String>,
    flags: Arc<SystemFlags>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let path_check = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() == WS_PATH {
            Ok(resp)
        } else {
            tracing::warn!("Rejecting upgrade on path {:?}", req.uri().path());
            Err(ErrorResponse::new(Some("not found".into())))
        }
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, path_check).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("Client {} upgrade failed: {}", id, e);
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let mut client_type = ClientType::Unknown;
    let mut handshake_complete = false;

    loop {
        tokio::select! {
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_FRAME_BYTES {
                            tracing::warn!(
                                "Client {} frame of {} B exceeds {} B cap — discarding",
                                id, text.len(), MAX_FRAME_BYTES
                            );
                            continue;
                        }
                        handle_text(
                            id,
                            &text,
                            &mut client_type,
                            &mut handshake_complete,
                            &dispatcher,
                            &flags,
                        );
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary — nothing to do
                    Some(Err(e)) => {
                        tracing::info!("Client {} read error: {}", id, e);
                        break;
                    }
                }
            }
            text = outbound.recv() => {
                match text {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::info!("Client {} write error: {} — closing", id, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Client {} lagged {} frames — skipping ahead", id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Presence bookkeeping fires on EVERY exit path, clean or abrupt.
    if client_type == ClientType::Userscript {
        presence_dec(&flags, &dispatcher);
    }
    tracing::info!("Client {} disconnected ({:?})", id, client_type);
}

fn handle_text(
    id: u64,
    text: &str,
    client_type: &mut ClientType,
    handshake_complete: &mut bool,
    dispatcher: &DispatcherHandle,
    flags: &Arc<SystemFlags>,
) {
    match protocol::parse(text) {
        WsMessage::Handshake { client_type: ct } => {
            // Re-handshakes as a different type would corrupt the count;
            // only the first one binds the connection.
            if *handshake_complete {
                tracing::warn!("Client {} re-handshake ignored", id);
                return;
            }
            *client_type = ct;
            *handshake_complete = true;
            tracing::info!("Client {} handshake: {:?}", id, ct);
            if ct == ClientType::Userscript {
                presence_inc(flags, dispatcher);
            }
        }
        WsMessage::Event(event) => {
            // INFO heartbeats are filtered inside post().
            dispatcher.post_from_game_event(event, EventSource::WebSocket);
        }
        WsMessage::Command { action, .. } => {
            tracing::debug!("Client {} command {:?} — inbound commands unused", id, action);
        }
    }
}

fn presence_inc(flags: &Arc<SystemFlags>, dispatcher: &DispatcherHandle) {
    let prev = flags.add_userscript();
    if prev == 0 {
        tracing::info!("Userscript presence 0 → 1");
        dispatcher.post_simple(EventKind::WsConnected, EventSource::System);
    }
}

fn presence_dec(flags: &Arc<SystemFlags>, dispatcher: &DispatcherHandle) {
    let prev = flags.remove_userscript();
    if prev == 1 {
        tracing::info!("Userscript presence 1 → 0");
        dispatcher.post_simple(EventKind::WsDisconnected, EventSource::System);
    }
}

// ---------------------------------------------------------------------------
// TLS (compile-time switch; production terminates TLS, local tests don't)
// ---------------------------------------------------------------------------

#[cfg(feature = "tls")]
mod tls {
    use anyhow::{anyhow, Result};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use tokio_rustls::TlsAcceptor;

    /// Self-signed identity, generated fresh at boot. Clients are expected
    /// to pin-accept it (the userscript does).
    pub fn build_acceptor() -> Result<TlsAcceptor> {
        // rustls 0.23 wants a process-level crypto provider before any
        // ServerConfig is built; install errors just mean one is already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let key_pair = rcgen::KeyPair::generate()?;
        let params = rcgen::CertificateParams::new(vec![
            "ots-console.local".to_owned(),
            "localhost".to_owned(),
        ])?;
        let cert = params.self_signed(&key_pair)?;

        let cert_der = CertificateDer::from(cert.der().to_vec());
        let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
            .map_err(|e| anyhow!("private key encoding: {}", e))?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)?;
        Ok(TlsAcceptor::from(std::sync::Arc::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher;

    fn presence_fixture() -> (
        Arc<SystemFlags>,
        DispatcherHandle,
        tokio::sync::mpsc::Receiver<crate::events::InternalEvent>,
    ) {
        let (handle, rx) = dispatcher::channel();
        (Arc::new(SystemFlags::new()), handle, rx)
    }

    #[test]
    fn userscript_presence_edges_post_exactly_once() {
        let (flags, handle, mut rx) = presence_fixture();

        presence_inc(&flags, &handle);
        presence_inc(&flags, &handle); // second userscript — no event
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::WsConnected);
        assert!(rx.try_recv().is_err());

        presence_dec(&flags, &handle); // 2 → 1 — no event
        assert!(rx.try_recv().is_err());
        presence_dec(&flags, &handle); // 1 → 0
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::WsDisconnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handshake_binds_type_once_and_counts_presence() {
        let (flags, handle, mut rx) = presence_fixture();
        let mut ct = ClientType::Unknown;
        let mut complete = false;

        handle_text(
            1,
            r#"{"type":"handshake","clientType":"userscript"}"#,
            &mut ct,
            &mut complete,
            &handle,
            &flags,
        );
        assert_eq!(ct, ClientType::Userscript);
        assert!(complete);
        assert!(flags.userscript_connected());
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::WsConnected);

        // A second handshake cannot flip the type (or double-count).
        handle_text(
            1,
            r#"{"type":"handshake","clientType":"ui"}"#,
            &mut ct,
            &mut complete,
            &handle,
            &flags,
        );
        assert_eq!(ct, ClientType::Userscript);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn inbound_events_reach_the_dispatcher_queue() {
        let (flags, handle, mut rx) = presence_fixture();
        let mut ct = ClientType::Unknown;
        let mut complete = false;

        handle_text(
            1,
            r#"{"type":"event","payload":{"type":"GAME_START","timestamp":1}}"#,
            &mut ct,
            &mut complete,
            &handle,
            &flags,
        );
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::GameStart);
    }

    #[test]
    fn info_heartbeats_are_swallowed() {
        let (flags, handle, mut rx) = presence_fixture();
        let mut ct = ClientType::Unknown;
        let mut complete = false;

        handle_text(
            1,
            r#"{"type":"event","payload":{"type":"INFO","timestamp":1,"message":"heartbeat"}}"#,
            &mut ct,
            &mut complete,
            &handle,
            &flags,
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_frames_never_panic_the_handler() {
        let (flags, handle, mut rx) = presence_fixture();
        let mut ct = ClientType::Unknown;
        let mut complete = false;

        for frame in ["", "{", "[1,2,3]", r#"{"type":"event","payload":{}}"#] {
            handle_text(1, frame, &mut ct, &mut complete, &handle, &flags);
        }
        // Degraded INFO events were all heartbeat-filtered.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn end_to_end_handshake_over_tcp() {
        // Plain-TCP path only; the TLS acceptor is exercised in production.
        let (handle, mut rx) = dispatcher::channel();
        let flags = Arc::new(SystemFlags::new());
        let (out_tx, _out_rx) = broadcast::channel(16);

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server_flags = flags.clone();
        let server_out = out_tx.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve_client(1, stream, handle, server_out.subscribe(), server_flags).await;
        });

        let url = format!("ws://127.0.0.1:{}/ws", port);
        let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        client
            .send(Message::Text(protocol::build_handshake(ClientType::Userscript)))
            .await
            .unwrap();

        // WS_CONNECTED posts once the handshake lands.
        let ev = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timely event")
            .expect("event");
        assert_eq!(ev.kind(), EventKind::WsConnected);
        assert!(flags.userscript_connected());

        // Outbound broadcast reaches the client.
        out_tx.send(protocol::build_ping()).unwrap();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), client.next())
            .await
            .expect("timely frame")
            .unwrap()
            .unwrap();
        assert!(frame.into_text().unwrap().contains("ping"));

        // Abrupt close: drop the socket without a CLOSE frame.
        drop(client);
        let ev = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timely disconnect")
            .expect("event");
        assert_eq!(ev.kind(), EventKind::WsDisconnected);
        assert!(!flags.userscript_connected());
    }
}
