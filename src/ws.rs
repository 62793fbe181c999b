use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use live_broadcaster::LiveBroadcaster;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// One WS client = one live subscription, relayed until the socket goes away.
async fn handle_socket(peer: SocketAddr, stream: TcpStream, live: Arc<LiveBroadcaster>) -> Result<()> {
    let ws_stream = accept_async(stream).await.context("WS handshake failed")?;
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = live.subscribe(tx).await;
    info!("WS client connected: {} ({:?})", peer, id);

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else { break };
                let frame = update.to_frame().to_string();
                if let Err(e) = ws_sink.send(Message::Text(frame.into())).await {
                    debug!("WS send to {} failed: {}", peer, e);
                    break;
                }
            }
            msg = ws_stream.next() => match msg {
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws_sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WS recv err from {}: {}", peer, e);
                    break;
                }
            },
        }
    }

    live.unsubscribe(id).await;
    info!("WS client disconnected: {}", peer);
    Ok(())
}

pub async fn start_ws_server(live: Arc<LiveBroadcaster>, bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind).await.context("ws bind")?;
    info!("placar-hub live feed on ws://{}", bind);

    // path routing neřešíme, WS se přijímá na jakémkoliv path
    loop {
        let (stream, peer) = listener.accept().await.context("ws accept")?;
        let live = Arc::clone(&live);
        tokio::spawn(async move {
            if let Err(e) = handle_socket(peer, stream, live).await {
                debug!("socket handler err {}: {}", peer, e);
            }
        });
    }
}
