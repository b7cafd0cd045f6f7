//! Adapter server - client transport and the per-session event loop

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::common::{config::Config, Error, Result};
use crate::dap::{codec, OutgoingMessage, RequestMessage};

use super::handler;
use super::session::Session;

/// Serve a single client over stdin/stdout
pub async fn serve_stdio(config: Config) -> Result<()> {
    tracing::info!("Serving DAP on stdio");
    run_session(config, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Accept clients over TCP, one independent session per connection
pub async fn listen(config: Config, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening for DAP clients");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, "Client connected");
                        let config = config.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            if let Err(e) = run_session(config, reader, writer).await {
                                tracing::error!(%peer, "Session failed: {}", e);
                            }
                            tracing::info!(%peer, "Client disconnected");
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Run one debug session over a client byte stream until it ends
///
/// Client requests, runtime notifications and the pending-request sweep are
/// multiplexed into a single loop that owns the session. Everything the
/// client receives goes through one writer task, which numbers messages.
pub async fn run_session<R, W>(config: Config, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, out_rx));

    let (request_tx, mut request_rx) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_loop(reader, request_tx));

    let mut sweep = tokio::time::interval(config.timeouts.sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut session = Session::new(config, out_tx);
    let mut runtime_rx = session
        .take_runtime_receiver()
        .ok_or_else(|| Error::Internal("runtime receiver already taken".into()))?;

    loop {
        tokio::select! {
            request = request_rx.recv() => {
                let Some(request) = request else {
                    tracing::debug!("Client stream ended");
                    session.disconnect().await?;
                    session.flush_post_response();
                    break;
                };
                let is_disconnect = matches!(request.command.as_str(), "disconnect" | "terminate");
                handler::handle_request(&mut session, request).await;
                if is_disconnect {
                    break;
                }
            }
            Some(input) = runtime_rx.recv() => {
                session.handle_runtime_input(input).await;
            }
            _ = sweep.tick() => {
                session.expire_pending(Instant::now());
            }
        }
    }

    reader_task.abort();
    // Closing the last sender lets the writer flush and stop
    drop(session);
    if let Err(e) = writer_task.await {
        tracing::warn!("Writer task failed: {}", e);
    }

    Ok(())
}

/// Decode client requests and hand them to the session loop
async fn read_loop<R>(reader: R, requests: mpsc::UnboundedSender<RequestMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);

    loop {
        let body = match codec::read_message(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error reading client message: {}", e);
                break;
            }
        };

        let request: RequestMessage = match serde_json::from_str(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(body = %body, "Invalid client message: {}", e);
                continue;
            }
        };
        if request.message_type != "request" {
            tracing::warn!(kind = %request.message_type, "Ignoring non-request client message");
            continue;
        }

        if requests.send(request).is_err() {
            break;
        }
    }
}

/// Number and write every outgoing message in order
async fn write_loop<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<OutgoingMessage>)
where
    W: AsyncWrite + Unpin,
{
    let mut seq: i64 = 1;

    while let Some(message) = outgoing.recv().await {
        let json = match message {
            OutgoingMessage::Response(mut response) => {
                response.seq = seq;
                serde_json::to_string(&response)
            }
            OutgoingMessage::Event(event) => {
                let mut message = event.to_message();
                message.seq = seq;
                serde_json::to_string(&message)
            }
        };
        seq += 1;

        let json = match json {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to encode message: {}", e);
                continue;
            }
        };
        tracing::trace!(json = %json, "client <<<");

        if let Err(e) = codec::write_message(&mut writer, &json).await {
            tracing::error!("Error writing to client: {}", e);
            break;
        }
    }
}
