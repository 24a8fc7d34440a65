//! Async TCP transport
//!
//! One tokio task per connection and one exchange per connection: read a payload terminated by
//! `\n` or EOF, dispatch it, write the response followed by `\n`, flush, then shut the
//! connection down. Shutdown stops accepting and drains the exchanges already accepted. The task
//! only yields at accept, read and write/flush; dispatch itself runs
//! to completion without suspending.

use std::{future::Future, io};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{dispatcher::Dispatcher, transport::oversized_payload};

/// Accepts connections until `shutdown` resolves, then waits for every in-flight exchange to
/// finish before returning.
pub async fn serve<F>(
    listener: TcpListener,
    dispatcher: Dispatcher,
    max_request_bytes: usize,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    info!(local_addr = %listener.local_addr()?, "tcp listener accepting connections");

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                log_join_failure(joined);
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = dispatcher.clone();
                        connections.spawn(async move {
                            if let Err(err) =
                                handle_connection(stream, &dispatcher, max_request_bytes).await
                            {
                                warn!(peer = %peer, error = %err, "connection ended without a response");
                            }
                        });
                    }
                    Err(err) => {
                        error!(error = %err, "failed to accept connection");
                    }
                }
            }
        }
    }

    drop(listener);
    info!(in_flight = connections.len(), "tcp listener shutting down");
    while let Some(joined) = connections.join_next().await {
        log_join_failure(joined);
    }
    Ok(())
}

fn log_join_failure(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "connection task failed");
    }
}

/// Runs a single exchange on `stream`.
///
/// A peer that closes without sending anything gets no response.
pub async fn handle_connection<S>(
    stream: S,
    dispatcher: &Dispatcher,
    max_request_bytes: usize,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let limit = u64::try_from(max_request_bytes)
        .unwrap_or(u64::MAX)
        .saturating_add(1);
    let mut reader = BufReader::new(reader).take(limit);

    let mut buffer = Vec::new();
    reader.read_until(b'\n', &mut buffer).await?;
    if buffer.is_empty() {
        debug!("peer closed before sending a payload");
        return Ok(());
    }

    let payload = strip_line_ending(&buffer);
    let response = if payload.len() > max_request_bytes {
        oversized_payload(payload.len(), max_request_bytes).to_vec()
    } else {
        dispatcher.handle_bytes(payload)
    };

    writer.write_all(&response).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    writer.shutdown().await
}

fn strip_line_ending(buffer: &[u8]) -> &[u8] {
    let buffer = buffer.strip_suffix(b"\n").unwrap_or(buffer);
    buffer.strip_suffix(b"\r").unwrap_or(buffer)
}
