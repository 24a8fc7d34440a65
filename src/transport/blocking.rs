//! Blocking TCP transport
//!
//! One OS thread per connection. Every frame is a 4-byte big-endian length header followed by
//! that many payload bytes, in both directions. Connections stay open for further frames until
//! the peer closes them or the listener stops. On stop, a connection closes the next time it is
//! idle between frames; a frame already started is read, answered and written first.

use std::{
    io::{self, ErrorKind, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{dispatcher::Dispatcher, transport::oversized_payload};

/// How often an idle connection checks the stop flag.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Accepts connections until `stop` is set and the listener is woken by one more connection
/// (see [`wake`]), then joins every connection thread before returning.
pub fn serve(
    listener: TcpListener,
    dispatcher: Dispatcher,
    max_request_bytes: usize,
    stop: Arc<AtomicBool>,
) -> io::Result<()> {
    info!(local_addr = %listener.local_addr()?, "blocking listener accepting connections");

    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    for stream in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        connections.retain(|connection| !connection.is_finished());

        match stream {
            Ok(stream) => {
                if let Err(err) = stream.set_read_timeout(Some(IDLE_POLL_INTERVAL)) {
                    warn!(error = %err, "failed to set read timeout; connection ignores stop while idle");
                }
                let dispatcher = dispatcher.clone();
                let stop = stop.clone();
                let spawned = thread::Builder::new()
                    .name("rpc-connection".to_string())
                    .spawn(move || {
                        if let Err(err) =
                            handle_connection(stream, &dispatcher, max_request_bytes, &stop)
                        {
                            warn!(error = %err, "connection ended without a response");
                        }
                    });
                match spawned {
                    Ok(connection) => connections.push(connection),
                    Err(err) => error!(error = %err, "failed to spawn connection thread"),
                }
            }
            Err(err) => {
                error!(error = %err, "failed to accept connection");
            }
        }
    }

    drop(listener);
    info!(in_flight = connections.len(), "blocking listener shutting down");
    for connection in connections {
        if connection.join().is_err() {
            error!("connection thread panicked");
        }
    }
    Ok(())
}

/// Unblocks a listener parked in `accept` so it can observe its stop flag.
pub fn wake(addr: SocketAddr) {
    let mut target = addr;
    if target.ip().is_unspecified() {
        target.set_ip(match addr {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        });
    }
    if let Err(err) = TcpStream::connect(target) {
        debug!(error = %err, "wake-up connection failed");
    }
}

/// Serves frames on one connection until the peer closes it, or until `stop` is set while the
/// connection is waiting for the next frame.
pub fn handle_connection<S>(
    mut stream: S,
    dispatcher: &Dispatcher,
    max_request_bytes: usize,
    stop: &AtomicBool,
) -> io::Result<()>
where
    S: Read + Write,
{
    loop {
        let mut header = [0u8; 4];
        if let Fill::Closed = fill(&mut stream, &mut header, Some(stop))? {
            debug!("connection closed between frames");
            return Ok(());
        }

        let length = u32::from_be_bytes(header) as usize;
        if length > max_request_bytes {
            write_frame(&mut stream, oversized_payload(length, max_request_bytes))?;
            return Ok(());
        }

        let payload = read_payload(&mut stream, length)?;
        let response = dispatcher.handle_bytes(&payload);
        write_frame(&mut stream, &response)?;
    }
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let length = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "frame exceeds u32 length header"))?;
    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Reads one frame of at most `max_bytes` payload bytes. Returns `None` when the peer closed the
/// connection between frames. A larger header is `InvalidData` and nothing is allocated for it.
pub fn read_frame<R: Read>(reader: &mut R, max_bytes: usize) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    if let Fill::Closed = fill(reader, &mut header, None)? {
        return Ok(None);
    }

    let length = u32::from_be_bytes(header) as usize;
    if length > max_bytes {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("frame of {length} bytes exceeds limit of {max_bytes}"),
        ));
    }
    read_payload(reader, length).map(Some)
}

fn read_payload<R: Read>(reader: &mut R, length: usize) -> io::Result<Vec<u8>> {
    let mut payload = vec![0u8; length];
    match fill(reader, &mut payload, None)? {
        Fill::Complete => Ok(payload),
        Fill::Closed => Err(ErrorKind::UnexpectedEof.into()),
    }
}

enum Fill {
    Complete,
    Closed,
}

/// Fills `buf` completely, retrying reads that time out.
///
/// `Closed` means nothing was read: the peer closed, or `stop` was set while waiting. Once any
/// byte has arrived, timeouts are retried regardless of `stop` and an early EOF is an error.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8], stop: Option<&AtomicBool>) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(Fill::Closed),
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(read) => filled += read,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if filled == 0 && stop.is_some_and(|stop| stop.load(Ordering::Acquire)) {
                    return Ok(Fill::Closed);
                }
            }
            Err(err) => return Err(err),
        }
    }
    Ok(Fill::Complete)
}
