//! Process-wide server value
//!
//! `Server::bind` claims the listening socket, `Server::start` spawns the accept loop and hands
//! back a `ServerHandle`, and `ServerHandle::stop` shuts the loop down and drains in-flight
//! exchanges. The server holds nothing but the listener and an immutable dispatcher.

use std::{
    io,
    net::SocketAddr,
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
    thread,
};

use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::info;

use crate::{
    build_app,
    config::{Config, ConfigError, TransportKind},
    dispatcher::Dispatcher,
    transport::{blocking, stream},
    AppState,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

enum Listener {
    Http(tokio::net::TcpListener),
    Tcp(tokio::net::TcpListener),
    Blocking(std::net::TcpListener),
}

pub struct Server {
    listener: Listener,
    local_addr: SocketAddr,
    dispatcher: Dispatcher,
    max_request_bytes: usize,
}

impl Server {
    pub async fn bind(config: &Config, dispatcher: Dispatcher) -> Result<Self, ServerError> {
        let addr = config.bind_socket()?;
        let bind_error = |source| ServerError::Bind { addr, source };

        let listener = match config.transport {
            TransportKind::Http => Listener::Http(
                tokio::net::TcpListener::bind(addr)
                    .await
                    .map_err(bind_error)?,
            ),
            TransportKind::Tcp => Listener::Tcp(
                tokio::net::TcpListener::bind(addr)
                    .await
                    .map_err(bind_error)?,
            ),
            TransportKind::Blocking => {
                Listener::Blocking(std::net::TcpListener::bind(addr).map_err(bind_error)?)
            }
        };

        let local_addr = match &listener {
            Listener::Http(listener) | Listener::Tcp(listener) => listener.local_addr()?,
            Listener::Blocking(listener) => listener.local_addr()?,
        };

        Ok(Self {
            listener,
            local_addr,
            dispatcher,
            max_request_bytes: config.max_request_bytes,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the accept loop on the current tokio runtime.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let local_addr = self.local_addr;

        let task = match self.listener {
            Listener::Http(listener) => {
                let app = build_app(AppState::new(self.dispatcher, self.max_request_bytes));
                tokio::spawn(async move {
                    info!(local_addr = %local_addr, "http listener accepting connections");
                    axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown)
                        .await
                })
            }
            Listener::Tcp(listener) => tokio::spawn(stream::serve(
                listener,
                self.dispatcher,
                self.max_request_bytes,
                shutdown,
            )),
            Listener::Blocking(listener) => {
                start_blocking(listener, self.dispatcher, self.max_request_bytes, shutdown)?
            }
        };

        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Runs the blocking accept loop on its own thread and bridges its stop flag to `shutdown`.
fn start_blocking(
    listener: std::net::TcpListener,
    dispatcher: Dispatcher,
    max_request_bytes: usize,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> io::Result<JoinHandle<io::Result<()>>> {
    let local_addr = listener.local_addr()?;
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = oneshot::channel();

    {
        let stop = stop.clone();
        thread::Builder::new()
            .name("rpc-accept".to_string())
            .spawn(move || {
                let _ = done_tx.send(blocking::serve(
                    listener,
                    dispatcher,
                    max_request_bytes,
                    stop,
                ));
            })?;
    }

    Ok(tokio::spawn(async move {
        let mut done_rx = done_rx;
        tokio::select! {
            result = &mut done_rx => {
                return result.unwrap_or_else(|_| Err(io::Error::other("accept thread panicked")));
            }
            _ = shutdown => {}
        }

        stop.store(true, Ordering::Release);
        tokio::task::spawn_blocking(move || blocking::wake(local_addr))
            .await
            .map_err(io::Error::other)?;
        done_rx
            .await
            .unwrap_or_else(|_| Err(io::Error::other("accept thread panicked")))
    }))
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits until the accept loop and every exchange it already
    /// accepted have finished.
    pub async fn stop(self) -> Result<(), ServerError> {
        let _ = self.shutdown.send(());
        self.task.await??;
        info!(local_addr = %self.local_addr, "server stopped");
        Ok(())
    }

    /// Waits for the accept loop to exit without asking it to.
    pub async fn wait(self) -> Result<(), ServerError> {
        let Self { shutdown, task, .. } = self;
        let result = task.await;
        drop(shutdown);
        result??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{methods::builtin_registry, transport::blocking::{read_frame, write_frame}};
    use std::time::Duration;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    fn config(transport: TransportKind) -> Config {
        Config {
            transport,
            bind_port: 0,
            ..Config::default()
        }
    }

    async fn started(transport: TransportKind) -> ServerHandle {
        let dispatcher = Dispatcher::new(builtin_registry().expect("builtins"));
        let server = Server::bind(&config(transport), dispatcher)
            .await
            .expect("bind");
        assert_ne!(server.local_addr().port(), 0);
        server.start().expect("start")
    }

    #[tokio::test]
    async fn tcp_server_answers_and_stops() {
        let handle = started(TransportKind::Tcp).await;

        let mut client = TcpStream::connect(handle.local_addr()).await.expect("connect");
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"sum\",\"params\":[1,2,3],\"id\":1}\n")
            .await
            .expect("write");
        let mut response = String::new();
        client.read_to_string(&mut response).await.expect("read");
        assert_eq!(response, "{\"jsonrpc\":\"2.0\",\"result\":6,\"id\":1}\n");

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn http_server_answers_and_stops() {
        let handle = started(TransportKind::Http).await;

        let body = r#"{"jsonrpc":"2.0","method":"frobnicate","id":2}"#;
        let request = format!(
            "POST /rpc HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let mut client = TcpStream::connect(handle.local_addr()).await.expect("connect");
        client.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        client.read_to_string(&mut response).await.expect("read");

        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with(
            r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":2}"#
        ));

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn blocking_server_answers_and_stops() {
        let handle = started(TransportKind::Blocking).await;
        let addr = handle.local_addr();

        let response = tokio::task::spawn_blocking(move || {
            let mut client = std::net::TcpStream::connect(addr).expect("connect");
            write_frame(&mut client, br#"{"jsonrpc":"2.0","method":"sum","params":[],"id":"a"}"#)
                .expect("send");
            read_frame(&mut client, 1024).expect("read").expect("frame")
        })
        .await
        .expect("client thread");
        assert_eq!(response, br#"{"jsonrpc":"2.0","result":0,"id":"a"}"#);

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn stop_lets_a_started_exchange_finish() {
        let handle = started(TransportKind::Tcp).await;

        let mut client = TcpStream::connect(handle.local_addr()).await.expect("connect");
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"sum\",")
            .await
            .expect("write first half");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopping = tokio::spawn(handle.stop());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished(), "stop returned with an exchange in flight");

        client
            .write_all(b"\"params\":[4,5],\"id\":9}\n")
            .await
            .expect("write second half");
        let mut response = String::new();
        client.read_to_string(&mut response).await.expect("read");
        assert_eq!(response, "{\"jsonrpc\":\"2.0\",\"result\":9,\"id\":9}\n");

        stopping.await.expect("join").expect("stop");
    }

    #[tokio::test]
    async fn binding_a_taken_port_fails() {
        let handle = started(TransportKind::Tcp).await;
        let taken = Config {
            transport: TransportKind::Tcp,
            bind_port: handle.local_addr().port(),
            ..Config::default()
        };

        let dispatcher = Dispatcher::new(builtin_registry().expect("builtins"));
        let err = Server::bind(&taken, dispatcher)
            .await
            .err()
            .expect("port already in use");
        assert!(matches!(err, ServerError::Bind { .. }));

        handle.stop().await.expect("stop");
    }
}
