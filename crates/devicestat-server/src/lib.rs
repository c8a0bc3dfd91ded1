//! HTTP telemetry server.
//!
//! Serves [`SystemMonitor`] sections over a minimal HTTP/1.1 surface: one GET
//! per connection, exact-match paths, JSON bodies with permissive CORS
//! headers. A semaphore bounds how many connections are handled at once and
//! sampling runs on the blocking pool, so a slow diagnostic command never
//! stalls the accept loop.

pub mod protocol;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use devicestat_core::SystemMonitor;

use crate::protocol::{ProtocolError, RequestLine, Response};
use crate::routes::Route;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 18888;
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Lowest port accepted from configuration. Port 0 (OS-assigned) is also
/// accepted.
pub const MIN_PORT: u16 = 1024;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid server configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Connections handled concurrently.
    pub workers: usize,
    /// Deadline for one whole connection, read to write.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.port != 0 && self.port < MIN_PORT {
            return Err(ServerError::Config(format!(
                "port {} is outside {MIN_PORT}-65535",
                self.port
            )));
        }
        if self.workers == 0 {
            return Err(ServerError::Config("workers must be at least 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(ServerError::Config("request timeout must be non-zero".into()));
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// State shared by every connection task.
struct Shared {
    monitor: Arc<SystemMonitor>,
    port: u16,
    request_timeout: Duration,
}

pub struct HttpServer {
    config: ServerConfig,
    monitor: Arc<SystemMonitor>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, monitor: Arc<SystemMonitor>) -> Self {
        Self { config, monitor }
    }

    /// Bind and start accepting. Returns once the listener is bound.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        self.config.validate()?;
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        log::info!(
            "listening on {local_addr} ({} workers, {:?} request timeout)",
            self.config.workers,
            self.config.request_timeout
        );

        let shared = Arc::new(Shared {
            monitor: self.monitor,
            port: local_addr.port(),
            request_timeout: self.config.request_timeout,
        });
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, shared, self.config.workers, stop_rx));

        Ok(ServerHandle {
            local_addr,
            stop: stop_tx,
            task,
        })
    }
}

/// Running server. Dropping the handle stops it as well.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the accept loop ends on its own, which only happens if it
    /// fails. Dropping the returned future stops the server.
    pub async fn wait(self) {
        let Self { stop, task, .. } = self;
        let _stop = stop;
        if let Err(e) = task.await {
            log::warn!("accept loop ended abnormally: {e}");
        }
    }

    /// Stop accepting, then abort in-flight connections. Returns once the
    /// listener is closed.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            log::warn!("accept loop ended abnormally: {e}");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    workers: usize,
    mut stop: oneshot::Receiver<()>,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut connections = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = &mut stop => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let (stream, peer) = tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    continue;
                }
            },
        };
        while connections.try_join_next().is_some() {}

        let shared = Arc::clone(&shared);
        connections.spawn(async move {
            let _permit = permit;
            match tokio::time::timeout(shared.request_timeout, handle_connection(stream, peer, &shared)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("{peer}: {e}"),
                Err(_) => log::debug!("{peer}: dropped after {:?}", shared.request_timeout),
            }
        });
    }

    drop(listener);
    log::info!("stopped accepting; aborting {} in-flight connections", connections.len());
    connections.abort_all();
    while connections.join_next().await.is_some() {}
    log::info!("server stopped");
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: &Shared,
) -> Result<(), ProtocolError> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let response = match protocol::read_request(&mut reader).await {
        Ok(request) => {
            log::debug!("{peer} {} {}", request.method, request.path);
            dispatch(&request, shared).await
        }
        Err(ProtocolError::EmptyRequest) => {
            log::debug!("{peer}: empty request, closing");
            return Ok(());
        }
        Err(e) if e.is_client_error() => {
            log::debug!("{peer}: {e}");
            Response::error(400, "Bad Request")
        }
        Err(e) => return Err(e),
    };

    protocol::write_response(&mut write_half, &response).await?;
    write_half.shutdown().await?;
    Ok(())
}

/// Map one parsed request to a response.
async fn dispatch(request: &RequestLine, shared: &Shared) -> Response {
    if request.method != "GET" {
        return Response::error(405, "Method Not Allowed");
    }
    let Some(route) = routes::lookup(&request.path) else {
        return Response::error(404, "Not Found");
    };

    match route {
        Route::Api => Response::html(routes::api_page(shared.port)),
        Route::Section(name) => {
            let monitor = Arc::clone(&shared.monitor);
            match tokio::task::spawn_blocking(move || monitor.section(name)).await {
                Ok(Ok(value)) => Response::json(200, &value),
                Ok(Err(e)) => {
                    log::error!("{} failed: {e}", request.path);
                    Response::error(500, &format!("Internal Server Error: {e}"))
                }
                Err(e) => {
                    log::error!("{} task failed: {e}", request.path);
                    Response::error(500, &format!("Internal Server Error: {e}"))
                }
            }
        }
    }
}
