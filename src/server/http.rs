use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::connections::{ConnectionGuard, ConnectionTable};
use crate::{CasterError, Result};

/// How long a forced stop waits for severed connections to leave the table.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Static file server for the local media folder.
///
/// Runs its own accept loop so every connection can be tracked and, on a
/// forced stop, severed mid-transfer.
pub struct MediaServer {
    root: PathBuf,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    connections: Arc<ConnectionTable>,
    accept_task: JoinHandle<()>,
}

impl MediaServer {
    /// Serves `root` on every interface at `port`.
    pub async fn start(root: impl Into<PathBuf>, port: u16) -> Result<Self> {
        Self::bind(root, SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    pub async fn bind(root: impl Into<PathBuf>, addr: SocketAddr) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CasterError::Server(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CasterError::Server(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        info!(
            "Serving '{}' over HTTP on port {}",
            root.display(),
            local_addr.port()
        );

        let shutdown = CancellationToken::new();
        let connections = Arc::new(ConnectionTable::new());
        let accept_task = tokio::spawn(accept_loop(
            listener,
            media_router(&root),
            shutdown.clone(),
            Arc::clone(&connections),
        ));

        Ok(Self {
            root,
            local_addr,
            shutdown,
            connections,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Stops the server and releases the port.
    ///
    /// With `force_close` every open connection is severed first, even in
    /// the middle of a transfer. Without it in-flight transfers are left to
    /// finish on their own and this returns as soon as the listener is gone.
    pub async fn stop(self, force_close: bool) {
        if force_close {
            let severed = self.connections.close_all();
            if severed > 0 {
                info!("Force-closing {} open connection(s)", severed);
            }
        }

        self.shutdown.cancel();
        if let Err(e) = self.accept_task.await {
            error!("HTTP accept loop ended abnormally: {}", e);
        }

        if force_close && !self.connections.wait_empty(FORCE_CLOSE_GRACE).await {
            warn!(
                "{} connection(s) still open after force close",
                self.connections.len()
            );
        }
        info!("HTTP server on port {} stopped", self.local_addr.port());
    }
}

/// Files under `root`, addressed by their path relative to it.
pub fn media_router(root: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(root))
        .layer(TraceLayer::new_for_http())
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    connections: Arc<ConnectionTable>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
        };

        let guard = connections.track(peer);
        tokio::spawn(serve_connection(
            stream,
            peer,
            router.clone(),
            shutdown.clone(),
            guard,
        ));
    }
    debug!("HTTP accept loop finished");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
    guard: ConnectionGuard,
) {
    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
        router.clone().oneshot(req)
    });
    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let kill = guard.killed().clone();
    let result = tokio::select! {
        biased;
        _ = kill.cancelled() => None,
        res = conn.as_mut() => Some(res),
        _ = shutdown.cancelled() => {
            // Let the current response finish, then close instead of keep-alive.
            conn.as_mut().graceful_shutdown();
            tokio::select! {
                biased;
                _ = kill.cancelled() => None,
                res = conn.as_mut() => Some(res),
            }
        }
    };

    match result {
        None => info!("Connection from {} closed by server shutdown", peer),
        Some(Ok(())) => debug!("Connection from {} finished", peer),
        Some(Err(e)) if is_client_disconnect(&e) => {
            info!("Client {} disconnected: {}", peer, e)
        }
        Some(Err(e)) => error!("Error serving {}: {}", peer, e),
    }
    drop(guard);
}

/// Whether `err` means the peer went away, as opposed to a server fault.
fn is_client_disconnect(err: &hyper::Error) -> bool {
    if err.is_incomplete_message() || err.is_canceled() {
        return true;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            );
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn rejects_missing_root() {
        let err = MediaServer::bind("/definitely/not/here", SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CasterError::Server(_)));
    }

    #[tokio::test]
    async fn port_in_use_fails_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let first = MediaServer::bind(dir.path(), SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let second = MediaServer::bind(dir.path(), first.local_addr()).await;
        assert!(matches!(second, Err(CasterError::Server(_))));
        first.stop(false).await;
    }

    #[tokio::test]
    async fn tracks_and_releases_connections() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"abc").unwrap();
        let server = MediaServer::bind(dir.path(), SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /a.mp4 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("abc"));

        assert!(server.connections.wait_empty(Duration::from_secs(2)).await);
        server.stop(true).await;
    }
}
