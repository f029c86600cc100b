// ABOUTME: Frontend listener (TCP or Unix socket) and the sequential accept loop
// ABOUTME: One frontend connection is served at a time; quit or a fatal error ends the loop

use anyhow::{Context, Result};
use mattermostd_core::config::ListenNetwork;
use mattermostd_core::frontend::serve_connection;
use mattermostd_core::{AccountRegistry, Config, Dispatcher, Flow, Shutdown};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use {
    std::path::PathBuf,
    tokio::net::{UnixListener, UnixStream},
};

/// Bound frontend socket
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Listener {
    /// Bind the configured address. A stale Unix socket file is removed first.
    pub async fn bind(config: &Config) -> Result<Self> {
        let address = config.listen_address();
        match config.listen_network() {
            ListenNetwork::Tcp => {
                let listener = TcpListener::bind(&address)
                    .await
                    .with_context(|| format!("Failed to listen on {}", address))?;
                tracing::info!(address = %address, "Listening on TCP");
                Ok(Listener::Tcp(listener))
            }
            #[cfg(unix)]
            ListenNetwork::Unix => {
                let path = PathBuf::from(&address);
                remove_stale_socket(&path)?;
                let listener = UnixListener::bind(&path)
                    .with_context(|| format!("Failed to listen on {}", path.display()))?;
                tracing::info!(path = %path.display(), "Listening on Unix socket");
                Ok(Listener::Unix(listener, path))
            }
            #[cfg(not(unix))]
            ListenNetwork::Unix => anyhow::bail!("Unix sockets are not supported on this platform"),
        }
    }

    /// Human-readable bound address (the real port for TCP port 0)
    pub fn local_addr(&self) -> String {
        match self {
            Listener::Tcp(listener) => listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            #[cfg(unix)]
            Listener::Unix(_, path) => path.display().to_string(),
        }
    }

    async fn accept(&self) -> std::io::Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                tracing::info!(peer = %peer, "Frontend connected");
                Ok(Connection::Tcp(stream))
            }
            #[cfg(unix)]
            Listener::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                tracing::info!("Frontend connected");
                Ok(Connection::Unix(stream))
            }
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to remove stale socket {}", path.display()))
        }
    }
}

/// Accept and serve frontends one after another until `quit` or shutdown.
/// Errors from serving a connection (failed account store writes) are fatal.
pub async fn run(
    listener: &Listener,
    registry: &mut AccountRegistry,
    dispatcher: &Dispatcher,
    shutdown: &Shutdown,
) -> Result<()> {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let connection = match accepted {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                continue;
            }
        };

        let flow = match connection {
            Connection::Tcp(stream) => {
                serve_connection(stream, registry, dispatcher, shutdown).await?
            }
            #[cfg(unix)]
            Connection::Unix(stream) => {
                serve_connection(stream, registry, dispatcher, shutdown).await?
            }
        };
        tracing::info!(flow = ?flow, "Frontend disconnected");
        if flow == Flow::Quit {
            shutdown.request();
            break;
        }
    }
    tracing::info!("Accept loop stopped");
    Ok(())
}
