//! Background listeners for the server-mode backends.
//!
//! A listener is bound before [`serve`] returns, so an unavailable port is
//! reported to the caller that asked for it. The accept loop then runs on its
//! own task until the [`ServerHandle`] is shut down or dropped.

use crate::config::DatabaseConfig;
use jzon::object::Object;
use jzon::JsonValue;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

/// How long `stop()` waits for a listener to wind down.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers one request line with one reply line.
///
/// Called on the blocking thread pool, so implementations may do
/// synchronous engine work.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &str) -> String;
}

/// Credentials a client must present before issuing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials for a configured database, or `None` when no password
    /// is set.
    pub fn from_config(config: &DatabaseConfig) -> Option<Self> {
        if config.password().is_empty() {
            None
        } else {
            Some(Self::new(config.username(), config.password()))
        }
    }

    /// Check an `AUTH <user> <password>` line.
    pub fn accepts(&self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        parts.next() == Some("AUTH")
            && parts.next() == Some(self.username.as_str())
            && parts.next() == Some(self.password.as_str())
            && parts.next().is_none()
    }
}

/// Loopback address for a port.
pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Build a JSON object reply from fields, keeping their order.
pub fn json_object<'a>(fields: impl IntoIterator<Item = (&'a str, JsonValue)>) -> JsonValue {
    let mut object = Object::new();
    for (key, value) in fields {
        object.insert(key, value);
    }
    JsonValue::Object(object)
}

/// Proof that a listener is running. Consumed by [`shutdown`](Self::shutdown).
///
/// Dropping the handle also stops the accept loop, without waiting for it.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close open connections and wait for the loop to exit.
    pub async fn shutdown(self, wait: Duration) -> io::Result<()> {
        let _ = self.shutdown_tx.send(());
        let mut task = self.task;
        match tokio::time::timeout(wait, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(io::Error::new(io::ErrorKind::Other, e)),
            Err(_) => {
                task.abort();
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("listener did not stop within {:?}", wait),
                ))
            }
        }
    }
}

/// Bind `addr` and answer requests with `handler` until shut down.
pub async fn serve(
    addr: SocketAddr,
    credentials: Option<Credentials>,
    handler: Arc<dyn RequestHandler>,
) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tracing::debug!(%local_addr, "listener bound");
    let task = tokio::spawn(accept_loop(
        listener,
        shutdown_rx,
        credentials.map(Arc::new),
        handler,
    ));

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: oneshot::Receiver<()>,
    credentials: Option<Arc<Credentials>>,
    handler: Arc<dyn RequestHandler>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            // Fires on an explicit shutdown and when the handle is dropped.
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    connections.spawn(handle_connection(stream, credentials.clone(), handler.clone()));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Ok(Err(e)) = finished {
                    tracing::debug!(error = %e, "connection closed with error");
                }
            }
        }
    }
    connections.shutdown().await;
    tracing::debug!("listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    credentials: Option<Arc<Credentials>>,
    handler: Arc<dyn RequestHandler>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    if let Some(credentials) = credentials {
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        if !credentials.accepts(line.trim()) {
            writer.write_all(b"ERR authentication failed\n").await?;
            return Ok(());
        }
        writer.write_all(b"OK\n").await?;
    }

    while let Some(line) = lines.next_line().await? {
        let request = line.trim().to_string();
        if request.is_empty() {
            continue;
        }
        let handler = handler.clone();
        let reply = tokio::task::spawn_blocking(move || handler.handle(&request))
            .await
            .unwrap_or_else(|e| format!("ERR {}", e));
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::time::timeout;

    struct Upper;

    impl RequestHandler for Upper {
        fn handle(&self, request: &str) -> String {
            request.to_uppercase()
        }
    }

    async fn roundtrip(stream: &mut TcpStream, line: &str) -> String {
        stream.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();
        reply.trim_end().to_string()
    }

    #[test]
    fn test_credentials_accepts() {
        let credentials = Credentials::new("sa", "secret");
        assert!(credentials.accepts("AUTH sa secret"));
        assert!(!credentials.accepts("AUTH sa wrong"));
        assert!(!credentials.accepts("AUTH sa"));
        assert!(!credentials.accepts("AUTH sa secret extra"));
        assert!(!credentials.accepts("LOGIN sa secret"));
    }

    #[test]
    fn test_credentials_from_config() {
        assert!(Credentials::from_config(&DatabaseConfig::new("db")).is_none());
        let config = DatabaseConfig::new("db").with_credentials("admin", "pw");
        assert_eq!(
            Credentials::from_config(&config),
            Some(Credentials::new("admin", "pw"))
        );
    }

    #[tokio::test]
    async fn test_serve_answers_requests() {
        let handle = serve(loopback(0), None, Arc::new(Upper)).await.unwrap();
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();

        assert_eq!(roundtrip(&mut stream, "hello").await, "HELLO");
        assert_eq!(roundtrip(&mut stream, "again").await, "AGAIN");

        handle.shutdown(SHUTDOWN_TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_requires_auth_when_configured() {
        let credentials = Credentials::new("sa", "secret");
        let handle = serve(loopback(0), Some(credentials), Arc::new(Upper))
            .await
            .unwrap();

        let mut good = TcpStream::connect(handle.local_addr()).await.unwrap();
        assert_eq!(roundtrip(&mut good, "AUTH sa secret").await, "OK");
        assert_eq!(roundtrip(&mut good, "ping").await, "PING");

        let mut bad = TcpStream::connect(handle.local_addr()).await.unwrap();
        assert_eq!(
            roundtrip(&mut bad, "AUTH sa nope").await,
            "ERR authentication failed"
        );

        handle.shutdown(SHUTDOWN_TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_immediate() {
        let first = serve(loopback(0), None, Arc::new(Upper)).await.unwrap();
        let taken = first.local_addr();
        assert!(serve(taken, None, Arc::new(Upper)).await.is_err());
        first.shutdown(SHUTDOWN_TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let handle = serve(loopback(0), None, Arc::new(Upper)).await.unwrap();
        let addr = handle.local_addr();
        handle.shutdown(SHUTDOWN_TIMEOUT).await.unwrap();

        let again = timeout(Duration::from_secs(2), serve(addr, None, Arc::new(Upper)))
            .await
            .unwrap()
            .unwrap();
        again.shutdown(SHUTDOWN_TIMEOUT).await.unwrap();
    }
}
