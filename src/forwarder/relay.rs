//! Forwarding engine.
//!
//! Accepts connections on the inherited listener and relays each one to a
//! fresh connection to the target. Every accepted connection gets its own
//! task for the dial, and every direction of a connected pair gets its own
//! copy task, so neither a slow upstream nor a stalled reader holds up the
//! accept loop or the opposite direction.
//!
//! Errors are connection-local: accept, dial and copy failures are logged and
//! the loop keeps going. There is no connection limit and no timeout.

use super::address::{Address, BoxedReader, BoxedWriter, Listener, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Accept and relay connections forever.
pub async fn run(listener: Listener, target: Address) {
    let target = Arc::new(target);
    let mut accept_errors = 0u32;

    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                accept_errors = 0;
                debug!("Accepted connection from {}", peer);
                tokio::spawn(forward_connection(client, Arc::clone(&target)));
            }
            Err(e) => {
                // Errors like EMFILE persist until a descriptor is freed.
                let delay = accept_backoff(accept_errors);
                accept_errors = accept_errors.saturating_add(1);
                warn!("Failed to accept new connection: {} (retrying in {:?})", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Delay before the next accept after `consecutive_errors` failures in a row.
fn accept_backoff(consecutive_errors: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1u32 << consecutive_errors.min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

/// Relay until SIGTERM or SIGINT is received.
pub async fn serve_until_shutdown(listener: Listener, target: Address) {
    tokio::select! {
        _ = run(listener, target) => {}
        _ = shutdown_signal() => {
            info!("Termination signal received, shutting down");
        }
    }
}

/// Resolve once SIGTERM or SIGINT arrives.
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = terminate.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

/// Dial the target for one accepted client and start both copy directions.
async fn forward_connection(client: Stream, target: Arc<Address>) {
    let upstream = match target.dial().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to target: {}", e);
            // Dropping `client` closes the accepted connection.
            return;
        }
    };

    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    tokio::spawn(copy_one_way(client_read, upstream_write, "client->upstream"));
    tokio::spawn(copy_one_way(upstream_read, client_write, "upstream->client"));
}

/// Copy until EOF or error, then close the write side.
async fn copy_one_way(mut reader: BoxedReader, mut writer: BoxedWriter, direction: &'static str) {
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => debug!("{} finished after {} bytes", direction, bytes),
        Err(e) => debug!("{} copy ended: {}", direction, e),
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
    use tokio::time::timeout;

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(0), Duration::from_millis(10));
        assert_eq!(accept_backoff(1), Duration::from_millis(20));
        assert_eq!(accept_backoff(3), Duration::from_millis(80));
        assert_eq!(accept_backoff(7), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }

    /// Spawn a Unix echo stub that answers `ping` with `pong`.
    fn spawn_pong_server(listener: UnixListener) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4];
                    if stream.read_exact(&mut buf).await.is_ok() && &buf == b"ping" {
                        let _ = stream.write_all(b"pong").await;
                    }
                });
            }
        })
    }

    fn tcp_listener() -> Listener {
        let bound = Address::parse("tcp:127.0.0.1:0").unwrap().bind().unwrap();
        Listener::from_bound(bound).unwrap()
    }

    #[tokio::test]
    async fn test_tcp_to_unix_ping_pong() {
        let dir = tempfile::tempdir().unwrap();
        let upstream_path = dir.path().join("app.sock");
        let stub = spawn_pong_server(UnixListener::bind(&upstream_path).unwrap());

        let listener = tcp_listener();
        let listen_addr = listener.local_addr().unwrap();
        let target = Address::parse(&format!("unix:{}", upstream_path.display())).unwrap();
        let relay = tokio::spawn(run(listener, target));

        let endpoint = listen_addr.strip_prefix("tcp:").unwrap().to_string();
        let reply = timeout(Duration::from_secs(5), async move {
            let mut client = TcpStream::connect(endpoint).await.unwrap();
            client.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            client.read_exact(&mut buf).await.unwrap();
            buf
        })
        .await
        .unwrap();

        assert_eq!(&reply, b"pong");
        relay.abort();
        stub.abort();
    }

    #[tokio::test]
    async fn test_unix_to_tcp_both_directions() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let stub = tokio::spawn(async move {
            let (mut stream, _) = upstream.accept().await.unwrap();
            stream.write_all(b"hello from upstream").await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        let dir = tempfile::tempdir().unwrap();
        let listen_path = dir.path().join("listen.sock");
        let bound = Address::parse(&format!("unix:{}", listen_path.display()))
            .unwrap()
            .bind()
            .unwrap();
        let listener = Listener::from_bound(bound).unwrap();
        let target = Address::parse(&format!("tcp:{}", upstream_addr)).unwrap();
        let relay = tokio::spawn(run(listener, target));

        let mut client = UnixStream::connect(&listen_path).await.unwrap();
        let mut greeting = [0u8; 19];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"hello from upstream");

        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();

        let received = timeout(Duration::from_secs(5), stub).await.unwrap().unwrap();
        assert_eq!(received, payload);
        relay.abort();
    }

    #[tokio::test]
    async fn test_failed_dial_keeps_listener_alive() {
        let dir = tempfile::tempdir().unwrap();
        let upstream_path = dir.path().join("late.sock");

        let listener = tcp_listener();
        let endpoint = listener
            .local_addr()
            .unwrap()
            .strip_prefix("tcp:")
            .unwrap()
            .to_string();
        let target = Address::parse(&format!("unix:{}", upstream_path.display())).unwrap();
        let relay = tokio::spawn(run(listener, target));

        // Nothing listens upstream yet: the relay closes our connection.
        let mut first = TcpStream::connect(&endpoint).await.unwrap();
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), first.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        let stub = spawn_pong_server(UnixListener::bind(&upstream_path).unwrap());
        let mut second = TcpStream::connect(&endpoint).await.unwrap();
        second.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        timeout(Duration::from_secs(5), second.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply, b"pong");

        relay.abort();
        stub.abort();
    }

    #[tokio::test]
    async fn test_concurrent_connections() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let echo = tokio::spawn(async move {
            while let Ok((mut stream, _)) = upstream.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = stream.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });

        let listener = tcp_listener();
        let endpoint = listener
            .local_addr()
            .unwrap()
            .strip_prefix("tcp:")
            .unwrap()
            .to_string();
        let relay = tokio::spawn(run(
            listener,
            Address::parse(&format!("tcp:{}", upstream_addr)).unwrap(),
        ));

        // Hold one idle connection open while another one is served.
        let _idle = TcpStream::connect(&endpoint).await.unwrap();
        let mut active = TcpStream::connect(&endpoint).await.unwrap();
        active.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        timeout(Duration::from_secs(5), active.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"abc");

        relay.abort();
        echo.abort();
    }

    #[tokio::test]
    async fn test_unix_to_unix() {
        let dir = tempfile::tempdir().unwrap();
        let upstream_path = dir.path().join("upstream.sock");
        let listen_path = dir.path().join("listen.sock");
        let stub = spawn_pong_server(UnixListener::bind(&upstream_path).unwrap());

        let bound = Address::parse(&format!("unix:{}", listen_path.display()))
            .unwrap()
            .bind()
            .unwrap();
        let relay = tokio::spawn(run(
            Listener::from_bound(bound).unwrap(),
            Address::parse(&format!("unix:{}", upstream_path.display())).unwrap(),
        ));

        let mut client = UnixStream::connect(&listen_path).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        timeout(Duration::from_secs(5), client.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply, b"pong");

        relay.abort();
        stub.abort();
    }
}
