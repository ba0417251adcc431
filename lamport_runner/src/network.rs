// lamport_runner/src/network.rs
//! TCP plumbing: the accept loop, per-connection readers, and the
//! one-shot outbound sender.
//!
//! Every blocking point (accept, read, connect, write) is wrapped in a
//! timeout so shutdown is noticed within one poll interval and a dead peer
//! never stalls the scheduler for longer than `io_timeout`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::PeerAddr;
use crate::error::SendError;
use crate::queue::IncomingQueue;
use crate::stats::NodeStats;
use crate::wire::{self, LineDecoder};

const READ_BUF_SIZE: usize = 1024;
const LISTEN_BACKLOG: u32 = 128;

/// Bind with SO_REUSEADDR so a restarted node can reclaim its port while old
/// sockets sit in TIME_WAIT. SO_REUSEPORT is left off: two nodes sharing a
/// port must fail at bind.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Shared state every connection handler needs.
#[derive(Debug, Clone)]
pub struct InboundContext {
    pub machine_id: u32,
    pub queue: Arc<IncomingQueue>,
    pub stats: Arc<NodeStats>,
    pub shutdown: watch::Receiver<bool>,
    pub poll_interval: Duration,
}

impl InboundContext {
    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Accept until shutdown, one handler task per connection. Returns once the
/// listener is dropped and every handler has exited.
pub async fn run_listener(listener: TcpListener, ctx: InboundContext) {
    let machine_id = ctx.machine_id;
    if let Ok(addr) = listener.local_addr() {
        info!(machine_id, %addr, "listener accepting connections");
    }

    let mut handlers = JoinSet::new();
    while !ctx.shutting_down() {
        match timeout(ctx.poll_interval, listener.accept()).await {
            Err(_) => continue,
            Ok(Ok((stream, peer))) => {
                ctx.stats.record_connection();
                trace!(machine_id, %peer, "accepted connection");
                let handler_ctx = ctx.clone();
                handlers.spawn(async move {
                    let summary = handle_connection(stream, handler_ctx).await;
                    trace!(
                        machine_id,
                        %peer,
                        enqueued = summary.enqueued,
                        malformed = summary.malformed,
                        "connection finished"
                    );
                });
            }
            Ok(Err(e)) => {
                warn!(machine_id, error = %e, "accept failed");
            }
        }
        reap_finished(&mut handlers, machine_id);
    }

    drop(listener);
    debug!(machine_id, "listener closed, draining {} handlers", handlers.len());
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            warn!(machine_id, error = %e, "connection handler panicked");
        }
    }
}

/// Collect handlers that have already exited. Senders open one connection per
/// message, so without this the set grows for the whole run.
fn reap_finished(handlers: &mut JoinSet<()>, machine_id: u32) -> usize {
    let mut reaped = 0;
    while let Some(joined) = handlers.try_join_next() {
        if let Err(e) = joined {
            warn!(machine_id, error = %e, "connection handler panicked");
        }
        reaped += 1;
    }
    reaped
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub enqueued: usize,
    pub malformed: usize,
}

/// Read newline-delimited timestamps from one connection into the queue.
///
/// Exits on EOF, on a read error, or when shutdown is signalled. Bad lines
/// are counted and dropped; the stream keeps going.
pub async fn handle_connection<S>(mut stream: S, ctx: InboundContext) -> ConnectionSummary
where
    S: AsyncRead + Unpin,
{
    let mut decoder = LineDecoder::new();
    let mut summary = ConnectionSummary::default();
    let mut buf = [0u8; READ_BUF_SIZE];

    while !ctx.shutting_down() {
        let n = match timeout(ctx.poll_interval, stream.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                if let Some(parsed) = decoder.finish() {
                    enqueue(&ctx, parsed, &mut summary);
                }
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!(machine_id = ctx.machine_id, error = %e, "connection read failed");
                break;
            }
        };
        for parsed in decoder.feed(&buf[..n]) {
            enqueue(&ctx, parsed, &mut summary);
        }
    }
    summary
}

fn enqueue(
    ctx: &InboundContext,
    parsed: Result<u64, crate::error::WireError>,
    summary: &mut ConnectionSummary,
) {
    match parsed {
        Ok(timestamp) => {
            ctx.queue.push(timestamp);
            ctx.stats.record_enqueued(ctx.queue.len());
            summary.enqueued += 1;
        }
        Err(e) => {
            ctx.stats.record_malformed();
            summary.malformed += 1;
            debug!(machine_id = ctx.machine_id, error = %e, "discarding inbound line");
        }
    }
}

/// Fire-and-forget sender: new connection per message, no pooling, no retry.
#[derive(Debug, Clone)]
pub struct NetworkSender {
    io_timeout: Duration,
}

impl NetworkSender {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }

    pub async fn send_clock(&self, peer: &PeerAddr, clock: u64) -> Result<(), SendError> {
        let connect = TcpStream::connect((peer.host.as_str(), peer.port));
        let mut stream = timeout(self.io_timeout, connect)
            .await
            .map_err(|_| SendError::ConnectTimeout { peer: peer.clone() })?
            .map_err(|source| SendError::Connect {
                peer: peer.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let frame = wire::encode(clock);
        let write = async {
            stream.write_all(&frame).await?;
            stream.shutdown().await
        };
        timeout(self.io_timeout, write)
            .await
            .map_err(|_| SendError::WriteTimeout { peer: peer.clone() })?
            .map_err(|source| SendError::Write {
                peer: peer.clone(),
                source,
            })
    }

    /// Send the same clock value to every recipient concurrently.
    pub async fn send_to_all(
        &self,
        recipients: &[PeerAddr],
        clock: u64,
    ) -> Vec<Result<(), SendError>> {
        join_all(recipients.iter().map(|peer| self.send_clock(peer, clock))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn context(poll: Duration) -> (InboundContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let ctx = InboundContext {
            machine_id: 1,
            queue: Arc::new(IncomingQueue::new()),
            stats: Arc::new(NodeStats::new(1)),
            shutdown: rx,
            poll_interval: poll,
        };
        (ctx, tx)
    }

    fn drain(queue: &IncomingQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.pop().map(|(ts, _)| ts)).collect()
    }

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn test_handler_skips_malformed_line() {
        let (ctx, _tx) = context(Duration::from_millis(50));
        let queue = Arc::clone(&ctx.queue);
        let (mut client, server) = tokio::io::duplex(64);
        let handler = tokio::spawn(handle_connection(server, ctx));

        client.write_all(b"5\nXYZ\n7\n").await.unwrap();
        drop(client);

        let summary = handler.await.unwrap();
        assert_eq!(summary, ConnectionSummary { enqueued: 2, malformed: 1 });
        assert_eq!(drain(&queue), vec![5, 7]);
    }

    #[tokio::test]
    async fn test_handler_reassembles_split_reads() {
        let (ctx, _tx) = context(Duration::from_millis(50));
        let queue = Arc::clone(&ctx.queue);
        let listener = bind_listener(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.set_nodelay(true).unwrap();
            for chunk in [&b"1"[..], b"2\n3", b"\n"] {
                stream.write_all(chunk).await.unwrap();
                stream.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
        });

        let (stream, _) = listener.accept().await.unwrap();
        let summary = handle_connection(stream, ctx).await;
        writer.await.unwrap();

        assert_eq!(summary.enqueued, 2);
        assert_eq!(drain(&queue), vec![12, 3]);
    }

    #[tokio::test]
    async fn test_handler_exits_on_shutdown_with_idle_peer() {
        let (ctx, tx) = context(Duration::from_millis(20));
        let (_client, server) = tokio::io::duplex(64);
        let handler = tokio::spawn(handle_connection(server, ctx));

        tx.send(true).unwrap();
        let summary = timeout(Duration::from_secs(1), handler)
            .await
            .expect("handler ignored shutdown")
            .unwrap();
        assert_eq!(summary, ConnectionSummary::default());
    }

    #[tokio::test]
    async fn test_listener_feeds_queue_and_stops() {
        let (ctx, tx) = context(Duration::from_millis(20));
        let queue = Arc::clone(&ctx.queue);
        let stats = Arc::clone(&ctx.stats);
        let listener = bind_listener(loopback()).unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(run_listener(listener, ctx));

        let sender = NetworkSender::new(Duration::from_secs(1));
        let peer = PeerAddr::new("127.0.0.1", port);
        sender.send_clock(&peer, 4).await.unwrap();
        sender.send_clock(&peer, 9).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while queue.len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("listener ignored shutdown")
            .unwrap();

        let mut received = drain(&queue);
        received.sort_unstable();
        assert_eq!(received, vec![4, 9]);
        assert_eq!(stats.snapshot().connections_accepted, 2);

        // Socket is closed once the listener returns.
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_finished_handlers_are_reaped() {
        let mut handlers = JoinSet::new();
        for _ in 0..5 {
            handlers.spawn(async {});
        }
        handlers.spawn(async { panic!("handler blew up") });
        handlers.spawn(tokio::time::sleep(Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reap_finished(&mut handlers, 1), 6);
        assert_eq!(handlers.len(), 1);
        assert_eq!(reap_finished(&mut handlers, 1), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_fails() {
        let first = bind_listener(loopback()).unwrap();
        let taken = first.local_addr().unwrap();
        assert!(bind_listener(taken).is_err());
    }

    #[tokio::test]
    async fn test_send_to_unreachable_peer_reports_error() {
        let listener = bind_listener(loopback()).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let sender = NetworkSender::new(Duration::from_millis(500));
        let results = sender
            .send_to_all(&[PeerAddr::new("127.0.0.1", port)], 3)
            .await;
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(SendError::Connect { .. }) | Err(SendError::ConnectTimeout { .. })
        ));
    }
}
