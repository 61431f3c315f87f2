//! Client connections and the fan-out pool.
//!
//! Each accepted client is split in two: the write half lives in the
//! `ClientPool` and receives every hub line, the read half is driven by a
//! `client_reader` task that forwards the client's lines to the hub. A
//! client whose write fails is evicted from the pool and closed exactly
//! once; the remaining clients are unaffected.

use std::fmt;

use futures::future::join_all;
use hub_protocol::LineFramer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, warn};

use crate::bus::Message;
use crate::render;
use crate::trace::SharedTraceLog;

pub type ClientReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ClientWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The write half of one client connection.
pub struct Client {
    writer: ClientWriter,
    name: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("name", &self.name).finish()
    }
}

impl Client {
    pub fn new(writer: ClientWriter, name: String) -> Self {
        Client { writer, name }
    }

    /// Relay one raw line (payload + terminator) to the client.
    pub async fn send_line(&mut self, line: &[u8]) -> Result<(), String> {
        self.writer
            .write_all(line)
            .await
            .map_err(|_| self.name.clone())
    }

    /// Close the connection. Consumes the client so close runs once.
    pub async fn exit(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(client = %self.name, error = %e, "client shutdown error");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Fans hub lines out to every connected client and evicts the ones whose
/// writes fail.
pub struct ClientPool {
    clients: Vec<Client>,
    bus_rx: Receiver<Message>,
}

impl ClientPool {
    pub fn new(bus_rx: Receiver<Message>) -> Self {
        ClientPool {
            clients: Vec::new(),
            bus_rx,
        }
    }

    /// Process bus messages until shutdown, then close every client.
    pub async fn begin(mut self) {
        while let Some(message) = self.bus_rx.recv().await {
            match message {
                Message::HUB_LINE(line) => self.relay(&line).await,
                Message::CLIENT(client) => {
                    debug!(client = client.name(), "client registered");
                    self.clients.push(client);
                }
                Message::DEREGISTER(name) => self.remove(&name).await,
                Message::SHUTDOWN => break,
            }
        }
        for client in self.clients.drain(..) {
            client.exit().await;
        }
    }

    /// Write the line to every current client, then prune the failures so
    /// one bad client never costs the others a line.
    async fn relay(&mut self, line: &[u8]) {
        let sends = self.clients.iter_mut().map(|c| c.send_line(line));
        let failed: Vec<String> = join_all(sends)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        for name in failed {
            warn!(client = %name, "client write failed, evicting");
            self.remove(&name).await;
        }
    }

    async fn remove(&mut self, name: &str) {
        let pos = self.clients.iter().position(|c| c.name() == name);
        if let Some(pos) = pos {
            let client = self.clients.remove(pos);
            client.exit().await;
            println!("\r\x1b[2KClient disconnected: {name}");
        }
    }
}

/// Drive one client's inbound side: frame its bytes, trace and print each
/// line, and forward the raw bytes to the hub. Deregisters on EOF or error.
pub async fn client_reader(
    mut reader: ClientReader,
    name: String,
    trace: SharedTraceLog,
    hub_tx: Sender<Vec<u8>>,
    bus: Sender<Message>,
) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 1024];
    'session: loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(line) = framer.next_line() {
                    trace.lock().unwrap().output(&line.payload);
                    render::print_line(&render::client_request(&String::from_utf8_lossy(
                        &line.payload,
                    )));
                    if hub_tx.send(line.raw()).await.is_err() {
                        break 'session;
                    }
                }
            }
            Err(e) => {
                warn!(client = %name, error = %e, "client read failed");
                break;
            }
        }
    }
    let _ = bus.send(Message::DEREGISTER(name)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{self, TraceLog};
    use tokio::io::{AsyncReadExt, duplex};
    use tokio::sync::mpsc;
    use tokio::time::{Duration, timeout};

    fn make_client(name: &str) -> (Client, tokio::io::DuplexStream) {
        let (ours, theirs) = duplex(1024);
        (Client::new(Box::new(ours), name.to_owned()), theirs)
    }

    async fn read_some(side: &mut tokio::io::DuplexStream) -> Vec<u8> {
        let mut buf = [0u8; 256];
        let n = timeout(Duration::from_secs(1), side.read(&mut buf))
            .await
            .expect("read timeout")
            .expect("read");
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn relays_identical_bytes_to_every_client() {
        let (bus_tx, bus_rx) = mpsc::channel(16);
        let pool = ClientPool::new(bus_rx);
        let task = tokio::spawn(pool.begin());

        let (c1, mut peer1) = make_client("c1");
        let (c2, mut peer2) = make_client("c2");
        bus_tx.send(Message::CLIENT(c1)).await.unwrap();
        bus_tx.send(Message::CLIENT(c2)).await.unwrap();
        bus_tx
            .send(Message::HUB_LINE(b"{\"i\":\"abc\",\"r\":42}\r".to_vec()))
            .await
            .unwrap();

        assert_eq!(read_some(&mut peer1).await, b"{\"i\":\"abc\",\"r\":42}\r");
        assert_eq!(read_some(&mut peer2).await, b"{\"i\":\"abc\",\"r\":42}\r");

        bus_tx.send(Message::SHUTDOWN).await.unwrap();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("pool should stop")
            .expect("join");
    }

    #[tokio::test]
    async fn evicts_failing_client_and_keeps_the_rest() {
        let (bus_tx, bus_rx) = mpsc::channel(16);
        let pool = ClientPool::new(bus_rx);
        let task = tokio::spawn(pool.begin());

        let (good, mut good_peer) = make_client("good");
        let (bad, bad_peer) = make_client("bad");
        // Closing the peer makes the next write fail.
        drop(bad_peer);
        bus_tx.send(Message::CLIENT(bad)).await.unwrap();
        bus_tx.send(Message::CLIENT(good)).await.unwrap();

        bus_tx
            .send(Message::HUB_LINE(b"one\r".to_vec()))
            .await
            .unwrap();
        assert_eq!(read_some(&mut good_peer).await, b"one\r");

        // The evicted client is gone; later lines still arrive.
        bus_tx
            .send(Message::HUB_LINE(b"two\r".to_vec()))
            .await
            .unwrap();
        assert_eq!(read_some(&mut good_peer).await, b"two\r");

        bus_tx.send(Message::SHUTDOWN).await.unwrap();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("pool should stop")
            .expect("join");
    }

    #[tokio::test]
    async fn shutdown_closes_every_client() {
        let (bus_tx, bus_rx) = mpsc::channel(16);
        let pool = ClientPool::new(bus_rx);
        let task = tokio::spawn(pool.begin());

        let (client, mut peer) = make_client("c");
        bus_tx.send(Message::CLIENT(client)).await.unwrap();
        bus_tx.send(Message::SHUTDOWN).await.unwrap();
        task.await.unwrap();

        // EOF on the peer side proves the write half was shut down.
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(1), peer.read(&mut buf))
            .await
            .expect("read timeout")
            .expect("read");
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn deregister_removes_and_closes_once() {
        let (bus_tx, bus_rx) = mpsc::channel(16);
        let pool = ClientPool::new(bus_rx);
        let task = tokio::spawn(pool.begin());

        let (client, mut peer) = make_client("gone");
        bus_tx.send(Message::CLIENT(client)).await.unwrap();
        bus_tx
            .send(Message::DEREGISTER("gone".to_owned()))
            .await
            .unwrap();
        // A second deregister for the same name is a no-op.
        bus_tx
            .send(Message::DEREGISTER("gone".to_owned()))
            .await
            .unwrap();

        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(1), peer.read(&mut buf))
            .await
            .expect("read timeout")
            .expect("read");
        assert_eq!(n, 0);

        bus_tx.send(Message::SHUTDOWN).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn client_reader_forwards_raw_lines_and_deregisters_on_eof() {
        let (bus_tx, mut bus_rx) = mpsc::channel(16);
        let (hub_tx, mut hub_rx) = mpsc::channel(16);
        let trace = trace::shared(TraceLog::noop());

        let (mut peer, ours) = duplex(1024);
        let task = tokio::spawn(client_reader(
            Box::new(ours),
            "c1".to_owned(),
            trace,
            hub_tx,
            bus_tx,
        ));

        peer.write_all(b"{\"m\":\"program_execute\",\"p\":{\"slotid\":0},\"i\":\"x1\"}\r")
            .await
            .unwrap();
        let forwarded = timeout(Duration::from_secs(1), hub_rx.recv())
            .await
            .expect("forward timeout")
            .expect("forwarded line");
        assert_eq!(
            forwarded,
            b"{\"m\":\"program_execute\",\"p\":{\"slotid\":0},\"i\":\"x1\"}\r"
        );

        drop(peer);
        let msg = timeout(Duration::from_secs(1), bus_rx.recv())
            .await
            .expect("deregister timeout")
            .expect("message");
        match msg {
            Message::DEREGISTER(name) => assert_eq!(name, "c1"),
            other => panic!("expected DEREGISTER, got: {other:?}"),
        }
        task.await.unwrap();
    }

    #[tokio::test]
    async fn client_reader_logs_outbound_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let trace = trace::shared(TraceLog::file(&path).unwrap());

        let (bus_tx, mut bus_rx) = mpsc::channel(16);
        let (hub_tx, mut hub_rx) = mpsc::channel(16);
        let (mut peer, ours) = duplex(1024);
        let task = tokio::spawn(client_reader(
            Box::new(ours),
            "c1".to_owned(),
            trace,
            hub_tx,
            bus_tx,
        ));

        peer.write_all(b"hello\r\n").await.unwrap();
        let _ = timeout(Duration::from_secs(1), hub_rx.recv())
            .await
            .expect("forward timeout");
        drop(peer);
        let _ = bus_rx.recv().await;
        task.await.unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"> hello\n");
    }
}
