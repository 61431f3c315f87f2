//! Client listeners.
//!
//! The TCP listener accepts any number of local clients; the RFCOMM
//! listener advertises the Serial Port Profile and accepts exactly one
//! remote client. Both split the accepted stream, push the write half onto
//! the pool bus and spawn a reader task for the other half.

use bluer::rfcomm::{Profile, Role};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tracing::warn;
use uuid::{Uuid, uuid};

use crate::bus::Message;
use crate::clients::{Client, client_reader};
use crate::trace::SharedTraceLog;
use crate::transport::RFCOMM_CHANNEL;

/// Serial Port Profile service UUID advertised to RFCOMM clients.
pub const SPP_SERVICE_UUID: Uuid = uuid!("94f39d29-7d6d-437d-973b-fba39e49d4ee");

/// Accepts TCP clients and hands them to the pool.
pub struct ClientConnector {
    listener: TcpListener,
    bus: Sender<Message>,
    hub_tx: Sender<Vec<u8>>,
    trace: SharedTraceLog,
}

impl ClientConnector {
    pub async fn new(
        bind_port: u16,
        bus: Sender<Message>,
        hub_tx: Sender<Vec<u8>>,
        trace: SharedTraceLog,
    ) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", bind_port))
            .await
            .expect("Unable to bind to port");
        println!(
            "Listening on localhost:{}",
            listener.local_addr().unwrap().port()
        );

        ClientConnector {
            listener,
            bus,
            hub_tx,
            trace,
        }
    }

    /// Accept clients until the bus goes away.
    ///
    /// This function should never return.
    pub async fn begin(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let (read_half, write_half) = stream.into_split();
                    let name = addr.to_string();
                    let client = Client::new(Box::new(write_half), name.clone());
                    tokio::spawn(client_reader(
                        Box::new(read_half),
                        name,
                        self.trace.clone(),
                        self.hub_tx.clone(),
                        self.bus.clone(),
                    ));
                    if self.bus.send(Message::CLIENT(client)).await.is_err() {
                        println!("\r\x1b[2KClient bus unavailable, stopping connector.");
                        return;
                    }
                    println!("\r\x1b[2KConnected to client: {addr}");
                }
                Err(error) => {
                    println!("\r\x1b[2KFailed to connect to client: {error}");
                }
            }
        }
    }
}

/// Advertises the Serial Port Profile and accepts exactly one RFCOMM client.
pub struct RfcommConnector {
    bus: Sender<Message>,
    hub_tx: Sender<Vec<u8>>,
    trace: SharedTraceLog,
}

impl RfcommConnector {
    pub fn new(bus: Sender<Message>, hub_tx: Sender<Vec<u8>>, trace: SharedTraceLog) -> Self {
        RfcommConnector { bus, hub_tx, trace }
    }

    /// Register the profile and accept one client, then park so the rest of
    /// the gateway keeps running; the hub side owns process lifetime.
    pub async fn begin(self) {
        if let Err(e) = self.accept_one().await {
            warn!(error = %e, "rfcomm listener failed");
        }
        std::future::pending::<()>().await;
    }

    async fn accept_one(&self) -> bluer::Result<()> {
        let session = bluer::Session::new().await?;
        let profile = Profile {
            uuid: SPP_SERVICE_UUID,
            name: Some("Hub Gateway".to_owned()),
            channel: Some(RFCOMM_CHANNEL.into()),
            role: Some(Role::Server),
            require_authorization: Some(false),
            ..Default::default()
        };
        let mut handle = session.register_profile(profile).await?;
        println!("Waiting for connection on RFCOMM channel {RFCOMM_CHANNEL}");

        let Some(request) = handle.next().await else {
            return Ok(());
        };
        let peer = request.device();
        match request.accept() {
            Ok(stream) => {
                println!("Accepted connection from {peer}");
                let name = format!("rfcomm:{peer}");
                let (read_half, write_half) = tokio::io::split(stream);
                let client = Client::new(Box::new(write_half), name.clone());
                tokio::spawn(client_reader(
                    Box::new(read_half),
                    name,
                    self.trace.clone(),
                    self.hub_tx.clone(),
                    self.bus.clone(),
                ));
                if self.bus.send(Message::CLIENT(client)).await.is_err() {
                    println!("\r\x1b[2KClient bus unavailable, dropping rfcomm client.");
                }
            }
            Err(e) => warn!(error = %e, "rfcomm accept failed"),
        }
        Ok(())
    }
}
