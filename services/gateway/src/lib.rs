// gateway: owns the hub session and multiplexes client connections onto it.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use futures::{future::FutureExt, future::select_all, pin_mut};
use gateway_core::bus::Message;
use gateway_core::clients::ClientPool;
use gateway_core::connector::{ClientConnector, RfcommConnector};
use gateway_core::hub::HubConnection;
use gateway_core::trace::{self, TraceLog};
use gateway_core::transport::{HubTransport, TransportError};
use tokio::signal;
use tokio::sync::mpsc;

/// Which hub transport to open. Exactly one is chosen on the command line.
#[derive(Debug, Clone)]
pub enum HubChoice {
    Tty(String),
    Device(String),
    File(String),
}

pub struct GatewayConfig {
    pub bind_port: u16,
    pub bluetooth: bool,
    /// `None` disables trace logging.
    pub trace_path: Option<String>,
    pub hub: HubChoice,
}

/// Default trace file name, stamped with the start time.
pub fn default_trace_path() -> String {
    format!("trace-{}.log", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

async fn signal_handler() {
    signal::ctrl_c().await.unwrap();
}

pub async fn run(config: GatewayConfig) -> Result<(), TransportError> {
    let log = match &config.trace_path {
        Some(path) => TraceLog::file(Path::new(path))?,
        None => TraceLog::noop(),
    };
    let trace = trace::shared(log);

    let transport = match &config.hub {
        HubChoice::Tty(path) => HubTransport::open_serial(path)?,
        HubChoice::Device(addr) => HubTransport::connect_bluetooth(addr).await?,
        HubChoice::File(path) => HubTransport::open_replay(path)?,
    };

    // Two buses: pool messages fan hub lines out, the input channel funnels
    // client lines into the single hub writer.
    let (bus_tx, bus_rx) = mpsc::channel::<Message>(1000);
    let (hub_tx, input_rx) = mpsc::channel::<Vec<u8>>(1000);

    let pool = ClientPool::new(bus_rx);
    let connector = ClientConnector::new(
        config.bind_port,
        bus_tx.clone(),
        hub_tx.clone(),
        trace.clone(),
    )
    .await;
    let hub = HubConnection::new(transport, trace.clone(), bus_tx.clone(), input_rx);

    let fut_hub = hub.begin().fuse();
    let fut_pool = pool.begin().fuse();
    let fut_conn = connector.begin().fuse();
    let fut_sig = signal_handler().fuse();

    if config.bluetooth {
        let rfcomm = RfcommConnector::new(bus_tx.clone(), hub_tx.clone(), trace.clone());
        let fut_rfcomm = rfcomm.begin().fuse();
        pin_mut!(fut_hub, fut_pool, fut_conn, fut_sig, fut_rfcomm);
        let futures: Vec<Pin<&mut dyn Future<Output = ()>>> =
            vec![fut_hub, fut_pool, fut_conn, fut_sig, fut_rfcomm];
        select_all(futures).await;
    } else {
        pin_mut!(fut_hub, fut_pool, fut_conn, fut_sig);
        let futures: Vec<Pin<&mut dyn Future<Output = ()>>> =
            vec![fut_hub, fut_pool, fut_conn, fut_sig];
        select_all(futures).await;
    }

    // If any worker finishes, end the program; the pool may already be gone,
    // so a best-effort shutdown is all that is left.
    let _ = bus_tx.try_send(Message::SHUTDOWN);
    Ok(())
}
