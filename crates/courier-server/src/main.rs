mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use courier_api::{Boundary, PeerControl};
use courier_db::Database;
use courier_gateway::transport::WsConnector;
use courier_gateway::{Connection, Dispatcher};
use courier_simulator::{EmitSchedule, PeerSimulator};
use courier_sink::{DeliverySink, DeliveryWorker};

use crate::config::Config;

/// Historic messages given to each seeded conversation.
const SEED_MESSAGES_PER_CONVERSATION: u32 = 3;

/// Lets the boundary force-drop the embedded simulator's connections.
struct SimulatorControl(PeerSimulator);

impl PeerControl for SimulatorControl {
    fn drop_connections(&self) -> usize {
        self.0.simulate_disconnect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier=debug,courier_api=debug,courier_gateway=debug,courier_sink=debug,\
                 courier_db=debug,courier_simulator=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    if config.seed_conversations > 0 {
        db.seed(config.seed_conversations, SEED_MESSAGES_PER_CONVERSATION)?;
    }

    let simulator = match config.simulator_port {
        Some(port) => {
            let addr = SocketAddr::new(config.listen_addr.ip(), port);
            let sim = PeerSimulator::bind(addr, db.conversation_ids()?, EmitSchedule::default()).await?;
            Some(sim)
        }
        None => None,
    };

    // Pipeline: connection -> dispatcher -> delivery worker -> store -> boundary
    let dispatcher = Dispatcher::new();
    let connection = Connection::new(
        Arc::new(WsConnector::new(config.peer_url.clone())),
        dispatcher.clone(),
        config.connection(),
    );
    let peer = simulator
        .clone()
        .map(|sim| Arc::new(SimulatorControl(sim)) as Arc<dyn PeerControl>);
    let boundary = Boundary::new(connection.clone(), &dispatcher, db.clone(), peer);
    let sink = DeliverySink::new(db.clone(), Arc::new(boundary.clone()));
    let worker = DeliveryWorker::spawn(sink, boundary.watch_focus());
    worker.attach(&dispatcher);

    connection.connect()?;

    let app = courier_api::router(boundary)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Courier listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    connection.disconnect().await;
    let stats = worker.shutdown().await;
    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "Delivery pipeline drained"
    );
    if let Some(sim) = simulator {
        sim.shutdown().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
