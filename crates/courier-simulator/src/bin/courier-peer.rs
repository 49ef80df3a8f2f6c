use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;

use courier_simulator::{EmitSchedule, PeerSimulator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,courier_simulator=debug".into()),
        )
        .init();

    let db_path = std::env::var("COURIER_DB_PATH").unwrap_or_else(|_| "courier.db".into());
    let host = std::env::var("COURIER_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("COURIER_SIMULATOR_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()?;

    // Only the known conversation ids are needed; the store is not kept open.
    let conversation_ids = {
        let db = courier_db::Database::open(&PathBuf::from(&db_path))?;
        db.conversation_ids()?
    };

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let simulator = PeerSimulator::bind(addr, conversation_ids, EmitSchedule::default()).await?;
    info!("Peer simulator listening on {}", simulator.url());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    simulator.shutdown().await;
    Ok(())
}
