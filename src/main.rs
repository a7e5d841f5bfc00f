use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use marquee_server::config::Config;
use marquee_server::gateway::{MockGateway, PaymentGateway, PayosGateway};
use marquee_server::routes::create_routes;
use marquee_server::services::Sweeper;
use marquee_server::state::AppState;
use marquee_server::store::{InventoryStore, MemoryStore, PostgresStore};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marquee_server=debug,info".into()),
        )
        .init();

    let config = Config::from_env();

    let store: Arc<dyn InventoryStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Successfully connected to database");

            let store = PostgresStore::new(pool);
            store.migrate().await.expect("Failed to run migrations");
            tracing::info!("Migrations run successfully");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (development only)");
            Arc::new(MemoryStore::new())
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match config.payos.clone() {
        Some(payos) => Arc::new(
            PayosGateway::new(payos).expect("Failed to construct PayOS client"),
        ),
        None => {
            tracing::warn!("PayOS credentials not set, using mock gateway (development only)");
            Arc::new(MockGateway::new("dev-checksum-key"))
        }
    };

    let state = AppState::new(store.clone(), gateway, &config);

    let sweeper = Sweeper::new(store, config.sweep_interval);
    tokio::spawn(sweeper.run());

    let app: Router = create_routes(state);

    tracing::info!("🎬 Server running at http://{}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
