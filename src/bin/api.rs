use std::sync::Arc;
use std::time::Duration;
use swe_index_orchestrator::{
    api::start_server,
    config::ScoringPolicy,
    external::ExternalDataCollector,
    providers::build_default_providers,
    retry::RetryPolicy,
    scheduler::DailyScheduler,
    scoring::ScoreOrchestrator,
    state::build_state_store,
};
use tracing::info;

/// Scheduler tick spacing; idempotency makes frequent ticks safe.
const TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("SWE Index Orchestrator - API server");
    info!("Port: {}", api_port);

    // Create components
    let store = build_state_store();
    let providers = build_default_providers();
    let policy = ScoringPolicy::from_env();

    let orchestrator = Arc::new(ScoreOrchestrator::new(
        store,
        providers,
        policy,
        RetryPolicy::default(),
    ));

    // Background scheduler: fetch + score once per day, retrying
    // partially-failed dates on later ticks.
    let scheduler = DailyScheduler::new(
        Arc::clone(&orchestrator),
        ExternalDataCollector::new(
            ExternalDataCollector::default_sources(),
            RetryPolicy::default(),
        ),
        TICK_INTERVAL,
    );
    tokio::spawn(async move { scheduler.run().await });

    info!("Orchestrator initialized, starting API server");

    start_server(orchestrator, api_port).await?;

    Ok(())
}
