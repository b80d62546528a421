use std::sync::Arc;
use swe_index_orchestrator::{
    config::ScoringPolicy,
    external::ExternalDataCollector,
    providers::build_default_providers,
    retry::RetryPolicy,
    scoring::ScoreOrchestrator,
    state::build_state_store,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    info!("SWE Index Orchestrator - one-shot daily run");

    // Create components
    let store = build_state_store();
    let providers = build_default_providers();
    let policy = ScoringPolicy::from_env();
    let retry = RetryPolicy::default();

    let collector = ExternalDataCollector::new(
        ExternalDataCollector::default_sources(),
        RetryPolicy::default(),
    );

    let orchestrator = Arc::new(ScoreOrchestrator::new(
        Arc::clone(&store),
        providers,
        policy,
        retry,
    ));

    // Fetch phase, then score phase.
    let fetched = collector.refresh(store.as_ref()).await;
    info!(fetched, "external data refresh finished");

    let today = chrono::Utc::now().date_naive();

    match orchestrator.run_daily_update(today).await {
        Ok(outcome) => {
            println!("\n=== DAILY UPDATE ===");
            println!("Date:   {}", outcome.date);
            println!("Score:  {}", outcome.score);
            println!("Delta:  {:+.1}", outcome.delta);
            if outcome.already_exists {
                println!("(snapshot already existed; nothing was recomputed)");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Daily update failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
