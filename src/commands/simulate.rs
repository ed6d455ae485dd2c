use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use uuid::Uuid;

use feedmix::catalog::{MemoryCatalog, MemoryStore, SourceError};
use feedmix::config::Config;
use feedmix::models::{Item, Source};
use feedmix::orchestrator::{GetOptions, Orchestrator};

pub struct SimulateParams {
    pub sources: usize,
    pub failure_rate: f64,
    pub limit: Option<usize>,
    pub rounds: usize,
    pub seed: Option<u64>,
    pub format: String,
    pub metrics: bool,
}

/// Build a synthetic catalog: sources of uneven size and priority
async fn synthetic_catalog(rng: &mut StdRng, sources: usize) -> Arc<MemoryCatalog> {
    let catalog = Arc::new(MemoryCatalog::new());
    let now = Utc::now();

    for n in 0..sources {
        let id = format!("source-{n:02}");
        let item_count = rng.gen_range(3..40);
        let items = (0..item_count)
            .map(|i| {
                let age = ChronoDuration::minutes(rng.gen_range(0..48 * 60));
                let mut item = Item::new(
                    id.as_str(),
                    Uuid::new_v4().to_string(),
                    format!("{id} story {i}"),
                    format!("https://{id}.example/stories/{i}"),
                )
                .published(now - age);
                item.author = Some(format!("author-{}", rng.gen_range(0..5)));
                item
            })
            .collect();

        let source = Source::new(id.as_str(), format!("Source {n}"), format!("https://{id}.example"))
            .with_priority(rng.gen_range(0..10));
        catalog.add_source(source, items).await;
    }

    catalog
}

/// Re-roll which sources fail this round
async fn roll_failures(rng: &mut StdRng, catalog: &MemoryCatalog, sources: usize, rate: f64) {
    for n in 0..sources {
        let id = format!("source-{n:02}");
        let failure = rng
            .gen_bool(rate)
            .then(|| SourceError::transient("simulated upstream failure"));
        catalog.set_failure(&id, failure).await;
    }
}

pub async fn simulate(config: Config, params: SimulateParams) -> Result<()> {
    if !(0.0..=1.0).contains(&params.failure_rate) {
        bail!("--failure-rate must be within [0, 1]");
    }
    if !matches!(params.format.as_str(), "text" | "json") {
        bail!("--format must be 'text' or 'json'");
    }

    if let Err(e) = feedmix::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let catalog = synthetic_catalog(&mut rng, params.sources).await;
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(config, catalog.clone())
        .context("Failed to build orchestrator")?
        .with_store(store);

    let options = GetOptions {
        limit: params.limit,
        ..Default::default()
    };

    let mut items = Vec::new();
    for round in 0..params.rounds.max(1) {
        roll_failures(&mut rng, &catalog, params.sources, params.failure_rate).await;
        items = orchestrator.get_balanced_items(&options).await;
        tracing::info!(round, items = items.len(), "Simulation round complete");
    }

    let diversity = orchestrator.get_diversity_report(None).await;
    let health = orchestrator.get_source_health_report().await?;
    let diagnostics = orchestrator.last_run().await;

    if params.format == "json" {
        let output = serde_json::json!({
            "items": items,
            "diversity": diversity,
            "health": health,
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Balanced batch ({} items)", items.len());
    for item in &items {
        println!("  {} [{}] {}", item.recency().format("%Y-%m-%d %H:%M"), item.source_id, item.title);
    }

    println!(
        "\nDiversity: valid {}, {} sources, balance {:.3}, gini {:.3}, entropy {:.3}",
        diversity.is_valid,
        diversity.distinct_source_count,
        diversity.metrics.balance_index,
        diversity.metrics.gini,
        diversity.metrics.entropy
    );
    for issue in diversity.issues.iter().chain(&health.recommendations) {
        println!("  - {issue}");
    }

    println!(
        "\nSource health: {} total, {} active, {} quarantined, {} inactive",
        health.total_sources, health.active_sources, health.quarantined_sources, health.inactive_sources
    );
    for failed in &health.failed_sources {
        println!(
            "  {} ({}): {} failures, recovery {}",
            failed.source_id, failed.state, failed.consecutive_failures, failed.recovery.action
        );
    }

    if let Some(diag) = diagnostics {
        println!(
            "\nLast run: strategy {}, fallback {}, {} errors, {}ms",
            diag.strategy_used.as_deref().unwrap_or("none"),
            diag.used_fallback,
            diag.errors.len(),
            diag.elapsed_ms
        );
    }

    if params.metrics {
        match feedmix::metrics::encode_metrics() {
            Ok(text) => print!("{text}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    Ok(())
}
