use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

mod api;
mod betting;
mod config;
mod db;
mod error;
mod ingest;
mod model;
mod synthetic;

use api::AppState;
use betting::Predictor;
use config::{BacktestArgs, Command, Config, GenerateArgs, ServeArgs, TrainArgs};
use db::Database;
use ingest::BatchIngestRequest;
use model::oracle::OracleSet;
use model::training::TrainingOutcome;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    match &config.command {
        Command::Serve(args) => serve(&config, db, args).await,
        Command::Ingest { file } => ingest_file(&db, file),
        Command::Generate(args) => generate(&db, args),
        Command::Train(args) => train(&config, &db, args),
        Command::Backtest(args) => backtest(&db, args),
    }
}

async fn serve(config: &Config, db: Database, args: &ServeArgs) -> Result<()> {
    let oracles = OracleSet::load_dir(&config.models_dir)
        .with_context(|| format!("loading models from {}", config.models_dir.display()))?;
    let predictor = Predictor::new(oracles);
    if !predictor.all_available() {
        warn!("🟡 Not every market has a model – prediction endpoints will answer 503 until `train` is run");
    }

    let app = api::router(AppState {
        db,
        predictor: Arc::new(predictor),
        rules: args.rules(),
    });
    let addr: SocketAddr = args.listen_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;
    Ok(())
}

fn ingest_file(db: &Database, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let batch: BatchIngestRequest =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
    let resp = ingest::ingest_batch(db, &batch.matches);
    info!(
        "{} ({} created, {} updated)",
        resp.message, resp.matches_created, resp.matches_updated
    );
    for e in &resp.errors {
        warn!("  {}: {}", e.match_id, e.error);
    }
    Ok(())
}

fn generate(db: &Database, args: &GenerateArgs) -> Result<()> {
    let batch = synthetic::generate(&args.synthetic_config());
    info!(
        "Generated {} completed matches and {} upcoming fixtures (seed {})",
        args.historical, args.upcoming, args.seed
    );
    match &args.output {
        Some(path) => {
            std::fs::write(path, serde_json::to_vec_pretty(&batch)?)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote dataset to {}", path.display());
        }
        None => {
            let resp = ingest::ingest_batch(db, &batch.matches);
            info!("{} ({} created)", resp.message, resp.matches_created);
        }
    }
    Ok(())
}

fn train(config: &Config, db: &Database, args: &TrainArgs) -> Result<()> {
    let matches = db.list_completed_matches()?;
    let reports = model::training::train_all(&matches, &config.models_dir, &args.training_config());

    let mut promoted = 0;
    for r in &reports {
        match &r.outcome {
            TrainingOutcome::Promoted {
                version,
                path,
                metrics,
            } => {
                promoted += 1;
                info!(
                    "✅ {:<14} v{} ({} samples, logloss {:.4}, brier {:.4}, auc {:.3}) → {}",
                    r.market.id(),
                    version,
                    r.samples,
                    metrics.log_loss,
                    metrics.brier,
                    metrics.auc,
                    path.display()
                );
            }
            TrainingOutcome::Rejected { reason, metrics } => {
                warn!("❌ {:<14} {} ({} samples)", r.market.id(), reason, r.samples);
                if let Some(m) = metrics {
                    warn!(
                        "   held-out logloss {:.4}, brier {:.4}, accuracy {:.3}",
                        m.log_loss, m.brier, m.accuracy
                    );
                }
            }
        }
    }
    if promoted == 0 {
        anyhow::bail!("no market model was promoted");
    }
    Ok(())
}

fn backtest(db: &Database, args: &BacktestArgs) -> Result<()> {
    let cfg = args.backtest_config()?;
    let matches = db.list_completed_matches()?;
    let summary = model::backtest::run_on_matches(&matches, &cfg)?;

    for p in &summary.periods {
        info!(
            "Period {:>2}: train months {}..{} ({} matches), test month {}..{}: {} bets, win rate {:.1}%, ROI {:.2}%",
            p.index + 1,
            p.train_window.start,
            p.train_window.end,
            p.train_samples,
            p.test_window.start,
            p.test_window.end,
            p.bets_placed,
            p.win_rate * 100.0,
            p.roi
        );
    }
    info!(
        "{}: {} periods, {} bets, win rate {:.1}%, staked {:.2}, returned {:.2}, profit {:.2}, ROI {:.2}%, Sharpe {:.3}, max drawdown {:.2}%",
        summary.market,
        summary.total_periods,
        summary.total_bets,
        summary.win_rate * 100.0,
        summary.total_staked,
        summary.total_return,
        summary.profit,
        summary.roi,
        summary.sharpe_ratio,
        summary.max_drawdown * 100.0
    );

    if let Some(path) = &args.output {
        std::fs::write(path, serde_json::to_vec_pretty(&summary)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote backtest summary to {}", path.display());
    }
    Ok(())
}
