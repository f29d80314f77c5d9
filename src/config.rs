use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::betting::markets::Market;
use crate::betting::selector::SelectionRules;
use crate::model::backtest::{BacktestConfig, Staking};
use crate::model::training::TrainingConfig;
use crate::synthetic::SyntheticConfig;

/// Football bet recommendation service
#[derive(Parser, Debug, Clone)]
#[command(name = "smartbets", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "smartbets.db", global = true)]
    pub database_path: String,

    /// Directory holding one `<market>_model.json` artifact per market
    #[arg(long, env = "MODELS_DIR", default_value = "models", global = true)]
    pub models_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API
    Serve(ServeArgs),
    /// Load a JSON ingestion batch (`{"matches": [...]}`) into the database
    Ingest {
        /// Path to the batch file
        file: PathBuf,
    },
    /// Generate a synthetic dataset
    Generate(GenerateArgs),
    /// Train, evaluate and promote per-market models from completed matches
    Train(TrainArgs),
    /// Walk-forward backtest of one market
    Backtest(BacktestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// API listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Minimum Smart-pick probability for a Golden Bet
    #[arg(long, env = "GOLDEN_THRESHOLD", default_value = "0.85")]
    pub golden_threshold: f64,

    /// Golden Bets per kickoff day
    #[arg(long, env = "GOLDEN_DAILY_CAP", default_value = "3")]
    pub golden_daily_cap: usize,

    /// Minimum value percentage for a Value Bet
    #[arg(long, env = "VALUE_MIN_PCT", default_value = "10.0")]
    pub value_min_pct: f64,

    /// Minimum expected value per unit staked for a Value Bet
    #[arg(long, env = "VALUE_MIN_EV", default_value = "0.05")]
    pub value_min_ev: f64,

    /// Value Bets returned per batch
    #[arg(long, env = "VALUE_CAP", default_value = "3")]
    pub value_cap: usize,

    /// Kelly multiplier for suggested Value Bet stakes (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.25")]
    pub kelly_fraction: f64,
}

impl ServeArgs {
    pub fn rules(&self) -> SelectionRules {
        SelectionRules {
            golden_threshold: self.golden_threshold,
            golden_daily_cap: self.golden_daily_cap,
            value_min_pct: self.value_min_pct,
            value_min_ev: self.value_min_ev,
            value_cap: self.value_cap,
            kelly_fraction: self.kelly_fraction,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Write the batch as JSON here instead of ingesting it
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, env = "SYNTHETIC_SEED", default_value = "42")]
    pub seed: u64,

    /// Completed matches to generate
    #[arg(long, default_value = "300")]
    pub historical: usize,

    /// Upcoming fixtures to generate
    #[arg(long, default_value = "200")]
    pub upcoming: usize,

    /// Consecutive months the completed matches are spread over
    #[arg(long, default_value = "24")]
    pub months: u32,
}

impl GenerateArgs {
    pub fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            seed: self.seed,
            historical: self.historical,
            upcoming: self.upcoming,
            months: self.months,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Promotion gate on held-out log loss
    #[arg(long, env = "MAX_LOG_LOSS", default_value = "0.70")]
    pub max_log_loss: f64,

    /// Promotion gate on held-out Brier score
    #[arg(long, env = "MAX_BRIER", default_value = "0.25")]
    pub max_brier: f64,

    /// Minimum labelled samples per market
    #[arg(long, default_value = "20")]
    pub min_samples: usize,
}

impl TrainArgs {
    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            min_samples: self.min_samples,
            max_log_loss: self.max_log_loss,
            max_brier: self.max_brier,
            ..Default::default()
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakingMode {
    Flat,
    Kelly,
}

#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    /// total_goals | total_cards | total_corners | btts
    #[arg(long, default_value = "total_goals")]
    pub market: String,

    #[arg(long, default_value = "12")]
    pub initial_train_months: u32,

    #[arg(long, default_value = "1")]
    pub step_months: u32,

    /// Bet when the model's probability reaches this
    #[arg(long, default_value = "0.6")]
    pub min_probability: f64,

    #[arg(long, value_enum, default_value = "flat")]
    pub staking: StakingMode,

    /// Stake per bet for flat staking
    #[arg(long, default_value = "1.0")]
    pub unit_stake: f64,

    /// Kelly multiplier for kelly staking
    #[arg(long, default_value = "0.25")]
    pub kelly_fraction: f64,

    #[arg(long, default_value = "1000.0")]
    pub bankroll: f64,

    /// Also write the summary as JSON here
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl BacktestArgs {
    pub fn backtest_config(&self) -> anyhow::Result<BacktestConfig> {
        Ok(BacktestConfig {
            market: Market::parse(&self.market)?,
            initial_train_months: self.initial_train_months,
            step_months: self.step_months,
            min_probability: self.min_probability,
            staking: match self.staking {
                StakingMode::Flat => Staking::Flat {
                    unit: self.unit_stake,
                },
                StakingMode::Kelly => Staking::Kelly {
                    fraction: self.kelly_fraction,
                },
            },
            initial_bankroll: self.bankroll,
            ..Default::default()
        })
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_path.trim().is_empty() {
            anyhow::bail!("database_path must not be empty");
        }
        match &self.command {
            Command::Serve(s) => {
                if !(0.0..=1.0).contains(&s.golden_threshold) {
                    anyhow::bail!("golden_threshold must be between 0.0 and 1.0");
                }
                if !(0.0..=1.0).contains(&s.kelly_fraction) {
                    anyhow::bail!("kelly_fraction must be between 0.0 and 1.0");
                }
                if s.value_min_pct < 0.0 {
                    anyhow::bail!("value_min_pct must not be negative");
                }
                if s.golden_daily_cap == 0 || s.value_cap == 0 {
                    anyhow::bail!("golden_daily_cap and value_cap must be at least 1");
                }
            }
            Command::Ingest { .. } => {}
            Command::Generate(g) => {
                if g.months == 0 {
                    anyhow::bail!("months must be at least 1");
                }
            }
            Command::Train(t) => {
                if t.max_log_loss <= 0.0 || !(0.0..=1.0).contains(&t.max_brier) {
                    anyhow::bail!("max_log_loss must be positive and max_brier within 0.0–1.0");
                }
                if t.min_samples < 10 {
                    anyhow::bail!("min_samples must be at least 10");
                }
            }
            Command::Backtest(b) => {
                Market::parse(&b.market)?;
                if b.step_months == 0 {
                    anyhow::bail!("step_months must be at least 1");
                }
                if !(0.0..=1.0).contains(&b.min_probability) {
                    anyhow::bail!("min_probability must be between 0.0 and 1.0");
                }
                if !(0.0..=1.0).contains(&b.kelly_fraction) {
                    anyhow::bail!("kelly_fraction must be between 0.0 and 1.0");
                }
                if b.bankroll <= 0.0 || b.unit_stake <= 0.0 {
                    anyhow::bail!("bankroll and unit_stake must be positive");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults_match_selection_rules() {
        let cfg = Config::try_parse_from(["smartbets", "serve"]).unwrap();
        cfg.validate().unwrap();
        let Command::Serve(serve) = &cfg.command else {
            panic!("expected serve");
        };
        let rules = serve.rules();
        let defaults = SelectionRules::default();
        assert_eq!(rules.golden_threshold, defaults.golden_threshold);
        assert_eq!(rules.value_cap, defaults.value_cap);
        assert_eq!(rules.kelly_fraction, defaults.kelly_fraction);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cfg = Config::try_parse_from([
            "smartbets",
            "train",
            "--database-path",
            "x.db",
            "--models-dir",
            "/tmp/m",
        ])
        .unwrap();
        assert_eq!(cfg.database_path, "x.db");
        assert_eq!(cfg.models_dir, PathBuf::from("/tmp/m"));
    }

    #[test]
    fn unknown_backtest_market_fails_validation() {
        let cfg = Config::try_parse_from(["smartbets", "backtest", "--market", "total_fouls"]).unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("total_fouls"));
    }

    #[test]
    fn kelly_staking_is_selected() {
        let cfg = Config::try_parse_from([
            "smartbets",
            "backtest",
            "--staking",
            "kelly",
            "--kelly-fraction",
            "0.5",
        ])
        .unwrap();
        let Command::Backtest(b) = &cfg.command else {
            panic!("expected backtest");
        };
        assert_eq!(
            b.backtest_config().unwrap().staking,
            Staking::Kelly { fraction: 0.5 }
        );
    }
}
