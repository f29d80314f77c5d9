//! Reproducible synthetic dataset: completed matches with results and odds
//! plus upcoming fixtures, in ingestion format.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::db::models::{MarketOdds, MatchRecord, MatchResult, TeamStats};
use crate::ingest::BatchIngestRequest;

const TEAM_NAMES: [&str; 20] = [
    "Ashford Rovers",
    "Bramley Town",
    "Castlegate United",
    "Dunmore Athletic",
    "Eastwick City",
    "Fernhill Albion",
    "Glenbrook Wanderers",
    "Harrowby FC",
    "Ironbridge County",
    "Kingsmere Villa",
    "Lowther Park",
    "Marston Rangers",
    "Northfield Forest",
    "Oakham Borough",
    "Pendle Harriers",
    "Queensway Orient",
    "Redcliffe Argyle",
    "Stanmore Vale",
    "Thornton Hotspur",
    "Westholme Dynamo",
];

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub historical: usize,
    pub upcoming: usize,
    /// Historical matches are spread evenly over this many consecutive months
    pub months: u32,
    pub start: DateTime<Utc>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            seed: 42,
            historical: 300,
            upcoming: 200,
            months: 24,
            start: Utc.with_ymd_and_hms(2023, 1, 1, 15, 0, 0).single().unwrap_or_default(),
        }
    }
}

struct TeamProfile {
    id: String,
    name: &'static str,
    league: &'static str,
    attack: f64,
    defence: f64,
    corners: f64,
    cards: f64,
}

fn poisson(rng: &mut StdRng, lambda: f64) -> i32 {
    // Knuth; fine for the small rates used here
    let limit = (-lambda).exp();
    let mut k = 0;
    let mut p = 1.0;
    loop {
        p *= rng.gen::<f64>();
        if p <= limit {
            return k;
        }
        k += 1;
    }
}

fn poisson_cdf(k: i32, lambda: f64) -> f64 {
    let mut term = (-lambda).exp();
    let mut sum = term;
    for i in 1..=k {
        term *= lambda / i as f64;
        sum += term;
    }
    sum.min(1.0)
}

fn jitter(rng: &mut StdRng, value: f64, spread: f64) -> f64 {
    (value * rng.gen_range(1.0 - spread..1.0 + spread) * 100.0).round() / 100.0
}

fn form(rng: &mut StdRng, strength: f64) -> String {
    (0..5)
        .map(|_| {
            let r: f64 = rng.gen();
            if r < 0.25 + strength * 0.2 {
                'W'
            } else if r < 0.5 + strength * 0.1 {
                'D'
            } else {
                'L'
            }
        })
        .collect()
}

fn price(rng: &mut StdRng, probability: f64) -> f64 {
    // 5% margin, with noise so that some prices carry value
    let quoted = probability * 1.05 * rng.gen_range(0.88..1.12);
    ((1.0 / quoted.clamp(0.02, 0.99)) * 100.0).round() / 100.0
}

struct Rates {
    home_goals: f64,
    away_goals: f64,
    corners: f64,
    cards: f64,
}

fn odds_for(rng: &mut StdRng, r: &Rates) -> MarketOdds {
    let goals = r.home_goals + r.away_goals;
    let p_over25 = 1.0 - poisson_cdf(2, goals);
    let p_cards = 1.0 - poisson_cdf(3, r.cards);
    let p_corners = 1.0 - poisson_cdf(9, r.corners);
    let p_btts = (1.0 - (-r.home_goals).exp()) * (1.0 - (-r.away_goals).exp());
    let p_home = (0.45 + (r.home_goals - r.away_goals) * 0.15).clamp(0.1, 0.8);
    let p_draw = 0.25;
    MarketOdds {
        over_2_5: Some(price(rng, p_over25)),
        under_2_5: Some(price(rng, 1.0 - p_over25)),
        cards_over_3_5: Some(price(rng, p_cards)),
        cards_under_3_5: Some(price(rng, 1.0 - p_cards)),
        corners_over_9_5: Some(price(rng, p_corners)),
        corners_under_9_5: Some(price(rng, 1.0 - p_corners)),
        btts_yes: Some(price(rng, p_btts)),
        btts_no: Some(price(rng, 1.0 - p_btts)),
        home_win: Some(price(rng, p_home)),
        draw: Some(price(rng, p_draw)),
        away_win: Some(price(rng, (1.0 - p_home - p_draw).max(0.05))),
        bookmaker: Some("synthetic".into()),
    }
}

/// Generate the dataset. The same config always produces the same batch.
pub fn generate(cfg: &SyntheticConfig) -> BatchIngestRequest {
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let teams: Vec<TeamProfile> = TEAM_NAMES
        .into_iter()
        .enumerate()
        .map(|(i, name)| TeamProfile {
            id: format!("T{:03}", i + 1),
            name,
            league: if i < 10 { "Northern League" } else { "Southern League" },
            attack: rng.gen_range(0.8..2.2),
            defence: rng.gen_range(0.7..1.8),
            corners: rng.gen_range(4.0..7.5),
            cards: rng.gen_range(1.4..2.8),
        })
        .collect();

    let span_days = (cfg.months.max(1) as i64) * 30;
    let mut matches = Vec::with_capacity(cfg.historical + cfg.upcoming);
    let total = cfg.historical + cfg.upcoming;

    for i in 0..total {
        let completed = i < cfg.historical;
        let kickoff = if completed {
            cfg.start + Duration::days(i as i64 * span_days / cfg.historical.max(1) as i64)
        } else {
            let n = (i - cfg.historical) as i64;
            cfg.start + Duration::days(span_days + 1 + n / 10) + Duration::minutes((n % 10) * 15)
        };

        let h = rng.gen_range(0..teams.len());
        let mut a = rng.gen_range(0..teams.len() - 1);
        if a >= h {
            a += 1;
        }
        let (home, away) = (&teams[h], &teams[a]);

        let rates = Rates {
            home_goals: (home.attack + away.defence) / 2.0 * 1.1,
            away_goals: (away.attack + home.defence) / 2.0 * 0.9,
            corners: home.corners + away.corners,
            cards: home.cards + away.cards,
        };

        let stats = TeamStats {
            home_goals_avg: Some(jitter(&mut rng, home.attack, 0.15)),
            away_goals_avg: Some(jitter(&mut rng, away.attack, 0.15)),
            home_goals_conceded_avg: Some(jitter(&mut rng, home.defence, 0.15)),
            away_goals_conceded_avg: Some(jitter(&mut rng, away.defence, 0.15)),
            home_corners_avg: Some(jitter(&mut rng, home.corners, 0.15)),
            away_corners_avg: Some(jitter(&mut rng, away.corners, 0.15)),
            home_cards_avg: Some(jitter(&mut rng, home.cards, 0.15)),
            away_cards_avg: Some(jitter(&mut rng, away.cards, 0.15)),
            home_btts_rate: Some(jitter(&mut rng, 1.0 - (-home.attack).exp(), 0.1).min(1.0)),
            away_btts_rate: Some(jitter(&mut rng, 1.0 - (-away.attack).exp(), 0.1).min(1.0)),
            home_form: Some(form(&mut rng, home.attack / 2.2)),
            away_form: Some(form(&mut rng, away.attack / 2.2)),
        };

        let odds = odds_for(&mut rng, &rates);
        let result = completed.then(|| MatchResult {
            home_goals: poisson(&mut rng, rates.home_goals),
            away_goals: poisson(&mut rng, rates.away_goals),
            home_corners: Some(poisson(&mut rng, home.corners)),
            away_corners: Some(poisson(&mut rng, away.corners)),
            home_cards: Some(poisson(&mut rng, home.cards)),
            away_cards: Some(poisson(&mut rng, away.cards)),
        });

        let year = kickoff.year();
        matches.push(MatchRecord {
            match_id: if completed {
                format!("HM_{}_{:04}", year, i + 1)
            } else {
                format!("UF_{:04}", i - cfg.historical + 1)
            },
            match_datetime: kickoff,
            league: Some(home.league.to_string()),
            season: Some(format!("{}-{:02}", year, (year + 1) % 100)),
            status: if completed { "completed" } else { "scheduled" }.to_string(),
            home_team_id: home.id.clone(),
            home_team: home.name.to_string(),
            away_team_id: away.id.clone(),
            away_team: away.name.to_string(),
            team_stats_at_match_time: stats,
            odds: Some(odds),
            result,
        });
    }

    BatchIngestRequest { matches }
}
