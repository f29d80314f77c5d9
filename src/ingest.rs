//! Batch ingestion of match records into the store.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::models::MatchRecord;
use crate::db::Database;

const STATUSES: [&str; 4] = ["scheduled", "live", "completed", "postponed"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchIngestRequest {
    pub matches: Vec<MatchRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub match_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    pub matches_processed: usize,
    pub matches_created: usize,
    pub matches_updated: usize,
    pub errors: Vec<ItemError>,
}

fn check_record(rec: &MatchRecord) -> Result<(), String> {
    if rec.match_id.trim().is_empty() {
        return Err("match_id must not be empty".into());
    }
    if rec.home_team_id == rec.away_team_id {
        return Err(format!("home and away team are both {}", rec.home_team_id));
    }
    if !STATUSES.contains(&rec.status.as_str()) {
        return Err(format!(
            "invalid status '{}'; valid values: {}",
            rec.status,
            STATUSES.join(", ")
        ));
    }
    for (name, value) in rec.fixture().present_stats() {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be a finite number >= 0, got {value}"));
        }
    }
    if let Some(result) = &rec.result {
        let counts = [
            Some(result.home_goals),
            Some(result.away_goals),
            result.home_corners,
            result.away_corners,
            result.home_cards,
            result.away_cards,
        ];
        if counts.into_iter().flatten().any(|c| c < 0) {
            return Err("result counts must not be negative".into());
        }
    }
    if let Some(odds) = &rec.odds {
        odds.validate().map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Store every record independently; failures are reported per item and do
/// not abort the batch.
pub fn ingest_batch(db: &Database, records: &[MatchRecord]) -> IngestResponse {
    let mut created = 0;
    let mut updated = 0;
    let mut errors = Vec::new();

    for rec in records {
        let outcome = check_record(rec).and_then(|_| db.upsert_match(rec).map_err(|e| format!("{e:#}")));
        match outcome {
            Ok(true) => created += 1,
            Ok(false) => updated += 1,
            Err(error) => {
                warn!("Skipping match {}: {}", rec.match_id, error);
                errors.push(ItemError {
                    match_id: rec.match_id.clone(),
                    error,
                });
            }
        }
    }

    info!(
        "Ingested {} matches ({} created, {} updated, {} failed)",
        records.len(),
        created,
        updated,
        errors.len()
    );

    IngestResponse {
        success: errors.is_empty(),
        message: if errors.is_empty() {
            "Batch ingestion completed".into()
        } else {
            "Batch ingestion completed with errors".into()
        },
        matches_processed: records.len(),
        matches_created: created,
        matches_updated: updated,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MarketOdds, MatchResult, TeamStats};
    use chrono::{TimeZone, Utc};

    fn record(id: &str) -> MatchRecord {
        MatchRecord {
            match_id: id.into(),
            match_datetime: Utc.with_ymd_and_hms(2024, 9, 14, 15, 0, 0).unwrap(),
            league: Some("Premier League".into()),
            season: Some("2024-25".into()),
            status: "completed".into(),
            home_team_id: "T1".into(),
            home_team: "Arsenal".into(),
            away_team_id: "T2".into(),
            away_team: "Chelsea".into(),
            team_stats_at_match_time: TeamStats {
                home_goals_avg: Some(1.9),
                ..Default::default()
            },
            odds: Some(MarketOdds {
                over_2_5: Some(1.85),
                ..Default::default()
            }),
            result: Some(MatchResult {
                home_goals: 2,
                away_goals: 1,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn created_then_updated() {
        let db = Database::open(":memory:").unwrap();
        let first = ingest_batch(&db, &[record("M1"), record("M2")]);
        assert!(first.success);
        assert_eq!(first.matches_created, 2);
        let again = ingest_batch(&db, &[record("M1")]);
        assert_eq!(again.matches_updated, 1);
        assert_eq!(again.matches_created, 0);
    }

    #[test]
    fn bad_items_are_reported_and_the_rest_stored() {
        let db = Database::open(":memory:").unwrap();
        let mut same_teams = record("BAD1");
        same_teams.away_team_id = "T1".into();
        let mut bad_odds = record("BAD2");
        bad_odds.odds = Some(MarketOdds {
            btts_yes: Some(0.9),
            ..Default::default()
        });
        let mut bad_status = record("BAD3");
        bad_status.status = "abandoned?".into();
        let mut bad_stats = record("BAD4");
        bad_stats.team_stats_at_match_time.away_cards_avg = Some(-1.0);

        let resp = ingest_batch(
            &db,
            &[record("OK"), same_teams, bad_odds, bad_status, bad_stats],
        );
        assert!(!resp.success);
        assert_eq!(resp.matches_processed, 5);
        assert_eq!(resp.matches_created, 1);
        let ids: Vec<&str> = resp.errors.iter().map(|e| e.match_id.as_str()).collect();
        assert_eq!(ids, vec!["BAD1", "BAD2", "BAD3", "BAD4"]);
        assert!(resp.errors[3].error.contains("away_cards_avg"));
        assert!(db.get_fixture("OK").unwrap().is_some());
        assert!(db.get_fixture("BAD2").unwrap().is_none());
    }
}
