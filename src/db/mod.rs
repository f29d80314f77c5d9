use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    /// `":memory:"` gives a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Matches ───────────────────────────────────────────────────────────────

    /// Upsert a match together with its teams, odds and result.
    ///
    /// Returns `true` when the match was created, `false` when it already
    /// existed and was updated.
    pub fn upsert_match(&self, rec: &MatchRecord) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        upsert_team(&tx, &rec.home_team_id, &rec.home_team, rec.league.as_deref())?;
        upsert_team(&tx, &rec.away_team_id, &rec.away_team, rec.league.as_deref())?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM matches WHERE match_id = ?1",
                params![rec.match_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        let now = Utc::now();
        if exists {
            tx.execute(
                "UPDATE matches SET match_datetime=?1, status=?2, updated_at=?3 WHERE match_id=?4",
                params![rec.match_datetime, rec.status, now, rec.match_id],
            )?;
        } else {
            let s = &rec.team_stats_at_match_time;
            tx.execute(
                "INSERT INTO matches (
                    match_id, home_team_id, away_team_id, match_datetime, league, season, status,
                    home_goals_avg, away_goals_avg, home_goals_conceded_avg, away_goals_conceded_avg,
                    home_corners_avg, away_corners_avg, home_cards_avg, away_cards_avg,
                    home_btts_rate, away_btts_rate, home_form, away_form,
                    created_at, updated_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?20)",
                params![
                    rec.match_id,
                    rec.home_team_id,
                    rec.away_team_id,
                    rec.match_datetime,
                    rec.league,
                    rec.season,
                    rec.status,
                    s.home_goals_avg,
                    s.away_goals_avg,
                    s.home_goals_conceded_avg,
                    s.away_goals_conceded_avg,
                    s.home_corners_avg,
                    s.away_corners_avg,
                    s.home_cards_avg,
                    s.away_cards_avg,
                    s.home_btts_rate,
                    s.away_btts_rate,
                    s.home_form,
                    s.away_form,
                    now,
                ],
            )?;
        }

        if let Some(odds) = &rec.odds {
            insert_latest_odds(&tx, &rec.match_id, odds)?;
        }
        if let Some(result) = &rec.result {
            tx.execute(
                "INSERT INTO match_results (
                    match_id, home_goals, away_goals, home_corners, away_corners,
                    home_cards, away_cards, recorded_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
                 ON CONFLICT(match_id) DO UPDATE SET
                    home_goals=excluded.home_goals,
                    away_goals=excluded.away_goals,
                    home_corners=excluded.home_corners,
                    away_corners=excluded.away_corners,
                    home_cards=excluded.home_cards,
                    away_cards=excluded.away_cards,
                    recorded_at=excluded.recorded_at",
                params![
                    rec.match_id,
                    result.home_goals,
                    result.away_goals,
                    result.home_corners,
                    result.away_corners,
                    result.home_cards,
                    result.away_cards,
                    now,
                ],
            )?;
        }

        tx.commit()?;
        Ok(!exists)
    }

    /// Load the stored pre-match snapshot for a match.
    pub fn get_fixture(&self, match_id: &str) -> Result<Option<Fixture>> {
        let conn = self.conn()?;
        let fixture = conn
            .query_row(
                &format!("{FIXTURE_SELECT} WHERE m.match_id = ?1"),
                params![match_id],
                map_fixture,
            )
            .optional()?;
        Ok(fixture)
    }

    /// List matches ordered by kickoff. `status = None` lists everything.
    pub fn list_matches(&self, status: Option<&str>, limit: i64) -> Result<Vec<MatchSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.match_id, h.team_name, a.team_name, m.match_datetime, m.league, m.status
             FROM matches m
             JOIN teams h ON h.team_id = m.home_team_id
             JOIN teams a ON a.team_id = m.away_team_id
             WHERE (?1 IS NULL OR m.status = ?1)
             ORDER BY m.match_datetime LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status, limit], |row| {
                Ok(MatchSummary {
                    match_id: row.get(0)?,
                    home_team: row.get(1)?,
                    away_team: row.get(2)?,
                    match_datetime: row.get(3)?,
                    league: row.get(4)?,
                    status: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All matches with a recorded result, in kickoff order.
    pub fn list_completed_matches(&self) -> Result<Vec<CompletedMatch>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{FIXTURE_SELECT_WITH_RESULT} ORDER BY m.match_datetime, m.match_id"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let fixture = map_fixture(row)?;
                let kickoff: DateTime<Utc> = row.get(5)?;
                let result = MatchResult {
                    home_goals: row.get(FIXTURE_COLUMNS)?,
                    away_goals: row.get(FIXTURE_COLUMNS + 1)?,
                    home_corners: row.get(FIXTURE_COLUMNS + 2)?,
                    away_corners: row.get(FIXTURE_COLUMNS + 3)?,
                    home_cards: row.get(FIXTURE_COLUMNS + 4)?,
                    away_cards: row.get(FIXTURE_COLUMNS + 5)?,
                };
                Ok((fixture, kickoff, result))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut odds_stmt = conn.prepare(&format!(
            "{ODDS_SELECT} WHERE match_id = ?1 AND is_latest = 1"
        ))?;
        let mut out = Vec::with_capacity(rows.len());
        for (fixture, kickoff, result) in rows {
            let odds = odds_stmt
                .query_row(params![fixture.match_id], map_odds)
                .optional()?;
            out.push(CompletedMatch {
                fixture,
                kickoff,
                result,
                odds,
            });
        }
        Ok(out)
    }

    // ── Teams ─────────────────────────────────────────────────────────────────

    pub fn list_teams(&self, limit: i64) -> Result<Vec<Team>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT team_id, team_name, league FROM teams ORDER BY team_name LIMIT ?1",
        )?;
        let teams = stmt
            .query_map(params![limit], |row| {
                Ok(Team {
                    team_id: row.get(0)?,
                    team_name: row.get(1)?,
                    league: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(teams)
    }

    // ── Odds ──────────────────────────────────────────────────────────────────

    /// Record a new odds snapshot and make it the only latest one for the match.
    pub fn insert_odds(&self, match_id: &str, odds: &MarketOdds) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = insert_latest_odds(&tx, match_id, odds)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn latest_odds(&self, match_id: &str) -> Result<Option<MarketOdds>> {
        let conn = self.conn()?;
        let odds = conn
            .query_row(
                &format!("{ODDS_SELECT} WHERE match_id = ?1 AND is_latest = 1"),
                params![match_id],
                map_odds,
            )
            .optional()?;
        Ok(odds)
    }

    // ── Recommendations ───────────────────────────────────────────────────────

    pub fn save_recommendation(&self, rec: &StoredRecommendation) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO recommendations (
                match_id, strategy, market_id, selection_id, probability,
                score, rank, explanation, created_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                rec.match_id,
                rec.strategy,
                rec.market_id,
                rec.selection_id,
                rec.probability,
                rec.score,
                rec.rank,
                rec.explanation,
                rec.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent recommendations of one strategy
    pub fn list_recommendations(&self, strategy: &str, limit: i64) -> Result<Vec<StoredRecommendation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, match_id, strategy, market_id, selection_id, probability,
                    score, rank, explanation, created_at
             FROM recommendations WHERE strategy = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![strategy, limit], |row| {
                Ok(StoredRecommendation {
                    id: row.get(0)?,
                    match_id: row.get(1)?,
                    strategy: row.get(2)?,
                    market_id: row.get(3)?,
                    selection_id: row.get(4)?,
                    probability: row.get(5)?,
                    score: row.get(6)?,
                    rank: row.get(7)?,
                    explanation: row.get(8)?,
                    created_at: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn upsert_team(conn: &Connection, team_id: &str, name: &str, league: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO teams (team_id, team_name, league) VALUES (?1, ?2, ?3)
         ON CONFLICT(team_id) DO UPDATE SET
            team_name=excluded.team_name,
            league=COALESCE(excluded.league, teams.league)",
        params![team_id, name, league],
    )?;
    Ok(())
}

fn insert_latest_odds(conn: &Connection, match_id: &str, odds: &MarketOdds) -> Result<i64> {
    conn.execute(
        "UPDATE match_odds SET is_latest = 0 WHERE match_id = ?1 AND is_latest = 1",
        params![match_id],
    )?;
    conn.execute(
        "INSERT INTO match_odds (
            match_id, over_2_5, under_2_5, cards_over_3_5, cards_under_3_5,
            corners_over_9_5, corners_under_9_5, btts_yes, btts_no,
            home_win, draw, away_win, bookmaker, is_latest, recorded_at
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,1,?14)",
        params![
            match_id,
            odds.over_2_5,
            odds.under_2_5,
            odds.cards_over_3_5,
            odds.cards_under_3_5,
            odds.corners_over_9_5,
            odds.corners_under_9_5,
            odds.btts_yes,
            odds.btts_no,
            odds.home_win,
            odds.draw,
            odds.away_win,
            odds.bookmaker,
            Utc::now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Number of columns produced by `FIXTURE_SELECT` before any extras.
const FIXTURE_COLUMNS: usize = 19;

const FIXTURE_SELECT: &str = "SELECT m.match_id, m.home_team_id, h.team_name, m.away_team_id, a.team_name,
        m.match_datetime, m.league,
        m.home_goals_avg, m.away_goals_avg, m.home_goals_conceded_avg, m.away_goals_conceded_avg,
        m.home_corners_avg, m.away_corners_avg, m.home_cards_avg, m.away_cards_avg,
        m.home_btts_rate, m.away_btts_rate, m.home_form, m.away_form
     FROM matches m
     JOIN teams h ON h.team_id = m.home_team_id
     JOIN teams a ON a.team_id = m.away_team_id";

const FIXTURE_SELECT_WITH_RESULT: &str = "SELECT m.match_id, m.home_team_id, h.team_name, m.away_team_id, a.team_name,
        m.match_datetime, m.league,
        m.home_goals_avg, m.away_goals_avg, m.home_goals_conceded_avg, m.away_goals_conceded_avg,
        m.home_corners_avg, m.away_corners_avg, m.home_cards_avg, m.away_cards_avg,
        m.home_btts_rate, m.away_btts_rate, m.home_form, m.away_form,
        r.home_goals, r.away_goals, r.home_corners, r.away_corners, r.home_cards, r.away_cards
     FROM matches m
     JOIN teams h ON h.team_id = m.home_team_id
     JOIN teams a ON a.team_id = m.away_team_id
     JOIN match_results r ON r.match_id = m.match_id";

const ODDS_SELECT: &str = "SELECT over_2_5, under_2_5, cards_over_3_5, cards_under_3_5,
        corners_over_9_5, corners_under_9_5, btts_yes, btts_no,
        home_win, draw, away_win, bookmaker
     FROM match_odds";

fn map_fixture(row: &rusqlite::Row) -> rusqlite::Result<Fixture> {
    Ok(Fixture {
        match_id: row.get(0)?,
        home_team_id: row.get(1)?,
        home_team: row.get(2)?,
        away_team_id: row.get(3)?,
        away_team: row.get(4)?,
        match_datetime: row.get(5)?,
        league: row.get(6)?,
        home_goals_avg: row.get(7)?,
        away_goals_avg: row.get(8)?,
        home_goals_conceded_avg: row.get(9)?,
        away_goals_conceded_avg: row.get(10)?,
        home_corners_avg: row.get(11)?,
        away_corners_avg: row.get(12)?,
        home_cards_avg: row.get(13)?,
        away_cards_avg: row.get(14)?,
        home_btts_rate: row.get(15)?,
        away_btts_rate: row.get(16)?,
        home_form: row.get(17)?,
        away_form: row.get(18)?,
        ..Default::default()
    })
}

fn map_odds(row: &rusqlite::Row) -> rusqlite::Result<MarketOdds> {
    Ok(MarketOdds {
        over_2_5: row.get(0)?,
        under_2_5: row.get(1)?,
        cards_over_3_5: row.get(2)?,
        cards_under_3_5: row.get(3)?,
        corners_over_9_5: row.get(4)?,
        corners_under_9_5: row.get(5)?,
        btts_yes: row.get(6)?,
        btts_no: row.get(7)?,
        home_win: row.get(8)?,
        draw: row.get(9)?,
        away_win: row.get(10)?,
        bookmaker: row.get(11)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS teams (
    team_id     TEXT    PRIMARY KEY,
    team_name   TEXT    NOT NULL,
    league      TEXT
);

CREATE TABLE IF NOT EXISTS matches (
    match_id                 TEXT    PRIMARY KEY,
    home_team_id             TEXT    NOT NULL,
    away_team_id             TEXT    NOT NULL,
    match_datetime           TEXT    NOT NULL,
    league                   TEXT,
    season                   TEXT,
    status                   TEXT    NOT NULL DEFAULT 'scheduled',
    home_goals_avg           REAL,
    away_goals_avg           REAL,
    home_goals_conceded_avg  REAL,
    away_goals_conceded_avg  REAL,
    home_corners_avg         REAL,
    away_corners_avg         REAL,
    home_cards_avg           REAL,
    away_cards_avg           REAL,
    home_btts_rate           REAL,
    away_btts_rate           REAL,
    home_form                TEXT,
    away_form                TEXT,
    created_at               TEXT    NOT NULL,
    updated_at               TEXT    NOT NULL,
    FOREIGN KEY (home_team_id) REFERENCES teams(team_id),
    FOREIGN KEY (away_team_id) REFERENCES teams(team_id)
);

CREATE TABLE IF NOT EXISTS match_results (
    match_id      TEXT    PRIMARY KEY,
    home_goals    INTEGER NOT NULL,
    away_goals    INTEGER NOT NULL,
    home_corners  INTEGER,
    away_corners  INTEGER,
    home_cards    INTEGER,
    away_cards    INTEGER,
    recorded_at   TEXT    NOT NULL,
    FOREIGN KEY (match_id) REFERENCES matches(match_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS match_odds (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id           TEXT    NOT NULL,
    over_2_5           REAL,
    under_2_5          REAL,
    cards_over_3_5     REAL,
    cards_under_3_5    REAL,
    corners_over_9_5   REAL,
    corners_under_9_5  REAL,
    btts_yes           REAL,
    btts_no            REAL,
    home_win           REAL,
    draw               REAL,
    away_win           REAL,
    bookmaker          TEXT,
    is_latest          INTEGER NOT NULL DEFAULT 1,
    recorded_at        TEXT    NOT NULL,
    FOREIGN KEY (match_id) REFERENCES matches(match_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS recommendations (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id      TEXT    NOT NULL,
    strategy      TEXT    NOT NULL,
    market_id     TEXT    NOT NULL,
    selection_id  TEXT    NOT NULL,
    probability   REAL    NOT NULL,
    score         REAL    NOT NULL,
    rank          INTEGER NOT NULL,
    explanation   TEXT    NOT NULL,
    created_at    TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_matches_datetime ON matches(match_datetime);
CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status);
CREATE INDEX IF NOT EXISTS idx_match_odds_latest ON match_odds(match_id, is_latest);
CREATE INDEX IF NOT EXISTS idx_recommendations_strategy ON recommendations(strategy, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, day: u32) -> MatchRecord {
        MatchRecord {
            match_id: id.into(),
            match_datetime: Utc.with_ymd_and_hms(2024, 1, day, 15, 0, 0).unwrap(),
            league: Some("Premier League".into()),
            season: Some("2023/24".into()),
            status: "scheduled".into(),
            home_team_id: "T1".into(),
            home_team: "Arsenal".into(),
            away_team_id: "T2".into(),
            away_team: "Chelsea".into(),
            team_stats_at_match_time: TeamStats {
                home_goals_avg: Some(1.9),
                away_btts_rate: Some(0.55),
                home_form: Some("WWDWL".into()),
                ..Default::default()
            },
            odds: Some(MarketOdds {
                over_2_5: Some(1.9),
                under_2_5: Some(1.95),
                ..Default::default()
            }),
            result: None,
        }
    }

    #[test]
    fn upsert_reports_created_then_updated() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.upsert_match(&record("M1", 5)).unwrap());
        assert!(!db.upsert_match(&record("M1", 6)).unwrap());

        let fx = db.get_fixture("M1").unwrap().unwrap();
        assert_eq!(fx.home_team, "Arsenal");
        assert_eq!(fx.home_goals_avg, Some(1.9));
        assert_eq!(fx.away_goals_avg, None);
        assert_eq!(fx.home_form.as_deref(), Some("WWDWL"));
        assert_eq!(db.list_teams(10).unwrap().len(), 2);
    }

    #[test]
    fn only_one_latest_odds_record_per_match() {
        let db = Database::open(":memory:").unwrap();
        db.upsert_match(&record("M1", 5)).unwrap();
        db.insert_odds(
            "M1",
            &MarketOdds {
                over_2_5: Some(2.2),
                ..Default::default()
            },
        )
        .unwrap();

        let latest = db.latest_odds("M1").unwrap().unwrap();
        assert_eq!(latest.over_2_5, Some(2.2));

        let conn = db.conn().unwrap();
        let flagged: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM match_odds WHERE match_id='M1' AND is_latest=1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(flagged, 1);
    }

    #[test]
    fn completed_matches_include_results_and_odds() {
        let db = Database::open(":memory:").unwrap();
        let mut done = record("M1", 3);
        done.status = "completed".into();
        done.result = Some(MatchResult {
            home_goals: 2,
            away_goals: 2,
            home_corners: Some(6),
            away_corners: Some(5),
            home_cards: Some(1),
            away_cards: Some(3),
        });
        db.upsert_match(&done).unwrap();
        db.upsert_match(&record("M2", 9)).unwrap();

        let completed = db.list_completed_matches().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].result.total_goals(), 4);
        assert_eq!(completed[0].odds.as_ref().unwrap().over_2_5, Some(1.9));

        assert_eq!(db.list_matches(Some("scheduled"), 10).unwrap().len(), 1);
        assert_eq!(db.list_matches(None, 10).unwrap().len(), 2);
    }

    #[test]
    fn recommendations_round_trip_by_strategy() {
        let db = Database::open(":memory:").unwrap();
        db.save_recommendation(&StoredRecommendation {
            id: None,
            match_id: "M1".into(),
            strategy: "golden".into(),
            market_id: "btts".into(),
            selection_id: "yes".into(),
            probability: 0.88,
            score: 0.88,
            rank: 1,
            explanation: "x".into(),
            created_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(db.list_recommendations("golden", 5).unwrap().len(), 1);
        assert!(db.list_recommendations("value", 5).unwrap().is_empty());
    }
}
