use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::betting::custom::{self, CustomAnalysisRequest};
use crate::betting::selector::{self, Recommendation, ScoredFixture, SelectionRules, Strategy};
use crate::betting::Predictor;
use crate::db::models::{Fixture, MarketOdds, StoredRecommendation};
use crate::db::Database;
use crate::error::PredictionError;
use crate::ingest::{self, BatchIngestRequest, ItemError};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub predictor: Arc<Predictor>,
    pub rules: SelectionRules,
}

/// Build the Axum router for the recommendation API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/data/ingest", post(ingest_handler))
        .route("/api/v1/matches", get(matches_handler))
        .route("/api/v1/matches/:match_id/odds", post(odds_handler))
        .route("/api/v1/teams", get(teams_handler))
        .route("/api/v1/predictions", post(predictions_handler))
        .route(
            "/api/v1/recommendations/:strategy",
            post(recommend_handler).get(list_recommendations_handler),
        )
        .route("/api/v1/custom-analysis", post(custom_analysis_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Maps prediction errors onto HTTP status codes: validation → 400,
/// missing model → 503, everything else → 500.
pub struct ApiError(PredictionError);

impl From<PredictionError> for ApiError {
    fn from(e: PredictionError) -> Self {
        ApiError(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(PredictionError::Store(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        match self.0 {
            PredictionError::InvalidArgument { field, value, valid } => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_argument",
                    "field": field,
                    "value": value,
                    "valid_values": valid,
                    "message": message,
                })),
            )
                .into_response(),
            PredictionError::Unavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "unavailable", "message": message })),
            )
                .into_response(),
            _ => {
                error!("Request failed: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal", "message": message })),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Request / response shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BatchFixture {
    #[serde(flatten)]
    pub fixture: Fixture,
    #[serde(default)]
    pub odds: Option<MarketOdds>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub fixtures: Vec<BatchFixture>,
}

#[derive(Debug, Serialize)]
struct BatchResponse<T: Serialize> {
    count: usize,
    results: Vec<T>,
    errors: Vec<ItemError>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    status: Option<String>,
    limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn require_models(state: &AppState) -> ApiResult<()> {
    if state.predictor.all_available() {
        return Ok(());
    }
    let missing: Vec<String> = state
        .predictor
        .health()
        .models_loaded
        .into_iter()
        .filter(|(_, loaded)| !loaded)
        .map(|(m, _)| m.id().to_string())
        .collect();
    Err(PredictionError::Unavailable(format!("no model loaded for {}", missing.join(", "))).into())
}

/// Predict every fixture of a batch, recording per-fixture failures.
fn score_batch(state: &AppState, batch: BatchRequest) -> (Vec<ScoredFixture>, Vec<ItemError>) {
    let mut scored = Vec::with_capacity(batch.fixtures.len());
    let mut errors = Vec::new();
    for item in batch.fixtures {
        let match_id = item.fixture.match_id.clone();
        let outcome = state.predictor.predict(&item.fixture).and_then(|fp| {
            let odds = match item.odds {
                Some(o) => Some(o),
                None => state.db.latest_odds(&match_id)?,
            };
            Ok(ScoredFixture {
                fixture: item.fixture,
                predictions: fp.predictions,
                odds,
            })
        });
        match outcome {
            Ok(sf) => scored.push(sf),
            Err(e) => errors.push(ItemError {
                match_id,
                error: e.to_string(),
            }),
        }
    }
    (scored, errors)
}

fn persist(db: &Database, recs: &[Recommendation]) {
    let now = Utc::now();
    for rec in recs {
        let stored = StoredRecommendation {
            id: None,
            match_id: rec.fixture_id.clone(),
            strategy: rec.strategy.id().to_string(),
            market_id: rec.pick.market_id.id().to_string(),
            selection_id: rec.pick.selection_id.id().to_string(),
            probability: rec.pick.probability,
            score: rec.score,
            rank: rec.rank as i64,
            explanation: rec.explanation.clone(),
            created_at: now,
        };
        if let Err(e) = db.save_recommendation(&stored) {
            warn!("Failed to store {} recommendation for {}: {}", rec.strategy.id(), rec.fixture_id, e);
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /
async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "service": "smartbets",
        "version": env!("CARGO_PKG_VERSION"),
        "markets": ["total_goals", "total_cards", "total_corners", "btts"],
        "endpoints": [
            "GET /health",
            "POST /api/v1/data/ingest",
            "GET /api/v1/matches",
            "POST /api/v1/matches/{match_id}/odds",
            "GET /api/v1/teams",
            "POST /api/v1/predictions",
            "POST /api/v1/recommendations/{smart|golden|value}",
            "GET /api/v1/recommendations/{strategy}",
            "POST /api/v1/custom-analysis",
        ],
    }))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.predictor.health();
    let database = state.db.list_teams(1).is_ok();
    Json(json!({
        "status": if database { health.status } else { "degraded" },
        "database": database,
        "models_loaded": health.models_loaded,
        "model_versions": health.model_versions,
    }))
}

/// POST /api/v1/data/ingest
async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchIngestRequest>,
) -> impl IntoResponse {
    Json(ingest::ingest_batch(&state.db, &req.matches))
}

/// GET /api/v1/matches?status=scheduled&limit=50
async fn matches_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    let matches = state
        .db
        .list_matches(params.status.as_deref(), clamp_limit(params.limit))?;
    Ok(Json(matches))
}

/// POST /api/v1/matches/:match_id/odds
///
/// Replaces the match's latest odds snapshot.
async fn odds_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
    Json(odds): Json<MarketOdds>,
) -> ApiResult<impl IntoResponse> {
    if state.db.get_fixture(&match_id)?.is_none() {
        return Err(PredictionError::invalid("match_id", match_id, ["an ingested match id"]).into());
    }
    odds.validate()?;
    let id = state.db.insert_odds(&match_id, &odds)?;
    Ok(Json(json!({ "match_id": match_id, "odds_id": id, "is_latest": true })))
}

/// GET /api/v1/teams?limit=50
async fn teams_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.db.list_teams(clamp_limit(params.limit))?))
}

/// POST /api/v1/predictions
async fn predictions_handler(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    require_models(&state)?;
    let mut results = Vec::new();
    let mut errors = Vec::new();
    for item in &batch.fixtures {
        match state.predictor.predict(&item.fixture) {
            Ok(p) => results.push(p),
            Err(e) => errors.push(ItemError {
                match_id: item.fixture.match_id.clone(),
                error: e.to_string(),
            }),
        }
    }
    Ok(Json(BatchResponse {
        count: results.len(),
        results,
        errors,
    }))
}

/// POST /api/v1/recommendations/:strategy
async fn recommend_handler(
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
    Json(batch): Json<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let strategy = Strategy::parse_batch(&strategy)?;
    require_models(&state)?;

    let (scored, errors) = score_batch(&state, batch);
    let results = selector::recommend(strategy, &scored, &state.rules)?;
    persist(&state.db, &results);

    Ok(Json(BatchResponse {
        count: results.len(),
        results,
        errors,
    }))
}

/// GET /api/v1/recommendations/:strategy?limit=50
async fn list_recommendations_handler(
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    let strategy = Strategy::parse(&strategy)?;
    let stored = state
        .db
        .list_recommendations(strategy.id(), clamp_limit(params.limit))?;
    Ok(Json(stored))
}

/// POST /api/v1/custom-analysis
async fn custom_analysis_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CustomAnalysisRequest>,
) -> ApiResult<impl IntoResponse> {
    let analysis = custom::analyze(&state.predictor, &req)?;
    let stored = StoredRecommendation {
        id: None,
        match_id: analysis.match_id.clone(),
        strategy: Strategy::Custom.id().to_string(),
        market_id: analysis.user_selection.market_id.id().to_string(),
        selection_id: analysis.user_selection.selection_id.id().to_string(),
        probability: analysis.analysis.probability,
        score: analysis.analysis.probability,
        rank: 1,
        explanation: analysis.analysis.explanation.clone(),
        created_at: Utc::now(),
    };
    if let Err(e) = state.db.save_recommendation(&stored) {
        warn!("Failed to store custom analysis for {}: {}", analysis.match_id, e);
    }
    Ok(Json(analysis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::betting::markets::Market;
    use crate::betting::predictor::tests::fixed_predictor;
    use crate::model::oracle::{LogisticModel, OracleSet};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app_with(predictor: Predictor) -> Router {
        router(AppState {
            db: Database::open(":memory:").unwrap(),
            predictor: Arc::new(predictor),
            rules: SelectionRules::default(),
        })
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn fixture_json(id: &str) -> Value {
        json!({
            "match_id": id,
            "home_team": "Arsenal",
            "away_team": "Chelsea",
            "match_datetime": "2024-11-16T15:00:00Z",
            "home_goals_avg": 1.8,
            "away_goals_avg": 1.4
        })
    }

    #[tokio::test]
    async fn health_reports_every_market() {
        let app = app_with(fixed_predictor());
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models_loaded"]["btts"], true);
        assert_eq!(body["models_loaded"]["total_corners"], true);
    }

    #[tokio::test]
    async fn predictions_return_four_markets_per_fixture() {
        let app = app_with(fixed_predictor());
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/predictions",
            Some(json!({ "fixtures": [fixture_json("A"), fixture_json("B")] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["results"][0]["predictions"].as_array().unwrap().len(), 4);
        assert_eq!(body["results"][0]["predictions"][0]["market_id"], "total_goals");
    }

    #[tokio::test]
    async fn smart_recommendations_are_persisted() {
        let app = app_with(fixed_predictor());
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/recommendations/smart",
            Some(json!({ "fixtures": [fixture_json("A")] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["pick"]["selection_id"], "over_2.5");
        assert_eq!(body["results"][0]["alternatives"].as_array().unwrap().len(), 3);

        let (status, stored) = call(&app, "GET", "/api/v1/recommendations/smart?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored.as_array().unwrap().len(), 1);
        assert_eq!(stored[0]["match_id"], "A");
    }

    #[tokio::test]
    async fn value_uses_inline_odds() {
        let app = app_with(fixed_predictor());
        let mut fx = fixture_json("V1");
        fx["odds"] = json!({ "over_2_5": 1.9, "btts_yes": 1.5 });
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/recommendations/value",
            Some(json!({ "fixtures": [fx, fixture_json("NO_ODDS")] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        // goals 0.72 at 1.9 is 36.8% value; btts 0.61 at 1.5 is below the threshold
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["pick"]["selection_id"], "over_2.5");
        assert!(body["results"][0]["stake_fraction"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn unknown_strategy_is_a_client_error() {
        let app = app_with(fixed_predictor());
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/recommendations/hedge",
            Some(json!({ "fixtures": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_argument");
        assert_eq!(body["field"], "strategy");
        assert_eq!(body["value"], "hedge");
        assert_eq!(body["valid_values"], json!(["smart", "golden", "value"]));
    }

    #[tokio::test]
    async fn custom_analysis_validates_market() {
        let app = app_with(fixed_predictor());
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/custom-analysis",
            Some(json!({
                "fixture": fixture_json("C1"),
                "market_id": "total_fouls",
                "selection_id": "over_2.5"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "market_id");

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/custom-analysis",
            Some(json!({
                "fixture": fixture_json("C1"),
                "market_id": "total_goals",
                "selection_id": "over_2.5"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analysis"]["confidence_level"], "high");
        assert_eq!(body["analysis"]["verdict"], "Good");
    }

    #[tokio::test]
    async fn missing_models_give_service_unavailable() {
        let partial = Predictor::new(
            OracleSet::new().with_oracle(Market::TotalGoals, Arc::new(LogisticModel::constant(0.7))),
        );
        let app = app_with(partial);
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/predictions",
            Some(json!({ "fixtures": [fixture_json("A")] })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "unavailable");

        let (_, health) = call(&app, "GET", "/health", None).await;
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["models_loaded"]["btts"], false);
    }

    #[tokio::test]
    async fn ingest_then_list() {
        let app = app_with(fixed_predictor());
        let batch = json!({
            "matches": [{
                "match_id": "HM_1",
                "match_datetime": "2024-03-02T15:00:00Z",
                "status": "completed",
                "home_team_id": "T1",
                "home_team": "Arsenal",
                "away_team_id": "T2",
                "away_team": "Chelsea",
                "team_stats_at_match_time": { "home_goals_avg": 1.9 },
                "odds": { "over_2_5": 1.8 },
                "result": { "home_goals": 2, "away_goals": 2 }
            }]
        });
        let (status, body) = call(&app, "POST", "/api/v1/data/ingest", Some(batch)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matches_created"], 1);
        assert_eq!(body["success"], true);

        let (_, matches) = call(&app, "GET", "/api/v1/matches?status=completed", None).await;
        assert_eq!(matches.as_array().unwrap().len(), 1);
        let (_, teams) = call(&app, "GET", "/api/v1/teams", None).await;
        assert_eq!(teams.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stored_odds_fill_in_for_missing_inline_odds() {
        let app = app_with(fixed_predictor());
        let batch = json!({
            "matches": [{
                "match_id": "UF_1",
                "match_datetime": "2024-11-16T15:00:00Z",
                "home_team_id": "T1",
                "home_team": "Arsenal",
                "away_team_id": "T2",
                "away_team": "Chelsea",
                "odds": { "corners_over_9_5": 2.4 }
            }]
        });
        call(&app, "POST", "/api/v1/data/ingest", Some(batch)).await;

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/matches/UF_1/odds",
            Some(json!({ "corners_over_9_5": 2.5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/matches/NOPE/odds",
            Some(json!({ "btts_yes": 2.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(
            &app,
            "POST",
            "/api/v1/recommendations/value",
            Some(json!({ "fixtures": [fixture_json("UF_1")] })),
        )
        .await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["pick"]["selection_id"], "over_9.5");
        assert_eq!(body["results"][0]["value"]["bookmaker_odds"], 2.5);
    }

    #[tokio::test]
    async fn invalid_odds_update_is_rejected_and_keeps_latest() {
        let app = app_with(fixed_predictor());
        let batch = json!({
            "matches": [{
                "match_id": "M1",
                "match_datetime": "2024-11-16T15:00:00Z",
                "home_team_id": "T1",
                "home_team": "Arsenal",
                "away_team_id": "T2",
                "away_team": "Chelsea",
                "odds": { "over_2_5": 1.9 }
            }]
        });
        call(&app, "POST", "/api/v1/data/ingest", Some(batch)).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/matches/M1/odds",
            Some(json!({ "over_2_5": -3.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_argument");
        assert_eq!(body["field"], "over_2_5");
        assert_eq!(body["valid_values"], json!(["decimal odds > 1.0"]));

        let (_, body) = call(
            &app,
            "POST",
            "/api/v1/recommendations/value",
            Some(json!({ "fixtures": [fixture_json("M1")] })),
        )
        .await;
        assert_eq!(body["results"][0]["value"]["bookmaker_odds"], 1.9);
    }
}
