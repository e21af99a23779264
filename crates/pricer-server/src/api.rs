// HTTP routes: prediction, health, and the not-found fallback.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use pricer_core::PropertyRequest;
use serde::Serialize;
use serde_json::{Map, Value};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Build the application router over the given state.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    Router::new()
        .route("/predict/", post(predict))
        .route("/predict", post(predict))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(trace_layer)
        .layer(cors_layer())
        .with_state(state)
}

/// Any origin, method, and header, with credentials. Browsers reject a
/// literal `*` alongside credentials, so the request's own values are echoed.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// `POST /predict/`: `{"<price label>": "1,234,568 <currency>"}`.
async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PropertyRequest>, JsonRejection>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let Json(request) = payload?;
    let estimate = state.predictor.predict(&request)?;
    let price = estimate.formatted(&state.labels.currency_label);

    info!(
        city = %request.city,
        district = %request.district,
        log_price = estimate.log_price,
        "priced property: {}",
        price
    );

    let mut body = Map::new();
    body.insert(state.labels.price_label.clone(), Value::String(price));
    Ok(Json(body))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    started_at: DateTime<Utc>,
    model: ModelSummary,
}

#[derive(Debug, Serialize)]
struct ModelSummary {
    objective: String,
    trees: usize,
    features: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model = state.predictor.model();
    Json(HealthResponse {
        status: "ok",
        started_at: state.started_at,
        model: ModelSummary {
            objective: model.objective().to_string(),
            trees: model.num_trees(),
            features: model.num_features(),
        },
    })
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            detail: "Not Found".into(),
        }),
    )
}
