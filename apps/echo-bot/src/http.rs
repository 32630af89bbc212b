use std::sync::Arc;

use axum::Router;
use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bot_builder::{Bot, CloudAdapter};
use bot_connector::AuthenticationError;
use bot_schema::Activity;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<CloudAdapter>,
    pub bot: Arc<dyn Bot>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/messages", post(messages))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(activity): Json<Activity>,
) -> Response {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match state
        .adapter
        .process_activity(auth_header, activity, state.bot.as_ref())
        .await
    {
        Ok(None) => StatusCode::OK.into_response(),
        Ok(Some(invoke)) => {
            let status = StatusCode::from_u16(invoke.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            match invoke.body {
                Some(body) => (status, Json(body)).into_response(),
                None => status.into_response(),
            }
        }
        Err(err) => match err.downcast_ref::<AuthenticationError>() {
            Some(auth) => {
                warn!(error = %auth, "rejected unauthenticated activity");
                StatusCode::UNAUTHORIZED.into_response()
            }
            None => {
                error!(error = %format!("{err:#}"), "turn failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
    }
}
