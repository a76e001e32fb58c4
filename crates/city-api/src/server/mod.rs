use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ApiError, CompleteGoalRequest, CreateGroupRequest, ErrorCode, FillCityRequest, Group,
    JoinGroupRequest, SelectBuildRequest,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{GroupService, ServiceError};

const DEFAULT_SQLITE_PATH: &str = "bittycity.sqlite";
const FEED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// Close code sent when a feed's group is deleted mid-stream.
const FEED_CLOSE_GROUP_GONE: u16 = 4004;

include!("error.rs");
include!("state.rs");
include!("routes/groups.rs");
include!("routes/demo.rs");
include!("routes/feed.rs");
include!("util.rs");

pub async fn serve(addr: SocketAddr) -> Result<(), ServerError> {
    serve_with_store(addr, default_sqlite_path()).await
}

pub async fn serve_with_store(
    addr: SocketAddr,
    sqlite_path: impl AsRef<std::path::Path>,
) -> Result<(), ServerError> {
    let state = AppState::open(sqlite_path)?;
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "city server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/groups", post(create_group))
        .route("/api/v1/groups/join", post(join_group))
        .route(
            "/api/v1/groups/{group_id}",
            get(get_group).delete(delete_group),
        )
        .route("/api/v1/groups/{group_id}/complete", post(complete_goal))
        .route("/api/v1/groups/{group_id}/build", post(select_build))
        .route(
            "/api/v1/groups/{group_id}/demo/asteroid",
            post(force_asteroid),
        )
        .route("/api/v1/groups/{group_id}/demo/fill", post(fill_city))
        .route("/api/v1/groups/{group_id}/feed", get(group_feed))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}
