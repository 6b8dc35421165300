use std::{
    future::IntoFuture,
    io,
    net::SocketAddr,
    sync::{Arc, atomic::Ordering},
};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{any, get, post},
};
use jiff::{Zoned, civil::Date, tz::TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{Instrument, Level, info, span, warn};

use crate::{
    datalog::{Record, file::parse_date, json_array, records},
    state::SolarLinkState,
};

use crate::api::ws::ws_handler;

pub mod ws;

pub async fn init(state: Arc<SolarLinkState>) -> io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.cfg.port));
    let public = ServeDir::new(&state.cfg.public_dir);

    let app = router(state).fallback_service(public);

    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app.into_make_service())
        .into_future()
        .instrument(span!(Level::INFO, "Api"))
        .await?;

    Ok(())
}

pub fn router(state: Arc<SolarLinkState>) -> Router {
    Router::new()
        .route("/ws", any(ws_handler))
        .route("/log", get(get_log))
        .route("/writelog", get(get_writelog))
        .route("/loop", get(get_loop))
        .route("/channelconfig", get(get_channel_config))
        .route("/auth", post(post_auth))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

async fn get_log(
    State(state): State<Arc<SolarLinkState>>,
    Query(query): Query<DateQuery>,
) -> impl IntoResponse {
    let source = state.logs.open(query.date.as_deref()).await;
    let body = Body::from_stream(json_array(records::<Record, _>(source)));

    ([(header::CONTENT_TYPE, "application/json")], body)
}

async fn get_writelog(State(state): State<Arc<SolarLinkState>>) -> StatusCode {
    state.log_next.store(true, Ordering::SeqCst);
    StatusCode::OK
}

async fn get_loop(State(state): State<Arc<SolarLinkState>>) -> StatusCode {
    state.restart.notify_one();
    StatusCode::OK
}

async fn get_channel_config(Query(query): Query<DateQuery>) -> impl IntoResponse {
    let date = query
        .date
        .as_deref()
        .and_then(parse_date)
        .unwrap_or_else(|| Zoned::now().date());

    match channel_config(date, &TimeZone::system()) {
        Ok(cfg) => (StatusCode::OK, Json(cfg)).into_response(),
        Err(e) => {
            warn!("channel config for {date}: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(e.to_string())).into_response()
        }
    }
}

/// Channels a graph of one day's log shows, with the day's bounds in unix ms.
fn channel_config(date: Date, tz: &TimeZone) -> Result<serde_json::Value, jiff::Error> {
    let start = date.to_zoned(tz.clone())?.timestamp().as_millisecond();
    let end = date.tomorrow()?.to_zoned(tz.clone())?.timestamp().as_millisecond();

    Ok(json!({
        "channels": [
            { "name": "site", "group": "power" },
            { "name": "battery", "group": "power" },
            { "name": "load", "group": "power" },
            { "name": "solar", "group": "power" },
            { "name": "percentage", "vMin": 0, "vMax": 100, "group": "other" },
            { "name": "timestamp", "vMin": start, "vMax": end, "visible": false },
        ],
        "groups": [
            { "name": "power", "channels": [0, 1, 2, 3] },
            { "name": "other", "channels": [4] },
        ],
    }))
}

#[derive(Debug, Default, Deserialize)]
struct AuthRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

impl AuthResponse {
    fn failed(status: StatusCode, errors: Vec<String>) -> axum::response::Response {
        (
            status,
            Json(Self {
                success: false,
                errors,
            }),
        )
            .into_response()
    }
}

async fn post_auth(
    State(state): State<Arc<SolarLinkState>>,
    body: Bytes,
) -> axum::response::Response {
    let req: AuthRequest = if body.is_empty() {
        AuthRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => return AuthResponse::failed(StatusCode::BAD_REQUEST, vec![e.to_string()]),
        }
    };
    let supplied = req.email.is_some() || req.password.is_some();

    // with nothing supplied, only log in again if the stored session is dead
    let needs_login = supplied || {
        let token = state.credentials.get().await.token;
        state.powerwall.soe(token.as_ref()).await.is_err()
    };

    if needs_login {
        let stored = state.credentials.get().await;
        let email = req.email.or(stored.email);
        let password = req.password.or(stored.password);

        let mut errors = Vec::new();
        if email.is_none() {
            errors.push("e-mail was not specified".to_string());
        }
        if password.is_none() {
            errors.push("password was not specified".to_string());
        }
        let (Some(email), Some(password)) = (email, password) else {
            return AuthResponse::failed(StatusCode::BAD_REQUEST, errors);
        };

        let token = match state.powerwall.login(&email, &password).await {
            Ok(t) => t,
            Err(e) => {
                warn!("login failed: {e}");
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                return AuthResponse::failed(status, vec![e.to_string()]);
            }
        };

        let res = state
            .credentials
            .update(|c| {
                c.email = Some(email);
                c.password = Some(password);
                c.token = Some(token);
            })
            .await;
        if let Err(e) = res {
            warn!("storing credentials: {e}");
            return AuthResponse::failed(StatusCode::INTERNAL_SERVER_ERROR, vec![e.to_string()]);
        }
        info!("credentials updated");
    }

    state.restart.notify_one();
    Json(AuthResponse {
        success: true,
        errors: Vec::new(),
    })
    .into_response()
}
