use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use jiff::Timestamp;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use crate::{
    credentials::CredentialsError,
    datalog::Sample,
    powerwall::{Aggregates, PowerRoutes, PowerwallError, Token},
    state::SolarLinkState,
};

/// A poll logs when it lands within this many ms either side of a log boundary.
const LOG_WINDOW_MS: i64 = 5000;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("gateway: {0}")]
    Powerwall(#[from] PowerwallError),
    #[error("re-authentication failed: {0}")]
    Auth(String),
    #[error("credentials: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("writing log: {0}")]
    Log(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One poll, as broadcast to clients.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub timestamp: u64,
    #[serde(flatten)]
    pub aggregates: Aggregates,
    pub routes: PowerRoutes,
    pub percentage: f64,
}

impl Reading {
    pub fn sample(&self) -> Sample {
        Sample {
            site: self.aggregates.site,
            battery: self.aggregates.battery,
            load: self.aggregates.load,
            solar: self.aggregates.solar,
            percentage: self.percentage,
        }
    }
}

pub fn spawn(state: Arc<SolarLinkState>) -> JoinHandle<()> {
    tokio::spawn(run(state).instrument(span!(Level::INFO, "Poller")))
}

async fn run(state: Arc<SolarLinkState>) {
    let period_ms = (state.cfg.poll_interval_secs * 1000) as i64;
    info!("polling every {}s", state.cfg.poll_interval_secs);

    // first poll happens right away
    state.restart.notify_one();

    loop {
        let wait = ms_until_boundary(Timestamp::now().as_millisecond(), period_ms);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(wait as u64)) => {}
            _ = state.restart.notified() => debug!("poll requested"),
        }

        match poll(&state).await {
            Ok(()) => {}
            Err(PollError::Auth(e)) => {
                error!("stopping until credentials are fixed: {e}");
                let msg = json!({
                    "code": 401,
                    "message": "Automatic auth failed. User credentials must be re-configured",
                });
                state.broadcast("err", &msg.to_string());
                state.restart.notified().await;
            }
            Err(e) => warn!("poll failed: {e}"),
        }
    }
}

async fn poll(state: &SolarLinkState) -> Result<(), PollError> {
    let pw = &state.powerwall;
    let mut token = state.credentials.get().await.token;

    let percentage = match pw.soe(token.as_ref()).await {
        Ok(p) => p,
        Err(e) => {
            debug!("state of energy failed ({e}), logging in again");
            let fresh = reauth(state).await?;
            let p = pw.soe(Some(&fresh)).await?;
            token = Some(fresh);
            p
        }
    };

    let aggregates = pw.aggregates(token.as_ref()).await?;
    let timestamp = Timestamp::now().as_millisecond();
    let reading = Reading {
        timestamp: timestamp as u64,
        routes: PowerRoutes::from_aggregates(&aggregates, state.cfg.route_epsilon),
        aggregates,
        percentage,
    };

    let json = serde_json::to_string(&reading)?;
    state.broadcast("dat", &json);

    let interval_ms = (state.cfg.log_interval_secs * 1000) as i64;
    if state.log_next.swap(false, Ordering::SeqCst) || in_log_window(timestamp, interval_ms) {
        state.logs.append(&reading.sample(), reading.timestamp).await?;
        state.broadcast("log", &json);
        debug!("logged reading at {timestamp}");
    }

    Ok(())
}

/// Logs in with the stored email and password and stores the new token.
///
/// Only a refused login is [`PollError::Auth`]. An unreachable gateway is
/// retried on the next tick.
async fn reauth(state: &SolarLinkState) -> Result<Token, PollError> {
    let creds = state.credentials.get().await;
    let (Some(email), Some(password)) = (creds.email, creds.password) else {
        return Err(PollError::Auth("no stored email and password".to_string()));
    };

    let token = match state.powerwall.login(&email, &password).await {
        Ok(t) => t,
        Err(e) if e.is_rejection() => return Err(PollError::Auth(e.to_string())),
        Err(e) => return Err(e.into()),
    };

    let stored = token.clone();
    state.credentials.update(|c| c.token = Some(stored)).await?;
    Ok(token)
}

/// Milliseconds from `now_ms` to the next multiple of `period_ms`.
pub fn ms_until_boundary(now_ms: i64, period_ms: i64) -> i64 {
    period_ms - now_ms.rem_euclid(period_ms)
}

pub fn in_log_window(now_ms: i64, interval_ms: i64) -> bool {
    (now_ms + LOG_WINDOW_MS).rem_euclid(interval_ms) < 2 * LOG_WINDOW_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolarLinkConfig;

    async fn unreachable_gateway(data_dir: &std::path::Path) -> Arc<SolarLinkState> {
        let cfg = SolarLinkConfig {
            data_dir: data_dir.to_path_buf(),
            powerwall_url: "https://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        SolarLinkState::init(cfg).await.unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let state = unreachable_gateway(tmp.path()).await;
        state
            .credentials
            .update(|c| {
                c.email = Some("me@example.com".to_string());
                c.password = Some("hunter2".to_string());
            })
            .await
            .unwrap();

        let err = poll(&state).await.unwrap_err();
        assert!(matches!(err, PollError::Powerwall(PowerwallError::Http(_))), "{err}");
    }

    #[tokio::test]
    async fn test_missing_credentials_park_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let state = unreachable_gateway(tmp.path()).await;

        let err = poll(&state).await.unwrap_err();
        assert!(matches!(err, PollError::Auth(_)), "{err}");
    }

    #[test]
    fn test_ms_until_boundary() {
        assert_eq!(ms_until_boundary(0, 10_000), 10_000);
        assert_eq!(ms_until_boundary(1, 10_000), 9_999);
        assert_eq!(ms_until_boundary(9_999, 10_000), 1);
        assert_eq!(ms_until_boundary(1_700_000_003_250, 10_000), 6_750);
    }

    #[test]
    fn test_log_window() {
        let five_min = 300_000;
        assert!(in_log_window(0, five_min));
        assert!(in_log_window(4_999, five_min));
        assert!(!in_log_window(5_000, five_min));
        assert!(!in_log_window(150_000, five_min));
        assert!(!in_log_window(294_999, five_min));
        assert!(in_log_window(295_000, five_min));
        assert!(in_log_window(600_000 - 1, five_min));
    }

    #[test]
    fn test_reading_json() {
        let reading = Reading {
            timestamp: 42,
            aggregates: Aggregates {
                site: -1.5,
                battery: 0.0,
                load: 2.0,
                solar: 3.5,
            },
            routes: PowerRoutes::default(),
            percentage: 80.0,
        };
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["site"], -1.5);
        assert_eq!(json["percentage"], 80.0);
        assert_eq!(json["routes"]["solarToSite"], false);
        assert_eq!(reading.sample().solar, 3.5);
    }
}
