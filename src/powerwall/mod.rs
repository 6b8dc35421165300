//! Client for the gateway's local HTTPS API.

use reqwest::{
    Client, RequestBuilder, Response,
    header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

pub mod routes;

pub use routes::PowerRoutes;

const USER_AGENT: &str = "SolarLink";

#[derive(Error, Debug)]
pub enum PowerwallError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gateway returned {code}: {error}")]
    Api { code: u16, error: String },
    #[error("login response carried no auth cookie")]
    MissingToken,
}

impl PowerwallError {
    /// Status code to hand back to our own callers.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Api { code, .. } => *code,
            Self::MissingToken => 401,
            _ => 502,
        }
    }

    /// The gateway refused the credentials, as opposed to being unreachable.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { code: 400..=499, .. } | Self::MissingToken)
    }
}

/// Session cookies issued by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub auth_cookie: String,
    pub user_record: String,
}

/// Instant power of each meter in watts, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Aggregates {
    pub site: f64,
    pub battery: f64,
    pub load: f64,
    pub solar: f64,
}

#[derive(Deserialize)]
struct Meter {
    instant_power: f64,
}

#[derive(Deserialize)]
struct AggregatesResponse {
    site: Meter,
    battery: Meter,
    load: Meter,
    solar: Meter,
}

#[derive(Deserialize)]
struct SoeResponse {
    percentage: f64,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
    force_sm_off: bool,
}

pub struct Powerwall {
    client: Client,
    base_url: String,
}

impl Powerwall {
    pub fn new(base_url: &str, accept_invalid_certs: bool) -> Result<Self, PowerwallError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Token, PowerwallError> {
        let body = serde_json::to_string(&LoginRequest {
            username: "customer",
            email,
            password,
            force_sm_off: false,
        })?;

        let res = self
            .client
            .post(format!("{}/api/login/Basic", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let (mut auth_cookie, mut user_record) = (None, None);
        for value in res.headers().get_all(SET_COOKIE) {
            let Ok(cookie) = value.to_str() else {
                continue;
            };
            let pair = cookie.split(';').next().unwrap_or_default().trim();
            match pair.split_once('=') {
                Some(("AuthCookie", v)) => auth_cookie = Some(v.to_string()),
                Some(("UserRecord", v)) => user_record = Some(v.to_string()),
                _ => {}
            }
        }

        // surfaces a `{code, error}` body as an error
        let _: serde_json::Value = read_json(res).await?;

        debug!("logged in");
        Ok(Token {
            auth_cookie: auth_cookie.ok_or(PowerwallError::MissingToken)?,
            user_record: user_record.unwrap_or_default(),
        })
    }

    pub async fn aggregates(&self, token: Option<&Token>) -> Result<Aggregates, PowerwallError> {
        let res: AggregatesResponse = self.get("/api/meters/aggregates", token).await?;
        Ok(Aggregates {
            site: round2(res.site.instant_power),
            battery: round2(res.battery.instant_power),
            load: round2(res.load.instant_power),
            solar: round2(res.solar.instant_power),
        })
    }

    /// Battery state of energy in percent.
    pub async fn soe(&self, token: Option<&Token>) -> Result<f64, PowerwallError> {
        let res: SoeResponse = self.get("/api/system_status/soe", token).await?;
        Ok(res.percentage)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&Token>,
    ) -> Result<T, PowerwallError> {
        let req = self.client.get(format!("{}{path}", self.base_url));
        let res = with_token(req, token).send().await?;
        let json = read_json(res).await?;
        Ok(serde_json::from_value(json)?)
    }
}

fn with_token(req: RequestBuilder, token: Option<&Token>) -> RequestBuilder {
    match token {
        Some(t) => req.header(
            COOKIE,
            format!("AuthCookie={}; UserRecord={}", t.auth_cookie, t.user_record),
        ),
        None => req,
    }
}

async fn read_json(res: Response) -> Result<serde_json::Value, PowerwallError> {
    let status = res.status();
    let body = res.text().await?;
    let json: serde_json::Value = match serde_json::from_str(&body) {
        Ok(json) => json,
        Err(_) if !status.is_success() => {
            return Err(PowerwallError::Api {
                code: status.as_u16(),
                error: body,
            });
        }
        Err(e) => return Err(e.into()),
    };
    api_error(&json).map_or(Ok(json), Err)
}

/// The gateway reports failures as `{"code": >= 400, "error": "..."}`.
fn api_error(json: &serde_json::Value) -> Option<PowerwallError> {
    let code = json.get("code")?.as_u64()?;
    let error = json.get("error")?.as_str()?;
    (code >= 400).then(|| PowerwallError::Api {
        code: code as u16,
        error: error.to_string(),
    })
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_api_error() {
        let err = api_error(&json!({"code": 401, "error": "bad credentials"})).unwrap();
        assert!(matches!(
            err,
            PowerwallError::Api { code: 401, ref error } if error == "bad credentials"
        ));
        assert_eq!(err.status_code(), 401);

        assert!(api_error(&json!({"code": 200, "error": "fine"})).is_none());
        assert!(api_error(&json!({"percentage": 50.0})).is_none());
        assert!(api_error(&json!({"code": 500})).is_none());
    }

    #[test]
    fn test_is_rejection() {
        let api = |code| PowerwallError::Api {
            code,
            error: String::new(),
        };
        assert!(api(401).is_rejection());
        assert!(api(429).is_rejection());
        assert!(!api(503).is_rejection());
        assert!(PowerwallError::MissingToken.is_rejection());

        let json = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(!PowerwallError::from(json).is_rejection());
    }

    #[test]
    fn test_aggregates_shape() {
        let res: AggregatesResponse = serde_json::from_value(json!({
            "site": {"instant_power": -12.346, "frequency": 60},
            "battery": {"instant_power": 0},
            "load": {"instant_power": 1500.999},
            "solar": {"instant_power": 1488.6},
        }))
        .unwrap();
        assert_eq!(round2(res.site.instant_power), -12.35);
        assert_eq!(round2(res.load.instant_power), 1501.0);
        assert_eq!(res.battery.instant_power, 0.0);
    }

    #[test]
    fn test_base_url() {
        let pw = Powerwall::new("https://gateway:7600/", true).unwrap();
        assert_eq!(pw.base_url, "https://gateway:7600");
    }
}
