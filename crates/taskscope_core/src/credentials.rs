//! Session credentials. The explorer is never handed a session directly; it takes what
//! the environment declares and fills the gaps from bearer tokens seen in traffic.

use crate::error::AppError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;
use tracing::debug;

pub const TOKEN_ENV_VAR: &str = "TASKSCOPE_TOKEN";
pub const LOCATION_ENV_VAR: &str = "TASKSCOPE_LOCATION_ID";
pub const ACTOR_ENV_VAR: &str = "TASKSCOPE_ACTOR_ID";

static BEARER_JWT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Bearer\s+([A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+)").unwrap());
static BARE_JWT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+)\b").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub location_id: String,
    pub actor_id: String,
}

impl Credentials {
    pub fn require_session(&self) -> Result<(), AppError> {
        if self.token.trim().is_empty() {
            return Err(AppError::session("no session token; set TASKSCOPE_TOKEN"));
        }
        if self.location_id.trim().is_empty() {
            return Err(AppError::session(
                "no location id; set TASKSCOPE_LOCATION_ID",
            ));
        }
        Ok(())
    }

    fn fill_from(&mut self, other: &Credentials) {
        if self.token.is_empty() {
            self.token = other.token.clone();
        }
        if self.location_id.is_empty() {
            self.location_id = other.location_id.clone();
        }
        if self.actor_id.is_empty() {
            self.actor_id = other.actor_id.clone();
        }
    }
}

pub trait CredentialSource {
    /// Whatever this source currently knows. Missing parts are empty strings.
    fn credentials(&self) -> Credentials;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };
        Self::new(Credentials {
            token: read(TOKEN_ENV_VAR),
            location_id: read(LOCATION_ENV_VAR),
            actor_id: read(ACTOR_ENV_VAR),
        })
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self) -> Credentials {
        self.credentials.clone()
    }
}

pub fn pick_jwt(raw: &str) -> Option<String> {
    BEARER_JWT
        .captures(raw)
        .or_else(|| BARE_JWT.captures(raw))
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str().to_string())
}

pub fn jwt_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&decoded).ok()
}

fn claim_text(claims: &Value, key: &str) -> String {
    match claims.get("user").and_then(|user| user.get(key)) {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

/// Learns the session from `Authorization` headers. Clones share what was learned.
#[derive(Debug, Clone, Default)]
pub struct HeaderHarvester {
    learned: Rc<RefCell<Credentials>>,
}

impl HeaderHarvester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the header carried a token.
    pub fn capture(&self, header_value: &str) -> bool {
        let Some(token) = pick_jwt(header_value) else {
            return false;
        };
        let claims = jwt_claims(&token);
        let mut learned = self.learned.borrow_mut();
        learned.token = token;
        if let Some(claims) = claims.as_ref() {
            let location = claim_text(claims, "branch_id");
            if !location.is_empty() {
                learned.location_id = location;
            }
            let actor = claim_text(claims, "_id");
            if !actor.is_empty() {
                learned.actor_id = actor;
            }
        }
        debug!(
            "harvested session token (location: {})",
            if learned.location_id.is_empty() {
                "-"
            } else {
                learned.location_id.as_str()
            }
        );
        true
    }

    pub fn capture_headers(&self, headers: &[(String, String)]) -> bool {
        headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .fold(false, |captured, (_, value)| self.capture(value) || captured)
    }
}

impl CredentialSource for HeaderHarvester {
    fn credentials(&self) -> Credentials {
        self.learned.borrow().clone()
    }
}

/// Earlier sources win; later ones only fill what is still missing.
#[derive(Default)]
pub struct CredentialChain {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl CredentialSource for CredentialChain {
    fn credentials(&self) -> Credentials {
        let mut merged = Credentials::default();
        for source in &self.sources {
            merged.fill_from(&source.credentials());
        }
        merged
    }
}
