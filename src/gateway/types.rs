//! Records returned by the LiteLLM management API.
//!
//! The gateway's payloads drift between versions, so every record keeps the
//! fields we do not model in `extra` and parsing of collections is per-item.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub team_id: String,
    #[serde(default)]
    pub team_alias: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Team {
    /// Case-insensitive, whitespace-trimmed alias comparison.
    pub fn alias_matches(&self, name: &str) -> bool {
        let target = normalize(name);
        match self.team_alias.as_deref() {
            Some(alias) if !alias.trim().is_empty() => normalize(alias) == target,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn email_matches(&self, email: &str) -> bool {
        let target = normalize(email);
        match self.user_email.as_deref() {
            Some(e) if !e.trim().is_empty() => normalize(e) == target,
            _ => false,
        }
    }
}

/// Lower-case and trim an identifier for lookup.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Key identifiers owned by one user, as returned by `/key/list`.
#[derive(Debug, Clone, Default)]
pub struct KeyList {
    pub keys: Vec<String>,
}

impl KeyList {
    pub fn count(&self) -> usize {
        self.keys.len()
    }
}

/// A `/key/list` entry is a bare token hash, or an object when the gateway
/// returns full key objects.
pub(crate) fn key_ref(item: &Value) -> Option<String> {
    match item {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => ["token", "key"]
            .iter()
            .find_map(|field| obj.get(*field).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(String::from),
        _ => None,
    }
}

/// The `expires` field of a key record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Expiry {
    /// Absent, null or blank.
    Never,
    At(String),
    /// Present but not a string; never treated as active.
    Unreadable(Value),
}

impl Expiry {
    pub fn from_field(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Expiry::Never,
            Some(Value::String(s)) if s.trim().is_empty() => Expiry::Never,
            Some(Value::String(s)) => Expiry::At(s.clone()),
            Some(other) => Expiry::Unreadable(other.clone()),
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Never => true,
            Expiry::At(raw) => is_active(Some(raw), now),
            Expiry::Unreadable(_) => false,
        }
    }
}

impl From<Option<&str>> for Expiry {
    fn from(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if !s.trim().is_empty() => Expiry::At(s.to_string()),
            _ => Expiry::Never,
        }
    }
}

/// Metadata of one key as returned by `/key/info`.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub key: String,
    pub expires: Expiry,
    pub models: Vec<String>,
    pub max_budget: Option<f64>,
}

impl KeyInfo {
    /// Accepts both `{"key": .., "info": {...}}` and a flat record.
    pub fn from_value(key: &str, body: &Value) -> Self {
        let info = body.get("info").filter(|v| v.is_object()).unwrap_or(body);
        Self {
            key: key.to_string(),
            expires: Expiry::from_field(info.get("expires")),
            models: string_list(info.get("models")),
            max_budget: info.get("max_budget").and_then(Value::as_f64),
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_active_at(now)
    }
}

/// A key is active when it never expires or its expiry is strictly after `now`.
/// An expiry that cannot be parsed counts as not active.
pub fn is_active(expires: Option<&str>, now: DateTime<Utc>) -> bool {
    match expires.map(str::trim) {
        None | Some("") => true,
        Some(raw) => match parse_expiry(raw) {
            Some(at) => at > now,
            None => false,
        },
    }
}

/// Parse a gateway timestamp. Offsets are honoured; naive timestamps are UTC.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Active keys of one user at the time of the scan.
#[derive(Debug, Clone)]
pub struct ActiveTokens {
    pub user_id: String,
    pub tokens: Vec<KeyInfo>,
}

impl ActiveTokens {
    pub fn count(&self) -> usize {
        self.tokens.len()
    }
}

/// Key material. Redacted in `Debug` and wiped on drop.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<String>);

impl SecretKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

/// Result of `/key/generate`.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub key: SecretKey,
    pub expires: Option<String>,
    pub models: Vec<String>,
    pub max_budget: Option<f64>,
    pub user_id: Option<String>,
}

impl GeneratedKey {
    /// The key material lives under `key` in current gateways and under
    /// `token` in older ones.
    pub fn from_value(body: &Value) -> Option<Self> {
        let key = ["key", "token"]
            .iter()
            .find_map(|field| body.get(*field).and_then(Value::as_str))
            .filter(|s| !s.is_empty())?;
        Some(Self {
            key: SecretKey::new(key),
            expires: body
                .get("expires")
                .and_then(Value::as_str)
                .map(String::from),
            models: string_list(body.get("models")),
            max_budget: body.get("max_budget").and_then(Value::as_f64),
            user_id: body
                .get("user_id")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
