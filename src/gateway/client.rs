//! HTTP client for the LiteLLM management API.
//!
//! Reads go through `reqwest-middleware` with transient-failure retries;
//! mutations (`/user/new`, `/key/generate`) use a plain client and are sent
//! exactly once. Every call carries its own timeout.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::normalize::normalize_collection;
use super::pagination::collect_pages;
use super::types::{key_ref, ActiveTokens, GeneratedKey, KeyInfo, KeyList, Team, User};
use crate::config::GatewaySettings;
use crate::errors::GatewayError;

/// Concurrent `/key/info` lookups within one active-token scan.
const KEY_INFO_CONCURRENCY: usize = 4;

pub struct GatewayClient {
    base_url: String,
    master_key: String,
    reads: ClientWithMiddleware,
    writes: reqwest::Client,
    settings: GatewaySettings,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        master_key: impl Into<String>,
        settings: GatewaySettings,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("keybot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::transport(format!("failed to build HTTP client: {}", e)))?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(5))
            .build_with_max_retries(settings.max_retries);
        let reads = ClientBuilder::new(http.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            master_key: master_key.into(),
            reads,
            writes: http,
            settings,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let resp = self
            .reads
            .get(self.url(path))
            .bearer_auth(&self.master_key)
            .query(query)
            .timeout(timeout)
            .send()
            .await?;
        decode(path, resp).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        let resp = self
            .writes
            .post(self.url(path))
            .bearer_auth(&self.master_key)
            .json(body)
            .timeout(self.settings.request_timeout)
            .send()
            .await?;
        decode(path, resp).await
    }

    // ── Teams ─────────────────────────────────────────────────

    pub async fn list_teams(&self) -> Result<Vec<Team>, GatewayError> {
        let body = self
            .get_json("/team/list", &[], self.settings.request_timeout)
            .await?;
        Ok(parse_records(normalize_collection(body, "teams"), "team"))
    }

    /// First team whose alias matches `name`, ignoring case and surrounding
    /// whitespace.
    pub async fn team_id_by_name(&self, name: &str) -> Result<Option<String>, GatewayError> {
        let teams = self.list_teams().await?;
        Ok(teams
            .into_iter()
            .find(|t| t.alias_matches(name))
            .map(|t| t.team_id))
    }

    /// Probe by id first, then fall back to an alias scan when a name is
    /// also given. Supplying neither is a caller bug and fails before any I/O.
    pub async fn team_exists(
        &self,
        team_id: Option<&str>,
        team_name: Option<&str>,
    ) -> Result<bool, GatewayError> {
        let team_id = team_id.filter(|s| !s.trim().is_empty());
        let team_name = team_name.filter(|s| !s.trim().is_empty());
        if team_id.is_none() && team_name.is_none() {
            return Err(GatewayError::InvalidArgument(
                "at least one of team_id or team_name must be provided".into(),
            ));
        }

        if let Some(id) = team_id {
            let probe = self
                .reads
                .get(self.url("/team/info"))
                .bearer_auth(&self.master_key)
                .query(&[("team_id", id)])
                .timeout(self.settings.lookup_timeout)
                .send()
                .await;
            match probe {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => return Ok(true),
                Ok(resp) => debug!(team_id = id, status = %resp.status(), "team id probe missed"),
                Err(e) => debug!(team_id = id, error = %e, "team id probe failed"),
            }
        }

        match team_name {
            Some(name) => Ok(self.team_id_by_name(name).await?.is_some()),
            None => Ok(false),
        }
    }

    // ── Users ─────────────────────────────────────────────────

    /// Every user on the gateway, fetched page by page.
    pub async fn list_users(&self) -> Result<Vec<User>, GatewayError> {
        let page_size = self.settings.page_size;
        let raw = collect_pages(page_size, self.settings.max_pages, |page| async move {
            let body = self
                .get_json(
                    "/user/list",
                    &[("page", page.to_string()), ("page_size", page_size.to_string())],
                    self.settings.request_timeout,
                )
                .await?;
            Ok::<_, GatewayError>(normalize_collection(body, "users"))
        })
        .await?;
        debug!(count = raw.len(), "listed gateway users");
        Ok(parse_records(raw, "user"))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, GatewayError> {
        let users = self.list_users().await?;
        Ok(users.into_iter().find(|u| u.email_matches(email)))
    }

    pub async fn user_exists(&self, email: &str) -> Result<bool, GatewayError> {
        Ok(self.find_user_by_email(email).await?.is_some())
    }

    /// `None` when no user has this email; callers must check before use.
    pub async fn user_id_by_email(&self, email: &str) -> Result<Option<String>, GatewayError> {
        Ok(self.find_user_by_email(email).await?.map(|u| u.user_id))
    }

    /// Full user record. With an id this is `/user/info`; with only an email
    /// it is the matching `/user/list` record, `None` when nobody matches.
    pub async fn user_info(
        &self,
        user_id: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<Value>, GatewayError> {
        let user_id = user_id.filter(|s| !s.trim().is_empty());
        let email = email.filter(|s| !s.trim().is_empty());

        if let Some(id) = user_id {
            let body = self
                .get_json("/user/info", &[("user_id", id.to_string())], self.settings.lookup_timeout)
                .await?;
            return Ok(Some(body));
        }

        let email = email.ok_or_else(|| {
            GatewayError::InvalidArgument("at least one of user_id or email must be provided".into())
        })?;
        match self.find_user_by_email(email).await? {
            Some(user) => serde_json::to_value(user)
                .map(Some)
                .map_err(|e| GatewayError::transport(format!("unserializable user record: {}", e))),
            None => Ok(None),
        }
    }

    /// Create a user, optionally as a member of an existing team.
    ///
    /// A team name that does not resolve fails the call before anything is
    /// written. `extra` is merged into the request body (`user_role`,
    /// `max_budget`, ...); a `teams` array in it is extended, not replaced.
    pub async fn create_user(
        &self,
        email: &str,
        team_name: Option<&str>,
        extra: Map<String, Value>,
    ) -> Result<User, GatewayError> {
        let mut teams: Vec<Value> = match extra.get("teams") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        if let Some(name) = team_name {
            let not_found = || GatewayError::NotFound(format!("Team with name '{}' not found.", name));
            if !self.team_exists(None, Some(name)).await? {
                return Err(not_found());
            }
            let team_id = self.team_id_by_name(name).await?.ok_or_else(not_found)?;
            if !teams.iter().any(|t| t.as_str() == Some(team_id.as_str())) {
                teams.push(Value::String(team_id));
            }
        }

        let mut body = extra;
        body.insert("user_email".into(), Value::String(email.to_string()));
        body.insert("teams".into(), Value::Array(teams));

        let created = self.post_json("/user/new", &Value::Object(body)).await?;
        let user = match serde_json::from_value::<User>(created) {
            Ok(user) => user,
            Err(e) => {
                // The write went through; recover the record by listing.
                warn!(email, error = %e, "user created but /user/new response was unreadable");
                self.find_user_by_email(email).await?.ok_or_else(|| {
                    GatewayError::transport(format!(
                        "user {} was created but the gateway returned no usable record: {}",
                        email, e
                    ))
                })?
            }
        };
        info!(email, user_id = %user.user_id, "created gateway user");
        Ok(user)
    }

    // ── Keys ──────────────────────────────────────────────────

    pub async fn list_user_keys(&self, user_id: &str) -> Result<KeyList, GatewayError> {
        let body = self
            .get_json(
                "/key/list",
                &[("user_id", user_id.to_string())],
                self.settings.request_timeout,
            )
            .await?;
        let keys = normalize_collection(body, "keys")
            .iter()
            .filter_map(key_ref)
            .collect();
        Ok(KeyList { keys })
    }

    pub async fn key_info(&self, key: &str) -> Result<KeyInfo, GatewayError> {
        let body = self
            .get_json(
                "/key/info",
                &[("key", key.to_string())],
                self.settings.lookup_timeout,
            )
            .await?;
        Ok(KeyInfo::from_value(key, &body))
    }

    /// Generate a key owned by the user with this email.
    ///
    /// `extra` carries `duration`, `max_budget` and any other
    /// `/key/generate` field and overrides the defaults built here.
    pub async fn create_token(
        &self,
        email: &str,
        models: Option<&[String]>,
        extra: Map<String, Value>,
    ) -> Result<GeneratedKey, GatewayError> {
        let user_id = self
            .user_id_by_email(email)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("User with email '{}' not found.", email)))?;

        let mut body = Map::new();
        body.insert("metadata".into(), json!({ "user": email }));
        body.insert("user_id".into(), Value::String(user_id.clone()));
        body.extend(extra);
        if let Some(models) = models.filter(|m| !m.is_empty()) {
            body.insert("models".into(), json!(models));
        }

        let created = self.post_json("/key/generate", &Value::Object(body)).await?;
        let generated = GeneratedKey::from_value(&created).ok_or_else(|| {
            GatewayError::transport("gateway response to /key/generate carried no key")
        })?;
        info!(email, user_id = %user_id, expires = ?generated.expires, "generated gateway key");
        Ok(generated)
    }

    /// Keys of this user that are unexpired right now.
    ///
    /// A key whose detail lookup fails, or whose expiry cannot be parsed, is
    /// skipped; the rest of the scan proceeds.
    pub async fn active_tokens(&self, email: &str) -> Result<ActiveTokens, GatewayError> {
        let user_id = self
            .user_id_by_email(email)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("User with email '{}' not found.", email)))?;

        let listed = self.list_user_keys(&user_id).await?;
        let total = listed.count();

        let details: Vec<Result<KeyInfo, GatewayError>> = stream::iter(listed.keys.clone())
            .map(|key| async move { self.key_info(&key).await })
            .buffered(KEY_INFO_CONCURRENCY)
            .collect()
            .await;

        let now = chrono::Utc::now();
        let mut tokens = Vec::new();
        for (index, detail) in details.into_iter().enumerate() {
            match detail {
                Ok(info) if info.is_active_at(now) => tokens.push(info),
                Ok(_) => {}
                Err(e) => warn!(email, index, error = %e, "skipping key whose detail lookup failed"),
            }
        }

        debug!(email, total, active = tokens.len(), "classified user keys");
        Ok(ActiveTokens { user_id, tokens })
    }
}

async fn decode(path: &str, resp: reqwest::Response) -> Result<Value, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<Value>().await.map_err(|e| {
            GatewayError::transport(format!("invalid JSON from gateway {}: {}", path, e))
        });
    }

    let body = resp.text().await.unwrap_or_default();
    let message = remote_message(status, &body);
    warn!(path, status = status.as_u16(), %message, "gateway returned error");
    Err(GatewayError::Remote {
        status: status.as_u16(),
        message,
    })
}

/// Best human-readable message from an error response body.
pub(crate) fn remote_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        let candidates = [
            parsed.pointer("/error/message"),
            parsed.get("error"),
            parsed.pointer("/detail/error"),
            parsed.get("detail"),
            parsed.get("message"),
        ];
        if let Some(msg) = candidates
            .into_iter()
            .flatten()
            .find_map(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        {
            return msg.to_string();
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.chars().take(200).collect();
    }
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("error")
    )
}

fn parse_records<T: serde::de::DeserializeOwned>(items: Vec<Value>, kind: &str) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(kind, error = %e, "skipping malformed gateway record");
                None
            }
        })
        .collect()
}
