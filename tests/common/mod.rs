//! In-memory stand-in for the LiteLLM gateway.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use keybot::errors::GatewayError;
use keybot::gateway::types::normalize;
use keybot::gateway::{ActiveTokens, Expiry, GeneratedKey, KeyInfo, SecretKey, User};
use keybot::provisioning::TokenGateway;
use serde_json::{Map, Value};
use tokio::sync::Barrier;

#[derive(Default)]
pub struct State {
    /// normalized email → user id
    pub users: HashMap<String, String>,
    /// user id → keys
    pub keys: HashMap<String, Vec<KeyInfo>>,
    pub create_user_calls: usize,
    pub create_token_calls: usize,
    /// Last `extra` passed to `create_token`.
    pub last_token_request: Option<(Option<Vec<String>>, Map<String, Value>)>,
    /// Last `extra` passed to `create_user`.
    pub last_user_extra: Option<Map<String, Value>>,
}

#[derive(Default)]
pub struct FakeGateway {
    pub state: Mutex<State>,
    pub teams: Vec<String>,
    /// Every `active_tokens` call takes its snapshot and then waits here, so
    /// concurrent runs all observe the key set before any of them writes.
    pub scan_barrier: Option<Barrier>,
    pub fail_lookup: Option<GatewayErrorSpec>,
    pub fail_scan: Option<GatewayErrorSpec>,
    pub fail_create_token: Option<GatewayErrorSpec>,
}

#[derive(Clone)]
pub enum GatewayErrorSpec {
    Transport(String),
    Remote(u16, String),
}

impl GatewayErrorSpec {
    fn to_error(&self) -> GatewayError {
        match self {
            GatewayErrorSpec::Transport(m) => GatewayError::transport(m.clone()),
            GatewayErrorSpec::Remote(status, m) => GatewayError::Remote {
                status: *status,
                message: m.clone(),
            },
        }
    }
}

impl FakeGateway {
    pub fn with_team(team: &str) -> Self {
        Self {
            teams: vec![team.to_string()],
            ..Self::default()
        }
    }

    pub fn add_user(&self, email: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("u{}", state.users.len() + 1);
        state.users.insert(normalize(email), id.clone());
        id
    }

    pub fn add_key(&self, email: &str, key: &str, expires: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let id = state.users[&normalize(email)].clone();
        state.keys.entry(id).or_default().push(KeyInfo {
            key: key.to_string(),
            expires: Expiry::from(expires),
            models: Vec::new(),
            max_budget: None,
        });
    }

    pub fn create_user_calls(&self) -> usize {
        self.state.lock().unwrap().create_user_calls
    }

    pub fn create_token_calls(&self) -> usize {
        self.state.lock().unwrap().create_token_calls
    }

    fn user_id(&self, email: &str) -> Option<String> {
        self.state.lock().unwrap().users.get(&normalize(email)).cloned()
    }
}

#[async_trait]
impl TokenGateway for FakeGateway {
    async fn user_exists(&self, email: &str) -> Result<bool, GatewayError> {
        if let Some(spec) = &self.fail_lookup {
            return Err(spec.to_error());
        }
        Ok(self.user_id(email).is_some())
    }

    async fn create_user(
        &self,
        email: &str,
        team_name: Option<&str>,
        extra: Map<String, Value>,
    ) -> Result<User, GatewayError> {
        if let Some(name) = team_name {
            if !self.teams.iter().any(|t| normalize(t) == normalize(name)) {
                return Err(GatewayError::NotFound(format!("Team with name '{}' not found.", name)));
            }
        }
        {
            let mut state = self.state.lock().unwrap();
            state.create_user_calls += 1;
            state.last_user_extra = Some(extra);
        }
        let user_id = self.add_user(email);
        Ok(User {
            user_id,
            user_email: Some(email.to_string()),
            extra: Map::new(),
        })
    }

    async fn active_tokens(&self, email: &str) -> Result<ActiveTokens, GatewayError> {
        if let Some(spec) = &self.fail_scan {
            return Err(spec.to_error());
        }
        let user_id = self
            .user_id(email)
            .ok_or_else(|| GatewayError::NotFound(format!("User with email '{}' not found.", email)))?;
        let now = chrono::Utc::now();
        let tokens = self
            .state
            .lock()
            .unwrap()
            .keys
            .get(&user_id)
            .map(|keys| keys.iter().filter(|k| k.is_active_at(now)).cloned().collect())
            .unwrap_or_default();
        if let Some(barrier) = &self.scan_barrier {
            barrier.wait().await;
        }
        Ok(ActiveTokens { user_id, tokens })
    }

    async fn create_token(
        &self,
        email: &str,
        models: Option<&[String]>,
        extra: Map<String, Value>,
    ) -> Result<GeneratedKey, GatewayError> {
        if let Some(spec) = &self.fail_create_token {
            return Err(spec.to_error());
        }
        let user_id = self
            .user_id(email)
            .ok_or_else(|| GatewayError::NotFound(format!("User with email '{}' not found.", email)))?;

        let mut state = self.state.lock().unwrap();
        state.create_token_calls += 1;
        let key = format!("sk-{}-{}", user_id, state.create_token_calls);
        state.keys.entry(user_id.clone()).or_default().push(KeyInfo {
            key: key.clone(),
            expires: Expiry::At("2999-01-01T00:00:00Z".into()),
            models: models.map(<[String]>::to_vec).unwrap_or_default(),
            max_budget: extra.get("max_budget").and_then(Value::as_f64),
        });
        state.last_token_request = Some((models.map(<[String]>::to_vec), extra));

        Ok(GeneratedKey {
            key: SecretKey::new(key),
            expires: Some("2999-01-01T00:00:00Z".into()),
            models: models.map(<[String]>::to_vec).unwrap_or_default(),
            max_budget: None,
            user_id: Some(user_id),
        })
    }
}
