//! "Ensure this identity has an active key" on top of the gateway client.
//!
//! The sequence is check user → create user → scan keys → generate key. It is
//! not transactional: two concurrent runs for the same email can both see no
//! active key and both generate one. With `serialize` enabled, runs for the
//! same email in this process queue behind a per-email lock; separate bot
//! processes are still not coordinated.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::TokenPolicy;
use crate::errors::GatewayError;
use crate::gateway::types::normalize;
use crate::gateway::{ActiveTokens, GatewayClient, GeneratedKey, User};

/// The gateway operations the workflow needs.
#[async_trait]
pub trait TokenGateway: Send + Sync {
    async fn user_exists(&self, email: &str) -> Result<bool, GatewayError>;

    async fn create_user(
        &self,
        email: &str,
        team_name: Option<&str>,
        extra: Map<String, Value>,
    ) -> Result<User, GatewayError>;

    async fn active_tokens(&self, email: &str) -> Result<ActiveTokens, GatewayError>;

    async fn create_token(
        &self,
        email: &str,
        models: Option<&[String]>,
        extra: Map<String, Value>,
    ) -> Result<GeneratedKey, GatewayError>;
}

#[async_trait]
impl TokenGateway for GatewayClient {
    async fn user_exists(&self, email: &str) -> Result<bool, GatewayError> {
        GatewayClient::user_exists(self, email).await
    }

    async fn create_user(
        &self,
        email: &str,
        team_name: Option<&str>,
        extra: Map<String, Value>,
    ) -> Result<User, GatewayError> {
        GatewayClient::create_user(self, email, team_name, extra).await
    }

    async fn active_tokens(&self, email: &str) -> Result<ActiveTokens, GatewayError> {
        GatewayClient::active_tokens(self, email).await
    }

    async fn create_token(
        &self,
        email: &str,
        models: Option<&[String]>,
        extra: Map<String, Value>,
    ) -> Result<GeneratedKey, GatewayError> {
        GatewayClient::create_token(self, email, models, extra).await
    }
}

/// Workflow step at which a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LookupUser,
    CreateUser,
    CheckTokens,
    CreateToken,
}

#[derive(Debug)]
pub enum ProvisionOutcome {
    /// A new key was generated.
    Issued {
        email: String,
        key: GeneratedKey,
        /// Models requested for the key; empty means gateway default.
        models: Vec<String>,
        user_created: bool,
    },
    /// The user already holds at least one active key; nothing was generated.
    AlreadyProvisioned {
        email: String,
        active: usize,
        user_created: bool,
    },
    Failed {
        email: String,
        stage: Stage,
        message: String,
        status_code: Option<u16>,
        user_created: bool,
    },
}

impl ProvisionOutcome {
    pub fn user_created(&self) -> bool {
        match self {
            ProvisionOutcome::Issued { user_created, .. }
            | ProvisionOutcome::AlreadyProvisioned { user_created, .. }
            | ProvisionOutcome::Failed { user_created, .. } => *user_created,
        }
    }
}

pub struct Provisioner<G> {
    gateway: Arc<G>,
    policy: TokenPolicy,
    /// Per-email locks, present when runs are serialized.
    locks: Option<DashMap<String, Arc<Mutex<()>>>>,
}

impl<G: TokenGateway> Provisioner<G> {
    pub fn new(gateway: Arc<G>, policy: TokenPolicy, serialize: bool) -> Self {
        Self {
            gateway,
            policy,
            locks: serialize.then(DashMap::new),
        }
    }

    /// Make sure `email` holds an active key, creating the user and a key as
    /// needed. `models` overrides the policy's model list for a new key.
    pub async fn ensure_token(&self, email: &str, models: Option<&[String]>) -> ProvisionOutcome {
        let email = email.trim();

        let Some(locks) = &self.locks else {
            return self.run(email, models).await;
        };

        let id = normalize(email);
        let lock = locks.entry(id.clone()).or_default().value().clone();
        let guard = lock.lock_owned().await;
        let outcome = self.run(email, models).await;
        drop(guard);
        // Only the map itself still holds the lock once nobody is waiting.
        locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn run(&self, email: &str, models: Option<&[String]>) -> ProvisionOutcome {
        let fail = |stage: Stage, err: GatewayError, user_created: bool| {
            error!(email, ?stage, error = %err, status = ?err.status_code(), "provisioning failed");
            ProvisionOutcome::Failed {
                email: email.to_string(),
                stage,
                message: err.to_string(),
                status_code: err.status_code(),
                user_created,
            }
        };

        let exists = match self.gateway.user_exists(email).await {
            Ok(exists) => exists,
            Err(e) => return fail(Stage::LookupUser, e, false),
        };

        let mut user_created = false;
        if !exists {
            info!(email, team = %self.policy.team_name, "user missing on gateway; creating");
            // `/user/new` generates a key of its own unless told not to.
            let mut extra = Map::new();
            extra.insert("auto_create_key".into(), Value::Bool(false));
            if let Err(e) = self
                .gateway
                .create_user(email, Some(&self.policy.team_name), extra)
                .await
            {
                return fail(Stage::CreateUser, e, false);
            }
            user_created = true;
        }

        match self.gateway.active_tokens(email).await {
            Ok(active) if active.count() > 0 => {
                info!(email, active = active.count(), "user already holds an active key");
                return ProvisionOutcome::AlreadyProvisioned {
                    email: email.to_string(),
                    active: active.count(),
                    user_created,
                };
            }
            Ok(_) => {}
            Err(e) => return fail(Stage::CheckTokens, e, user_created),
        }

        let models: Vec<String> = models
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.policy.models.clone());
        let mut extra = Map::new();
        extra.insert("duration".into(), json!(self.policy.duration));
        extra.insert("max_budget".into(), json!(self.policy.max_budget));

        let requested = (!models.is_empty()).then_some(models.as_slice());
        let created = self.gateway.create_token(email, requested, extra).await;
        match created {
            Ok(key) => {
                info!(email, expires = ?key.expires, "issued key");
                ProvisionOutcome::Issued {
                    email: email.to_string(),
                    key,
                    models,
                    user_created,
                }
            }
            Err(e) => fail(Stage::CreateToken, e, user_created),
        }
    }
}
