use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the LiteLLM proxy, without a trailing slash.
    pub api_url: String,
    pub master_key: String,
    pub users_csv_path: PathBuf,
    pub gateway: GatewaySettings,
    pub policy: TokenPolicy,
    /// Domain appended to a chat handle when the roster has no email for it.
    pub email_fallback_domain: String,
    /// Serialize provisioning per email inside this process.
    pub serialize_provisioning: bool,
}

/// Transport knobs for the gateway client.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub page_size: usize,
    pub max_pages: usize,
    /// Timeout for single-record lookups.
    pub lookup_timeout: Duration,
    /// Timeout for list calls and mutations.
    pub request_timeout: Duration,
    /// Retries for idempotent reads. Mutations are never retried.
    pub max_retries: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            page_size: 25,
            max_pages: 1000,
            lookup_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }
}

/// What a freshly provisioned user gets.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub team_name: String,
    /// LiteLLM duration string, e.g. "90m" or "30d".
    pub duration: String,
    pub max_budget: f64,
    /// Empty means the gateway default (all models the team may use).
    pub models: Vec<String>,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            team_name: "StudentsNSTU".into(),
            duration: "90m".into(),
            max_budget: 0.5,
            models: Vec::new(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let api_url = std::env::var("LITELLM_API_URL")
        .context("LITELLM_API_URL environment variable is required")?;
    url::Url::parse(&api_url).with_context(|| format!("LITELLM_API_URL is not a valid URL: {}", api_url))?;

    let master_key = std::env::var("LITELLM_MASTER_KEY")
        .context("LITELLM_MASTER_KEY environment variable is required")?;
    if master_key.trim().is_empty() {
        anyhow::bail!("LITELLM_MASTER_KEY must not be empty");
    }

    let defaults = GatewaySettings::default();
    let policy_defaults = TokenPolicy::default();

    let max_budget = match std::env::var("DEFAULT_TOKEN_BUDGET") {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("DEFAULT_TOKEN_BUDGET is not a number: {}", v))?,
        Err(_) => policy_defaults.max_budget,
    };

    Ok(Config {
        api_url: api_url.trim_end_matches('/').to_string(),
        master_key,
        users_csv_path: std::env::var("USERS_CSV_PATH")
            .unwrap_or_else(|_| "users.csv".into())
            .into(),
        gateway: GatewaySettings {
            page_size: env_parse("KEYBOT_PAGE_SIZE").unwrap_or(defaults.page_size).max(1),
            max_pages: env_parse("KEYBOT_MAX_PAGES").unwrap_or(defaults.max_pages).max(1),
            lookup_timeout: env_parse("KEYBOT_LOOKUP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lookup_timeout),
            request_timeout: env_parse("KEYBOT_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_retries: env_parse("KEYBOT_MAX_RETRIES").unwrap_or(defaults.max_retries),
        },
        policy: TokenPolicy {
            team_name: std::env::var("DEFAULT_TEAM_NAME").unwrap_or(policy_defaults.team_name),
            duration: std::env::var("DEFAULT_TOKEN_DURATION").unwrap_or(policy_defaults.duration),
            max_budget,
            models: split_list(&std::env::var("DEFAULT_TOKEN_MODELS").unwrap_or_default()),
        },
        email_fallback_domain: std::env::var("EMAIL_FALLBACK_DOMAIN")
            .unwrap_or_else(|_| "nstu.ru".into()),
        serialize_provisioning: env_parse("KEYBOT_SERIALIZE_PROVISIONING").unwrap_or(true),
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
