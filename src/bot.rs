//! Chat command handling, independent of any messaging platform.
//!
//! A transport hands us the sender's identity and the message text and sends
//! back whatever replies we return. Every command passes through
//! [`authorize`] first.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::split_list;
use crate::provisioning::{ProvisionOutcome, Provisioner, Stage, TokenGateway};
use crate::roster::{normalize_handle, Roster};

pub const NO_USERNAME: &str = "You need to set a Telegram username to use this bot.";
pub const NOT_AUTHORIZED: &str =
    "You are not authorized to use this bot. Please contact the administrator.";

/// Sender of an inbound message, as reported by the transport.
#[derive(Debug, Clone, Default)]
pub struct ChatIdentity {
    /// Platform handle, with or without the leading `@`.
    pub handle: Option<String>,
}

impl ChatIdentity {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: Some(handle.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { handle: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// Optional comma-separated model list overriding the default.
    CreateToken { models: Option<Vec<String>> },
    Unknown(String),
}

/// Parse `/name[@bot] args...`. Returns `None` for plain text.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    Some(match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "create_token" => {
            let models = split_list(args);
            Command::CreateToken {
                models: (!models.is_empty()).then_some(models),
            }
        }
        _ => Command::Unknown(name),
    })
}

/// An authorized sender.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Normalized handle, with leading `@`.
    pub handle: String,
    /// Email from the roster, if it has one.
    pub email: Option<String>,
}

/// Guard run before every command. `Err` carries the reply for the sender.
pub fn authorize(roster: &dyn Roster, identity: &ChatIdentity) -> Result<Caller, String> {
    let handle = match identity.handle.as_deref().map(str::trim) {
        Some(h) if !h.trim_start_matches('@').is_empty() => normalize_handle(h),
        _ => return Err(NO_USERNAME.to_string()),
    };

    match roster.email_for(&handle) {
        Ok(Some(email)) => Ok(Caller {
            handle,
            email: Some(email),
        }),
        Ok(None) => {
            warn!(handle = %handle, "unauthorized access attempt");
            Err(NOT_AUTHORIZED.to_string())
        }
        Err(e) => {
            warn!(handle = %handle, error = %e, "roster unavailable; denying access");
            Err(NOT_AUTHORIZED.to_string())
        }
    }
}

pub struct Bot<G> {
    roster: Arc<dyn Roster>,
    provisioner: Provisioner<G>,
    email_fallback_domain: String,
}

impl<G: TokenGateway> Bot<G> {
    pub fn new(
        roster: Arc<dyn Roster>,
        provisioner: Provisioner<G>,
        email_fallback_domain: impl Into<String>,
    ) -> Self {
        Self {
            roster,
            provisioner,
            email_fallback_domain: email_fallback_domain.into(),
        }
    }

    /// Replies for one inbound message, in sending order.
    pub async fn handle_message(&self, identity: &ChatIdentity, text: &str) -> Vec<String> {
        let caller = match authorize(self.roster.as_ref(), identity) {
            Ok(caller) => caller,
            Err(reply) => return vec![reply],
        };

        match parse_command(text) {
            Some(Command::Start) => vec![welcome_message(&caller.handle)],
            Some(Command::Help) => vec![HELP_MESSAGE.trim().to_string()],
            Some(Command::CreateToken { models }) => self.create_token(&caller, models).await,
            Some(Command::Unknown(name)) => {
                info!(handle = %caller.handle, command = %name, "ignoring unknown command");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Roster email, or `<handle>@<fallback domain>` when the roster has none.
    pub fn email_for(&self, caller: &Caller) -> String {
        caller.email.clone().unwrap_or_else(|| {
            format!(
                "{}@{}",
                caller.handle.trim_start_matches('@'),
                self.email_fallback_domain
            )
        })
    }

    async fn create_token(&self, caller: &Caller, models: Option<Vec<String>>) -> Vec<String> {
        let email = self.email_for(caller);
        let outcome = self
            .provisioner
            .ensure_token(&email, models.as_deref())
            .await;

        match &outcome {
            ProvisionOutcome::Issued { .. } => {
                info!(email = %email, handle = %caller.handle, "token created")
            }
            ProvisionOutcome::Failed { message, .. } => {
                warn!(email = %email, handle = %caller.handle, error = %message, "token request failed")
            }
            ProvisionOutcome::AlreadyProvisioned { .. } => {}
        }

        render_outcome(&outcome)
    }
}

fn welcome_message(handle: &str) -> String {
    format!(
        "Welcome to the LiteLLM Management Bot!\n\n\
         Your authorized username: {}\n\n\
         Available commands:\n\
         /create_token - Create a new access token for a user\n\
         /help - Show this help message\n\n\
         Examples:\n\
         /create_token",
        handle
    )
}

const HELP_MESSAGE: &str = "
Available commands:

/create_token [models]
Create a new access token for yourself. Optionally specify models (comma-separated).
Examples:
  /create_token
  /create_token gpt-4o,claude-3-5-sonnet

/help
Show this help message.
";

/// Turn a workflow outcome into the replies shown to the user.
pub fn render_outcome(outcome: &ProvisionOutcome) -> Vec<String> {
    let mut replies = Vec::new();

    let (email, creation_failed) = match outcome {
        ProvisionOutcome::Issued { email, .. } | ProvisionOutcome::AlreadyProvisioned { email, .. } => {
            (email, false)
        }
        ProvisionOutcome::Failed { email, stage, .. } => (email, *stage == Stage::CreateUser),
    };

    if outcome.user_created() || creation_failed {
        replies.push(format!("User with email: {} does not exist. Creating...", email));
    }
    if outcome.user_created() {
        replies.push("Done!".to_string());
    }

    match outcome {
        ProvisionOutcome::AlreadyProvisioned { .. } => {
            replies.push("You already have an access token.".to_string());
        }
        ProvisionOutcome::Issued {
            email, key, models, ..
        } => {
            replies.push(format!("Creating access token for: {}...", email));

            let mut text = String::from("Access token created successfully!\n\n");
            text.push_str(&format!("Token: `{}`\n", key.key.expose()));
            text.push_str(&format!("\nEmail: {}\n", email));
            let shown = if key.models.is_empty() { models } else { &key.models };
            if !shown.is_empty() {
                text.push_str(&format!("Models: {}\n", shown.join(", ")));
            }
            if let Some(expires) = &key.expires {
                text.push_str(&format!("Expires: {}\n", expires));
            }
            text.push_str("\nKeep this token secure!");
            replies.push(text);
        }
        ProvisionOutcome::Failed {
            email,
            stage,
            message,
            status_code,
            ..
        } => {
            let headline = match stage {
                Stage::LookupUser => format!("Could not look up user {}.", email),
                Stage::CreateUser => format!("Failed to create user {}.", email),
                Stage::CheckTokens => format!("Could not check existing tokens for {}.", email),
                Stage::CreateToken => {
                    replies.push(format!("Creating access token for: {}...", email));
                    format!("Failed to create token for {}.", email)
                }
            };
            let mut text = format!("{}\n\nError: {}", headline, message);
            if let Some(code) = status_code {
                text.push_str(&format!("\nStatus Code: {}", code));
            }
            replies.push(text);
        }
    }

    replies
}
