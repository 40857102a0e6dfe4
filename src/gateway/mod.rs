//! LiteLLM management API: teams, users and virtual keys.

pub mod client;
pub mod normalize;
pub mod pagination;
pub mod types;

pub use client::GatewayClient;
pub use types::{ActiveTokens, Expiry, GeneratedKey, KeyInfo, KeyList, SecretKey, Team, User};
