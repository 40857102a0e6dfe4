//! keybot: chat front-end that hands out LiteLLM access tokens.
//!
//! Roster members ask for a token; the provisioning workflow makes sure they
//! exist on the gateway and hold exactly one active key.

pub mod bot;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod provisioning;
pub mod roster;
