use clap::{Parser, Subcommand};

/// keybot: issues LiteLLM access tokens to roster members
#[derive(Parser)]
#[command(name = "keybot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Feed one chat message through the bot and print its replies
    Chat {
        /// Sender handle, e.g. @alice. Omit to act as a user without one.
        #[arg(long)]
        handle: Option<String>,
        /// Message text, e.g. "/create_token"
        text: String,
    },

    /// Inspect gateway teams
    Teams {
        #[command(subcommand)]
        command: TeamCommands,
    },

    /// Inspect and create gateway users
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Inspect gateway keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Run the provisioning workflow directly
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Inspect the authorization roster
    Roster {
        #[command(subcommand)]
        command: RosterCommands,
    },
}

#[derive(Subcommand)]
pub enum TeamCommands {
    /// List all teams
    List,
    /// Check whether a team exists by id and/or alias
    Exists {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// List all users
    List,
    /// Show the user with this email
    Show {
        #[arg(long)]
        email: String,
    },
    /// Full record of a user, by id or by email
    Info {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Create a user, optionally in a team
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        team: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// List key identifiers owned by a user
    List {
        #[arg(long)]
        email: String,
    },
    /// List a user's unexpired keys
    Active {
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Make sure a user holds an active key, creating user and key as needed
    Ensure {
        #[arg(long)]
        email: String,
        #[arg(long, value_delimiter = ',')]
        models: Option<Vec<String>>,
    },
}

#[derive(Subcommand)]
pub enum RosterCommands {
    /// Check whether a handle is authorized
    Check {
        #[arg(long)]
        handle: String,
    },
    /// Print every roster entry
    List,
}
