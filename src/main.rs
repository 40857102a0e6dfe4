use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keybot::bot::{Bot, ChatIdentity};
use keybot::config::{self, Config};
use keybot::gateway::GatewayClient;
use keybot::provisioning::{ProvisionOutcome, Provisioner};
use keybot::roster::{CsvRoster, Roster};

mod cli;

use cli::{Commands, KeyCommands, RosterCommands, TeamCommands, TokenCommands, UserCommands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "keybot=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = cli::Cli::parse();
    let cfg = config::load()?;

    let result = run(args.command, cfg).await;
    if let Err(ref e) = result {
        eprintln!("Error: {:#}", e);
    }
    result
}

async fn run(command: Commands, cfg: Config) -> anyhow::Result<()> {
    let gateway = Arc::new(GatewayClient::new(
        cfg.api_url.clone(),
        cfg.master_key.clone(),
        cfg.gateway.clone(),
    )?);

    match command {
        Commands::Chat { handle, text } => {
            let roster: Arc<dyn Roster> = Arc::new(CsvRoster::new(cfg.users_csv_path.clone()));
            let provisioner = Provisioner::new(gateway, cfg.policy.clone(), cfg.serialize_provisioning);
            let bot = Bot::new(roster, provisioner, cfg.email_fallback_domain.clone());

            let identity = ChatIdentity { handle };
            for reply in bot.handle_message(&identity, &text).await {
                println!("{}\n", reply);
            }
        }
        Commands::Teams { command } => match command {
            TeamCommands::List => {
                let teams = gateway.list_teams().await?;
                println!("{}", serde_json::to_string_pretty(&teams)?);
            }
            TeamCommands::Exists { id, name } => {
                let exists = gateway.team_exists(id.as_deref(), name.as_deref()).await?;
                println!("{}", exists);
            }
        },
        Commands::Users { command } => match command {
            UserCommands::List => {
                let users = gateway.list_users().await?;
                println!("{}", serde_json::to_string_pretty(&users)?);
            }
            UserCommands::Show { email } => match gateway.find_user_by_email(&email).await? {
                Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                None => anyhow::bail!("no user with email {}", email),
            },
            UserCommands::Info { id, email } => {
                match gateway.user_info(id.as_deref(), email.as_deref()).await? {
                    Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                    None => anyhow::bail!("no such user"),
                }
            }
            UserCommands::Create { email, team } => {
                let user = gateway
                    .create_user(&email, team.as_deref(), serde_json::Map::new())
                    .await?;
                println!("created user {} ({})", email, user.user_id);
            }
        },
        Commands::Keys { command } => match command {
            KeyCommands::List { email } => {
                let user_id = gateway
                    .user_id_by_email(&email)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("no user with email {}", email))?;
                let keys = gateway.list_user_keys(&user_id).await?;
                println!("{} key(s)", keys.count());
                for key in &keys.keys {
                    println!("  {}", key);
                }
            }
            KeyCommands::Active { email } => {
                let active = gateway.active_tokens(&email).await?;
                println!("{} active key(s) for user {}", active.count(), active.user_id);
                println!("{}", serde_json::to_string_pretty(&active.tokens)?);
            }
        },
        Commands::Token { command } => match command {
            TokenCommands::Ensure { email, models } => {
                let provisioner = Provisioner::new(gateway, cfg.policy.clone(), cfg.serialize_provisioning);
                match provisioner.ensure_token(&email, models.as_deref()).await {
                    ProvisionOutcome::Issued { key, .. } => {
                        println!("issued: {}", key.key.expose());
                        if let Some(expires) = key.expires {
                            println!("expires: {}", expires);
                        }
                    }
                    ProvisionOutcome::AlreadyProvisioned { active, .. } => {
                        println!("already provisioned ({} active key(s))", active);
                    }
                    ProvisionOutcome::Failed {
                        stage,
                        message,
                        status_code,
                        ..
                    } => {
                        let status = status_code.map(|c| format!(" (status {})", c)).unwrap_or_default();
                        anyhow::bail!("provisioning failed at {:?}: {}{}", stage, message, status);
                    }
                }
            }
        },
        Commands::Roster { command } => {
            let roster = CsvRoster::new(cfg.users_csv_path.clone());
            match command {
                RosterCommands::Check { handle } => match roster.email_for(&handle)? {
                    Some(email) => println!("authorized: {}", email),
                    None => println!("not authorized"),
                },
                RosterCommands::List => {
                    for (handle, email) in roster.all_entries()? {
                        println!("{}\t{}", handle, email);
                    }
                }
            }
        }
    }

    Ok(())
}
