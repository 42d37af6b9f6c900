//! richgate - gateway session client
//!
//! Connects to the gateway, keeps the session alive and publishes a rich
//! presence until interrupted.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use richgate::proto::{Activity, ActivityKind, Assets, Presence, Status};
use richgate::{ClientEvent, GatewayClient, GatewayConfig, WsConnector};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "richgate")]
#[command(about = "Persistent gateway session client with rich presence")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Gateway token (overrides the config file)
    #[arg(long, env = "RICHGATE_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Application id attached to activities
    #[arg(long, env = "RICHGATE_CLIENT_ID", global = true)]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and publish a presence until Ctrl-C
    Run(PresenceArgs),

    /// Validate the configuration and exit
    CheckConfig,
}

#[derive(Args)]
struct PresenceArgs {
    /// Activity name
    #[arg(long)]
    name: Option<String>,

    /// Activity details line
    #[arg(long)]
    details: Option<String>,

    /// Activity state line
    #[arg(long)]
    state: Option<String>,

    /// Large image asset key or URL
    #[arg(long)]
    large_image: Option<String>,

    /// Online status (online, idle, dnd, invisible)
    #[arg(long, default_value = "online")]
    status: Status,
}

impl PresenceArgs {
    fn presence(&self) -> Option<Presence> {
        let name = self.name.as_ref()?;
        let mut activity = Activity::new(name, ActivityKind::Playing);
        if let Some(details) = &self.details {
            activity = activity.with_details(details);
        }
        if let Some(state) = &self.state {
            activity = activity.with_state(state);
        }
        if let Some(image) = &self.large_image {
            activity = activity.with_assets(Assets {
                large_image: Some(image.clone()),
                ..Assets::default()
            });
        }
        Some(Presence::new(self.status).with_activity(activity))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_tracing(&config)?;

    match cli.command {
        Commands::Run(args) => run(config, args).await?,
        Commands::CheckConfig => {
            config.credentials()?;
            println!("Config OK");
            println!("  gateway: {}", config.gateway_url);
            println!("  intents: {}", config.intents);
            println!(
                "  client id: {}",
                config.client_id.as_deref().unwrap_or("(none)")
            );
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(token) = &cli.token {
        config.token.clone_from(token);
    }
    if let Some(client_id) = &cli.client_id {
        config.client_id = Some(client_id.clone());
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &GatewayConfig) -> anyhow::Result<()> {
    let level = if config.logs { "info" } else { "warn" };
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"))
        .add_directive(format!("richgate={level}").parse()?);
    if config.handle_logs {
        filter = filter.add_directive("richgate::events=debug".parse()?);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    Ok(())
}

async fn run(config: GatewayConfig, args: PresenceArgs) -> anyhow::Result<()> {
    info!(gateway = %config.gateway_url, "starting richgate");

    let client = GatewayClient::new(&config, WsConnector::new())?;
    let mut events = client.subscribe();

    client.on("READY", |payload| {
        let user = payload["user"]["username"].as_str().unwrap_or("unknown");
        info!(user, "logged in");
        Ok(())
    });

    client.connect().await?;

    let presence = args.presence();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Connected { session_id, resumed }) => {
                    info!(session_id = ?session_id, resumed, "session ready");
                    if let Some(presence) = &presence {
                        if let Err(e) = client.set_presence(presence.clone()).await {
                            error!(error = %e, "failed to set presence");
                        }
                    }
                }
                Ok(ClientEvent::Disconnected { reason }) => warn!(reason = %reason, "disconnected"),
                Ok(ClientEvent::Reconnecting { attempt, delay }) => {
                    info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
                }
                Ok(ClientEvent::ReconnectFailed { attempts }) => {
                    error!(attempts, "could not reconnect");
                }
                Ok(ClientEvent::Closed) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed lifecycle events"),
            }
        }
    }

    client.close().await;
    info!("stopped");
    Ok(())
}
