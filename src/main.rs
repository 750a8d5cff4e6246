mod ai;
mod cms;
mod commands;
mod connections;
mod editor;
mod richtext;
mod session;
mod state;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tokio::sync::RwLock;
use tracing::{error, info, Level};

use ai::{AiGateway, OpenAiBackend};
use cms::CmsKind;
use connections::{ConnectionRegistry, Navigation};
use state::{AppState, EditorConfig};

/// Register the connections configured through the environment.
async fn bootstrap_connections(registry: &ConnectionRegistry) {
    let pairs = [
        (CmsKind::Contentful, "CONTENTFUL_SPACE_ID", "CONTENTFUL_TOKEN"),
        (CmsKind::Webflow, "WEBFLOW_COLLECTION_ID", "WEBFLOW_TOKEN"),
    ];
    for (kind, container_var, token_var) in pairs {
        if let (Ok(container), Ok(token)) = (dotenv::var(container_var), dotenv::var(token_var)) {
            let label = format!("{} {}", kind, container);
            if registry.add(kind, container, token, label).await.is_some() {
                info!(%kind, "Connection loaded from environment");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    // Load env
    let _ = dotenv::dotenv();
    let token = dotenv::var("DISCORD_TOKEN").context("DISCORD_TOKEN required")?;
    let guild_id: Option<serenity::GuildId> = dotenv::var("DISCORD_GUILD_ID")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(serenity::GuildId::new);

    // Init AI gateway
    let backend = OpenAiBackend::from_env()?;
    let gateway = Arc::new(AiGateway::new(Arc::new(backend)));
    info!("AI gateway initialized");

    let editor_config = EditorConfig::from_env();
    info!(model = %editor_config.model, locale = %editor_config.locale, "Editor configured");

    // Parse admin user IDs from env
    let admin_ids: HashSet<u64> = dotenv::var("ADMIN_USER_IDS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect();
    if !admin_ids.is_empty() {
        info!(count = admin_ids.len(), "Admin users configured");
    }

    // Connections and the navigation view that follows them
    let connections = Arc::new(ConnectionRegistry::new());
    let navigation = Arc::new(Navigation::new());
    let _follower = navigation.clone().follow(connections.clone());
    bootstrap_connections(&connections).await;

    let app_state = AppState {
        http: reqwest::Client::new(),
        gateway,
        connections,
        navigation,
        sessions: RwLock::new(HashMap::new()),
        admin_ids,
        editor_config: Arc::new(RwLock::new(editor_config)),
    };

    let intents =
        serenity::GatewayIntents::GUILDS | serenity::GatewayIntents::GUILD_MESSAGES;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::clickwrite()],
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);

                let commands = &framework.options().commands;
                info!("Registering {} top-level command(s):", commands.len());
                for cmd in commands {
                    info!("  /{} ({} subcommands)", cmd.name, cmd.subcommands.len());
                    for sub in &cmd.subcommands {
                        info!("    /{} {}", cmd.name, sub.name);
                    }
                }

                if let Some(gid) = guild_id {
                    info!("Registering to guild {} (instant)", gid);
                    poise::builtins::register_in_guild(
                        ctx,
                        &framework.options().commands,
                        gid,
                    )
                    .await?;
                } else {
                    info!("Registering globally (up to 1 hour delay)");
                    poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    )
                    .await?;
                }

                Ok(app_state)
            })
        })
        .build();

    info!("Starting clickwrite...");

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    Ok(())
}
