use poise::CreateReply;
use tracing::info;

use super::is_admin;
use crate::cms::CmsKind;
use crate::state::Context;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum CmsChoice {
    Contentful,
    Webflow,
}

impl From<CmsChoice> for CmsKind {
    fn from(choice: CmsChoice) -> Self {
        match choice {
            CmsChoice::Contentful => CmsKind::Contentful,
            CmsChoice::Webflow => CmsKind::Webflow,
        }
    }
}

/// Connect a Contentful space or Webflow collection (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn connect(
    ctx: Context<'_>,
    #[description = "Which CMS"] cms: CmsChoice,
    #[description = "Contentful space id or Webflow collection id"] container: String,
    #[description = "Management API token"] token: String,
    #[description = "Display name"] label: Option<String>,
) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    let kind = CmsKind::from(cms);
    let container = container.trim().to_string();
    let label = label.unwrap_or_else(|| format!("{} {}", kind, container));

    // Replies stay private; the command carried a token.
    let reply = match ctx
        .data()
        .connections
        .add(kind, container.clone(), token.trim(), label)
        .await
    {
        Some(conn) => {
            info!(user = %ctx.author().name, id = conn.id, %kind, "Connection created");
            format!(
                "Connected **{}** as `#{}`. Browse it with `/clickwrite items {}`.",
                conn.label, conn.id, conn.id
            )
        }
        None => format!("`{}` is already connected.", container),
    };
    ctx.send(CreateReply::default().content(reply).ephemeral(true))
        .await?;
    Ok(())
}

/// Remove a connection (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn disconnect(
    ctx: Context<'_>,
    #[description = "Connection number from /clickwrite connections"] connection: u64,
) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    match ctx.data().connections.remove(connection).await {
        Some(conn) => {
            ctx.say(format!("Disconnected **{}**.", conn.label)).await?;
        }
        None => {
            ctx.say(format!("No connection `#{}`.", connection)).await?;
        }
    }
    Ok(())
}

/// List connected spaces and collections
#[poise::command(slash_command, guild_only)]
pub async fn connections(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let listing = ctx.data().navigation.render().await;
    ctx.say(listing).await?;
    Ok(())
}
