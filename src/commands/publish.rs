use tracing::info;

use super::{require_session, send_chunked};
use crate::cms::CmsError;
use crate::session;
use crate::state::Context;

/// Send all staged changes to the CMS in one update
#[poise::command(slash_command, guild_only)]
pub async fn publish(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let Some(shared) = require_session(&ctx).await? else {
        return Ok(());
    };
    ctx.defer().await?;

    let nothing = {
        let session = shared.lock().await;
        !session.pending().is_dirty() && !session.editor().is_changed()
    };
    if nothing {
        ctx.say("Nothing to publish.").await?;
        return Ok(());
    }

    match session::publish(&shared).await {
        Ok(published) => {
            info!(user = %ctx.author().name, staged = published.staged, version = %published.version, "Publish complete");
            ctx.say(format!(
                "Published {} change(s). The item is now at version `{}`.",
                published.staged, published.version
            ))
            .await?;
        }
        Err(e @ CmsError::Conflict(_)) => {
            ctx.say(format!("{}\nYour staged changes are kept.", e)).await?;
        }
        Err(e) => {
            send_chunked(
                &ctx,
                &format!("Publish failed; staged changes are kept.\n{}", e),
            )
            .await?;
        }
    }
    Ok(())
}

/// Drop all staged changes
#[poise::command(slash_command, guild_only)]
pub async fn discard(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let Some(shared) = require_session(&ctx).await? else {
        return Ok(());
    };
    let result = shared.lock().await.discard();
    match result {
        Ok(()) => ctx.say("Staged changes discarded.").await?,
        Err(e) => ctx.say(format!("Cannot discard yet: {}", e)).await?,
    };
    Ok(())
}
