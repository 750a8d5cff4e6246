use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use super::{require_session, send_chunked, send_fenced};
use crate::editor::history::RecentInstructions;
use crate::session::{EditSession, ItemTarget};
use crate::state::Context;

/// Open an item for editing in this channel
#[poise::command(slash_command, guild_only)]
pub async fn open(
    ctx: Context<'_>,
    #[description = "Connection number"] connection: u64,
    #[description = "Entry or item id"] item: String,
) -> Result<(), anyhow::Error> {
    let Some(conn) = ctx.data().connections.get(connection).await else {
        ctx.say(format!("No connection `#{}`.", connection)).await?;
        return Ok(());
    };

    ctx.defer().await?;
    let config = ctx.data().editor_config.read().await.clone();

    let target = ItemTarget {
        connection_id: conn.id,
        kind: conn.kind,
        container: conn.container.clone(),
        item_id: item.trim().to_string(),
    };
    let client = conn.client(&ctx.data().http, &config);
    let session = match EditSession::open(target, client, RecentInstructions::with_cap(config.history_cap)).await {
        Ok(s) => s,
        Err(e) => {
            ctx.say(format!("Could not open `{}`: {}", item, e)).await?;
            return Ok(());
        }
    };
    let summary = session.summary();

    let channel = ctx.channel_id().get();
    let replaced = ctx
        .data()
        .sessions
        .write()
        .await
        .insert(channel, Arc::new(Mutex::new(session)));
    if let Some(old) = replaced {
        let abandoned = old.lock().await.close();
        info!(channel, abandoned, "Replaced open session");
    }

    send_chunked(&ctx, &summary).await
}

/// Show the open item, with pending rewrites highlighted
#[poise::command(slash_command, guild_only)]
pub async fn show(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let Some(shared) = require_session(&ctx).await? else {
        return Ok(());
    };
    let (summary, content) = {
        let session = shared.lock().await;
        (session.summary(), session.editor().surface().render())
    };
    send_chunked(&ctx, &format!("{}\n**content**", summary)).await?;
    if content.trim().is_empty() {
        ctx.say("_(no content)_").await?;
        return Ok(());
    }
    send_fenced(&ctx, "html", &content).await
}

/// Close the open item. Unpublished changes are dropped.
#[poise::command(slash_command, guild_only)]
pub async fn close(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let channel = ctx.channel_id().get();
    let removed = ctx.data().sessions.write().await.remove(&channel);
    let Some(shared) = removed else {
        ctx.say("No item is open in this channel.").await?;
        return Ok(());
    };

    let (abandoned, unpublished) = {
        let mut session = shared.lock().await;
        (session.close(), session.pending().len())
    };
    info!(channel, abandoned, unpublished, "Session closed");

    let mut msg = "Closed.".to_string();
    if unpublished > 0 {
        msg.push_str(&format!(" {} unpublished change(s) were dropped.", unpublished));
    }
    if abandoned > 0 {
        msg.push_str(&format!(" {} rewrite(s) still running will be ignored.", abandoned));
    }
    ctx.say(msg).await?;
    Ok(())
}
