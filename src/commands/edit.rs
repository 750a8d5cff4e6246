use tracing::info;

use super::{preview, require_session, send_chunked};
use crate::editor::{resolve, EditAction, EditorError, Effect, Event, CONTENT_FIELD};
use crate::state::Context;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ActionChoice {
    Regenerate,
    Expand,
    Condense,
    Custom,
}

/// Stage a new value for a field
#[poise::command(slash_command, guild_only)]
pub async fn set(
    ctx: Context<'_>,
    #[description = "Field id (use `content` for the article HTML)"] field: String,
    #[description = "New value; ids for link fields, commas for lists"] value: String,
) -> Result<(), anyhow::Error> {
    let Some(shared) = require_session(&ctx).await? else {
        return Ok(());
    };
    let result = shared.lock().await.set_field(field.trim(), &value);
    match result {
        Ok(()) => ctx.say(format!("`{}` staged. Publish when ready.", field.trim())).await?,
        Err(e) => ctx.say(format!("Could not set `{}`: {}", field.trim(), e)).await?,
    };
    Ok(())
}

/// Generate a whole field with AI
#[poise::command(slash_command, guild_only)]
pub async fn generate(
    ctx: Context<'_>,
    #[description = "Field id, e.g. title, subtitle, metaDescription, content"] field: String,
    #[description = "Extra instructions"] instructions: Option<String>,
    #[description = "Required to overwrite the article content"] confirm: Option<bool>,
) -> Result<(), anyhow::Error> {
    let Some(shared) = require_session(&ctx).await? else {
        return Ok(());
    };
    let field = field.trim().to_string();
    let (request, generator) = {
        let session = shared.lock().await;
        (
            session.field_request(&field, instructions, confirm.unwrap_or(false)),
            session.generator(),
        )
    };

    ctx.defer().await?;
    let model = ctx.data().editor_config.read().await.model.clone();
    let value = match generator.generate(&ctx.data().gateway, &model, &request).await {
        Ok(v) => v,
        Err(e) => {
            ctx.say(format!("Generation failed; `{}` is unchanged. {}", field, e))
                .await?;
            return Ok(());
        }
    };

    let channel = ctx.channel_id().get();
    if !ctx.data().is_current(channel, &shared).await {
        info!(channel, field = %field, "Session closed; discarding generated value");
        return Ok(());
    }
    let staged = shared.lock().await.set_field(&field, &value);
    match staged {
        Ok(()) if field == CONTENT_FIELD => {
            ctx.say("New article content staged. Use `/clickwrite show` to review it.")
                .await?;
        }
        Ok(()) => {
            send_chunked(&ctx, &format!("`{}` staged:\n{}", field, value)).await?;
        }
        Err(e) => {
            ctx.say(format!("Generated, but could not stage `{}`: {}", field, e))
                .await?;
        }
    }
    Ok(())
}

/// Rewrite a passage of the article in place
#[poise::command(slash_command, guild_only)]
pub async fn rewrite(
    ctx: Context<'_>,
    #[description = "Exact text to rewrite, as it appears in the content"] text: String,
    #[description = "What to do with it"] action: ActionChoice,
    #[description = "Instructions for a custom rewrite"] instructions: Option<String>,
    #[description = "Which occurrence, if the text appears more than once"] occurrence: Option<u32>,
) -> Result<(), anyhow::Error> {
    let Some(shared) = require_session(&ctx).await? else {
        return Ok(());
    };
    let action = match action {
        ActionChoice::Regenerate => EditAction::Regenerate,
        ActionChoice::Expand => EditAction::Expand,
        ActionChoice::Condense => EditAction::Condense,
        ActionChoice::Custom => match instructions.filter(|i| !i.trim().is_empty()) {
            Some(i) => EditAction::Custom(i),
            None => {
                ctx.say("A custom rewrite needs instructions.").await?;
                return Ok(());
            }
        },
    };

    // Acknowledge first: once the span is pending, every path below has to
    // settle it.
    ctx.defer().await?;

    // Mark the span pending, then let go of the session while the model runs.
    let started = {
        let mut session = shared.lock().await;
        let occurrence = occurrence.unwrap_or(1).saturating_sub(1) as usize;
        let selected = session.editor_mut().select_text(&text, occurrence);
        let started = match selected {
            Ok(_) => {
                let context = session.request_context();
                session.handle(Event::ActionInvoked { action, context })
            }
            Err(e) => Err(e),
        };
        started
    };
    let (id, request) = match started {
        Ok(Effect::Request { id, request }) => (id, request),
        Ok(_) => return Ok(()),
        Err(EditorError::NoSelection) => {
            ctx.say(format!("Could not find `{}` in the content.", preview(&text, 80)))
                .await?;
            return Ok(());
        }
        Err(e) => {
            ctx.say(format!("Cannot rewrite that: {}", e)).await?;
            return Ok(());
        }
    };

    let model = ctx.data().editor_config.read().await.model.clone();
    let event = resolve(&ctx.data().gateway, &model, id, &request).await;

    let channel = ctx.channel_id().get();
    if !ctx.data().is_current(channel, &shared).await {
        info!(channel, request = %id, "Session closed; discarding rewrite");
        return Ok(());
    }
    let outcome = shared.lock().await.handle(event);
    match outcome {
        Ok(Effect::Committed { replacement, .. }) => {
            send_chunked(
                &ctx,
                &format!("Replaced `{}` with:\n{}", preview(&text, 80), replacement),
            )
            .await?;
        }
        Ok(Effect::RolledBack { error, .. }) => {
            ctx.say(format!("Rewrite failed; the original text is back. {}", error))
                .await?;
        }
        Ok(_) | Err(EditorError::UnknownRequest(_)) => {
            info!(request = %id, "Rewrite no longer pending");
        }
        Err(e) => {
            ctx.say(format!("Rewrite failed: {}", e)).await?;
        }
    }
    Ok(())
}

/// Edit a passage by hand; works while rewrites run elsewhere
#[poise::command(slash_command, guild_only)]
pub async fn replace(
    ctx: Context<'_>,
    #[description = "Exact text to replace, as it appears in the content"] text: String,
    #[description = "Replacement text"] with: String,
    #[description = "Which occurrence, if the text appears more than once"] occurrence: Option<u32>,
) -> Result<(), anyhow::Error> {
    let Some(shared) = require_session(&ctx).await? else {
        return Ok(());
    };
    let occurrence = occurrence.unwrap_or(1).saturating_sub(1) as usize;
    let result = shared.lock().await.replace_text(&text, occurrence, &with);
    match result {
        Ok(()) => {
            ctx.say(format!("Replaced `{}`. Publish when ready.", preview(&text, 80)))
                .await?
        }
        Err(e) => ctx.say(format!("Could not replace `{}`: {}", preview(&text, 80), e)).await?,
    };
    Ok(())
}

/// Show recently used custom instructions
#[poise::command(slash_command, guild_only)]
pub async fn history(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let Some(shared) = require_session(&ctx).await? else {
        return Ok(());
    };
    let entries: Vec<String> = {
        let session = shared.lock().await;
        let entries = session
            .editor()
            .history()
            .iter()
            .map(str::to_string)
            .collect();
        entries
    };
    if entries.is_empty() {
        ctx.say("No custom instructions used yet.").await?;
        return Ok(());
    }
    let mut out = "**Recent instructions**\n".to_string();
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, entry));
    }
    ctx.say(out).await?;
    Ok(())
}
