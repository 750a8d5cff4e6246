use super::is_admin;
use crate::ai::is_supported_model;
use crate::state::Context;

/// Configure the editor (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn config(
    ctx: Context<'_>,
    #[description = "model | history_cap"] param: Option<String>,
    #[description = "New value"] value: Option<String>,
) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    match (param.as_deref(), value) {
        // Show current config
        (None, _) => {
            let config = ctx.data().editor_config.read().await;
            ctx.say(format!(
                "**Editor Configuration:**\n\
                 `model`: {}\n\
                 `history_cap`: {}\n\
                 `locale`: {}",
                config.model, config.history_cap, config.locale
            ))
            .await?;
        }
        // Set a parameter
        (Some(key), Some(val)) => match key {
            "model" => {
                let val = val.trim().to_string();
                if !is_supported_model(&val) {
                    ctx.say(format!("Unsupported model `{}`.", val)).await?;
                    return Ok(());
                }
                ctx.data().editor_config.write().await.model = val.clone();
                ctx.say(format!("`model` set to {}", val)).await?;
            }
            "history_cap" => {
                let Ok(cap) = val.trim().parse::<usize>() else {
                    ctx.say("`history_cap` must be a whole number.").await?;
                    return Ok(());
                };
                ctx.data().editor_config.write().await.history_cap = cap;
                let sessions: Vec<_> = ctx.data().sessions.read().await.values().cloned().collect();
                for session in sessions {
                    session.lock().await.editor_mut().history_mut().set_cap(cap);
                }
                ctx.say(format!("`history_cap` set to {}", cap)).await?;
            }
            _ => {
                ctx.say(format!(
                    "Unknown param `{}`. Valid: `model`, `history_cap`",
                    key
                ))
                .await?;
            }
        },
        (Some(_), None) => {
            ctx.say("Provide both `param` and `value`. Example: `/clickwrite config model gpt-4o`")
                .await?;
        }
    }

    Ok(())
}
