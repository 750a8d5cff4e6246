mod config;
mod connect;
mod edit;
mod items;
mod open;
mod publish;

use crate::state::{Context, SharedSession};

/// Clickwrite - AI-assisted editing for Contentful and Webflow
#[poise::command(
    slash_command,
    subcommands(
        "connect::connect",
        "connect::disconnect",
        "connect::connections",
        "items::items",
        "open::open",
        "open::show",
        "open::close",
        "edit::set",
        "edit::generate",
        "edit::rewrite",
        "edit::replace",
        "edit::history",
        "publish::publish",
        "publish::discard",
        "config::config"
    )
)]
pub async fn clickwrite(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

pub(crate) fn is_admin(ctx: &Context<'_>) -> bool {
    ctx.data().is_admin(ctx.author().id.get())
}

/// The session open in this channel, or a hint to open one.
pub(crate) async fn require_session(ctx: &Context<'_>) -> Result<Option<SharedSession>, anyhow::Error> {
    let session = ctx.data().session(ctx.channel_id().get()).await;
    if session.is_none() {
        ctx.say("No item is open in this channel. Use `/clickwrite open` first.")
            .await?;
    }
    Ok(session)
}

/// Largest index `<= at` that falls on a char boundary.
fn floor_boundary(text: &str, at: usize) -> usize {
    (0..=at.min(text.len()))
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

/// Send a message in Discord-safe chunks (max 1990 chars).
/// Uses ctx.say() for all chunks so follow-ups go through the interaction
/// webhook.
pub(crate) async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    for chunk in chunks(text, 1990) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

/// Send `text` as code blocks, fencing every chunk on its own.
pub(crate) async fn send_fenced(ctx: &Context<'_>, lang: &str, text: &str) -> Result<(), anyhow::Error> {
    for block in fenced(lang, text, 1990) {
        ctx.say(block).await?;
    }
    Ok(())
}

fn fenced(lang: &str, text: &str, max: usize) -> Vec<String> {
    let overhead = "```\n\n```".len() + lang.len();
    chunks(text, max.saturating_sub(overhead).max(1))
        .into_iter()
        .map(|chunk| format!("```{}\n{}\n```", lang, chunk.trim_end_matches('\n')))
        .collect()
}

fn chunks(text: &str, max: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let chunk_len = floor_boundary(remaining, remaining.len().min(max));
        let split_at = if chunk_len < remaining.len() {
            remaining[..chunk_len]
                .rfind('\n')
                .or_else(|| remaining[..chunk_len].rfind(' '))
                .map(|i| i + 1)
                .unwrap_or(chunk_len)
        } else {
            chunk_len
        };
        // A single char wider than `max` still has to go somewhere.
        let split_at = if split_at == 0 {
            remaining.chars().next().map_or(remaining.len(), char::len_utf8)
        } else {
            split_at
        };
        out.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    out
}

/// Shorten `text` for a status line.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    format!("{}…", &text[..floor_boundary(text, max)])
}
