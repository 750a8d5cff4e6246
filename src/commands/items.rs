use futures::StreamExt;
use tracing::{info, warn};

use super::send_chunked;
use crate::cms::listing::filter_and_sort;
use crate::cms::{DraftFilter, ItemStatus, ItemSummary, SortOrder};
use crate::connections::Connection;
use crate::state::Context;

/// Connections listed at once when no connection is given.
const LIST_CONCURRENCY: usize = 4;

/// List items of one connection, or of every connection
#[poise::command(slash_command, guild_only)]
pub async fn items(
    ctx: Context<'_>,
    #[description = "Connection number (all connections if omitted)"] connection: Option<u64>,
    #[description = "all | drafts | published"] status: Option<String>,
    #[description = "newest | oldest"] sort: Option<String>,
) -> Result<(), anyhow::Error> {
    let filter = match status.as_deref().map(DraftFilter::parse) {
        None => DraftFilter::All,
        Some(Some(f)) => f,
        Some(None) => {
            ctx.say("Status must be `all`, `drafts` or `published`.").await?;
            return Ok(());
        }
    };
    let order = match sort.as_deref().map(SortOrder::parse) {
        None => SortOrder::NewestFirst,
        Some(Some(o)) => o,
        Some(None) => {
            ctx.say("Sort must be `newest` or `oldest`.").await?;
            return Ok(());
        }
    };

    let targets: Vec<Connection> = match connection {
        Some(id) => match ctx.data().connections.get(id).await {
            Some(conn) => vec![conn],
            None => {
                ctx.say(format!("No connection `#{}`.", id)).await?;
                return Ok(());
            }
        },
        None => ctx.data().connections.list().await,
    };
    if targets.is_empty() {
        ctx.say("No connections yet. Use `/clickwrite connect` to add one.")
            .await?;
        return Ok(());
    }

    ctx.defer().await?;
    let config = ctx.data().editor_config.read().await.clone();
    let http = ctx.data().http.clone();

    let results: Vec<(Connection, Result<Vec<ItemSummary>, String>)> = futures::stream::iter(targets)
        .map(|conn| {
            let client = conn.client(&http, &config);
            async move {
                let listed = client
                    .list_items(&conn.container)
                    .await
                    .map_err(|e| e.to_string());
                (conn, listed)
            }
        })
        .buffered(LIST_CONCURRENCY)
        .collect()
        .await;

    let mut out = String::new();
    for (conn, listed) in results {
        let items = match listed {
            Ok(items) => filter_and_sort(items, filter, order),
            Err(e) => {
                warn!(connection = conn.id, error = %e, "Listing failed");
                out.push_str(&format!("**{}**: could not list items ({})\n\n", conn.label, e));
                continue;
            }
        };
        info!(connection = conn.id, count = items.len(), "Items listed");

        out.push_str(&format!("**{}** `#{}` ({} items)\n", conn.label, conn.id, items.len()));
        for item in &items {
            let created = item
                .created_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string());
            let marker = match item.status {
                ItemStatus::Draft => "draft",
                ItemStatus::Published => "published",
            };
            out.push_str(&format!(
                "- {} `{}` {} _{}_\n",
                item.title, item.id, created, marker
            ));
        }
        out.push('\n');
    }
    send_chunked(&ctx, out.trim_end()).await
}
