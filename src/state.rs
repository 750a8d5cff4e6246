use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::ai::{AiGateway, DEFAULT_MODEL};
use crate::cms::{contentful, webflow};
use crate::connections::{ConnectionRegistry, Navigation};
use crate::editor::history::DEFAULT_HISTORY_CAP;
use crate::session::EditSession;

/// Editor settings (admins can modify at runtime).
#[derive(Debug, Clone)]
pub struct EditorConfig {
    pub model: String,
    pub history_cap: usize,
    pub locale: String,
    pub contentful_url: String,
    pub webflow_url: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            history_cap: DEFAULT_HISTORY_CAP,
            locale: contentful::DEFAULT_LOCALE.to_string(),
            contentful_url: contentful::DEFAULT_BASE_URL.to_string(),
            webflow_url: webflow::DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl EditorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: dotenv::var("AI_MODEL").unwrap_or(defaults.model),
            history_cap: defaults.history_cap,
            locale: dotenv::var("CONTENTFUL_LOCALE").unwrap_or(defaults.locale),
            contentful_url: dotenv::var("CONTENTFUL_API_URL").unwrap_or(defaults.contentful_url),
            webflow_url: dotenv::var("WEBFLOW_API_URL").unwrap_or(defaults.webflow_url),
        }
    }
}

pub type SharedSession = Arc<Mutex<EditSession>>;

pub struct AppState {
    pub http: reqwest::Client,
    pub gateway: Arc<AiGateway>,
    pub connections: Arc<ConnectionRegistry>,
    pub navigation: Arc<Navigation>,
    /// Open edit sessions keyed by channel id.
    pub sessions: RwLock<HashMap<u64, SharedSession>>,
    pub admin_ids: HashSet<u64>,
    pub editor_config: Arc<RwLock<EditorConfig>>,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub async fn session(&self, channel_id: u64) -> Option<SharedSession> {
        self.sessions.read().await.get(&channel_id).cloned()
    }

    /// True while `session` is still the one open in the channel.
    pub async fn is_current(&self, channel_id: u64, session: &SharedSession) -> bool {
        self.sessions
            .read()
            .await
            .get(&channel_id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
