//! Registered CMS accounts, and the navigation view that follows them.
//!
//! The registry owns the connection list and announces every change on a
//! broadcast channel. Anything that shows connections subscribes instead of
//! polling.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cms::{CmsClient, CmsKind, ContentfulClient, WebflowClient};
use crate::state::EditorConfig;

const EVENT_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct Connection {
    pub id: u64,
    pub kind: CmsKind,
    /// Contentful space id or Webflow collection id.
    pub container: String,
    pub label: String,
    token: String,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("container", &self.container)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn client(&self, http: &reqwest::Client, config: &EditorConfig) -> Arc<dyn CmsClient> {
        match self.kind {
            CmsKind::Contentful => Arc::new(
                ContentfulClient::new(http.clone(), &self.token, &config.locale)
                    .with_base_url(&config.contentful_url),
            ),
            CmsKind::Webflow => {
                Arc::new(WebflowClient::new(http.clone(), &self.token).with_base_url(&config.webflow_url))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Added(Connection),
    Removed(Connection),
}

pub struct ConnectionRegistry {
    connections: RwLock<Vec<Connection>>,
    next_id: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connections: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Register an account. Returns `None` if this container is already
    /// connected.
    pub async fn add(
        &self,
        kind: CmsKind,
        container: impl Into<String>,
        token: impl Into<String>,
        label: impl Into<String>,
    ) -> Option<Connection> {
        let container = container.into();
        let mut connections = self.connections.write().await;
        if connections
            .iter()
            .any(|c| c.kind == kind && c.container == container)
        {
            return None;
        }
        let connection = Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            container,
            label: label.into(),
            token: token.into(),
        };
        connections.push(connection.clone());
        drop(connections);

        info!(id = connection.id, kind = %connection.kind, container = %connection.container, "Connection added");
        // No receivers is fine.
        let _ = self.events.send(ConnectionEvent::Added(connection.clone()));
        Some(connection)
    }

    pub async fn remove(&self, id: u64) -> Option<Connection> {
        let mut connections = self.connections.write().await;
        let index = connections.iter().position(|c| c.id == id)?;
        let removed = connections.remove(index);
        drop(connections);

        info!(id, kind = %removed.kind, "Connection removed");
        let _ = self.events.send(ConnectionEvent::Removed(removed.clone()));
        Some(removed)
    }

    pub async fn list(&self) -> Vec<Connection> {
        self.connections.read().await.clone()
    }

    pub async fn get(&self, id: u64) -> Option<Connection> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEntry {
    pub id: u64,
    pub kind: CmsKind,
    pub label: String,
    pub container: String,
}

impl From<&Connection> for NavEntry {
    fn from(c: &Connection) -> Self {
        Self {
            id: c.id,
            kind: c.kind,
            label: c.label.clone(),
            container: c.container.clone(),
        }
    }
}

/// Sidebar view of the connections, kept current from registry events.
#[derive(Default)]
pub struct Navigation {
    entries: RwLock<Vec<NavEntry>>,
}

impl Navigation {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<NavEntry> {
        self.entries.read().await.clone()
    }

    async fn apply(&self, event: ConnectionEvent) {
        let mut entries = self.entries.write().await;
        match event {
            ConnectionEvent::Added(c) => {
                if !entries.iter().any(|e| e.id == c.id) {
                    entries.push(NavEntry::from(&c));
                }
            }
            ConnectionEvent::Removed(c) => entries.retain(|e| e.id != c.id),
        }
    }

    async fn resync(&self, registry: &ConnectionRegistry) {
        let fresh: Vec<NavEntry> = registry.list().await.iter().map(NavEntry::from).collect();
        *self.entries.write().await = fresh;
    }

    /// Keep this view in step with `registry`. The task runs until aborted.
    pub fn follow(self: Arc<Self>, registry: Arc<ConnectionRegistry>) -> JoinHandle<()> {
        let mut events = registry.subscribe();
        tokio::spawn(async move {
            self.resync(&registry).await;
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(?event, "Navigation update");
                        self.apply(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Navigation fell behind; resyncing");
                        self.resync(&registry).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Entries grouped by CMS, for display.
    pub async fn render(&self) -> String {
        let entries = self.entries().await;
        if entries.is_empty() {
            return "No connections yet. Use `/clickwrite connect` to add one.".to_string();
        }
        let mut out = String::new();
        for kind in [CmsKind::Contentful, CmsKind::Webflow] {
            let group: Vec<&NavEntry> = entries.iter().filter(|e| e.kind == kind).collect();
            if group.is_empty() {
                continue;
            }
            let heading = match kind {
                CmsKind::Contentful => "**Contentful spaces**",
                CmsKind::Webflow => "**Webflow collections**",
            };
            out.push_str(heading);
            out.push('\n');
            for e in group {
                out.push_str(&format!("- `#{}` {} (`{}`)\n", e.id, e.label, e.container));
            }
        }
        out.trim_end().to_string()
    }
}
