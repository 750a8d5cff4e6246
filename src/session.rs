//! One open item being edited in a channel.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cms::pending::Outgoing;
use crate::cms::{
    CmsClient, CmsError, CmsItem, CmsKind, FieldMap, FieldValue, PendingChanges, Version,
};
use crate::editor::history::RecentInstructions;
use crate::editor::surface::{Surface, SurfaceError};
use crate::editor::{
    Effect, EditorError, Event, FieldGenerator, FieldRequest, RequestContext, SelectionEditor,
    CONTENT_FIELD,
};
use crate::richtext::{decode_to_html, encode_from_html, text_content};

const FLATTEN_WIDTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTarget {
    pub connection_id: u64,
    pub kind: CmsKind,
    pub container: String,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    Editor(EditorError),
    Cms(CmsError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Editor(e) => write!(f, "{}", e),
            SessionError::Cms(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<EditorError> for SessionError {
    fn from(e: EditorError) -> Self {
        SessionError::Editor(e)
    }
}

impl From<SurfaceError> for SessionError {
    fn from(e: SurfaceError) -> Self {
        SessionError::Editor(EditorError::Surface(e))
    }
}

impl From<CmsError> for SessionError {
    fn from(e: CmsError) -> Self {
        SessionError::Cms(e)
    }
}

/// Plain-text rendering of article HTML for prompts.
pub fn flatten_html(html: &str) -> String {
    html2text::from_read(html.as_bytes(), FLATTEN_WIDTH).unwrap_or_else(|_| text_content(html))
}

fn content_html(value: Option<&FieldValue>) -> String {
    match value {
        Some(FieldValue::Document(doc)) => decode_to_html(doc),
        Some(FieldValue::Text(html)) => html.clone(),
        Some(other) => other.display_text(),
        None => String::new(),
    }
}

pub struct EditSession {
    pub target: ItemTarget,
    cms: Arc<dyn CmsClient>,
    item: CmsItem,
    editor: SelectionEditor,
    generator: Arc<FieldGenerator>,
    pending: PendingChanges,
}

impl EditSession {
    pub async fn open(
        target: ItemTarget,
        cms: Arc<dyn CmsClient>,
        history: RecentInstructions,
    ) -> Result<Self, CmsError> {
        let item = cms.get_item(&target.container, &target.item_id).await?;
        info!(kind = %target.kind, item = %target.item_id, version = %item.version, "Item opened");
        Ok(Self::from_item(target, cms, item, history))
    }

    pub fn from_item(
        target: ItemTarget,
        cms: Arc<dyn CmsClient>,
        item: CmsItem,
        history: RecentInstructions,
    ) -> Self {
        let surface = Surface::html(content_html(item.fields.get(CONTENT_FIELD)));
        Self {
            target,
            cms,
            item,
            editor: SelectionEditor::with_history(surface, history),
            generator: Arc::new(FieldGenerator::new()),
            pending: PendingChanges::new(),
        }
    }

    pub fn item(&self) -> &CmsItem {
        &self.item
    }

    pub fn editor(&self) -> &SelectionEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut SelectionEditor {
        &mut self.editor
    }

    pub fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    pub fn generator(&self) -> Arc<FieldGenerator> {
        self.generator.clone()
    }

    /// Current value of a field as text: the article HTML for the content
    /// field, otherwise the pending value if any, else the loaded value.
    pub fn current_value(&self, field: &str) -> String {
        if field == CONTENT_FIELD {
            return self.editor.surface().text().to_string();
        }
        self.pending
            .get(field)
            .or_else(|| self.item.fields.get(field))
            .map(FieldValue::display_text)
            .unwrap_or_default()
    }

    pub fn article_text(&self) -> String {
        flatten_html(self.editor.surface().text())
    }

    /// Article text plus the item's descriptive fields, for AI requests.
    pub fn request_context(&self) -> RequestContext {
        let metadata = self
            .target
            .kind
            .context_fields()
            .iter()
            .filter_map(|(key, field)| {
                let value = self.current_value(field);
                (!value.trim().is_empty()).then(|| (key.to_string(), value))
            })
            .collect();
        RequestContext {
            full_article: self.article_text(),
            metadata,
        }
    }

    pub fn field_request(&self, field: &str, instructions: Option<String>, confirmed: bool) -> FieldRequest {
        let context = self.request_context();
        FieldRequest {
            field: field.to_string(),
            current_value: self.current_value(field),
            full_article: context.full_article,
            context: context.metadata,
            instructions,
            confirmed,
        }
    }

    /// Stage a new value. For the content field `raw` is HTML and replaces
    /// the editing surface; other fields are coerced to the field's type.
    pub fn set_field(&mut self, field: &str, raw: &str) -> Result<(), SessionError> {
        if field == CONTENT_FIELD {
            self.editor.surface_mut().set_text(raw)?;
            self.sync_content();
            return Ok(());
        }
        let value = self.item.coerce(field, raw)?;
        debug!(field, "Field staged");
        self.pending.set(field, value);
        Ok(())
    }

    /// Feed an editor event through, staging the content field whenever a
    /// rewrite commits.
    pub fn handle(&mut self, event: Event) -> Result<Effect, EditorError> {
        let effect = self.editor.handle(event)?;
        if self.editor.take_changed() {
            self.sync_content();
        }
        Ok(effect)
    }

    /// Stage the surface text as the content field, in the shape the CMS
    /// stores it.
    fn sync_content(&mut self) {
        let html = self.editor.surface().text();
        let structured = match self.item.fields.get(CONTENT_FIELD) {
            Some(FieldValue::Document(_)) => true,
            Some(_) => false,
            None => self.target.kind == CmsKind::Contentful,
        };
        let value = if structured {
            FieldValue::Document(encode_from_html(html))
        } else {
            FieldValue::Text(html.to_string())
        };
        self.pending.set(CONTENT_FIELD, value);
    }

    /// Stage any committed rewrite and snapshot the publish. The session can
    /// be unlocked while the job is sent.
    pub fn prepare_publish(&mut self) -> PublishJob {
        if self.editor.take_changed() {
            self.sync_content();
        }
        PublishJob {
            cms: self.cms.clone(),
            container: self.target.container.clone(),
            outgoing: self.pending.prepare(&self.item),
        }
    }

    pub fn finish_publish(
        &mut self,
        job: PublishJob,
        answer: Result<CmsItem, CmsError>,
    ) -> Result<FieldMap, CmsError> {
        let sent = self.pending.settle(job.outgoing, answer, &mut self.item)?;
        if self.pending.get(CONTENT_FIELD).is_none() {
            self.reload_surface();
        }
        Ok(sent)
    }

    /// Throw away staged changes and show the loaded content again.
    pub fn discard(&mut self) -> Result<(), SessionError> {
        self.editor
            .surface_mut()
            .set_text(content_html(self.item.fields.get(CONTENT_FIELD)))?;
        self.editor.take_changed();
        self.pending.discard();
        Ok(())
    }

    fn reload_surface(&mut self) {
        let html = content_html(self.item.fields.get(CONTENT_FIELD));
        if let Err(e) = self.editor.surface_mut().set_text(html) {
            debug!(error = %e, "Keeping surface while rewrites are pending");
        }
    }

    /// An ordinary edit of the `occurrence`-th match of `needle`. Allowed
    /// while rewrites are pending elsewhere in the article.
    pub fn replace_text(
        &mut self,
        needle: &str,
        occurrence: usize,
        replacement: &str,
    ) -> Result<(), SessionError> {
        let surface = self.editor.surface_mut();
        let range = surface.find(needle, occurrence).ok_or(EditorError::NoSelection)?;
        let insert = surface.prepare_insert(replacement);
        surface.edit(range, &insert)?;
        self.sync_content();
        Ok(())
    }

    /// End the session. Pending rewrites are abandoned.
    pub fn close(&mut self) -> usize {
        self.editor.abandon_all()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "**{}** `{}` ({}, version `{}`)\n",
            self.current_value(self.target.kind.title_field()),
            self.item.id,
            self.item.status,
            self.item.version
        );
        for (field, value) in &self.item.fields {
            if field == CONTENT_FIELD {
                continue;
            }
            let (marker, text) = match self.pending.get(field) {
                Some(p) => ("*", p.display_text()),
                None => ("", value.display_text()),
            };
            let note = if self.generator.is_generating(field) { " (generating)" } else { "" };
            out.push_str(&format!("- {}{}: {}{}\n", field, marker, text, note));
        }
        for (field, value) in self.pending.fields() {
            if field != CONTENT_FIELD && !self.item.fields.contains_key(field) {
                out.push_str(&format!("- {}*: {}\n", field, value.display_text()));
            }
        }
        match (self.pending.get(CONTENT_FIELD), self.item.fields.get(CONTENT_FIELD)) {
            (Some(_), _) => out.push_str("- content*: (edited)\n"),
            (None, Some(FieldValue::Document(doc))) if doc.is_empty() => {
                out.push_str("- content: (empty)\n")
            }
            _ => {}
        }
        let rewriting = self.editor.pending_count();
        if rewriting > 0 {
            out.push_str(&format!("- content: {} rewrite(s) in progress\n", rewriting));
        }
        if self.pending.is_dirty() {
            out.push_str(&format!(
                "\n{} unpublished change(s), marked with *",
                self.pending.len()
            ));
        }
        out
    }
}

/// A publish detached from its session.
pub struct PublishJob {
    cms: Arc<dyn CmsClient>,
    container: String,
    outgoing: Outgoing,
}

impl PublishJob {
    pub fn staged(&self) -> usize {
        self.outgoing.staged()
    }

    pub async fn send(&self) -> Result<CmsItem, CmsError> {
        self.outgoing.send(self.cms.as_ref(), &self.container).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub fields: FieldMap,
    /// Pending values the update carried.
    pub staged: usize,
    pub version: Version,
}

/// Publish a shared session. The lock is held only to prepare and to settle,
/// not while the CMS answers, so rewrites can finish in the meantime.
pub async fn publish(shared: &Mutex<EditSession>) -> Result<Published, CmsError> {
    let job = shared.lock().await.prepare_publish();
    let staged = job.staged();
    let answer = job.send().await;

    let mut session = shared.lock().await;
    let fields = session.finish_publish(job, answer)?;
    Ok(Published {
        fields,
        staged,
        version: session.item.version.clone(),
    })
}
