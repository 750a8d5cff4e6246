//! Span-scoped AI editing over a [`Surface`].
//!
//! The editor is a small state machine fed with discrete [`Event`]s:
//!
//! ```text
//! Idle -> Selecting -> ActionChosen -> Pending -> Committed | RolledBack
//! ```
//!
//! Selecting is tracked in [`Phase`]. ActionChosen is the moment an
//! `ActionInvoked` event is handled; it turns the selection into a
//! bookmarked, decorated span and yields the request to send. Each pending
//! span then waits for exactly one `ResponseReceived` or `RequestFailed`.
//! Several spans may be pending at once as long as they do not overlap.

pub mod field;
pub mod history;
pub mod surface;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use tracing::{debug, info, warn};

use crate::ai::prompts::INSTRUCTIONS_KEY;
use crate::ai::{AiAction, AiError, AiGateway, AiRequest, Metadata};
use history::RecentInstructions;
use surface::{BookmarkId, Decoration, Surface, SurfaceError};

pub use field::{FieldGenerator, FieldRequest, CONTENT_FIELD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditAction {
    Regenerate,
    Expand,
    Condense,
    /// Rewrite following free-text instructions from the user.
    Custom(String),
}

impl EditAction {
    pub fn ai_action(&self) -> AiAction {
        match self {
            EditAction::Regenerate | EditAction::Custom(_) => AiAction::Regenerate,
            EditAction::Expand => AiAction::Expound,
            EditAction::Condense => AiAction::Condense,
        }
    }

    pub fn instructions(&self) -> Option<&str> {
        match self {
            EditAction::Custom(text) => Some(text),
            _ => None,
        }
    }

}

impl fmt::Display for EditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditAction::Regenerate => f.write_str("regenerate"),
            EditAction::Expand => f.write_str("expand"),
            EditAction::Condense => f.write_str("condense"),
            EditAction::Custom(text) => write!(f, "custom ({})", text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Selecting(Range<usize>),
}

/// Article-wide context attached to every request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub full_article: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub enum Event {
    SelectionChanged(Option<Range<usize>>),
    ActionInvoked {
        action: EditAction,
        context: RequestContext,
    },
    ResponseReceived {
        request: RequestId,
        text: String,
    },
    RequestFailed {
        request: RequestId,
        error: AiError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// Send this request; report the outcome with the same id.
    Request { id: RequestId, request: AiRequest },
    Committed { id: RequestId, replacement: String },
    RolledBack { id: RequestId, error: AiError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorError {
    NoSelection,
    EmptySelection,
    /// The request already finished or was abandoned.
    UnknownRequest(RequestId),
    Surface(SurfaceError),
}

impl fmt::Display for EditorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditorError::NoSelection => f.write_str("Select some text first"),
            EditorError::EmptySelection => f.write_str("The selection contains no text"),
            EditorError::UnknownRequest(id) => write!(f, "Request {} is no longer pending", id),
            EditorError::Surface(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EditorError {}

impl From<SurfaceError> for EditorError {
    fn from(e: SurfaceError) -> Self {
        EditorError::Surface(e)
    }
}

#[derive(Debug, Clone)]
struct PendingEdit {
    bookmark: BookmarkId,
    original: String,
    action: EditAction,
}

#[derive(Debug, Clone)]
pub struct SelectionEditor {
    surface: Surface,
    phase: Phase,
    pending: BTreeMap<RequestId, PendingEdit>,
    history: RecentInstructions,
    changed: bool,
    next_request: u64,
}

impl SelectionEditor {
    pub fn new(surface: Surface) -> Self {
        Self::with_history(surface, RecentInstructions::default())
    }

    pub fn with_history(surface: Surface, history: RecentInstructions) -> Self {
        Self {
            surface,
            phase: Phase::Idle,
            pending: BTreeMap::new(),
            history,
            changed: false,
            next_request: 0,
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Direct access for ordinary edits. Pending spans stay protected by
    /// their bookmarks.
    pub fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn history(&self) -> &RecentInstructions {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut RecentInstructions {
        &mut self.history
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Read and reset the changed flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Select the `occurrence`-th match of `needle`.
    pub fn select_text(&mut self, needle: &str, occurrence: usize) -> Result<Range<usize>, EditorError> {
        let range = self
            .surface
            .find(needle, occurrence)
            .ok_or(EditorError::NoSelection)?;
        self.handle(Event::SelectionChanged(Some(range.clone())))?;
        Ok(range)
    }

    pub fn handle(&mut self, event: Event) -> Result<Effect, EditorError> {
        match event {
            Event::SelectionChanged(selection) => {
                self.change_selection(selection)?;
                Ok(Effect::None)
            }
            Event::ActionInvoked { action, context } => self.invoke(action, context),
            Event::ResponseReceived { request, text } => self.complete(request, Ok(text)),
            Event::RequestFailed { request, error } => self.complete(request, Err(error)),
        }
    }

    fn change_selection(&mut self, selection: Option<Range<usize>>) -> Result<(), EditorError> {
        self.phase = match selection {
            Some(range) if !range.is_empty() => {
                self.surface.slice(range.clone())?;
                Phase::Selecting(range)
            }
            _ => Phase::Idle,
        };
        Ok(())
    }

    fn invoke(&mut self, action: EditAction, context: RequestContext) -> Result<Effect, EditorError> {
        let range = match &self.phase {
            Phase::Selecting(range) => range.clone(),
            Phase::Idle => return Err(EditorError::NoSelection),
        };
        let selected = self.surface.visible_text(range.clone())?;
        if selected.trim().is_empty() {
            return Err(EditorError::EmptySelection);
        }

        let bookmark = self.surface.bookmark(range.clone())?;
        let original = self.surface.slice(range.clone())?.to_string();
        self.surface.decorate(bookmark, Some(Decoration::Pending))?;

        let mut metadata = context.metadata;
        if let Some(instructions) = action.instructions() {
            self.history.record(instructions);
            metadata.insert(INSTRUCTIONS_KEY.to_string(), instructions.to_string());
        }

        let id = RequestId(self.next_request);
        self.next_request += 1;
        let request = AiRequest {
            action: action.ai_action(),
            selected_text: selected,
            full_article: context.full_article,
            metadata,
        };

        debug!(request = %id, action = %action, start = range.start, end = range.end, "Span pending");
        self.pending.insert(
            id,
            PendingEdit {
                bookmark,
                original,
                action,
            },
        );
        self.phase = Phase::Idle;

        Ok(Effect::Request { id, request })
    }

    fn complete(&mut self, id: RequestId, outcome: Result<String, AiError>) -> Result<Effect, EditorError> {
        let edit = self
            .pending
            .remove(&id)
            .ok_or(EditorError::UnknownRequest(id))?;

        let outcome = outcome.and_then(|text| {
            if text.trim().is_empty() {
                Err(AiError::InvalidResponseFormat("empty replacement text".to_string()))
            } else {
                Ok(text)
            }
        });

        let effect = match outcome {
            Ok(text) => {
                let insert = self.surface.prepare_insert(&text);
                match self.surface.replace_bookmarked(edit.bookmark, &insert) {
                    Ok(()) => {
                        self.changed = true;
                        info!(request = %id, action = %edit.action, len = text.len(), "Span committed");
                        Effect::Committed { id, replacement: text }
                    }
                    Err(e) => self.roll_back(id, &edit, AiError::Request(e.to_string())),
                }
            }
            Err(error) => self.roll_back(id, &edit, error),
        };

        self.surface.release(edit.bookmark);
        Ok(effect)
    }

    fn roll_back(&mut self, id: RequestId, edit: &PendingEdit, error: AiError) -> Effect {
        // The text under the bookmark was never touched, so restoring is a
        // plain overwrite with the saved original.
        if let Err(e) = self.surface.replace_bookmarked(edit.bookmark, &edit.original) {
            warn!(request = %id, error = %e, "Could not restore span");
        }
        warn!(request = %id, action = %edit.action, error = %error, "Span rolled back");
        Effect::RolledBack { id, error }
    }

    /// Drop every pending span, restoring the original text. Responses
    /// arriving afterwards are rejected as unknown.
    pub fn abandon_all(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for edit in pending.values() {
            if let Err(e) = self.surface.replace_bookmarked(edit.bookmark, &edit.original) {
                warn!(error = %e, "Could not restore span");
            }
            self.surface.release(edit.bookmark);
        }
        self.phase = Phase::Idle;
        count
    }
}

/// Send a request produced by [`SelectionEditor::handle`] and turn the
/// outcome into the event that settles it.
pub async fn resolve(gateway: &AiGateway, model: &str, id: RequestId, request: &AiRequest) -> Event {
    match gateway.generate(model, request).await {
        Ok(response) => Event::ResponseReceived {
            request: id,
            text: response.replacement_text,
        },
        Err(error) => Event::RequestFailed { request: id, error },
    }
}
