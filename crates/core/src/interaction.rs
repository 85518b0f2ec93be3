//! Tool state machine: pointer gestures, drags and the inline text editor.
//!
//! The controller owns all transient gesture state (highlight draft, drag
//! in progress, pan anchor, inline editor) and mutates the session's store
//! and block index through the narrow seams the session exposes. Pointer
//! methods take the current `Instant` so throttling is testable without
//! sleeping.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::annotation::{Annotation, AnnotationId, AnnotationShape};
use crate::block::BlockSource;
use crate::session::DocumentSession;
use crate::transform::{PagePoint, PageRect, ScreenPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Select,
    Pan,
    Highlight,
    Text,
    Signature,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Escape,
}

/// What the shell must do next after a pointer event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// Show the free-text prompt anchored at this page point.
    PromptText { at: PagePoint },
    /// Run the signature capture collaborator.
    CaptureSignature,
}

#[derive(Debug, Clone, Copy)]
struct HighlightDraft {
    anchor: PagePoint,
    current: PagePoint,
}

#[derive(Debug, Clone)]
struct DragState {
    source: BlockSource,
    /// Pointer offset from the block origin at grab time, page units.
    grab: (f32, f32),
    /// Origin before the drag, restored on cancel.
    origin: PagePoint,
    /// Flips once the pointer leaves the click slop.
    moved: bool,
}

/// Rate limiter for drag-move processing.
#[derive(Debug)]
pub struct DragThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl DragThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: None }
    }

    /// Whether an event at `now` should be processed. Accepting an event
    /// advances the window.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Inline editor over one text run (or an existing edit of it).
#[derive(Debug)]
pub struct InlineEditor {
    page_index: u16,
    origin: PagePoint,
    original_text: String,
    buffer: String,
    font_size: f32,
    annotation: Option<AnnotationId>,
    /// Whether this editor created the annotation (Escape removes it) or
    /// reopened an existing one (Escape restores `prior_content`).
    created: bool,
    prior_content: Option<String>,
}

impl InlineEditor {
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    pub fn origin(&self) -> PagePoint {
        self.origin
    }
}

#[derive(Debug, Default)]
pub struct ToolController {
    tool: Tool,
    highlight: Option<HighlightDraft>,
    drag: Option<DragState>,
    pan_anchor: Option<ScreenPoint>,
    inline: Option<InlineEditor>,
    throttle: Option<DragThrottle>,
}

impl ToolController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn inline_editor(&self) -> Option<&InlineEditor> {
        self.inline.as_ref()
    }

    /// Switch tools. Any gesture in progress is cancelled; an open inline
    /// editor commits (tool switch behaves like blur).
    pub fn set_tool(&mut self, session: &mut DocumentSession, tool: Tool) {
        self.cancel_gestures(session);
        self.blur(session);
        self.tool = tool;
        debug!(?tool, "tool selected");
    }

    pub fn pointer_down(
        &mut self,
        session: &mut DocumentSession,
        at: ScreenPoint,
        now: Instant,
    ) -> Effect {
        let page_point = session.transform().inverse().apply(at);
        self.throttle = Some({
            let mut throttle = DragThrottle::new(session.config.drag_throttle);
            throttle.allow(now);
            throttle
        });

        match self.tool {
            Tool::Pan => {
                self.pan_anchor = Some(at);
                Effect::None
            }
            Tool::Highlight => {
                self.highlight = Some(HighlightDraft { anchor: page_point, current: page_point });
                Effect::None
            }
            Tool::Text => Effect::PromptText { at: page_point },
            Tool::Signature => Effect::CaptureSignature,
            Tool::Select | Tool::Edit => {
                let hit = session
                    .blocks
                    .hit_test(page_point, session.config.hit_test_margin)
                    .map(|block| (block.source, block.rect));
                if let Some((source, rect)) = hit {
                    self.start_drag(session, source, rect, page_point);
                }
                Effect::None
            }
        }
    }

    pub fn pointer_move(&mut self, session: &mut DocumentSession, at: ScreenPoint, now: Instant) {
        if let Some(anchor) = self.pan_anchor {
            session.pan_by(at.x - anchor.x, at.y - anchor.y);
            self.pan_anchor = Some(at);
            return;
        }

        let page_point = session.transform().inverse().apply(at);

        if let Some(draft) = &mut self.highlight {
            draft.current = page_point;
            return;
        }

        if self.drag.is_some() {
            let allowed = self
                .throttle
                .as_mut()
                .map(|throttle| throttle.allow(now))
                .unwrap_or(true);
            if !allowed {
                return;
            }
            self.advance_drag(session, page_point);
        }
    }

    pub fn pointer_up(
        &mut self,
        session: &mut DocumentSession,
        at: ScreenPoint,
        _now: Instant,
    ) -> Effect {
        let page_point = session.transform().inverse().apply(at);
        self.pan_anchor = None;
        self.throttle = None;

        if let Some(mut draft) = self.highlight.take() {
            draft.current = page_point;
            let rect = PageRect::from_corners(draft.anchor, draft.current);
            let min = session.config.min_highlight_size;
            if rect.width > min && rect.height > min {
                session.add_annotation(Annotation::new(
                    session.current_page(),
                    AnnotationShape::Highlight { rect, color: session.config.highlight_color },
                ));
            } else {
                debug!(width = rect.width, height = rect.height, "highlight below minimum size");
            }
            return Effect::None;
        }

        if let Some(drag) = self.drag.take() {
            if drag.moved {
                self.finish_drag(session, &drag);
            } else {
                session.end_drag();
                if self.tool == Tool::Edit {
                    self.open_inline_editor(session, drag.source);
                }
            }
        }
        Effect::None
    }

    /// Pointer left the canvas: every gesture in progress is abandoned.
    pub fn pointer_leave(&mut self, session: &mut DocumentSession) {
        self.cancel_gestures(session);
    }

    fn cancel_gestures(&mut self, session: &mut DocumentSession) {
        self.highlight = None;
        self.pan_anchor = None;
        self.throttle = None;

        if let Some(drag) = self.drag.take() {
            match drag.source {
                BlockSource::Annotation(id) => {
                    if let Some(annotation) = session.store.get_mut(id) {
                        annotation.set_origin(drag.origin);
                    }
                }
                BlockSource::Run(_) => {
                    session.store.discard_pending();
                }
            }
            session.end_drag();
            debug!("drag cancelled");
        }
    }

    fn start_drag(
        &mut self,
        session: &mut DocumentSession,
        source: BlockSource,
        rect: PageRect,
        page_point: PagePoint,
    ) {
        self.drag = Some(DragState {
            source,
            grab: (page_point.x - rect.x, page_point.y - rect.y),
            origin: rect.origin(),
            moved: false,
        });
        session.begin_drag();
    }

    fn advance_drag(&mut self, session: &mut DocumentSession, page_point: PagePoint) {
        let Some(drag) = &mut self.drag else { return };
        let origin = PagePoint::new(page_point.x - drag.grab.0, page_point.y - drag.grab.1);

        if !drag.moved {
            let slop = session.config.hit_test_margin;
            if (origin.x - drag.origin.x).abs() <= slop && (origin.y - drag.origin.y).abs() <= slop
            {
                return;
            }
            drag.moved = true;

            // Dragging an original run materializes the pending edit that
            // will carry its text to the new position.
            if let BlockSource::Run(index) = drag.source {
                if let Some(run) = session.runs.get(index) {
                    session.store.set_pending(Annotation::new(
                        run.page_index,
                        AnnotationShape::TextEdit {
                            position: run.origin(),
                            content: run.text.clone(),
                            original_text: run.text.clone(),
                            font_size: run.font_size,
                        },
                    ));
                }
            }
        }

        match drag.source {
            BlockSource::Annotation(id) => {
                if let Some(annotation) = session.store.get_mut(id) {
                    annotation.set_origin(origin);
                }
            }
            BlockSource::Run(_) => {
                if let Some(pending) = session.store.pending_mut() {
                    pending.set_origin(origin);
                }
            }
        }
        session.blocks.patch(drag.source, origin);
        session.annotations_changed();
    }

    fn finish_drag(&mut self, session: &mut DocumentSession, drag: &DragState) {
        if matches!(drag.source, BlockSource::Run(_)) {
            session.store.promote_pending();
        }
        session.end_drag();
    }

    // -- inline text editing -------------------------------------------

    fn open_inline_editor(&mut self, session: &mut DocumentSession, source: BlockSource) {
        let seed = match source {
            BlockSource::Run(index) => session.runs.get(index).map(|run| {
                (run.page_index, run.origin(), run.text.clone(), run.font_size, None)
            }),
            BlockSource::Annotation(id) => session.store.get(id).and_then(|a| match &a.shape {
                AnnotationShape::TextEdit { position, content, original_text, font_size } => {
                    Some((
                        a.page_index,
                        *position,
                        original_text.clone(),
                        *font_size,
                        Some((a.id, content.clone())),
                    ))
                }
                _ => None,
            }),
        };
        let Some((page_index, origin, original_text, font_size, existing)) = seed else {
            return;
        };

        // A run that was already edited re-opens its edit, pre-filled with
        // the edited content rather than the stale original.
        let existing = existing.or_else(|| {
            session
                .store
                .find_text_edit_mut(
                    page_index,
                    &original_text,
                    origin,
                    session.config.dedup_tolerance,
                )
                .and_then(|a| match &a.shape {
                    AnnotationShape::TextEdit { content, .. } => Some((a.id, content.clone())),
                    _ => None,
                })
        });

        self.inline = Some(match existing {
            Some((id, content)) => InlineEditor {
                page_index,
                origin,
                original_text,
                buffer: content.clone(),
                font_size,
                annotation: Some(id),
                created: false,
                prior_content: Some(content),
            },
            None => InlineEditor {
                page_index,
                origin,
                buffer: original_text.clone(),
                original_text,
                font_size,
                annotation: None,
                created: false,
                prior_content: None,
            },
        });
    }

    /// Replace the editor buffer, materializing the edit annotation on the
    /// first change so the overlay previews it live.
    pub fn set_buffer(&mut self, session: &mut DocumentSession, text: &str) {
        let Some(editor) = &mut self.inline else { return };
        editor.buffer = text.to_owned();

        match editor.annotation {
            Some(id) => {
                if let Some(annotation) = session.store.get_mut(id) {
                    if let AnnotationShape::TextEdit { content, .. } = &mut annotation.shape {
                        *content = editor.buffer.clone();
                    }
                }
            }
            None => {
                let id = session.store.add(Annotation::new(
                    editor.page_index,
                    AnnotationShape::TextEdit {
                        position: editor.origin,
                        content: editor.buffer.clone(),
                        original_text: editor.original_text.clone(),
                        font_size: editor.font_size,
                    },
                ));
                editor.annotation = Some(id);
                editor.created = true;
            }
        }
        session.annotations_changed();
    }

    /// Enter and Tab commit; Escape reverts.
    pub fn key(&mut self, session: &mut DocumentSession, key: Key) {
        match key {
            Key::Enter | Key::Tab => self.commit_inline(session),
            Key::Escape => self.revert_inline(session),
        }
    }

    /// Focus loss closes the editor, keeping whatever was typed.
    pub fn blur(&mut self, session: &mut DocumentSession) {
        self.commit_inline(session);
    }

    fn commit_inline(&mut self, session: &mut DocumentSession) {
        let Some(editor) = self.inline.take() else { return };

        // An edit that ends up identical to the original is dropped.
        if editor.created && editor.buffer == editor.original_text {
            if let Some(id) = editor.annotation {
                session.store.remove(id);
            }
        }
        session.annotations_changed();
    }

    fn revert_inline(&mut self, session: &mut DocumentSession) {
        let Some(editor) = self.inline.take() else { return };
        let Some(id) = editor.annotation else { return };

        if editor.created {
            session.store.remove(id);
        } else if let Some(prior) = editor.prior_content {
            if let Some(annotation) = session.store.get_mut(id) {
                if let AnnotationShape::TextEdit { content, .. } = &mut annotation.shape {
                    *content = prior;
                }
            }
        }
        session.annotations_changed();
    }

    // -- tool results from the shell -----------------------------------

    /// Commit the free-text prompt. Empty input places nothing.
    pub fn submit_text(&mut self, session: &mut DocumentSession, at: PagePoint, content: &str) {
        if content.is_empty() {
            return;
        }
        session.add_annotation(Annotation::new(
            session.current_page(),
            AnnotationShape::FreeText {
                position: at,
                content: content.to_owned(),
                font_size: session.config.default_text_size,
            },
        ));
    }

    /// Place a captured signature centered in the visible viewport, then
    /// drop back to the select tool.
    pub fn place_signature(&mut self, session: &mut DocumentSession, png_base64: String) {
        let (width, height) = session.config.signature_size;
        let center = session.visible_center();
        session.add_annotation(Annotation::new(
            session.current_page(),
            AnnotationShape::Signature {
                rect: PageRect::new(
                    center.x - width / 2.0,
                    center.y - height / 2.0,
                    width,
                    height,
                ),
                png_base64,
            },
        ));
        self.tool = Tool::Select;
    }

    /// Run the signature collaborator and place the result. The tool drops
    /// back to select either way; a cancelled capture places nothing.
    pub fn capture_signature(
        &mut self,
        session: &mut DocumentSession,
        provider: &dyn redline_storage::SignatureProvider,
    ) {
        match provider.capture() {
            Some(png_base64) => self.place_signature(session, png_base64),
            None => {
                debug!("signature capture cancelled");
                self.tool = Tool::Select;
            }
        }
    }
}
