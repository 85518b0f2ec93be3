//! One open document: view state, annotations, render pipeline, save.
//!
//! The session owns two byte buffers with different lifetimes: the render
//! backend consumed its copy at open time, and `original_bytes` stays
//! pristine until save re-opens it. Rendering is pull-based: view changes
//! enqueue requests and [`DocumentSession::pump`] drives the queue,
//! checking each job's cancellation token before and after the work so a
//! superseded render never publishes its result.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use redline_engine::{LopdfBackend, RenderBackend, RgbaImage, Rotation};
use redline_scheduler::{
    PageTaskTracker, RenderJobKey, RenderKind, RenderParams, RenderQueue,
};
use redline_storage::{SavedDocument, UploadSink};

use crate::annotation::{Annotation, AnnotationId, AnnotationStore};
use crate::block::BlockIndex;
use crate::config::EditorConfig;
use crate::error::{EditorError, EditorResult};
use crate::loader::{DocumentRegistry, LoadedDocument};
use crate::overlay;
use crate::save;
use crate::text_run::{dedup_runs, TextRun};
use crate::transform::{PagePoint, PageToScreen, DEFAULT_ZOOM_INDEX, ZOOM_LADDER};

const THUMBNAIL_ZOOM_PERCENT: u16 = 20;

pub struct DocumentSession {
    url: String,
    filename: String,
    /// Set when the bytes came through a shared registry; released on close.
    registry: Option<Arc<DocumentRegistry>>,
    /// Pristine copy of the fetched document, reserved for the save path.
    original_bytes: Vec<u8>,
    backend: LopdfBackend,
    page_count: u16,

    current_page: u16,
    zoom_index: usize,
    rotation: Rotation,
    pan: (f32, f32),
    /// Visible surface extent in pixels, reported by the shell. Falls
    /// back to the raster extent when never reported.
    viewport: Option<(f32, f32)>,

    pub(crate) runs: Vec<TextRun>,
    pub(crate) store: AnnotationStore,
    pub(crate) blocks: BlockIndex,

    queue: RenderQueue,
    tracker: PageTaskTracker,

    raster: Option<RgbaImage>,
    overlay: Option<RgbaImage>,
    thumbnails: HashMap<u16, RgbaImage>,
    page_error: Option<String>,

    drag_active: bool,
    closed: bool,
    pub(crate) config: EditorConfig,
}

impl DocumentSession {
    /// Open a session over already-loaded bytes.
    pub fn open(document: LoadedDocument, config: EditorConfig) -> EditorResult<Self> {
        Self::build(document, None, config)
    }

    /// Open a session whose bytes come from (and are refcounted by) a
    /// shared registry.
    pub fn open_with_registry(
        registry: Arc<DocumentRegistry>,
        url: &str,
        config: EditorConfig,
    ) -> EditorResult<Self> {
        let shared = registry.acquire(url)?;
        let document = LoadedDocument {
            url: url.to_owned(),
            filename: filename_from_url(url),
            render_bytes: shared.as_ref().clone(),
            original_bytes: shared.as_ref().clone(),
        };
        Self::build(document, Some(registry), config)
    }

    fn build(
        document: LoadedDocument,
        registry: Option<Arc<DocumentRegistry>>,
        config: EditorConfig,
    ) -> EditorResult<Self> {
        let backend = LopdfBackend::from_bytes(&document.render_bytes)?;
        let page_count = backend.page_count();
        info!(url = %document.url, page_count, "document opened");

        let mut session = Self {
            url: document.url,
            filename: document.filename,
            registry,
            original_bytes: document.original_bytes,
            backend,
            page_count,
            current_page: 0,
            zoom_index: DEFAULT_ZOOM_INDEX,
            rotation: Rotation::Deg0,
            pan: (0.0, 0.0),
            viewport: None,
            runs: Vec::new(),
            store: AnnotationStore::new(),
            blocks: BlockIndex::new(),
            queue: RenderQueue::new(),
            tracker: PageTaskTracker::new(),
            raster: None,
            overlay: None,
            thumbnails: HashMap::new(),
            page_error: None,
            drag_active: false,
            closed: false,
            config,
        };
        session.request_current_render();
        Ok(session)
    }

    // -- view state ----------------------------------------------------

    pub fn page_count(&self) -> u16 {
        self.page_count
    }

    pub fn current_page(&self) -> u16 {
        self.current_page
    }

    pub fn zoom(&self) -> f32 {
        ZOOM_LADDER[self.zoom_index]
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn page_error(&self) -> Option<&str> {
        self.page_error.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pointer-space transform for the current view.
    pub fn transform(&self) -> PageToScreen {
        PageToScreen::new(self.zoom(), self.pan.0, self.pan.1)
    }

    pub fn go_to_page(&mut self, page_index: u16) -> EditorResult<()> {
        if page_index >= self.page_count {
            return Err(EditorError::Engine(redline_engine::EngineError::PageOutOfRange {
                page: page_index,
                page_count: self.page_count,
            }));
        }
        if page_index != self.current_page {
            self.current_page = page_index;
            self.page_error = None;
            self.request_current_render();
        }
        Ok(())
    }

    pub fn next_page(&mut self) {
        if self.current_page + 1 < self.page_count {
            let next = self.current_page + 1;
            let _ = self.go_to_page(next);
        }
    }

    pub fn prev_page(&mut self) {
        if self.current_page > 0 {
            let prev = self.current_page - 1;
            let _ = self.go_to_page(prev);
        }
    }

    pub fn set_zoom_index(&mut self, index: usize) {
        let clamped = index.min(ZOOM_LADDER.len() - 1);
        if clamped != self.zoom_index {
            self.zoom_index = clamped;
            self.request_current_render();
        }
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom_index(self.zoom_index + 1);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom_index(self.zoom_index.saturating_sub(1));
    }

    pub fn rotate_cw(&mut self) {
        self.rotation = self.rotation.rotated_cw();
        self.request_current_render();
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan.0 += dx;
        self.pan.1 += dy;
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = Some((width, height));
    }

    /// The page point currently at the center of the visible viewport.
    pub fn visible_center(&self) -> PagePoint {
        let surface = self.viewport.or_else(|| {
            self.raster
                .as_ref()
                .map(|raster| (raster.width() as f32, raster.height() as f32))
        });
        match surface {
            Some((width, height)) => self
                .transform()
                .inverse()
                .apply(crate::transform::ScreenPoint::new(width / 2.0, height / 2.0)),
            None => PagePoint::new(306.0, 396.0),
        }
    }

    // -- rendering -----------------------------------------------------

    fn render_params(&self) -> RenderParams {
        RenderParams {
            zoom_percent: (self.zoom() * 100.0).round() as u16,
            rotation_degrees: self.rotation.degrees(),
        }
    }

    pub fn request_current_render(&mut self) {
        if self.closed {
            return;
        }
        let key = RenderJobKey { page_index: self.current_page, kind: RenderKind::Page };
        self.queue.request(key, self.render_params());
    }

    pub fn request_thumbnail(&mut self, page_index: u16) {
        if self.closed || page_index >= self.page_count {
            return;
        }
        let key = RenderJobKey { page_index, kind: RenderKind::Thumbnail };
        self.queue.request(
            key,
            RenderParams {
                zoom_percent: THUMBNAIL_ZOOM_PERCENT,
                rotation_degrees: self.rotation.degrees(),
            },
        );
    }

    /// Drive the render queue until it drains. Each job's token is checked
    /// before and after the work; a cancelled job completes without
    /// publishing anything.
    pub fn pump(&mut self) {
        while let Some(job) = self.queue.start_next() {
            self.tracker.adopt(job.key.page_index, job.token.clone());

            if !job.token.is_cancelled() {
                match self.run_render_job(&job) {
                    Ok(()) => {}
                    Err(err) if err.is_cancellation() => {
                        debug!(page = job.key.page_index, "render cancelled");
                    }
                    Err(err) => {
                        warn!(page = job.key.page_index, %err, "render failed");
                        if job.key.page_index == self.current_page {
                            self.page_error = Some(err.to_string());
                        }
                    }
                }
            }

            self.queue.complete(job.id);
            self.tracker.unregister(job.key.page_index);
        }
    }

    fn run_render_job(&mut self, job: &redline_scheduler::RenderJob) -> EditorResult<()> {
        let page = job.key.page_index;
        let zoom = job.params.zoom_percent as f32 / 100.0;
        let rotation =
            Rotation::from_degrees(job.params.rotation_degrees).unwrap_or_default();

        let raster = self.backend.rasterize(page, zoom, rotation)?;
        if job.token.is_cancelled() {
            return Err(EditorError::RenderCancelled);
        }

        match job.key.kind {
            RenderKind::Thumbnail => {
                self.thumbnails.insert(page, raster);
            }
            RenderKind::Page => {
                let infos = self.backend.extract_text_runs(page)?;
                if job.token.is_cancelled() {
                    return Err(EditorError::RenderCancelled);
                }

                // A stale job for a page we already left must not clobber
                // the current view.
                if page != self.current_page {
                    return Err(EditorError::RenderCancelled);
                }

                let runs = infos
                    .into_iter()
                    .map(|info| TextRun::from_info(page, info))
                    .collect();
                self.runs = dedup_runs(runs, self.config.dedup_tolerance);
                self.raster = Some(raster);
                self.page_error = None;
                self.blocks.rebuild(page, &self.runs, &self.store);
                self.repaint_overlay();
            }
        }
        Ok(())
    }

    pub fn raster(&self) -> Option<&RgbaImage> {
        self.raster.as_ref()
    }

    pub fn overlay_image(&self) -> Option<&RgbaImage> {
        self.overlay.as_ref()
    }

    pub fn thumbnail(&self, page_index: u16) -> Option<&RgbaImage> {
        self.thumbnails.get(&page_index)
    }

    // -- annotations ---------------------------------------------------

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn add_annotation(&mut self, annotation: Annotation) -> AnnotationId {
        let id = self.store.add(annotation);
        self.annotations_changed();
        id
    }

    /// Repaint the overlay and rebuild the hit-test index after any change
    /// to the store. Block rebuilds are suppressed mid-drag so the block
    /// under the cursor stays stable.
    pub fn annotations_changed(&mut self) {
        if !self.drag_active {
            self.blocks.rebuild(self.current_page, &self.runs, &self.store);
        }
        self.repaint_overlay();
    }

    fn repaint_overlay(&mut self) {
        let Some(raster) = &self.raster else {
            self.overlay = None;
            return;
        };
        // Overlay surfaces are raster-aligned; pan applies at composite
        // time, so the paint transform carries zoom only.
        let paint_transform = PageToScreen::new(self.zoom(), 0.0, 0.0);
        self.overlay = Some(overlay::paint(
            &self.store,
            self.current_page,
            raster.width(),
            raster.height(),
            paint_transform,
            &self.config,
        ));
    }

    pub(crate) fn begin_drag(&mut self) {
        self.drag_active = true;
        self.blocks.freeze();
    }

    pub(crate) fn end_drag(&mut self) {
        self.drag_active = false;
        self.blocks.thaw();
        self.blocks.rebuild(self.current_page, &self.runs, &self.store);
        self.repaint_overlay();
    }

    // -- save / close --------------------------------------------------

    /// Flatten annotations over the original bytes and hand the result to
    /// the upload collaborator. On upload failure the session (and every
    /// annotation) survives for a retry; on success the session closes.
    pub fn save(&mut self, sink: &dyn UploadSink) -> EditorResult<()> {
        if self.closed {
            return Err(EditorError::Closed);
        }

        let saved =
            save::serialize(&self.original_bytes, &self.store, &self.config, &self.filename)?;
        sink.upload(&saved).map_err(|err| {
            warn!(%err, "upload failed; annotations retained for retry");
            EditorError::Upload(err.to_string())
        })?;

        info!(filename = %self.filename, annotations = self.store.len(), "document saved");
        self.store.clear();
        self.close();
        Ok(())
    }

    /// The untouched original document, for the download affordance.
    pub fn download_original(&self) -> SavedDocument {
        SavedDocument::pdf(self.original_bytes.clone(), self.filename.clone())
    }

    /// Tear down: cancel all outstanding render work and release the
    /// registry reference. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.queue.cancel_all();
        self.tracker.cancel_all();
        if let Some(registry) = self.registry.take() {
            registry.release(&self.url);
        }
        self.raster = None;
        self.overlay = None;
        self.thumbnails.clear();
        self.closed = true;
        debug!(url = %self.url, "session closed");
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn filename_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if name.is_empty() { "document.pdf".to_owned() } else { name.to_owned() }
}
