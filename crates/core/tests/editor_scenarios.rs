//! End-to-end editor flows: open, annotate, save, and the failure paths
//! around them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lopdf::content::Content;
use lopdf::{dictionary, Document, Object, Stream};

use redline_core::{
    Annotation, AnnotationShape, Color, DocumentRegistry, DocumentSession, EditorConfig,
    EditorError, LoadedDocument, PageRect, ScreenPoint, Tool, ToolController,
};
use redline_engine::{LopdfBackend, RenderBackend};
use redline_storage::{DirSink, MemorySource, SavedDocument, StorageError, UploadSink};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture_pdf(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for _ in 0..pages {
        let content_id = doc.add_object(Object::Stream(Stream::new(
            dictionary! {},
            b"BT /F1 12 Tf 100 700 Td (Hello) Tj ET".to_vec(),
        )));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0_i64.into(), 0_i64.into(), 612_i64.into(), 792_i64.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture should serialize");
    bytes
}

fn open_session(pages: usize) -> DocumentSession {
    init_tracing();
    let bytes = fixture_pdf(pages);
    let document = LoadedDocument {
        url: "mem/report.pdf".into(),
        filename: "report.pdf".into(),
        render_bytes: bytes.clone(),
        original_bytes: bytes,
    };
    let mut session = DocumentSession::open(
        document,
        EditorConfig::default().with_drag_throttle(Duration::ZERO),
    )
    .expect("open");
    session.pump();
    session
}

/// Upload sink that always rejects, for exercising the retry path.
struct RejectingSink;

impl UploadSink for RejectingSink {
    fn upload(&self, _document: &SavedDocument) -> Result<(), StorageError> {
        Err(StorageError::Rejected("bucket unavailable".into()))
    }
}

fn page_ops(bytes: &[u8], page_index: usize) -> Vec<lopdf::content::Operation> {
    let doc = Document::load_mem(bytes).expect("saved bytes should parse");
    let page_id = doc.get_pages().into_values().nth(page_index).expect("page");
    let content = doc.get_page_content(page_id).expect("content");
    Content::decode(&content).expect("decode").operations
}

fn operand_f32(op: &lopdf::content::Operation, index: usize) -> f32 {
    match &op.operands[index] {
        Object::Real(v) => *v,
        Object::Integer(v) => *v as f32,
        other => panic!("expected number, got {other:?}"),
    }
}

#[test]
fn highlight_survives_save_with_flipped_geometry() {
    let mut session = open_session(3);
    session.go_to_page(1).expect("page exists");
    session.pump();

    let mut controller = ToolController::new();
    controller.set_tool(&mut session, Tool::Highlight);
    let now = Instant::now();
    controller.pointer_down(&mut session, ScreenPoint::new(100.0, 100.0), now);
    controller.pointer_move(&mut session, ScreenPoint::new(150.0, 130.0), now);
    controller.pointer_up(&mut session, ScreenPoint::new(150.0, 130.0), now);

    let temp = tempfile::tempdir().expect("temp dir");
    let sink = DirSink::new(temp.path());
    session.save(&sink).expect("save should succeed");
    assert!(session.is_closed());

    let saved = std::fs::read(temp.path().join("report.pdf")).expect("uploaded file");
    let ops = page_ops(&saved, 1);
    let re = ops.iter().filter(|op| op.operator == "re").last().expect("highlight rect");
    assert_eq!(operand_f32(re, 0), 100.0);
    assert_eq!(operand_f32(re, 1), 662.0);
    assert_eq!(operand_f32(re, 2), 50.0);
    assert_eq!(operand_f32(re, 3), 30.0);

    // The other pages carry no drawn annotations.
    assert!(!page_ops(&saved, 0).iter().any(|op| op.operator == "re"));
    assert!(!page_ops(&saved, 2).iter().any(|op| op.operator == "re"));
}

#[test]
fn edited_text_wins_dedup_when_saved_document_is_reopened() {
    let mut session = open_session(1);
    let mut controller = ToolController::new();
    controller.set_tool(&mut session, Tool::Edit);

    let run_origin = session.runs()[0].origin();
    let at = ScreenPoint::new(run_origin.x + 1.0, run_origin.y + 1.0);
    let now = Instant::now();
    controller.pointer_down(&mut session, at, now);
    controller.pointer_up(&mut session, at, now);
    controller.set_buffer(&mut session, "Goodbye");
    controller.key(&mut session, redline_core::Key::Enter);

    let temp = tempfile::tempdir().expect("temp dir");
    let sink = DirSink::new(temp.path());
    session.save(&sink).expect("save should succeed");

    let saved = std::fs::read(temp.path().join("report.pdf")).expect("uploaded file");
    let backend = LopdfBackend::from_bytes(&saved).expect("saved doc reopens");
    let infos = backend.extract_text_runs(0).expect("extraction");

    // Original and replacement land in the same position bucket; the
    // replacement is drawn later, so dedup keeps it.
    let runs: Vec<_> = infos
        .into_iter()
        .map(|info| redline_core::TextRun::from_info(0, info))
        .collect();
    let deduped = redline_core::dedup_runs(runs, 5.0);

    assert_eq!(deduped.len(), 1);
    assert_eq!(deduped[0].text, "Goodbye");
}

#[test]
fn cancelled_drag_saves_a_clean_document() {
    let mut session = open_session(1);
    let original = session.download_original().bytes;

    let mut controller = ToolController::new();
    controller.set_tool(&mut session, Tool::Edit);

    let run_origin = session.runs()[0].origin();
    let now = Instant::now();
    controller.pointer_down(
        &mut session,
        ScreenPoint::new(run_origin.x + 1.0, run_origin.y + 1.0),
        now,
    );
    controller.pointer_move(
        &mut session,
        ScreenPoint::new(run_origin.x + 60.0, run_origin.y + 60.0),
        now,
    );
    controller.pointer_leave(&mut session);

    let temp = tempfile::tempdir().expect("temp dir");
    let sink = DirSink::new(temp.path());
    session.save(&sink).expect("save should succeed");

    // No annotations survived the cancelled drag, so the saved bytes are
    // the original bytes.
    let saved = std::fs::read(temp.path().join("report.pdf")).expect("uploaded file");
    assert_eq!(saved, original);
}

#[test]
fn failed_upload_keeps_annotations_for_retry() {
    let mut session = open_session(1);
    session.add_annotation(Annotation::new(
        0,
        AnnotationShape::Highlight {
            rect: PageRect::new(50.0, 50.0, 40.0, 20.0),
            color: Color::HIGHLIGHT_YELLOW,
        },
    ));

    let err = session.save(&RejectingSink).expect_err("upload should fail");
    assert!(matches!(err, EditorError::Upload(_)));
    assert!(!session.is_closed());
    assert_eq!(session.annotations().len(), 1);

    // Retry against a working sink succeeds and closes the session.
    let temp = tempfile::tempdir().expect("temp dir");
    session.save(&DirSink::new(temp.path())).expect("retry should succeed");
    assert!(session.is_closed());
    assert!(session.annotations().is_empty());

    let saved = std::fs::read(temp.path().join("report.pdf")).expect("uploaded file");
    assert!(page_ops(&saved, 0).iter().any(|op| op.operator == "re"));
}

#[test]
fn rapid_view_changes_settle_on_the_last_request() {
    let mut session = open_session(2);

    // Burst of zoom changes before any render runs; the queue coalesces
    // them into one job at the final parameters.
    session.zoom_in();
    session.zoom_in();
    session.zoom_out();
    session.pump();

    assert_eq!(session.zoom(), 1.25);
    let raster = session.raster().expect("raster");
    assert_eq!(raster.width(), (612.0_f32 * 1.25).round() as u32);
}

#[test]
fn sessions_share_registry_bytes_until_the_last_one_closes() {
    let source = MemorySource::new();
    source.insert("shared.pdf", fixture_pdf(1));
    let registry = Arc::new(DocumentRegistry::new(Box::new(source)));

    let first = DocumentSession::open_with_registry(
        Arc::clone(&registry),
        "shared.pdf",
        EditorConfig::default(),
    )
    .expect("first open");
    let second = DocumentSession::open_with_registry(
        Arc::clone(&registry),
        "shared.pdf",
        EditorConfig::default(),
    )
    .expect("second open");

    assert_eq!(registry.refcount("shared.pdf"), 2);
    assert_eq!(registry.len(), 1);

    drop(first);
    assert_eq!(registry.refcount("shared.pdf"), 1);
    registry.trim();
    assert_eq!(registry.len(), 1, "entry stays while a session holds it");

    drop(second);
    registry.trim();
    assert!(registry.is_empty());
}
