// Integration tests for CompressionSession, driven by a scripted engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use pdf_minify::engine::{
    CompressionEngine, CompressionRequest, Datum, EngineCallbacks, Locator, ResultDescriptor,
    StatusDescriptor,
};
use pdf_minify::objects::ScopedObject;
use pdf_minify::telemetry::TelemetrySink;
use pdf_minify::{
    CompressionSession, EngineError, Generation, ObjectFetcher, ObjectRegistry, RawFile,
    ResultFetcher, SessionError, SessionUpdate, StateKind,
};

/// Engine that parks every invocation so the test decides when and how it reports.
#[derive(Clone, Default)]
struct ScriptedEngine {
    calls: Arc<AtomicUsize>,
    pending: Arc<Mutex<Vec<(CompressionRequest, EngineCallbacks)>>>,
    reject: bool,
}

impl ScriptedEngine {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take(&self) -> (CompressionRequest, EngineCallbacks) {
        self.pending.lock().remove(0)
    }
}

impl CompressionEngine for ScriptedEngine {
    fn compress(
        &self,
        request: CompressionRequest,
        callbacks: EngineCallbacks,
    ) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(EngineError::Unavailable("worker failed to boot".into()));
        }
        self.pending.lock().push((request, callbacks));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    progress: Arc<Mutex<Vec<Vec<Datum>>>>,
    statuses: Arc<Mutex<Vec<String>>>,
}

impl TelemetrySink for RecordingSink {
    fn progress(&self, _generation: Generation, data: &[Datum]) {
        self.progress.lock().push(data.to_vec());
    }

    fn status(&self, _generation: Generation, status: &StatusDescriptor) {
        self.statuses.lock().push(status.phase.clone());
    }
}

struct FailingFetcher;

#[async_trait]
impl ResultFetcher for FailingFetcher {
    async fn materialize(&self, output: &Locator) -> Result<ScopedObject, SessionError> {
        Err(SessionError::ResultFetch(format!("{} is unreachable", output)))
    }
}

fn pdf(name: &str) -> RawFile {
    RawFile::new(name, "application/pdf", Bytes::from_static(b"%PDF-1.4 original"))
}

fn setup() -> (
    CompressionSession<ScriptedEngine>,
    ScriptedEngine,
    ObjectRegistry,
) {
    let registry = ObjectRegistry::new();
    let engine = ScriptedEngine::default();
    let session = CompressionSession::new(
        registry.clone(),
        engine.clone(),
        ObjectFetcher::new(registry.clone()),
    );
    (session, engine, registry)
}

/// Completes the parked invocation with `payload` published as a temporary object.
fn complete_with(engine: &ScriptedEngine, registry: &ObjectRegistry, payload: &'static [u8]) -> Locator {
    let (_, callbacks) = engine.take();
    let output = Locator::Object(registry.create(Bytes::from_static(payload), "application/pdf"));
    callbacks.complete(ResultDescriptor {
        output: output.clone(),
    });
    output
}

#[tokio::test]
async fn test_report_scenario_reaches_result_ready() {
    let (session, engine, registry) = setup();
    let sink = RecordingSink::default();
    let mut session = session.with_sink(sink.clone());

    session.select(pdf("report.pdf")).unwrap();
    assert_eq!(session.kind(), StateKind::FileSelected);
    session.start().unwrap();
    assert_eq!(session.kind(), StateKind::Compressing);
    assert_eq!(engine.calls(), 1);

    let (request, callbacks) = engine.take();
    assert_eq!(&request.input, session.file().unwrap().source_ref());
    let resolved = registry.resolve(&request.input).unwrap();
    assert_eq!(&resolved.bytes[..], b"%PDF-1.4 original");

    callbacks.status(StatusDescriptor::new("running"));
    callbacks.progress(vec![Datum::Count(1), Datum::Text("pages".into())]);
    let output = Locator::Object(registry.create(
        Bytes::from_static(b"%PDF-1.4 \x00\x01\xfe\xff compressed"),
        "application/pdf",
    ));
    callbacks.complete(ResultDescriptor {
        output: output.clone(),
    });

    assert_eq!(session.settle().await, StateKind::ResultReady);

    let download = session.download().unwrap();
    assert_eq!(download.suggested_name, "report-min.pdf");
    let blob = registry.resolve(download.local_ref).unwrap();
    assert_eq!(&blob.bytes[..], b"%PDF-1.4 \x00\x01\xfe\xff compressed");

    let Locator::Object(temp) = output else {
        unreachable!()
    };
    assert!(!registry.contains(&temp), "engine output should be released after fetch");
    assert_eq!(registry.live_count(), 2);

    assert_eq!(*sink.statuses.lock(), vec!["running".to_string()]);
    assert_eq!(
        *sink.progress.lock(),
        vec![vec![Datum::Count(1), Datum::Text("pages".into())]]
    );
}

#[tokio::test]
async fn test_non_pdf_selection_is_rejected() {
    let (mut session, engine, registry) = setup();

    let err = session
        .select(RawFile::new("notes.txt", "text/plain", Bytes::from_static(b"hello")))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidFileType { .. }));
    assert_eq!(session.kind(), StateKind::Idle);
    assert_eq!(session.error_message(), Some("Please select a valid PDF file."));
    assert_eq!(registry.live_count(), 0);

    assert!(session.start().is_err());
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_start_without_file_fails_with_invalid_state() {
    let (mut session, engine, _) = setup();

    let err = session.start().unwrap_err();
    assert_eq!(
        err,
        SessionError::InvalidState {
            operation: "start",
            state: StateKind::Idle,
        }
    );
    assert_eq!(engine.calls(), 0);
    assert_eq!(session.kind(), StateKind::Idle);
}

#[tokio::test]
async fn test_completion_after_remove_is_discarded() {
    let (mut session, engine, registry) = setup();
    session.select(pdf("report.pdf")).unwrap();
    let generation = session.start().unwrap();
    session.remove();
    assert_eq!(session.kind(), StateKind::Idle);

    let (_, callbacks) = engine.take();
    callbacks.progress(vec![Datum::Count(3)]);
    callbacks.status(StatusDescriptor::new("late"));
    callbacks.complete(ResultDescriptor {
        output: Locator::Object(registry.create(Bytes::from_static(b"%PDF-late"), "application/pdf")),
    });

    for _ in 0..3 {
        match session.next_update().await.unwrap() {
            SessionUpdate::Discarded(g) => assert_eq!(g, generation),
            other => panic!("expected a discarded callback, got {:?}", other),
        }
    }
    assert_eq!(session.kind(), StateKind::Idle);
    assert!(session.download().is_none());
    assert_eq!(registry.live_count(), 0);
}

#[tokio::test]
async fn test_stale_completion_does_not_leak_into_new_compression() {
    let (mut session, engine, registry) = setup();
    session.select(pdf("first.pdf")).unwrap();
    session.start().unwrap();
    let (_, stale_callbacks) = engine.take();

    session.select(pdf("second.pdf")).unwrap();
    session.start().unwrap();

    stale_callbacks.complete(ResultDescriptor {
        output: Locator::Object(registry.create(Bytes::from_static(b"%PDF-first"), "application/pdf")),
    });
    assert!(matches!(
        session.next_update().await,
        Some(SessionUpdate::Discarded(_))
    ));
    assert_eq!(session.kind(), StateKind::Compressing);

    complete_with(&engine, &registry, b"%PDF-second");
    assert_eq!(session.settle().await, StateKind::ResultReady);

    let download = session.download().unwrap();
    assert_eq!(download.suggested_name, "second-min.pdf");
    assert_eq!(&registry.resolve(download.local_ref).unwrap().bytes[..], b"%PDF-second");
    assert_eq!(registry.live_count(), 2);
}

#[tokio::test]
async fn test_engine_rejection_fails_session() {
    let registry = ObjectRegistry::new();
    let engine = ScriptedEngine::rejecting();
    let mut session = CompressionSession::new(
        registry.clone(),
        engine.clone(),
        ObjectFetcher::new(registry.clone()),
    );

    session.select(pdf("report.pdf")).unwrap();
    let err = session.start().unwrap_err();
    assert!(matches!(err, SessionError::EngineInvocation(_)));
    assert_eq!(session.kind(), StateKind::Failed);
    assert_eq!(
        session.error_message(),
        Some("compression engine could not be started: engine unavailable: worker failed to boot")
    );

    // The dropped callbacks report abandonment, which no longer matters.
    assert!(matches!(
        session.next_update().await,
        Some(SessionUpdate::Discarded(_))
    ));
    assert_eq!(session.kind(), StateKind::Failed);

    session.select(pdf("retry.pdf")).unwrap();
    assert_eq!(session.kind(), StateKind::FileSelected);
    assert_eq!(session.error_message(), None);
}

#[tokio::test]
async fn test_abandoned_engine_work_fails_session() {
    let (mut session, engine, _) = setup();
    session.select(pdf("report.pdf")).unwrap();
    session.start().unwrap();

    let (_, callbacks) = engine.take();
    callbacks.status(StatusDescriptor::new("crashing"));
    drop(callbacks);

    assert_eq!(session.settle().await, StateKind::Failed);
    assert!(session
        .error_message()
        .unwrap()
        .contains("engine stopped without producing a result"));
}

#[tokio::test]
async fn test_fetch_failure_fails_session() {
    let registry = ObjectRegistry::new();
    let engine = ScriptedEngine::default();
    let mut session = CompressionSession::new(registry.clone(), engine.clone(), FailingFetcher);

    session.select(pdf("report.pdf")).unwrap();
    session.start().unwrap();
    complete_with(&engine, &registry, b"%PDF-out");

    assert_eq!(session.settle().await, StateKind::Failed);
    assert!(session.download().is_none());
    assert!(session
        .error_message()
        .unwrap()
        .starts_with("compressed result could not be retrieved"));
}

#[tokio::test]
async fn test_reselect_and_remove_release_every_reference() {
    let (mut session, engine, registry) = setup();
    session.select(pdf("a.pdf")).unwrap();
    session.start().unwrap();
    complete_with(&engine, &registry, b"%PDF-a");
    session.settle().await;
    let old_input = session.file().unwrap().source_ref().clone();
    let old_output = session.download().unwrap().local_ref.clone();

    session.select(pdf("b.pdf")).unwrap();
    assert!(!registry.contains(&old_input));
    assert!(!registry.contains(&old_output));
    assert_eq!(registry.live_count(), 1);

    session.remove();
    assert_eq!(registry.live_count(), 0);
    session.remove();
    assert_eq!(session.kind(), StateKind::Idle);
    assert_eq!(session.error_message(), None);
    assert_eq!(registry.live_count(), 0);
}
