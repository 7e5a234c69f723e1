//! End-to-end pipeline tests over the stub source and raw container.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use watchdog_core::config::OperatingMode;
use watchdog_core::detect::{ScriptedDetector, StubClassifier, StubMatcher};
use watchdog_core::media::{MediaBackend, RawMediaBackend, SinkSettings, SyntheticSource};
use watchdog_core::{
    CaptureLoop, ContinuousRecorder, Element, FrameBus, PersonRecognizedCallback,
    PresenceAwareProcessor, ProcessorBackends, ProcessorSettings, RecognitionVoter, Segment,
    SegmentRegistry, SqliteSegmentStore,
};

fn settings() -> SinkSettings {
    SinkSettings {
        width: 16,
        height: 16,
        frame_rate: 50.0,
        bit_rate: 600_000,
        quality: 40,
        codec: "h264".to_string(),
        format: "wdg".to_string(),
    }
}

fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {}", what);
}

fn frame_count(path: &std::path::Path) -> usize {
    let mut source = RawMediaBackend.open_source(path).expect("open segment");
    let mut count = 0;
    while source.grab().expect("grab").is_some() {
        count += 1;
    }
    count
}

#[test]
fn live_capture_produces_a_registered_replayable_segment() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("watchdog.db");
    let store = Arc::new(SqliteSegmentStore::open(db.to_str().unwrap()).unwrap());

    let bus = Arc::new(FrameBus::new());
    let recorder = ContinuousRecorder::new(
        Arc::clone(&bus),
        Arc::new(RawMediaBackend),
        store.clone(),
        dir.path().join("feeds"),
        settings(),
    );
    let source = SyntheticSource::open("stub://camera0", 16, 16, 50.0);
    let capture = CaptureLoop::new(Box::new(source), Arc::clone(&bus));

    bus.start().unwrap();
    recorder.start().unwrap();
    capture.start().unwrap();
    thread::sleep(Duration::from_millis(300));
    capture.stop().unwrap();
    recorder.stop().unwrap();
    bus.stop().unwrap();

    let segment: Segment = store
        .next_unprocessed()
        .unwrap()
        .expect("segment registered");
    assert!(segment.exists());
    assert!(!segment.processed);
    assert!(segment.to >= segment.from);
    assert!(frame_count(&segment.file_path) > 0);
}

#[test]
fn recorded_segments_flow_through_the_batch_processor() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("watchdog.db");
    let store = Arc::new(SqliteSegmentStore::open(db.to_str().unwrap()).unwrap());

    let bus = Arc::new(FrameBus::new());
    let recorder = ContinuousRecorder::new(
        Arc::clone(&bus),
        Arc::new(RawMediaBackend),
        store.clone(),
        dir.path().join("feeds"),
        settings(),
    );
    let source = SyntheticSource::open("stub://camera0", 16, 16, 50.0);
    let capture = CaptureLoop::new(Box::new(source), Arc::clone(&bus));

    bus.start().unwrap();
    recorder.start().unwrap();
    capture.start().unwrap();
    thread::sleep(Duration::from_millis(300));
    capture.stop().unwrap();
    recorder.stop().unwrap();
    bus.stop().unwrap();

    let segment = store.next_unprocessed().unwrap().expect("segment");
    let raw_path = segment.file_path.clone();
    let total = frame_count(&raw_path);
    assert!(total > 0);

    let processor = PresenceAwareProcessor::new(
        store.clone(),
        store.clone(),
        Arc::new(RawMediaBackend),
        Arc::new(ProcessorBackends::new(
            // presence only on the first two frames
            Box::new(ScriptedDetector::new(vec![1, 1, 0])),
            Box::new(StubClassifier::new("Female:[25-32]")),
            Box::new(StubMatcher::new(vec![Some("alice"), Some("alice")])),
        )),
        ProcessorSettings {
            mode: OperatingMode::PresenceAware,
            retention_threshold: 3,
            encoding: settings(),
        },
    );
    processor.start().unwrap();
    wait_until("segment processed", || {
        store.next_unprocessed().unwrap().is_none()
    });
    processor.stop().unwrap();

    assert!(!raw_path.exists());
    let processed = raw_path
        .parent()
        .unwrap()
        .join("processed")
        .join(raw_path.file_name().unwrap());
    assert!(processed.exists());

    // presence on frames 0..=1 with threshold 3 keeps frames 0..=4
    let kept = frame_count(&processed);
    assert_eq!(kept, 5.min(total));
}

#[test]
fn voter_reports_the_live_majority_identity() {
    struct Outcome(Mutex<Option<Option<String>>>);

    impl PersonRecognizedCallback for Outcome {
        fn on_recognized(&self, identity: &str) {
            *self.0.lock().unwrap() = Some(Some(identity.to_string()));
        }

        fn on_not_recognized(&self) {
            *self.0.lock().unwrap() = Some(None);
        }
    }

    let bus = Arc::new(FrameBus::new());
    let voter = RecognitionVoter::new(
        Arc::clone(&bus),
        Box::new(ScriptedDetector::new(vec![1])),
        Box::new(StubMatcher::new(vec![
            Some("bob"),
            Some("alice"),
            Some("bob"),
            Some("bob"),
            Some("alice"),
        ])),
        5,
    );
    let outcome = Arc::new(Outcome(Mutex::new(None)));
    voter.activate(outcome.clone());

    let source = SyntheticSource::open("stub://camera0", 16, 16, 100.0);
    let capture = CaptureLoop::new(Box::new(source), Arc::clone(&bus));
    bus.start().unwrap();
    capture.start().unwrap();

    wait_until("voting outcome", || outcome.0.lock().unwrap().is_some());
    assert!(!voter.is_active());
    capture.stop().unwrap();
    bus.stop().unwrap();

    assert_eq!(
        outcome.0.lock().unwrap().clone(),
        Some(Some("bob".to_string()))
    );
}
