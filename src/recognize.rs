//! Live recognition voter.
//!
//! While activated, listens to the frame bus and votes on who is at the
//! door: every frame with detected presence contributes one ballot per
//! recognized face, and once enough presence frames have been seen the
//! identity with the most votes wins. Unknown faces never vote; a window
//! that closes with an empty tally reports "not recognized".
//!
//! Activation is explicit and single: a second `activate` while one is
//! in flight is logged and ignored, and each activation gets a fresh
//! tally. An activation ends when its window decides: the tap
//! unsubscribes before the callback fires, so one `activate` yields at
//! most one outcome and the voter can be activated again afterwards.

use std::sync::{Arc, Mutex};

use crate::bus::{FrameBus, FrameListener, SubscriberId};
use crate::detect::{Detector, IdentityMatcher};
use crate::frame::Frame;

/// Outcome receiver for one voting window.
pub trait PersonRecognizedCallback: Send + Sync {
    fn on_recognized(&self, identity: &str);
    fn on_not_recognized(&self);
}

/// Vote counts in first-encounter order; ties go to the earlier identity.
#[derive(Default)]
struct Ballot {
    frames_counted: u32,
    tally: Vec<(String, u32)>,
}

impl Ballot {
    fn vote(&mut self, identity: String) {
        match self.tally.iter_mut().find(|(id, _)| *id == identity) {
            Some((_, count)) => *count += 1,
            None => self.tally.push((identity, 1)),
        }
    }

    fn winner(&self) -> Option<&str> {
        let mut best: Option<(&str, u32)> = None;
        for (id, count) in &self.tally {
            if best.map_or(true, |(_, best_count)| *count > best_count) {
                best = Some((id.as_str(), *count));
            }
        }
        best.map(|(id, _)| id)
    }

    fn clear(&mut self) {
        self.frames_counted = 0;
        self.tally.clear();
    }
}

struct VoterTap {
    bus: Arc<FrameBus>,
    active: Arc<Mutex<Option<SubscriberId>>>,
    detector: Arc<Mutex<Box<dyn Detector>>>,
    matcher: Arc<Mutex<Box<dyn IdentityMatcher>>>,
    callback: Arc<dyn PersonRecognizedCallback>,
    window: u32,
    ballot: Mutex<Ballot>,
}

impl FrameListener for VoterTap {
    fn on_frame(&self, frame: &Arc<Frame>, _timestamp_us: i64) {
        let detection = match self
            .detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .detect(frame)
        {
            Ok(detection) => detection,
            Err(err) => {
                log::error!("voter: detect failed: {:#}", err);
                return;
            }
        };
        if !detection.presence() {
            return;
        }

        let mut ballot = self
            .ballot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for face in &detection.faces {
            match self
                .matcher
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .recognize(&face.crop)
            {
                Ok(Some(identity)) => ballot.vote(identity),
                Ok(None) => {}
                Err(err) => log::error!("voter: recognize failed: {:#}", err),
            }
        }

        ballot.frames_counted += 1;
        if ballot.frames_counted >= self.window {
            // The window decides once: release the activation handle and
            // unsubscribe before invoking the callback.
            let subscriber = self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            match subscriber {
                Some(id) => {
                    self.bus.unsubscribe(id);
                    match ballot.winner() {
                        Some(identity) => {
                            log::info!("voter: recognized {}", identity);
                            self.callback.on_recognized(identity);
                        }
                        None => {
                            log::info!("voter: presence without a recognized identity");
                            self.callback.on_not_recognized();
                        }
                    }
                }
                None => log::debug!("voter: window closed after deactivation, discarding"),
            }
            ballot.clear();
        }
    }
}

pub struct RecognitionVoter {
    bus: Arc<FrameBus>,
    detector: Arc<Mutex<Box<dyn Detector>>>,
    matcher: Arc<Mutex<Box<dyn IdentityMatcher>>>,
    voting_window: u32,
    active: Arc<Mutex<Option<SubscriberId>>>,
}

impl RecognitionVoter {
    pub fn new(
        bus: Arc<FrameBus>,
        detector: Box<dyn Detector>,
        matcher: Box<dyn IdentityMatcher>,
        voting_window: u32,
    ) -> Self {
        Self {
            bus,
            detector: Arc::new(Mutex::new(detector)),
            matcher: Arc::new(Mutex::new(matcher)),
            voting_window,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Start voting on live frames. Ignored with a warning if an
    /// activation is already in flight. The activation ends on its own
    /// once the window decides.
    pub fn activate(&self, callback: Arc<dyn PersonRecognizedCallback>) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.is_some() {
            log::warn!("voter: already activated, ignoring");
            return;
        }
        let tap = Arc::new(VoterTap {
            bus: Arc::clone(&self.bus),
            active: Arc::clone(&self.active),
            detector: Arc::clone(&self.detector),
            matcher: Arc::clone(&self.matcher),
            callback,
            window: self.voting_window,
            ballot: Mutex::new(Ballot::default()),
        });
        *active = Some(self.bus.subscribe(tap));
        log::debug!("voter: activated with window {}", self.voting_window);
    }

    /// Cancel voting early. Any partially filled window is discarded.
    pub fn deactivate(&self) {
        let subscriber = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match subscriber {
            Some(id) => {
                self.bus.unsubscribe(id);
                log::debug!("voter: deactivated");
            }
            None => log::warn!("voter: deactivate without an active session"),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ScriptedDetector, StubMatcher};
    use crate::element::Element;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingCallback {
        outcomes: Mutex<Vec<Option<String>>>,
    }

    impl RecordingCallback {
        fn outcomes(&self) -> Vec<Option<String>> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    impl PersonRecognizedCallback for RecordingCallback {
        fn on_recognized(&self, identity: &str) {
            self.outcomes.lock().unwrap().push(Some(identity.to_string()));
        }

        fn on_not_recognized(&self) {
            self.outcomes.lock().unwrap().push(None);
        }
    }

    fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn majority_identity_wins_the_window() {
        let bus = Arc::new(FrameBus::new());
        bus.start().unwrap();

        let matcher = StubMatcher::new(vec![
            Some("A"),
            Some("A"),
            Some("B"),
            Some("A"),
            None,
            Some("A"),
            Some("B"),
            Some("A"),
            Some("A"),
            None,
        ]);
        let voter = RecognitionVoter::new(
            Arc::clone(&bus),
            Box::new(ScriptedDetector::new(vec![1])),
            Box::new(matcher),
            10,
        );
        let callback = Arc::new(RecordingCallback::default());
        voter.activate(callback.clone());

        let frame = Arc::new(Frame::filled(16, 16, 0));
        for n in 0..10 {
            bus.publish(Arc::clone(&frame), n * 1000);
        }

        wait_until(|| !callback.outcomes().is_empty());
        assert_eq!(callback.outcomes(), vec![Some("A".to_string())]);
        assert!(!voter.is_active());
        bus.stop().unwrap();
    }

    #[test]
    fn all_unknown_faces_report_not_recognized() {
        let bus = Arc::new(FrameBus::new());
        bus.start().unwrap();

        let voter = RecognitionVoter::new(
            Arc::clone(&bus),
            Box::new(ScriptedDetector::new(vec![1])),
            Box::new(StubMatcher::unknown()),
            3,
        );
        let callback = Arc::new(RecordingCallback::default());
        voter.activate(callback.clone());

        let frame = Arc::new(Frame::filled(16, 16, 0));
        for n in 0..3 {
            bus.publish(Arc::clone(&frame), n * 1000);
        }

        wait_until(|| !callback.outcomes().is_empty());
        assert_eq!(callback.outcomes(), vec![None]);
        assert!(!voter.is_active());
        bus.stop().unwrap();
    }

    #[test]
    fn frames_without_presence_do_not_fill_the_window() {
        let bus = Arc::new(FrameBus::new());
        bus.start().unwrap();

        // presence only on every second frame
        let voter = RecognitionVoter::new(
            Arc::clone(&bus),
            Box::new(ScriptedDetector::new(vec![1, 0, 1, 0, 1, 0])),
            Box::new(StubMatcher::new(vec![Some("A"), Some("A")])),
            3,
        );
        let callback = Arc::new(RecordingCallback::default());
        voter.activate(callback.clone());

        let frame = Arc::new(Frame::filled(16, 16, 0));
        for n in 0..4 {
            bus.publish(Arc::clone(&frame), n * 1000);
        }
        thread::sleep(Duration::from_millis(50));
        assert!(callback.outcomes().is_empty());

        bus.publish(Arc::clone(&frame), 5000);
        wait_until(|| !callback.outcomes().is_empty());
        assert_eq!(callback.outcomes(), vec![Some("A".to_string())]);
        bus.stop().unwrap();
    }

    #[test]
    fn window_decides_once_and_releases_the_activation() {
        let bus = Arc::new(FrameBus::new());
        bus.start().unwrap();

        let voter = RecognitionVoter::new(
            Arc::clone(&bus),
            Box::new(ScriptedDetector::new(vec![1])),
            Box::new(StubMatcher::new(vec![
                Some("A"),
                Some("A"),
                Some("B"),
                Some("B"),
            ])),
            2,
        );
        let callback = Arc::new(RecordingCallback::default());
        voter.activate(callback.clone());

        let frame = Arc::new(Frame::filled(16, 16, 0));
        for n in 0..4 {
            bus.publish(Arc::clone(&frame), n * 1000);
        }

        wait_until(|| !callback.outcomes().is_empty());
        thread::sleep(Duration::from_millis(50));

        // presence frames beyond the window are ignored
        assert_eq!(callback.outcomes(), vec![Some("A".to_string())]);
        assert!(!voter.is_active());

        // a fresh activation starts a new window
        let again = Arc::new(RecordingCallback::default());
        voter.activate(again.clone());
        assert!(voter.is_active());
        bus.publish(Arc::clone(&frame), 5000);
        bus.publish(Arc::clone(&frame), 6000);
        wait_until(|| !again.outcomes().is_empty());
        assert_eq!(again.outcomes().len(), 1);
        assert!(!voter.is_active());
        bus.stop().unwrap();
    }

    #[test]
    fn second_activation_is_ignored() {
        let bus = Arc::new(FrameBus::new());
        let voter = RecognitionVoter::new(
            Arc::clone(&bus),
            Box::new(ScriptedDetector::new(vec![1])),
            Box::new(StubMatcher::unknown()),
            5,
        );
        let first = Arc::new(RecordingCallback::default());
        let second = Arc::new(RecordingCallback::default());

        voter.activate(first);
        voter.activate(second.clone());
        assert!(voter.is_active());

        voter.deactivate();
        assert!(!voter.is_active());
        voter.activate(second);
        assert!(voter.is_active());
        voter.deactivate();
    }
}
