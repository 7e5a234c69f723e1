//! Stub capability backends for tests and the stub pipeline.

use anyhow::Result;
use sha2::{Digest, Sha256};

use super::{AttributeClassifier, DetectionResult, Detector, FaceDetection, IdentityMatcher};
use crate::frame::{Frame, Region};

/// Change-based stub detector: reports one "face" whenever the frame
/// content differs from the previous frame, none otherwise. Good enough
/// to exercise presence-aware retention against a synthetic source.
pub struct StubDetector {
    last_hash: Option<[u8; 32]>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self { last_hash: None }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let current: [u8; 32] = Sha256::digest(&frame.data).into();
        let changed = match self.last_hash {
            Some(prev) => prev != current,
            None => false,
        };
        self.last_hash = Some(current);

        if !changed {
            return Ok(DetectionResult::empty());
        }

        let region = Region::new(
            frame.width / 4,
            frame.height / 4,
            (frame.width / 2).max(1),
            (frame.height / 2).max(1),
        );
        Ok(DetectionResult {
            faces: vec![FaceDetection {
                region,
                crop: frame.crop(&region),
            }],
        })
    }
}

/// Detector driven by a scripted presence sequence; frame `n` reports
/// `counts[n]` detections (last entry repeats past the end).
pub struct ScriptedDetector {
    counts: Vec<usize>,
    cursor: usize,
}

impl ScriptedDetector {
    pub fn new(counts: Vec<usize>) -> Self {
        Self { counts, cursor: 0 }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let count = self
            .counts
            .get(self.cursor)
            .or(self.counts.last())
            .copied()
            .unwrap_or(0);
        self.cursor += 1;

        let region = Region::new(0, 0, frame.width.min(8), frame.height.min(8));
        let faces = (0..count)
            .map(|_| FaceDetection {
                region,
                crop: frame.crop(&region),
            })
            .collect();
        Ok(DetectionResult { faces })
    }
}

/// Classifier that labels every crop with a fixed string.
pub struct StubClassifier {
    label: String,
}

impl StubClassifier {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl AttributeClassifier for StubClassifier {
    fn classify(&mut self, _face: &Frame) -> Result<String> {
        Ok(self.label.clone())
    }
}

/// Matcher that replays a scripted identity sequence, one entry per call.
/// `None` entries model "unknown"; past the end it keeps returning `None`.
pub struct StubMatcher {
    script: Vec<Option<String>>,
    cursor: usize,
}

impl StubMatcher {
    pub fn new(script: Vec<Option<&str>>) -> Self {
        Self {
            script: script
                .into_iter()
                .map(|id| id.map(str::to_string))
                .collect(),
            cursor: 0,
        }
    }

    /// Matcher that recognizes nobody.
    pub fn unknown() -> Self {
        Self {
            script: Vec::new(),
            cursor: 0,
        }
    }
}

impl IdentityMatcher for StubMatcher {
    fn recognize(&mut self, _face: &Frame) -> Result<Option<String>> {
        let id = self.script.get(self.cursor).cloned().flatten();
        self.cursor += 1;
        Ok(id)
    }
}
