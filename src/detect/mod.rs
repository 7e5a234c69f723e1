mod result;
mod stub;

pub use result::{DetectionResult, FaceDetection};
pub use stub::{ScriptedDetector, StubClassifier, StubDetector, StubMatcher};

use anyhow::Result;

use crate::frame::Frame;

/// Face/person detector capability.
///
/// Implementations are external collaborators (Haar cascades, CNNs, ...);
/// the core only depends on this trait. `detect` takes `&mut self` because
/// real backends carry mutable inference state, so shared use goes through
/// a `Mutex`.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;
}

/// Attribute classifier capability (age, gender or similar).
/// Returns a short human-readable label for one face crop.
pub trait AttributeClassifier: Send {
    fn classify(&mut self, face: &Frame) -> Result<String>;
}

/// Identity matcher capability. `None` means "unknown".
pub trait IdentityMatcher: Send {
    fn recognize(&mut self, face: &Frame) -> Result<Option<String>>;
}
