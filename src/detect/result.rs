use crate::frame::{Frame, Region};

/// Result of running detection on one frame.
///
/// Lifetime is scoped to the processing of that frame; face crops are
/// owned copies so the source frame can be released independently.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    pub faces: Vec<FaceDetection>,
}

#[derive(Clone, Debug)]
pub struct FaceDetection {
    /// Bounding region within the source frame.
    pub region: Region,
    /// Extracted sub-image for classification/recognition.
    pub crop: Frame,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of detected subjects.
    pub fn count(&self) -> usize {
        self.faces.len()
    }

    pub fn presence(&self) -> bool {
        !self.faces.is_empty()
    }
}
