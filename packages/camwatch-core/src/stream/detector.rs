//! Face detection capability consumed by stream sessions.

use super::frame::{Detection, GrayFrame, Rect};

/// Face detection and recognition supplied by the embedding application.
///
/// Called from the blocking thread pool, so implementations may be slow and
/// synchronous. A session never interprets confidences, it only carries them.
pub trait Detector: Send + Sync {
    /// Locate faces in a gray-scale frame.
    fn detect_faces(&self, frame: &GrayFrame) -> Vec<Rect>;

    /// Attach identities to the located faces. Default: none identified.
    fn identify(&self, _frame: &GrayFrame, faces: &[Rect]) -> Vec<Detection> {
        faces.iter().copied().map(Detection::face).collect()
    }

    /// Full pass: locate, then identify.
    fn detect(&self, frame: &GrayFrame) -> Vec<Detection> {
        let faces = self.detect_faces(frame);
        if faces.is_empty() {
            return Vec::new();
        }
        self.identify(frame, &faces)
    }
}

/// Detector that never finds anything, for running without a model.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn detect_faces(&self, _frame: &GrayFrame) -> Vec<Rect> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneFace;

    impl Detector for OneFace {
        fn detect_faces(&self, _frame: &GrayFrame) -> Vec<Rect> {
            vec![Rect::new(1, 1, 4, 4)]
        }
    }

    fn gray() -> GrayFrame {
        GrayFrame {
            width: 8,
            height: 8,
            data: vec![0; 64],
        }
    }

    #[test]
    fn test_default_identify_leaves_faces_unlabelled() {
        let detections = OneFace.detect(&gray());
        assert_eq!(detections, vec![Detection::face(Rect::new(1, 1, 4, 4))]);
        assert!(!detections[0].is_identified());
    }

    #[test]
    fn test_noop_detector() {
        assert!(NoopDetector.detect(&gray()).is_empty());
    }
}
