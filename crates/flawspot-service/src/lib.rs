//! flawspot-service: the inspection workflow around the pipeline.
//!
//! A user first submits a photo of an intact part (the base photo), then
//! photos to check against it; single photos can also be checked on
//! their own. The service keeps the base photos, runs the configured
//! [`DefectDetector`], highlights defects when any were found, and asks
//! the optional [`DefectDescriber`] for prose.
//!
//! Dialog state, message delivery and persistence belong to the caller.

pub mod detector;
pub mod error;
pub mod store;

use std::sync::Arc;

use flawspot_pipeline::InspectionResult;
use serde::Serialize;
use tracing::{debug, warn};

pub use detector::{DefectDescriber, DefectDetector, DescribeError, ProfileDetector};
pub use error::ServiceError;
pub use store::{BasePhotoStore, UserId};

/// Everything produced for one checked photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectionOutput {
    pub result: InspectionResult,
    /// JPEG with the defects outlined. Present only when defects were
    /// found and highlighting succeeded.
    pub highlighted: Option<Vec<u8>>,
    /// Prose from the describer, when one is configured and succeeded.
    pub description: Option<String>,
}

/// Inspection workflow state shared across requests.
#[derive(Default)]
pub struct InspectionService {
    detector: Option<Arc<dyn DefectDetector>>,
    describer: Option<Arc<dyn DefectDescriber>>,
    base_photos: BasePhotoStore,
}

impl InspectionService {
    /// A service with no detector; every check fails with
    /// [`ServiceError::NotConfigured`] until one is set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_detector(mut self, detector: impl DefectDetector + 'static) -> Self {
        self.detector = Some(Arc::new(detector));
        self
    }

    #[must_use]
    pub fn with_describer(mut self, describer: impl DefectDescriber + 'static) -> Self {
        self.describer = Some(Arc::new(describer));
        self
    }

    /// Remember `photo` as the base photo of `user`.
    pub fn accept_base_photo(&self, user: UserId, photo: Vec<u8>) {
        debug!(user, bytes = photo.len(), "base photo stored");
        self.base_photos.put(user, photo);
    }

    #[must_use]
    pub const fn base_photos(&self) -> &BasePhotoStore {
        &self.base_photos
    }

    /// Check a single photo.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotConfigured`] without a detector, otherwise the
    /// detector's error.
    pub fn process_single(&self, photo: &[u8]) -> Result<InspectionOutput, ServiceError> {
        let detector = self.detector()?;
        let result = detector.inspect(photo)?;
        Ok(self.finish(detector, photo, result))
    }

    /// Check `current` against the base photo of `user`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotConfigured`] without a detector,
    /// [`ServiceError::BasePhotoMissing`] when `user` has no base photo,
    /// otherwise the detector's error.
    pub fn process_diff(
        &self,
        user: UserId,
        current: &[u8],
    ) -> Result<InspectionOutput, ServiceError> {
        let detector = self.detector()?;
        let base = self
            .base_photos
            .get(user)
            .ok_or(ServiceError::BasePhotoMissing)?;
        let result = detector.inspect_diff(&base, current)?;
        Ok(self.finish(detector, current, result))
    }

    fn detector(&self) -> Result<&dyn DefectDetector, ServiceError> {
        self.detector.as_deref().ok_or(ServiceError::NotConfigured)
    }

    fn finish(
        &self,
        detector: &dyn DefectDetector,
        photo: &[u8],
        result: InspectionResult,
    ) -> InspectionOutput {
        let highlighted = if result.has_defects {
            detector
                .highlight(photo, &result)
                .inspect_err(|err| warn!(%err, "highlighting failed, returning plain result"))
                .ok()
        } else {
            None
        };
        let description = self.describer.as_deref().and_then(|describer| {
            describer
                .describe(&result)
                .inspect_err(|err| warn!(%err, "no description"))
                .ok()
        });
        InspectionOutput {
            result,
            highlighted,
            description,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use flawspot_pipeline::{BoundingBox, DefectCandidate, Dimensions, PipelineError};

    use super::*;

    /// Detector returning a canned result and recording its inputs.
    #[derive(Default)]
    struct Canned {
        defects: Vec<DefectCandidate>,
        fail_highlight: bool,
        seen: Mutex<Vec<Vec<u8>>>,
    }

    impl Canned {
        fn result(&self) -> InspectionResult {
            InspectionResult::new(Dimensions::new(10, 10), self.defects.clone())
        }
    }

    impl DefectDetector for Arc<Canned> {
        fn inspect(&self, image: &[u8]) -> Result<InspectionResult, PipelineError> {
            self.seen.lock().unwrap().push(image.to_vec());
            Ok(self.result())
        }

        fn inspect_diff(
            &self,
            base: &[u8],
            current: &[u8],
        ) -> Result<InspectionResult, PipelineError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(base.to_vec());
            seen.push(current.to_vec());
            Ok(self.result())
        }

        fn highlight(
            &self,
            _image: &[u8],
            _result: &InspectionResult,
        ) -> Result<Vec<u8>, PipelineError> {
            if self.fail_highlight {
                Err(PipelineError::EmptyInput)
            } else {
                Ok(vec![0xFF, 0xD8])
            }
        }
    }

    struct Counting;

    impl DefectDescriber for Counting {
        fn describe(&self, result: &InspectionResult) -> Result<String, DescribeError> {
            Ok(format!("{} defects", result.defects.len()))
        }
    }

    fn one_defect() -> Vec<DefectCandidate> {
        vec![DefectCandidate::new(BoundingBox::new(1, 1, 4, 4), "diff_contour")]
    }

    #[test]
    fn unconfigured_service_refuses() {
        let service = InspectionService::new();
        assert!(matches!(
            service.process_single(b"x"),
            Err(ServiceError::NotConfigured)
        ));
    }

    #[test]
    fn comparison_needs_a_base_photo() {
        let service = InspectionService::new().with_detector(Arc::new(Canned::default()));
        assert!(matches!(
            service.process_diff(1, b"current"),
            Err(ServiceError::BasePhotoMissing)
        ));
    }

    #[test]
    fn comparison_uses_the_users_base_photo() {
        let detector = Arc::new(Canned::default());
        let service = InspectionService::new().with_detector(Arc::clone(&detector));
        service.accept_base_photo(1, b"base one".to_vec());
        service.accept_base_photo(2, b"base two".to_vec());
        service.process_diff(2, b"current").unwrap();
        let seen = detector.seen.lock().unwrap();
        assert_eq!(seen[0], b"base two");
        assert_eq!(seen[1], b"current");
    }

    #[test]
    fn clean_result_is_not_highlighted() {
        let service = InspectionService::new().with_detector(Arc::new(Canned::default()));
        let output = service.process_single(b"photo").unwrap();
        assert!(!output.result.has_defects);
        assert!(output.highlighted.is_none());
        assert!(output.description.is_none());
    }

    #[test]
    fn defects_are_highlighted_and_described() {
        let detector = Canned {
            defects: one_defect(),
            ..Canned::default()
        };
        let service = InspectionService::new()
            .with_detector(Arc::new(detector))
            .with_describer(Counting);
        let output = service.process_single(b"photo").unwrap();
        assert_eq!(output.highlighted.as_deref(), Some(&[0xFF, 0xD8][..]));
        assert_eq!(output.description.as_deref(), Some("1 defects"));
    }

    #[test]
    fn highlight_failure_keeps_the_result() {
        let detector = Canned {
            defects: one_defect(),
            fail_highlight: true,
            ..Canned::default()
        };
        let service = InspectionService::new().with_detector(Arc::new(detector));
        let output = service.process_single(b"photo").unwrap();
        assert!(output.result.has_defects);
        assert!(output.highlighted.is_none());
    }
}
