//! Ports the inspection workflow talks to.
//!
//! [`DefectDetector`] is the vision side: the three pipeline entry points
//! behind a trait so the workflow can run against a stub in tests.
//! [`DefectDescriber`] turns a result into prose for the end user and is
//! optional.

use flawspot_pipeline::{DetectionProfile, InspectionResult, PipelineError};

/// Finds and highlights defects in photos.
pub trait DefectDetector: Send + Sync {
    /// Inspect a single photo.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`] from decoding or the quality gate.
    fn inspect(&self, image: &[u8]) -> Result<InspectionResult, PipelineError>;

    /// Compare a current photo against the base photo of the same part.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`] from decoding or the quality gate.
    fn inspect_diff(&self, base: &[u8], current: &[u8]) -> Result<InspectionResult, PipelineError>;

    /// Draw the defects of `result` onto `image`.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`] from decoding or encoding.
    fn highlight(&self, image: &[u8], result: &InspectionResult) -> Result<Vec<u8>, PipelineError>;
}

/// [`DefectDetector`] running the flawspot pipeline with a fixed profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileDetector {
    profile: DetectionProfile,
}

impl ProfileDetector {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `profile` does not
    /// validate.
    pub fn new(profile: DetectionProfile) -> Result<Self, PipelineError> {
        profile.validate()?;
        Ok(Self { profile })
    }

    #[must_use]
    pub const fn profile(&self) -> &DetectionProfile {
        &self.profile
    }
}

impl DefectDetector for ProfileDetector {
    fn inspect(&self, image: &[u8]) -> Result<InspectionResult, PipelineError> {
        flawspot_pipeline::inspect(image, &self.profile)
    }

    fn inspect_diff(&self, base: &[u8], current: &[u8]) -> Result<InspectionResult, PipelineError> {
        flawspot_pipeline::inspect_diff(base, current, &self.profile)
    }

    fn highlight(&self, image: &[u8], result: &InspectionResult) -> Result<Vec<u8>, PipelineError> {
        flawspot_pipeline::highlight(image, result)
    }
}

/// A description could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("description unavailable: {0}")]
pub struct DescribeError(pub String);

/// Writes a human-readable account of an inspection result.
pub trait DefectDescriber: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DescribeError`] when no description can be produced.
    fn describe(&self, result: &InspectionResult) -> Result<String, DescribeError>;
}
