//! Workflow errors and the message shown to the end user.

use flawspot_pipeline::{ErrorKind, PipelineError};

/// Why a photo could not be processed.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No detector was configured for the service.
    #[error("defect detector is not configured")]
    NotConfigured,

    /// A comparison was requested before any base photo was submitted.
    #[error("base photo not found")]
    BasePhotoMissing,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ServiceError {
    /// Coarse classification, the only detail callers may act on.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfigured => ErrorKind::Configuration,
            Self::BasePhotoMissing => ErrorKind::Precondition,
            Self::Pipeline(err) => err.kind(),
        }
    }

    /// Text for the end user, prompting a retry where one can help.
    ///
    /// Quality-gate failures include their reason; everything else is
    /// reported without internals.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured => "Inspection is not available right now.".to_owned(),
            Self::BasePhotoMissing => {
                "Please send a photo of the intact part first, then the photo to check.".to_owned()
            }
            Self::Pipeline(err @ PipelineError::QualityGate { .. }) => {
                format!("The photo could not be used ({err}). Please take another photo and try again.")
            }
            Self::Pipeline(err) if err.kind() == ErrorKind::Decode => {
                "The photo could not be read. Please send it again as an image.".to_owned()
            }
            Self::Pipeline(_) => "Processing failed. Please try again.".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use flawspot_pipeline::QualityFailure;

    use super::*;

    #[test]
    fn quality_failures_keep_their_reason() {
        let err = ServiceError::from(PipelineError::QualityGate {
            label: "current image",
            failure: QualityFailure::Underexposed { ratio: 1.0 },
        });
        assert_eq!(err.kind(), ErrorKind::QualityGate);
        let message = err.user_message();
        assert!(message.contains("underexposed"), "{message}");
        assert!(message.contains("try again"), "{message}");
    }

    #[test]
    fn internals_are_not_exposed() {
        let err = ServiceError::from(PipelineError::InvalidConfig("ecc_epsilon".to_owned()));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.user_message().contains("ecc_epsilon"));
    }

    #[test]
    fn workflow_errors_classify() {
        assert_eq!(ServiceError::NotConfigured.kind(), ErrorKind::Configuration);
        assert_eq!(ServiceError::BasePhotoMissing.kind(), ErrorKind::Precondition);
        assert!(
            ServiceError::from(PipelineError::EmptyInput)
                .user_message()
                .contains("could not be read")
        );
    }
}
