use crate::errors::QueueError;

/// Outcome of classifying a receiver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Recreate the receiver and keep consuming.
    Retryable,
    /// Stop the supervisor and report the error to the caller.
    Fatal,
}

/// Decides whether a receiver error is worth recreating the receiver for.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, error: &QueueError) -> FailureKind;
}

/// Default classifier: retry whatever [`QueueError::is_transient`] reports as transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientErrorClassifier;

impl FailureClassifier for TransientErrorClassifier {
    fn classify(&self, error: &QueueError) -> FailureKind {
        if error.is_transient() {
            FailureKind::Retryable
        } else {
            FailureKind::Fatal
        }
    }
}

impl<F> FailureClassifier for F
where
    F: Fn(&QueueError) -> FailureKind + Send + Sync,
{
    fn classify(&self, error: &QueueError) -> FailureKind {
        self(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classifier() {
        let classifier = TransientErrorClassifier;
        assert_eq!(
            classifier.classify(&QueueError::ConnectionFailed { message: "reset".into() }),
            FailureKind::Retryable
        );
        assert_eq!(
            classifier.classify(&QueueError::QueueNotFound { queue_name: "q".into() }),
            FailureKind::Fatal
        );
    }

    #[test]
    fn test_closure_classifier() {
        let always_retry = |_: &QueueError| FailureKind::Retryable;
        assert_eq!(
            always_retry.classify(&QueueError::QueueNotFound { queue_name: "q".into() }),
            FailureKind::Retryable
        );
    }
}
