//! Maps a failed attempt to the next step of the retry loop

use std::time::Duration;

use crate::error::TransportError;

/// Added to the connect timeout when a connection times out before any byte
pub const TIMEOUT_EXTENSION: Duration = Duration::from_secs(5);

const ZERO_BYTES_RECEIVED: &str = "0 out of 0 bytes received";
const PROXY_AUTH_REJECTED: &str = "Received HTTP code 407 from proxy after CONNECT";
const PROXY_UNRESOLVED: &str = "Could not resolve proxy";

const TOO_MANY_REQUESTS: u16 = 429;

/// What the transport does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Retry through the same proxy with a longer connect timeout
    ExtendTimeoutAndRetry,
    /// Tell the rotator the proxy failed, then retry
    MarkFailedAndRetryNext,
    /// Raise the rate-limit notification, then retry
    RateLimitedAndRetryNext,
    /// Give up and hand the failure to the caller
    Abort,
}

impl RetryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryAction::ExtendTimeoutAndRetry => "extend_timeout",
            RetryAction::MarkFailedAndRetryNext => "mark_failed",
            RetryAction::RateLimitedAndRetryNext => "rate_limited",
            RetryAction::Abort => "abort",
        }
    }

    /// Whether taking this action spends the per-request retry budget
    pub fn consumes_budget(&self) -> bool {
        matches!(
            self,
            RetryAction::MarkFailedAndRetryNext | RetryAction::RateLimitedAndRetryNext
        )
    }
}

/// Per-request attempt bookkeeping the classifier needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptState {
    /// Proxy-attributable retries already taken for this request
    pub retries: u32,
    /// The current attempt already runs with an extended connect timeout
    pub timeout_extended: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier {
    has_rotator: bool,
    max_retries: Option<u32>,
}

impl ErrorClassifier {
    pub fn new(has_rotator: bool, max_retries: Option<u32>) -> Self {
        Self {
            has_rotator,
            max_retries,
        }
    }

    pub fn classify(&self, failure: &TransportError, attempt: &AttemptState) -> RetryAction {
        if !self.has_rotator {
            return RetryAction::Abort;
        }

        let action = match failure {
            TransportError::Connect { message }
                if message.contains(ZERO_BYTES_RECEIVED) && !attempt.timeout_extended =>
            {
                RetryAction::ExtendTimeoutAndRetry
            }
            TransportError::Connect { .. } => RetryAction::MarkFailedAndRetryNext,
            TransportError::Status { code, .. } if *code == TOO_MANY_REQUESTS => {
                RetryAction::RateLimitedAndRetryNext
            }
            TransportError::Status { message, .. } | TransportError::Protocol { message }
                if is_proxy_failure(message) =>
            {
                RetryAction::MarkFailedAndRetryNext
            }
            TransportError::Status { .. } | TransportError::Protocol { .. } => RetryAction::Abort,
        };

        if let Some(max) = self.max_retries {
            if action.consumes_budget() && attempt.retries >= max {
                return RetryAction::Abort;
            }
        }

        action
    }
}

fn is_proxy_failure(message: &str) -> bool {
    message.contains(PROXY_AUTH_REJECTED) || message.contains(PROXY_UNRESOLVED)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_BYTES: &str =
        "Operation timed out after 1000 milliseconds with 0 out of 0 bytes received";

    fn with_rotator() -> ErrorClassifier {
        ErrorClassifier::new(true, None)
    }

    #[test]
    fn test_zero_byte_timeout_extends_once() {
        let failure = TransportError::connect(ZERO_BYTES);

        assert_eq!(
            with_rotator().classify(&failure, &AttemptState::default()),
            RetryAction::ExtendTimeoutAndRetry
        );

        let extended = AttemptState {
            retries: 0,
            timeout_extended: true,
        };
        assert_eq!(
            with_rotator().classify(&failure, &extended),
            RetryAction::MarkFailedAndRetryNext
        );
    }

    #[test]
    fn test_connect_failure_marks_failed() {
        let failure = TransportError::connect("Connection refused");
        assert_eq!(
            with_rotator().classify(&failure, &AttemptState::default()),
            RetryAction::MarkFailedAndRetryNext
        );
    }

    #[test]
    fn test_too_many_requests() {
        let failure = TransportError::status(429, "Too Many Requests");
        assert_eq!(
            with_rotator().classify(&failure, &AttemptState::default()),
            RetryAction::RateLimitedAndRetryNext
        );
    }

    #[test]
    fn test_other_status_aborts() {
        for code in [400, 403, 404, 500, 503] {
            let failure = TransportError::status(code, "nope");
            assert_eq!(
                with_rotator().classify(&failure, &AttemptState::default()),
                RetryAction::Abort,
                "status {} should abort",
                code
            );
        }
    }

    #[test]
    fn test_proxy_protocol_patterns() {
        let state = AttemptState::default();
        for message in [
            "Received HTTP code 407 from proxy after CONNECT",
            "Could not resolve proxy: nowhere.invalid",
        ] {
            assert_eq!(
                with_rotator().classify(&TransportError::protocol(message), &state),
                RetryAction::MarkFailedAndRetryNext
            );
            assert_eq!(
                with_rotator().classify(&TransportError::status(502, message), &state),
                RetryAction::MarkFailedAndRetryNext
            );
        }

        assert_eq!(
            with_rotator().classify(&TransportError::protocol("malformed chunk"), &state),
            RetryAction::Abort
        );
    }

    #[test]
    fn test_no_rotator_aborts_everything() {
        let classifier = ErrorClassifier::new(false, None);
        let state = AttemptState::default();

        assert_eq!(
            classifier.classify(&TransportError::connect("refused"), &state),
            RetryAction::Abort
        );
        assert_eq!(
            classifier.classify(&TransportError::status(429, "slow down"), &state),
            RetryAction::Abort
        );
        assert_eq!(
            classifier.classify(&TransportError::protocol(PROXY_UNRESOLVED), &state),
            RetryAction::Abort
        );
        assert_eq!(
            classifier.classify(&TransportError::connect(ZERO_BYTES), &state),
            RetryAction::Abort
        );
    }

    #[test]
    fn test_retry_budget() {
        let classifier = ErrorClassifier::new(true, Some(1));
        let failure = TransportError::connect("refused");

        let fresh = AttemptState::default();
        assert_eq!(
            classifier.classify(&failure, &fresh),
            RetryAction::MarkFailedAndRetryNext
        );

        let spent = AttemptState {
            retries: 1,
            timeout_extended: false,
        };
        assert_eq!(classifier.classify(&failure, &spent), RetryAction::Abort);
        assert_eq!(
            classifier.classify(&TransportError::status(429, "slow down"), &spent),
            RetryAction::Abort
        );

        // Extending the timeout does not draw from the budget.
        assert_eq!(
            classifier.classify(&TransportError::connect(ZERO_BYTES), &spent),
            RetryAction::ExtendTimeoutAndRetry
        );
    }

    #[test]
    fn test_zero_budget_aborts_first_failure() {
        let classifier = ErrorClassifier::new(true, Some(0));
        assert_eq!(
            classifier.classify(&TransportError::connect("refused"), &AttemptState::default()),
            RetryAction::Abort
        );
    }
}
