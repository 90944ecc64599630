use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Classification of a structured failure.
///
/// This is a closed set: anything an activity or decider reports is
/// normalized into one of these kinds, with unrecognized values defaulting
/// to [`ErrorKind::NonRetryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient failure; eligible for retry under the task's policy.
    Retryable,
    /// Permanent failure.
    NonRetryable,
    /// The operation timed out; treated as retryable for backoff purposes.
    Timeout,
    /// Compare-and-swap mismatch; handled locally by the engine retry loop.
    Conflict,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::NonRetryable => "non_retryable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
        }
    }
}

impl FromStr for ErrorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retryable" => Ok(ErrorKind::Retryable),
            "non_retryable" => Ok(ErrorKind::NonRetryable),
            "timeout" => Ok(ErrorKind::Timeout),
            "conflict" => Ok(ErrorKind::Conflict),
            _ => Err(()),
        }
    }
}

/// Structured error envelope recorded in history and task state.
///
/// All engine-surfaced structured errors use this tagged shape:
/// `{type, message, cause?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonRetryable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Normalizes an arbitrary JSON failure payload into the envelope.
    ///
    /// Objects are read field-wise (`type`, `message`, `cause`); a plain
    /// string becomes the message. Unrecognized or absent `type` values
    /// default to `non_retryable`.
    pub fn normalize(raw: &Value) -> Self {
        match raw {
            Value::Object(map) => {
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(ErrorKind::NonRetryable);
                let message = match map.get("message") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => raw.to_string(),
                };
                let cause = map.get("cause").map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                Self {
                    kind,
                    message,
                    cause,
                }
            }
            Value::String(s) => Self::non_retryable(s.clone()),
            Value::Null => Self::non_retryable("unspecified error"),
            other => Self::non_retryable(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ErrorKind::Retryable,
            ErrorKind::NonRetryable,
            ErrorKind::Timeout,
            ErrorKind::Conflict,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("fatal".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_normalize_object() {
        let err = ErrorInfo::normalize(&json!({
            "type": "retryable",
            "message": "connection reset",
            "cause": "io"
        }));
        assert_eq!(err.kind, ErrorKind::Retryable);
        assert_eq!(err.message, "connection reset");
        assert_eq!(err.cause.as_deref(), Some("io"));
    }

    #[test]
    fn test_normalize_unrecognized_kind_defaults() {
        let err = ErrorInfo::normalize(&json!({"type": "fatal", "message": "boom"}));
        assert_eq!(err.kind, ErrorKind::NonRetryable);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_normalize_string_and_null() {
        let err = ErrorInfo::normalize(&json!("oops"));
        assert_eq!(err.kind, ErrorKind::NonRetryable);
        assert_eq!(err.message, "oops");

        let err = ErrorInfo::normalize(&Value::Null);
        assert_eq!(err.kind, ErrorKind::NonRetryable);
    }

    #[test]
    fn test_envelope_serde_shape() {
        let err = ErrorInfo::timeout("took too long");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v, json!({"type": "timeout", "message": "took too long"}));
    }
}
