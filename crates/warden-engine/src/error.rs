use std::fmt;
use thiserror::Error;
use warden_core::CoreError;

/// Single error enum for all engine operations.
///
/// Request errors (`InvalidRequest`, `UnknownPolicySet`, `AmbiguousOrder`)
/// are returned to the caller before any matching or caching occurs.
/// Store, template, and condition errors raised mid-evaluation degrade
/// the decision to `INDETERMINATE` instead of failing the request; cache
/// errors are logged and treated as a miss.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown policy set '{0}'")]
    UnknownPolicySet(String),

    #[error("ambiguous evaluation order: zone has {0} policy sets and the request names none")]
    AmbiguousOrder(usize),

    #[error("condition parse error: {0}")]
    ConditionParse(String),

    #[error("forbidden construct in condition: {0}")]
    ForbiddenConstruct(String),

    #[error("condition evaluation error: {0}")]
    ConditionEval(String),

    #[error("uri template error: {0}")]
    Template(String),

    #[error("attribute store error: {0}")]
    Store(String),

    #[error("cache backend error: {0}")]
    Cache(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("policy set load error: {0}")]
    Load(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no zone context available")]
    NoZoneContext,
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Store(msg) => EngineError::Store(msg),
            CoreError::NoZoneContext => EngineError::NoZoneContext,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// AssertionFailure — expected condition-level control flow
// ---------------------------------------------------------------------------

/// A failed handler assertion (`has`, `haveSame`, URI-variable lookup).
///
/// Not an `EngineError`: assertion failures are expected control flow
/// inside conditions and make the condition evaluate to `false`. Only
/// unexpected errors escalate the decision to `INDETERMINATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    pub message: String,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let errors = vec![
            EngineError::InvalidRequest("missing action".into()),
            EngineError::UnknownPolicySet("ps-x".into()),
            EngineError::AmbiguousOrder(2),
            EngineError::ConditionParse("unexpected token".into()),
            EngineError::ForbiddenConstruct("exec".into()),
            EngineError::ConditionEval("handler unavailable".into()),
            EngineError::Template("unclosed brace".into()),
            EngineError::Store("timeout".into()),
            EngineError::Cache("backend down".into()),
            EngineError::Validation("duplicate policy name".into()),
            EngineError::Load("empty payload".into()),
            EngineError::Serialization("bad json".into()),
            EngineError::NoZoneContext,
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn test_unknown_policy_set_names_the_set() {
        let err = EngineError::UnknownPolicySet("ps-default".into());
        assert!(err.to_string().contains("ps-default"));
    }

    #[test]
    fn test_from_core_error() {
        let err: EngineError = CoreError::Store("down".into()).into();
        assert!(matches!(err, EngineError::Store(_)));
        let err: EngineError = CoreError::NoZoneContext.into();
        assert!(matches!(err, EngineError::NoZoneContext));
    }

    #[test]
    fn test_assertion_failure_display() {
        let failure = AssertionFailure::new("subject 'bob' does not have acs/role");
        assert_eq!(failure.to_string(), "subject 'bob' does not have acs/role");
    }
}
