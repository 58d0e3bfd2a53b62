//! Warden Policy Decision Engine
//!
//! Attribute-based access control core: policies grouped into ordered
//! policy sets decide PERMIT / DENY / NOT_APPLICABLE / INDETERMINATE for
//! (subject, action, resource) requests, isolated per zone.
//!
//! Key features:
//! - URI-template targeting with canonicalizing match and eager sub-path
//!   capture (`/site/{site_id}`, `/v1{path}`)
//! - Restricted condition language compiled to a typed AST; process
//!   control, reflection, and dynamic code constructs are rejected at
//!   policy-set write time
//! - First-applicable combining within a policy set, ordered policy-set
//!   evaluation across sets
//! - Generation-marker decision cache: invalidation is one counter bump,
//!   never a key scan
//! - Attribute stores with scoped parent inheritance; request-scoped
//!   resolver memoization

pub mod cache;
pub mod condition;
pub mod error;
pub mod handler;
pub mod matcher;
pub mod resolve;
pub mod service;
pub mod store;
pub mod template;
pub mod types;

// Re-export primary types for convenience
pub use cache::{
    request_hash, DecisionCache, DecisionCacheKey, InMemoryDecisionCache, NoopDecisionCache,
    PolicySetScope,
};
pub use condition::{CompiledCondition, ConditionCompiler, ConditionContext};
pub use error::{AssertionFailure, EngineError, EngineResult};
pub use handler::{
    assert_have_same, match_any, match_single, AttributeHandler, ResourceHandler, SubjectHandler,
};
pub use matcher::{MatchOutcome, MatchedPolicy, PolicyMatcher};
pub use resolve::{ResourceAttributeResolver, SubjectAttributeResolver};
pub use service::{policy_set_to_json, EvaluationService};
pub use store::{
    InMemoryPolicySetStore, InMemoryResourceStore, InMemorySubjectStore, ParentLink,
    PolicySetStore,
};
pub use template::{canonicalize, UriTemplate};
pub use types::{
    EvaluationRequest, EvaluationResult, MatchCandidate, Policy, PolicySet, ResourceTarget,
    SubjectTarget, Target,
};
