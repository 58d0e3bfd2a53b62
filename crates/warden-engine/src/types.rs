use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use warden_core::{Attribute, Effect, SubjectId, Timestamp};

// ---------------------------------------------------------------------------
// PolicySet / Policy / Target — declarative policy model
//
// Immutable value objects constructed from persisted JSON by the policy
// store; the engine never mutates them.
// ---------------------------------------------------------------------------

/// Ordered collection of policies, unique by `(zone, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySet {
    pub name: String,
    pub policies: Vec<Policy>,
}

/// A single declarative policy. A missing target matches any request
/// (blanket policy); an empty condition list makes the policy
/// unconditionally applicable once matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub effect: Effect,
}

/// The match predicate of a policy. Every absent field matches anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub resource: Option<ResourceTarget>,
    #[serde(default)]
    pub subject: Option<SubjectTarget>,
}

/// Resource constraints of a target.
///
/// `uri_template` is a literal path match for the request URI (e.g.
/// `/site/{site_id}`). `attribute_uri_template` is distinct: it extracts
/// a sub-path from the request URI and resolves resource attributes
/// against that sub-path instead of the full URI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceTarget {
    #[serde(default)]
    pub uri_template: Option<String>,
    #[serde(default)]
    pub attribute_uri_template: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// Subject constraints of a target: attributes the subject must carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectTarget {
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

// ---------------------------------------------------------------------------
// MatchCandidate — the normalized request used for matching
// ---------------------------------------------------------------------------

/// Request view consumed by the policy matcher. Created per request and
/// discarded when the request completes.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub action: String,
    pub resource_uri: String,
    pub subject_id: SubjectId,
    pub supplemental_resource_attributes: Vec<Attribute>,
    pub supplemental_subject_attributes: Vec<Attribute>,
}

// ---------------------------------------------------------------------------
// EvaluationRequest / EvaluationResult — the engine's outer surface
// ---------------------------------------------------------------------------

/// A complete decision request: who (subject) wants to do what (action)
/// to which resource, with optional supplemental attributes and an
/// optional explicit policy-set evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub resource_uri: String,
    pub subject_id: SubjectId,
    pub action: String,
    #[serde(default)]
    pub supplemental_subject_attributes: Vec<Attribute>,
    #[serde(default)]
    pub supplemental_resource_attributes: Vec<Attribute>,
    /// Empty means "no order specified": legal only when the zone has
    /// exactly one policy set.
    #[serde(default)]
    pub policy_set_order: Vec<String>,
}

impl EvaluationRequest {
    pub fn new(
        resource_uri: impl Into<String>,
        subject_id: impl Into<SubjectId>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            subject_id: subject_id.into(),
            action: action.into(),
            supplemental_subject_attributes: Vec::new(),
            supplemental_resource_attributes: Vec::new(),
            policy_set_order: Vec::new(),
        }
    }
}

/// The decided effect plus the attribute sets and resource URIs resolved
/// while deciding it. `message` is populated only for `INDETERMINATE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub effect: Effect,
    pub subject_attributes: Vec<Attribute>,
    pub resource_attributes: Vec<Attribute>,
    pub resolved_resource_uris: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub evaluated_at: Timestamp,
}

impl EvaluationResult {
    /// A bare result carrying only an effect.
    pub fn of(effect: Effect) -> Self {
        Self {
            effect,
            subject_attributes: Vec::new(),
            resource_attributes: Vec::new(),
            resolved_resource_uris: BTreeSet::new(),
            message: None,
            evaluated_at: Timestamp::now(),
        }
    }

    pub fn indeterminate(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::of(Effect::Indeterminate)
        }
    }
}
