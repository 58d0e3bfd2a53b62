use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};
use warden_core::{
    Effect, ResourceAttributeStore, SubjectAttributeStore, ZoneId, ZoneResolver,
};

use crate::cache::{request_hash, DecisionCache, DecisionCacheKey, PolicySetScope};
use crate::condition::{ConditionCompiler, ConditionContext};
use crate::error::{EngineError, EngineResult};
use crate::handler::{ResourceHandler, SubjectHandler};
use crate::matcher::{MatchedPolicy, PolicyMatcher};
use crate::resolve::{ResourceAttributeResolver, SubjectAttributeResolver};
use crate::store::PolicySetStore;
use crate::template::UriTemplate;
use crate::types::{EvaluationRequest, EvaluationResult, MatchCandidate, PolicySet};

/// Upper bound for a policy-set document loaded from JSON.
const MAX_POLICY_SET_BYTES: usize = 10 * 1024 * 1024;

/// Longest accepted policy or policy-set name.
const MAX_NAME_BYTES: usize = 128;

// ---------------------------------------------------------------------------
// EvaluationService — request orchestration
// ---------------------------------------------------------------------------

/// The decision engine's outer surface. Stateless per request apart from
/// the shared compiled-condition cache; safe to call from any number of
/// threads at once.
pub struct EvaluationService {
    policy_sets: Arc<dyn PolicySetStore>,
    resources: Arc<dyn ResourceAttributeStore>,
    subjects: Arc<dyn SubjectAttributeStore>,
    cache: Arc<dyn DecisionCache>,
    zones: Arc<dyn ZoneResolver>,
    compiler: ConditionCompiler,
}

impl EvaluationService {
    pub fn new(
        policy_sets: Arc<dyn PolicySetStore>,
        resources: Arc<dyn ResourceAttributeStore>,
        subjects: Arc<dyn SubjectAttributeStore>,
        cache: Arc<dyn DecisionCache>,
        zones: Arc<dyn ZoneResolver>,
    ) -> Self {
        Self {
            policy_sets,
            resources,
            subjects,
            cache,
            zones,
            compiler: ConditionCompiler::new(),
        }
    }

    /// Evaluate against the zone supplied by the zone resolver.
    pub fn evaluate_current(&self, request: &EvaluationRequest) -> EngineResult<EvaluationResult> {
        let zone = self.zones.current()?;
        self.evaluate(&zone, request)
    }

    /// Decide a single request. Request errors (missing fields, bad
    /// policy-set order) return `Err`; evaluation failures degrade to an
    /// `INDETERMINATE` result instead.
    pub fn evaluate(
        &self,
        zone: &ZoneId,
        request: &EvaluationRequest,
    ) -> EngineResult<EvaluationResult> {
        validate_request(request)?;

        let sets = match self.policy_sets.get_all(zone) {
            Ok(sets) => sets,
            Err(err) => {
                warn!(zone = %zone, error = %err, "policy set store failed");
                return Ok(EvaluationResult::indeterminate(err.to_string()));
            }
        };
        if sets.is_empty() {
            debug!(zone = %zone, "zone has no policy sets");
            return Ok(EvaluationResult::of(Effect::NotApplicable));
        }

        let (selected, scope) = select_policy_sets(sets, &request.policy_set_order)?;

        let key = DecisionCacheKey {
            zone: zone.clone(),
            scope,
            resource_id: request.resource_uri.clone(),
            subject_id: request.subject_id.clone(),
            request_hash: request_hash(request),
        };
        match self.cache.get(&key) {
            Ok(Some(cached)) => {
                debug!(zone = %zone, resource = %request.resource_uri, "cache hit");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(zone = %zone, error = %err, "cache lookup failed, treating as miss");
            }
        }

        let result = match self.decide(zone, request, &selected) {
            Ok(result) => result,
            Err(err) => {
                warn!(zone = %zone, error = %err, "evaluation degraded to INDETERMINATE");
                return Ok(EvaluationResult::indeterminate(err.to_string()));
            }
        };

        // INDETERMINATE never reaches the cache; transient failures must
        // not be pinned for the cache's lifetime.
        if result.effect != Effect::Indeterminate {
            if let Err(err) = self.cache.put(&key, &result) {
                warn!(zone = %zone, error = %err, "cache write failed");
            }
        }
        Ok(result)
    }

    /// Policy-set scan: first applicable policy per set wins that set,
    /// first set yielding a decision other than `NOT_APPLICABLE` wins
    /// the request.
    fn decide(
        &self,
        zone: &ZoneId,
        request: &EvaluationRequest,
        sets: &[PolicySet],
    ) -> EngineResult<EvaluationResult> {
        let resources = ResourceAttributeResolver::new(
            self.resources.as_ref(),
            zone,
            &request.supplemental_resource_attributes,
        );
        let subjects = SubjectAttributeResolver::new(
            self.subjects.as_ref(),
            zone,
            &request.supplemental_subject_attributes,
        );
        let matcher = PolicyMatcher::new(&resources, &subjects);
        let candidate = MatchCandidate {
            action: request.action.clone(),
            resource_uri: request.resource_uri.clone(),
            subject_id: request.subject_id.clone(),
            supplemental_resource_attributes: request.supplemental_resource_attributes.clone(),
            supplemental_subject_attributes: request.supplemental_subject_attributes.clone(),
        };

        let mut resolved_uris = BTreeSet::new();
        for set in sets {
            let outcome = matcher.match_for_result(&candidate, &set.policies)?;
            resolved_uris.extend(outcome.resolved_resource_uris);

            for matched in &outcome.matched {
                if self.conditions_hold(&candidate, matched)? {
                    debug!(
                        zone = %zone,
                        policy_set = %set.name,
                        policy = %matched.policy.name,
                        effect = %matched.policy.effect,
                        "policy applied"
                    );
                    // The first applicable policy decides this set. Only
                    // an effect other than NOT_APPLICABLE decides the
                    // request; otherwise the scan moves to the next set.
                    if matched.policy.effect != Effect::NotApplicable {
                        let mut result = EvaluationResult::of(matched.policy.effect);
                        result.subject_attributes = matched.subject_attributes.clone();
                        result.resource_attributes = matched.resource_attributes.clone();
                        result.resolved_resource_uris = resolved_uris;
                        return Ok(result);
                    }
                    break;
                }
            }
        }

        let mut result = EvaluationResult::of(Effect::NotApplicable);
        result.resolved_resource_uris = resolved_uris;
        Ok(result)
    }

    /// AND of the policy's compiled conditions; an empty list holds
    /// unconditionally.
    fn conditions_hold(
        &self,
        candidate: &MatchCandidate,
        matched: &MatchedPolicy<'_>,
    ) -> EngineResult<bool> {
        if matched.policy.conditions.is_empty() {
            return Ok(true);
        }

        let subject = SubjectHandler::new(
            candidate.subject_id.clone(),
            matched.subject_attributes.clone(),
        );
        let resource = ResourceHandler::new(
            candidate.resource_uri.clone(),
            matched.resource_attributes.clone(),
            matched.uri_template.clone(),
        );
        let ctx = ConditionContext {
            subject: &subject,
            resource: &resource,
        };

        for source in &matched.policy.conditions {
            let condition = self.compiler.compile(source)?;
            if !condition.execute(&ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Policy-set administration
    // -----------------------------------------------------------------------

    /// Write-time validation: structural rules plus template and
    /// condition compilation, so an uncompileable policy set never
    /// reaches storage. Returns every problem found, not just the first.
    pub fn validate_policy_set(&self, policy_set: &PolicySet) -> Vec<String> {
        let mut errors = Vec::new();

        check_name("policy set", &policy_set.name, &mut errors);
        if policy_set.policies.is_empty() {
            errors.push(format!(
                "policy set '{}' contains no policies",
                policy_set.name
            ));
        }

        let mut seen = BTreeSet::new();
        for policy in &policy_set.policies {
            check_name("policy", &policy.name, &mut errors);
            if !seen.insert(policy.name.as_str()) {
                errors.push(format!("duplicate policy name '{}'", policy.name));
            }

            if let Some(resource) = policy.target.as_ref().and_then(|t| t.resource.as_ref()) {
                for source in [&resource.uri_template, &resource.attribute_uri_template]
                    .into_iter()
                    .flatten()
                {
                    if let Err(err) = UriTemplate::parse(source) {
                        errors.push(format!("policy '{}': {}", policy.name, err));
                    }
                }
            }

            for source in &policy.conditions {
                if let Err(err) = self.compiler.compile(source) {
                    errors.push(format!("policy '{}': {}", policy.name, err));
                }
            }
        }
        errors
    }

    /// Validate and store a policy set, evicting cached decisions that
    /// depended on it.
    pub fn save_policy_set(&self, zone: &ZoneId, policy_set: PolicySet) -> EngineResult<()> {
        let errors = self.validate_policy_set(&policy_set);
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors.join("; ")));
        }

        let name = policy_set.name.clone();
        self.policy_sets.put(zone, policy_set)?;
        if let Err(err) = self.cache.invalidate_policy_set(zone, &name) {
            warn!(zone = %zone, policy_set = %name, error = %err, "cache invalidation failed");
        }
        Ok(())
    }

    /// Parse and validate a policy-set JSON document.
    pub fn load_policy_set(&self, bytes: &[u8]) -> EngineResult<PolicySet> {
        if bytes.is_empty() {
            return Err(EngineError::Load("policy set document is empty".to_string()));
        }
        if bytes.len() > MAX_POLICY_SET_BYTES {
            return Err(EngineError::Load(format!(
                "policy set document is {} bytes, limit is {}",
                bytes.len(),
                MAX_POLICY_SET_BYTES
            )));
        }
        let policy_set: PolicySet = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        let errors = self.validate_policy_set(&policy_set);
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors.join("; ")));
        }
        Ok(policy_set)
    }
}

/// Serialize a policy set as the JSON document `load_policy_set` reads.
pub fn policy_set_to_json(policy_set: &PolicySet) -> EngineResult<Vec<u8>> {
    serde_json::to_vec_pretty(policy_set).map_err(|e| EngineError::Serialization(e.to_string()))
}

fn validate_request(request: &EvaluationRequest) -> EngineResult<()> {
    if request.resource_uri.is_empty() {
        return Err(EngineError::InvalidRequest("resource_uri is missing".to_string()));
    }
    if request.subject_id.as_str().is_empty() {
        return Err(EngineError::InvalidRequest("subject_id is missing".to_string()));
    }
    if request.action.is_empty() {
        return Err(EngineError::InvalidRequest("action is missing".to_string()));
    }
    Ok(())
}

/// Pick the sets to evaluate and the cache-key scope describing them.
/// An explicit order must resolve every name; no order is legal only
/// for a single-set zone.
fn select_policy_sets(
    sets: Vec<PolicySet>,
    order: &[String],
) -> EngineResult<(Vec<PolicySet>, PolicySetScope)> {
    if order.is_empty() {
        if sets.len() != 1 {
            return Err(EngineError::AmbiguousOrder(sets.len()));
        }
        return Ok((sets, PolicySetScope::AnyPolicySet));
    }

    let mut selected = Vec::with_capacity(order.len());
    for name in order {
        let set = sets
            .iter()
            .find(|s| &s.name == name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPolicySet(name.clone()))?;
        selected.push(set);
    }
    Ok((selected, PolicySetScope::Ordered(order.to_vec())))
}

fn check_name(kind: &str, name: &str, errors: &mut Vec<String>) {
    if name.is_empty() {
        errors.push(format!("{} name is empty", kind));
    } else if name.len() > MAX_NAME_BYTES {
        let prefix: String = name.chars().take(24).collect();
        errors.push(format!(
            "{} name '{}...' exceeds {} bytes",
            kind, prefix, MAX_NAME_BYTES
        ));
    }
}
