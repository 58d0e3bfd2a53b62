use std::collections::BTreeSet;

use tracing::debug;
use warden_core::Attribute;

use crate::error::EngineResult;
use crate::resolve::{ResourceAttributeResolver, SubjectAttributeResolver};
use crate::template::UriTemplate;
use crate::types::{MatchCandidate, Policy};

// ---------------------------------------------------------------------------
// Policy matcher
//
// Filters a policy list down to the policies applicable to one request,
// preserving list order. Matching never judges conditions; it only
// decides applicability (action, resource URI, required attributes) and
// hands each survivor its resolved attribute sets for the condition
// stage.
// ---------------------------------------------------------------------------

/// A policy that matched the candidate, with the attribute sets and URI
/// template its conditions will run against.
pub struct MatchedPolicy<'p> {
    pub policy: &'p Policy,
    pub uri_template: Option<UriTemplate>,
    pub resource_attributes: Vec<Attribute>,
    pub subject_attributes: Vec<Attribute>,
}

/// Matching output plus every resource URI resolved along the way,
/// reported back to callers for observability.
pub struct MatchOutcome<'p> {
    pub matched: Vec<MatchedPolicy<'p>>,
    pub resolved_resource_uris: BTreeSet<String>,
}

pub struct PolicyMatcher<'a> {
    resources: &'a ResourceAttributeResolver<'a>,
    subjects: &'a SubjectAttributeResolver<'a>,
}

impl<'a> PolicyMatcher<'a> {
    pub fn new(
        resources: &'a ResourceAttributeResolver<'a>,
        subjects: &'a SubjectAttributeResolver<'a>,
    ) -> Self {
        Self {
            resources,
            subjects,
        }
    }

    pub fn match_policies<'p>(
        &self,
        candidate: &MatchCandidate,
        policies: &'p [Policy],
    ) -> EngineResult<Vec<MatchedPolicy<'p>>> {
        Ok(self.match_for_result(candidate, policies)?.matched)
    }

    pub fn match_for_result<'p>(
        &self,
        candidate: &MatchCandidate,
        policies: &'p [Policy],
    ) -> EngineResult<MatchOutcome<'p>> {
        let mut matched = Vec::new();
        let mut resolved_resource_uris = BTreeSet::new();

        for policy in policies {
            if let Some(entry) =
                self.match_one(candidate, policy, &mut resolved_resource_uris)?
            {
                matched.push(entry);
            }
        }
        Ok(MatchOutcome {
            matched,
            resolved_resource_uris,
        })
    }

    fn match_one<'p>(
        &self,
        candidate: &MatchCandidate,
        policy: &'p Policy,
        resolved_uris: &mut BTreeSet<String>,
    ) -> EngineResult<Option<MatchedPolicy<'p>>> {
        let target = policy.target.as_ref();

        // Action: set and non-empty means exact match required.
        if let Some(action) = target.and_then(|t| t.action.as_deref()) {
            if !action.is_empty() && action != candidate.action {
                return Ok(None);
            }
        }

        let resource_target = target.and_then(|t| t.resource.as_ref());

        // Resource URI: canonicalizing template match.
        let mut uri_template = None;
        if let Some(source) = resource_target.and_then(|r| r.uri_template.as_deref()) {
            let template = UriTemplate::parse(source)?;
            if !template.canonical_matches(&candidate.resource_uri) {
                debug!(
                    policy = %policy.name,
                    uri = %candidate.resource_uri,
                    "resource uri did not match template"
                );
                return Ok(None);
            }
            uri_template = Some(template);
        }

        // Resource attributes: resolved against the attribute URI when an
        // attribute template extracts one, else against the request URI.
        let attribute_uri = self.attribute_uri(candidate, resource_target)?;
        let resource_attributes = self.resources.resolve(&attribute_uri)?;
        resolved_uris.insert(attribute_uri);

        if let Some(required) = resource_target.map(|r| &r.attributes) {
            if !contains_all(&resource_attributes, required) {
                return Ok(None);
            }
        }

        // Subject attributes: the resource's resolved attributes act as
        // scope-filter context when the target's subject requirements
        // are themselves scoped.
        let subject_target = target.and_then(|t| t.subject.as_ref());
        let scoped_requirements = subject_target
            .map(|s| s.attributes.iter().any(Attribute::has_scopes))
            .unwrap_or(false);
        let scope_filter: &[Attribute] = if scoped_requirements {
            &resource_attributes
        } else {
            &[]
        };
        let subject_attributes = self
            .subjects
            .resolve(&candidate.subject_id, scope_filter)?;

        if let Some(required) = subject_target.map(|s| &s.attributes) {
            if !contains_all(&subject_attributes, required) {
                return Ok(None);
            }
        }

        Ok(Some(MatchedPolicy {
            policy,
            uri_template,
            resource_attributes,
            subject_attributes,
        }))
    }

    /// URI whose attributes govern this policy. An attribute URI
    /// template extracts a sub-path from the request URI; extraction
    /// failure falls back to the full request URI.
    fn attribute_uri(
        &self,
        candidate: &MatchCandidate,
        resource_target: Option<&crate::types::ResourceTarget>,
    ) -> EngineResult<String> {
        let Some(source) = resource_target.and_then(|r| r.attribute_uri_template.as_deref())
        else {
            return Ok(candidate.resource_uri.clone());
        };
        let template = UriTemplate::parse(source)?;
        let extracted = template
            .variable_names()
            .next()
            .and_then(|name| template.extract(name, &candidate.resource_uri));
        Ok(extracted.unwrap_or_else(|| candidate.resource_uri.clone()))
    }
}

/// Containment by attribute identity (issuer, name, value).
fn contains_all(haystack: &[Attribute], required: &[Attribute]) -> bool {
    required.iter().all(|r| haystack.contains(r))
}
