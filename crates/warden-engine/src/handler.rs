use warden_core::{Attribute, AttributeType, ScopedAttribute, SubjectId};

use crate::error::AssertionFailure;
use crate::template::UriTemplate;

// ---------------------------------------------------------------------------
// AttributeHandler — capability interface over one entity's attributes
//
// One trait, two variants: SubjectHandler and ResourceHandler carry only
// the data each needs. Cross-handler operations (have_same, the value
// matchers) are free functions taking handlers or value slices.
// ---------------------------------------------------------------------------

pub trait AttributeHandler {
    /// Identity used in assertion messages, e.g. `subject 'bob'`.
    fn identity(&self) -> String;

    fn attributes(&self) -> &[Attribute];

    /// The stored attribute equal to `attribute` by `(issuer, name,
    /// value)`, carrying this entity's scopes for it.
    fn find(&self, attribute: &Attribute) -> Option<&Attribute> {
        self.attributes().iter().find(|a| *a == attribute)
    }

    fn has_type(&self, attribute_type: &AttributeType) -> bool {
        self.attributes().iter().any(|a| attribute_type.matches(a))
    }

    /// All values this entity carries for the given attribute type.
    fn values_of(&self, attribute_type: &AttributeType) -> Vec<String> {
        self.attributes()
            .iter()
            .filter(|a| attribute_type.matches(a))
            .map(|a| a.value.clone())
            .collect()
    }

    /// At least one attribute of the given `(issuer, name)` is present.
    fn assert_has_type(&self, attribute_type: &AttributeType) -> Result<(), AssertionFailure> {
        if self.has_type(attribute_type) {
            Ok(())
        } else {
            Err(AssertionFailure::new(format!(
                "{} does not have {}",
                self.identity(),
                attribute_type
            )))
        }
    }

    /// The exact `(issuer, name, value)` is present.
    fn assert_has(&self, attribute: &Attribute) -> Result<(), AssertionFailure> {
        if self.find(attribute).is_some() {
            Ok(())
        } else {
            Err(AssertionFailure::new(format!(
                "{} does not have {}",
                self.identity(),
                attribute
            )))
        }
    }

    /// Scoped presence: the base attribute must be present and carry at
    /// least one scope of the given type whose value is found within the
    /// other handler's attributes.
    fn assert_has_scoped(
        &self,
        base: &Attribute,
        scope_type: &AttributeType,
        other: &dyn AttributeHandler,
    ) -> Result<(), AssertionFailure> {
        // Read the scopes off our own stored copy, not the criteria's.
        let stored = match self.find(base) {
            Some(stored) => stored,
            None => {
                return Err(AssertionFailure::new(format!(
                    "{} does not have {}",
                    self.identity(),
                    base
                )))
            }
        };
        let view = ScopedAttribute::new(stored);

        let mut type_matched = None;
        for scope in view.scopes_of_type(scope_type) {
            if other.find(scope).is_some() {
                return Ok(());
            }
            type_matched = Some(scope.clone());
        }
        match type_matched {
            Some(scope) => Err(AssertionFailure::new(format!(
                "failed to match {} scoped by {} against {}",
                base,
                scope,
                other.identity()
            ))),
            None => Err(AssertionFailure::new(format!(
                "{} does not have {}",
                self.identity(),
                scope_type
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SubjectHandler / ResourceHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SubjectHandler {
    subject_id: SubjectId,
    attributes: Vec<Attribute>,
}

impl SubjectHandler {
    pub fn new(subject_id: SubjectId, attributes: Vec<Attribute>) -> Self {
        Self {
            subject_id,
            attributes,
        }
    }
}

impl AttributeHandler for SubjectHandler {
    fn identity(&self) -> String {
        format!("subject '{}'", self.subject_id)
    }

    fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }
}

/// Resource-side handler. Additionally answers URI-variable lookups
/// against the matched policy's URI template.
#[derive(Debug, Clone)]
pub struct ResourceHandler {
    resource_uri: String,
    attributes: Vec<Attribute>,
    uri_template: Option<UriTemplate>,
}

impl ResourceHandler {
    pub fn new(
        resource_uri: impl Into<String>,
        attributes: Vec<Attribute>,
        uri_template: Option<UriTemplate>,
    ) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            attributes,
            uri_template,
        }
    }

    /// Extract a path variable from the resource URI using the policy's
    /// URI template. A missing template or non-matching URI is an
    /// assertion failure (the condition is false), not an error.
    pub fn uri_variable(&self, name: &str) -> Result<String, AssertionFailure> {
        let template = self.uri_template.as_ref().ok_or_else(|| {
            AssertionFailure::new(format!(
                "{} has no uri template to extract '{}' from",
                self.identity(),
                name
            ))
        })?;
        template.extract(name, &self.resource_uri).ok_or_else(|| {
            AssertionFailure::new(format!(
                "no variable '{}' in '{}' for template '{}'",
                name,
                self.resource_uri,
                template.source()
            ))
        })
    }
}

impl AttributeHandler for ResourceHandler {
    fn identity(&self) -> String {
        format!("resource '{}'", self.resource_uri)
    }

    fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }
}

// ---------------------------------------------------------------------------
// Cross-handler operations
// ---------------------------------------------------------------------------

/// The two handlers carry at least one common value for the attribute
/// type. Symmetric in its handler arguments.
pub fn assert_have_same(
    left: &dyn AttributeHandler,
    right: &dyn AttributeHandler,
    attribute_type: &AttributeType,
) -> Result<(), AssertionFailure> {
    left.assert_has_type(attribute_type)?;
    right.assert_has_type(attribute_type)?;

    let left_values = left.values_of(attribute_type);
    let right_values = right.values_of(attribute_type);
    if left_values.iter().any(|v| right_values.contains(v)) {
        Ok(())
    } else {
        Err(AssertionFailure::new(format!(
            "no intersection between {} and {} for {}",
            left.identity(),
            right.identity(),
            attribute_type
        )))
    }
}

/// True iff both value sets are non-empty and intersect.
pub fn match_any(source: &[String], target: &[String]) -> bool {
    !source.is_empty() && !target.is_empty() && source.iter().any(|v| target.contains(v))
}

/// True iff `constant` is among `values`.
pub fn match_single(values: &[String], constant: &str) -> bool {
    values.iter().any(|v| v == constant)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(attributes: Vec<Attribute>) -> SubjectHandler {
        SubjectHandler::new(SubjectId::new("bob"), attributes)
    }

    fn resource(attributes: Vec<Attribute>) -> ResourceHandler {
        ResourceHandler::new("/site/42", attributes, None)
    }

    #[test]
    fn test_has_type_absent_then_present() {
        let role = AttributeType::new("acs", "role");
        let empty = subject(vec![]);
        assert!(empty.assert_has_type(&role).is_err());

        let with_role = subject(vec![Attribute::new("acs", "role", "analyst")]);
        assert!(with_role.assert_has_type(&role).is_ok());
    }

    #[test]
    fn test_has_type_failure_message() {
        let err = subject(vec![])
            .assert_has_type(&AttributeType::new("acs", "role"))
            .unwrap_err();
        assert_eq!(err.message, "subject 'bob' does not have acs/role");
    }

    #[test]
    fn test_has_exact_attribute() {
        let h = subject(vec![Attribute::new("acs", "role", "analyst")]);
        assert!(h.assert_has(&Attribute::new("acs", "role", "analyst")).is_ok());

        let err = h
            .assert_has(&Attribute::new("acs", "role", "admin"))
            .unwrap_err();
        assert!(err.message.contains("does not have acs/role=admin"));
    }

    #[test]
    fn test_scoped_has_succeeds_when_scope_found_in_other() {
        let h = subject(vec![Attribute::scoped(
            "acs",
            "role",
            "analyst",
            vec![Attribute::new("acs", "group", "blue")],
        )]);
        let r = resource(vec![Attribute::new("acs", "group", "blue")]);
        assert!(h
            .assert_has_scoped(
                &Attribute::new("acs", "role", "analyst"),
                &AttributeType::new("acs", "group"),
                &r,
            )
            .is_ok());
    }

    #[test]
    fn test_scoped_has_fails_without_base_attribute() {
        let h = subject(vec![]);
        let r = resource(vec![]);
        let err = h
            .assert_has_scoped(
                &Attribute::new("acs", "role", "analyst"),
                &AttributeType::new("acs", "group"),
                &r,
            )
            .unwrap_err();
        assert!(err.message.contains("does not have acs/role=analyst"));
    }

    #[test]
    fn test_scoped_has_fails_when_no_scope_of_type() {
        // Base present but its only scope has a different type.
        let h = subject(vec![Attribute::scoped(
            "acs",
            "role",
            "analyst",
            vec![Attribute::new("acs", "site", "hq")],
        )]);
        let r = resource(vec![Attribute::new("acs", "group", "blue")]);
        let err = h
            .assert_has_scoped(
                &Attribute::new("acs", "role", "analyst"),
                &AttributeType::new("acs", "group"),
                &r,
            )
            .unwrap_err();
        assert!(err.message.contains("does not have acs/group"));
    }

    #[test]
    fn test_scoped_has_fails_when_scope_missing_from_other() {
        // Scope type matches, but the resource lacks the scope value:
        // a distinctly-shaped "failed to match" error.
        let h = subject(vec![Attribute::scoped(
            "acs",
            "role",
            "analyst",
            vec![Attribute::new("acs", "group", "blue")],
        )]);
        let r = resource(vec![Attribute::new("acs", "group", "red")]);
        let err = h
            .assert_has_scoped(
                &Attribute::new("acs", "role", "analyst"),
                &AttributeType::new("acs", "group"),
                &r,
            )
            .unwrap_err();
        assert!(err.message.starts_with("failed to match"));
    }

    #[test]
    fn test_scoped_has_succeeds_on_first_matching_scope() {
        let h = subject(vec![Attribute::scoped(
            "acs",
            "role",
            "analyst",
            vec![
                Attribute::new("acs", "group", "red"),
                Attribute::new("acs", "group", "blue"),
            ],
        )]);
        let r = resource(vec![Attribute::new("acs", "group", "blue")]);
        assert!(h
            .assert_has_scoped(
                &Attribute::new("acs", "role", "analyst"),
                &AttributeType::new("acs", "group"),
                &r,
            )
            .is_ok());
    }

    #[test]
    fn test_have_same_intersection() {
        let group = AttributeType::new("acs", "group");
        let s = subject(vec![
            Attribute::new("acs", "group", "red"),
            Attribute::new("acs", "group", "blue"),
        ]);
        let r = resource(vec![Attribute::new("acs", "group", "blue")]);
        assert!(assert_have_same(&s, &r, &group).is_ok());
    }

    #[test]
    fn test_have_same_is_symmetric() {
        let group = AttributeType::new("acs", "group");
        let s = subject(vec![Attribute::new("acs", "group", "blue")]);
        let r = resource(vec![Attribute::new("acs", "group", "blue")]);
        assert_eq!(
            assert_have_same(&s, &r, &group).is_ok(),
            assert_have_same(&r, &s, &group).is_ok()
        );

        let r2 = resource(vec![Attribute::new("acs", "group", "red")]);
        assert_eq!(
            assert_have_same(&s, &r2, &group).is_ok(),
            assert_have_same(&r2, &s, &group).is_ok()
        );
    }

    #[test]
    fn test_have_same_no_intersection_names_both_handlers() {
        let group = AttributeType::new("acs", "group");
        let s = subject(vec![Attribute::new("acs", "group", "red")]);
        let r = resource(vec![Attribute::new("acs", "group", "blue")]);
        let err = assert_have_same(&s, &r, &group).unwrap_err();
        assert!(err.message.contains("no intersection"));
        assert!(err.message.contains("subject 'bob'"));
        assert!(err.message.contains("resource '/site/42'"));
        assert!(err.message.contains("acs/group"));
    }

    #[test]
    fn test_have_same_missing_type_names_first_missing_handler() {
        let group = AttributeType::new("acs", "group");
        let s = subject(vec![]);
        let r = resource(vec![Attribute::new("acs", "group", "blue")]);
        let err = assert_have_same(&s, &r, &group).unwrap_err();
        assert!(err.message.contains("subject 'bob' does not have"));
    }

    #[test]
    fn test_values_of() {
        let h = subject(vec![
            Attribute::new("acs", "group", "red"),
            Attribute::new("acs", "group", "blue"),
            Attribute::new("acs", "role", "analyst"),
        ]);
        let mut values = h.values_of(&AttributeType::new("acs", "group"));
        values.sort();
        assert_eq!(values, vec!["blue", "red"]);
    }

    #[test]
    fn test_match_any() {
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["y".to_string()];
        assert!(match_any(&a, &b));
        assert!(!match_any(&a, &[]));
        assert!(!match_any(&[], &b));
        assert!(!match_any(&a, &["z".to_string()]));
    }

    #[test]
    fn test_match_single() {
        let values = vec!["analyst".to_string(), "admin".to_string()];
        assert!(match_single(&values, "admin"));
        assert!(!match_single(&values, "auditor"));
        assert!(!match_single(&[], "admin"));
    }

    #[test]
    fn test_uri_variable_extraction() {
        let t = UriTemplate::parse("/site/{site_id}").unwrap();
        let r = ResourceHandler::new("/site/42", vec![], Some(t));
        assert_eq!(r.uri_variable("site_id").unwrap(), "42");
        assert!(r.uri_variable("asset_id").is_err());
    }

    #[test]
    fn test_uri_variable_without_template_fails() {
        let r = resource(vec![]);
        let err = r.uri_variable("site_id").unwrap_err();
        assert!(err.message.contains("no uri template"));
    }
}
