use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

// ---------------------------------------------------------------------------
// Effect — the outcome of evaluating a policy or an entire request
// ---------------------------------------------------------------------------

/// Four-way decision outcome.
///
/// `NotApplicable` is the default/fallthrough when no policy claims the
/// request. `Indeterminate` signals an evaluation error; it is never
/// written to the decision cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Permit,
    Deny,
    NotApplicable,
    Indeterminate,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Permit => write!(f, "PERMIT"),
            Effect::Deny => write!(f, "DENY"),
            Effect::NotApplicable => write!(f, "NOT_APPLICABLE"),
            Effect::Indeterminate => write!(f, "INDETERMINATE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute — issuer/name/value triple with optional qualifying scopes
// ---------------------------------------------------------------------------

/// A single attribute of a subject or resource.
///
/// Identity (equality and hashing) is `(issuer, name, value)` only.
/// `scopes` qualifies *when* the attribute applies -- a role attribute
/// may be valid only while accessing resources that carry a matching
/// scope attribute -- and never participates in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub issuer: String,
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<Attribute>,
}

impl Attribute {
    pub fn new(
        issuer: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            name: name.into(),
            value: value.into(),
            scopes: Vec::new(),
        }
    }

    /// An attribute qualified by scope attributes.
    pub fn scoped(
        issuer: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
        scopes: Vec<Attribute>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            name: name.into(),
            value: value.into(),
            scopes,
        }
    }

    /// The `(issuer, name)` kind of this attribute, ignoring value.
    pub fn attribute_type(&self) -> AttributeType {
        AttributeType::new(self.issuer.clone(), self.name.clone())
    }

    pub fn has_scopes(&self) -> bool {
        !self.scopes.is_empty()
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.issuer == other.issuer && self.name == other.name && self.value == other.value
    }
}

impl Eq for Attribute {}

impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.issuer.hash(state);
        self.name.hash(state);
        self.value.hash(state);
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}={}", self.issuer, self.name, self.value)
    }
}

// ---------------------------------------------------------------------------
// AttributeType — (issuer, name) identity used to index attributes by kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeType {
    pub issuer: String,
    pub name: String,
}

impl AttributeType {
    pub fn new(issuer: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            name: name.into(),
        }
    }

    /// Whether the given attribute is of this type, ignoring its value.
    pub fn matches(&self, attribute: &Attribute) -> bool {
        self.issuer == attribute.issuer && self.name == attribute.name
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.issuer, self.name)
    }
}

// ---------------------------------------------------------------------------
// ScopedAttribute — an attribute plus its derived scopes view
// ---------------------------------------------------------------------------

/// Borrowed view of an attribute that exposes scope-membership queries.
/// Handlers use this to test whether a qualifying scope applies.
#[derive(Debug, Clone, Copy)]
pub struct ScopedAttribute<'a> {
    attribute: &'a Attribute,
}

impl<'a> ScopedAttribute<'a> {
    pub fn new(attribute: &'a Attribute) -> Self {
        Self { attribute }
    }

    pub fn attribute(&self) -> &'a Attribute {
        self.attribute
    }

    pub fn scopes(&self) -> &'a [Attribute] {
        &self.attribute.scopes
    }

    /// Scopes whose `(issuer, name)` equals the given type.
    pub fn scopes_of_type(
        &self,
        scope_type: &'a AttributeType,
    ) -> impl Iterator<Item = &'a Attribute> + 'a {
        let scope_type = scope_type.clone();
        self.attribute
            .scopes
            .iter()
            .filter(move |s| scope_type.matches(s))
    }

    pub fn has_scope_of_type(&self, scope_type: &AttributeType) -> bool {
        self.attribute.scopes.iter().any(|s| scope_type.matches(s))
    }
}

// ---------------------------------------------------------------------------
// Timestamp — canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds_since_epoch: now.timestamp() as u64,
            nanoseconds: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    pub fn to_rfc3339(&self) -> String {
        let dt =
            chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds);
        dt.map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers — prevent stringly-typed confusion
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(
    ZoneId,
    "Tenant-isolation boundary; all policies, attributes, and cache entries are scoped to one zone."
);
define_id!(SubjectId, "Unique identifier for a subject within a zone.");
define_id!(
    ResourceId,
    "Identifier for a resource within a zone, usually its URI."
);
