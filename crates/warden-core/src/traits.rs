use crate::error::CoreResult;
use crate::types::{Attribute, SubjectId, ZoneId};

// ---------------------------------------------------------------------------
// Attribute stores — external collaborators the engine reads through
//
// Both stores return the effective attribute set with parent inheritance
// already applied. An entity that does not exist yields an empty set,
// never an error. Calls are blocking; retry/backoff is the store's
// responsibility, not the engine's.
// ---------------------------------------------------------------------------

pub trait ResourceAttributeStore: Send + Sync {
    fn get(&self, zone: &ZoneId, resource_uri: &str) -> CoreResult<Vec<Attribute>>;
}

pub trait SubjectAttributeStore: Send + Sync {
    /// `scope_filter` carries the resource's resolved attributes: a parent's
    /// attributes are inherited only when the parent link's scope attribute,
    /// if any, is present in the filter.
    fn get(
        &self,
        zone: &ZoneId,
        subject_id: &SubjectId,
        scope_filter: &[Attribute],
    ) -> CoreResult<Vec<Attribute>>;
}

// ---------------------------------------------------------------------------
// ZoneResolver — tenant context lookup
// ---------------------------------------------------------------------------

/// Resolves the zone of the current request. Fails fast with
/// `CoreError::NoZoneContext` when no tenant context is established.
pub trait ZoneResolver: Send + Sync {
    fn current(&self) -> CoreResult<ZoneId>;
}

/// Resolver pinned to a single zone. Useful for tests and single-tenant
/// deployments.
pub struct FixedZoneResolver {
    zone: ZoneId,
}

impl FixedZoneResolver {
    pub fn new(zone: ZoneId) -> Self {
        Self { zone }
    }
}

impl ZoneResolver for FixedZoneResolver {
    fn current(&self) -> CoreResult<ZoneId> {
        Ok(self.zone.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify the trait objects are object-safe
    fn _assert_resource_store_object_safe(_: &dyn ResourceAttributeStore) {}
    fn _assert_subject_store_object_safe(_: &dyn SubjectAttributeStore) {}
    fn _assert_zone_resolver_object_safe(_: &dyn ZoneResolver) {}

    #[test]
    fn test_fixed_zone_resolver() {
        let resolver = FixedZoneResolver::new(ZoneId::new("zone-a"));
        assert_eq!(resolver.current().unwrap(), ZoneId::new("zone-a"));
    }
}
