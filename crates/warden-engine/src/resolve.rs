use std::cell::RefCell;
use std::collections::HashMap;

use warden_core::{Attribute, ResourceAttributeStore, SubjectAttributeStore, SubjectId, ZoneId};

use crate::error::EngineResult;

// ---------------------------------------------------------------------------
// Attribute resolvers
//
// Request-scoped wrappers around the attribute stores. Each resolver
// memoizes store lookups for the lifetime of one evaluation request so
// that matching N policies against the same resource costs one store
// round trip, and merges supplemental attributes supplied with the
// request over the stored ones. Supplemental attributes win on identity
// collisions so a caller can attach scopes the store does not know.
// ---------------------------------------------------------------------------

/// Merge `supplemental` over `stored`, deduplicating by attribute
/// identity (issuer, name, value).
fn merge(supplemental: &[Attribute], stored: Vec<Attribute>) -> Vec<Attribute> {
    let mut out: Vec<Attribute> = Vec::with_capacity(supplemental.len() + stored.len());
    for attribute in supplemental {
        if !out.contains(attribute) {
            out.push(attribute.clone());
        }
    }
    for attribute in stored {
        if !out.contains(&attribute) {
            out.push(attribute);
        }
    }
    out
}

pub struct ResourceAttributeResolver<'a> {
    store: &'a dyn ResourceAttributeStore,
    zone: &'a ZoneId,
    supplemental: &'a [Attribute],
    resolved: RefCell<HashMap<String, Vec<Attribute>>>,
}

impl<'a> ResourceAttributeResolver<'a> {
    pub fn new(
        store: &'a dyn ResourceAttributeStore,
        zone: &'a ZoneId,
        supplemental: &'a [Attribute],
    ) -> Self {
        Self {
            store,
            zone,
            supplemental,
            resolved: RefCell::new(HashMap::new()),
        }
    }

    /// Attributes of the resource at `resource_uri`, supplemental first.
    /// An unknown resource resolves to just the supplemental attributes.
    pub fn resolve(&self, resource_uri: &str) -> EngineResult<Vec<Attribute>> {
        if let Some(attributes) = self.resolved.borrow().get(resource_uri) {
            return Ok(attributes.clone());
        }
        let stored = self.store.get(self.zone, resource_uri)?;
        let attributes = merge(self.supplemental, stored);
        self.resolved
            .borrow_mut()
            .insert(resource_uri.to_string(), attributes.clone());
        Ok(attributes)
    }
}

pub struct SubjectAttributeResolver<'a> {
    store: &'a dyn SubjectAttributeStore,
    zone: &'a ZoneId,
    supplemental: &'a [Attribute],
    resolved: RefCell<HashMap<String, Vec<Attribute>>>,
}

impl<'a> SubjectAttributeResolver<'a> {
    pub fn new(
        store: &'a dyn SubjectAttributeStore,
        zone: &'a ZoneId,
        supplemental: &'a [Attribute],
    ) -> Self {
        Self {
            store,
            zone,
            supplemental,
            resolved: RefCell::new(HashMap::new()),
        }
    }

    /// Attributes of `subject_id`, narrowed by `scope_filter` at the
    /// store and merged with the request's supplemental attributes.
    pub fn resolve(
        &self,
        subject_id: &SubjectId,
        scope_filter: &[Attribute],
    ) -> EngineResult<Vec<Attribute>> {
        let key = cache_key(subject_id, scope_filter);
        if let Some(attributes) = self.resolved.borrow().get(&key) {
            return Ok(attributes.clone());
        }
        let stored = self.store.get(self.zone, subject_id, scope_filter)?;
        let attributes = merge(self.supplemental, stored);
        self.resolved.borrow_mut().insert(key, attributes.clone());
        Ok(attributes)
    }
}

fn cache_key(subject_id: &SubjectId, scope_filter: &[Attribute]) -> String {
    let mut key = subject_id.to_string();
    for attribute in scope_filter {
        key.push('\u{1f}');
        key.push_str(&attribute.to_string());
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_core::CoreResult;

    struct CountingResourceStore {
        calls: AtomicUsize,
    }

    impl ResourceAttributeStore for CountingResourceStore {
        fn get(&self, _zone: &ZoneId, resource_uri: &str) -> CoreResult<Vec<Attribute>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if resource_uri == "/site/42" {
                Ok(vec![Attribute::new("acs", "group", "blue")])
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct CountingSubjectStore {
        calls: AtomicUsize,
    }

    impl SubjectAttributeStore for CountingSubjectStore {
        fn get(
            &self,
            _zone: &ZoneId,
            _subject_id: &SubjectId,
            scope_filter: &[Attribute],
        ) -> CoreResult<Vec<Attribute>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if scope_filter.is_empty() {
                Ok(vec![Attribute::new("acs", "role", "analyst")])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[test]
    fn test_resource_resolution_is_memoized() {
        let store = CountingResourceStore {
            calls: AtomicUsize::new(0),
        };
        let zone = ZoneId::new("z1");
        let resolver = ResourceAttributeResolver::new(&store, &zone, &[]);

        let first = resolver.resolve("/site/42").unwrap();
        let second = resolver.resolve("/site/42").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        resolver.resolve("/site/7").unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_supplemental_merged_over_stored() {
        let store = CountingResourceStore {
            calls: AtomicUsize::new(0),
        };
        let zone = ZoneId::new("z1");
        let supplemental = vec![Attribute::new("acs", "classification", "secret")];
        let resolver = ResourceAttributeResolver::new(&store, &zone, &supplemental);

        let attributes = resolver.resolve("/site/42").unwrap();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0], Attribute::new("acs", "classification", "secret"));
        assert!(attributes.contains(&Attribute::new("acs", "group", "blue")));
    }

    #[test]
    fn test_supplemental_wins_on_identity_collision() {
        struct Fixed;
        impl ResourceAttributeStore for Fixed {
            fn get(&self, _zone: &ZoneId, _uri: &str) -> CoreResult<Vec<Attribute>> {
                Ok(vec![Attribute::new("acs", "group", "blue")])
            }
        }
        let zone = ZoneId::new("z1");
        // Same identity but the supplemental copy carries a scope.
        let supplemental = vec![Attribute::scoped(
            "acs",
            "group",
            "blue",
            vec![Attribute::new("acs", "site", "42")],
        )];
        let resolver = ResourceAttributeResolver::new(&Fixed, &zone, &supplemental);

        let attributes = resolver.resolve("/site/42").unwrap();
        assert_eq!(attributes.len(), 1);
        assert!(attributes[0].has_scopes());
    }

    #[test]
    fn test_subject_resolution_keyed_by_scope_filter() {
        let store = CountingSubjectStore {
            calls: AtomicUsize::new(0),
        };
        let zone = ZoneId::new("z1");
        let resolver = SubjectAttributeResolver::new(&store, &zone, &[]);
        let bob = SubjectId::new("bob");

        let unfiltered = resolver.resolve(&bob, &[]).unwrap();
        assert_eq!(unfiltered.len(), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        // Distinct filter is a distinct lookup, not a cache hit.
        let filter = [Attribute::new("acs", "group", "blue")];
        let filtered = resolver.resolve(&bob, &filter).unwrap();
        assert!(filtered.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);

        resolver.resolve(&bob, &[]).unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }
}
