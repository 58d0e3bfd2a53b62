use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use warden_core::{
    Attribute, CoreResult, ResourceAttributeStore, SubjectAttributeStore, SubjectId, ZoneId,
};

use crate::error::EngineResult;
use crate::types::PolicySet;

// ---------------------------------------------------------------------------
// PolicySetStore
// ---------------------------------------------------------------------------

/// Storage collaborator for policy sets, keyed by zone. Insertion order
/// within a zone is preserved; `get_all` returns it verbatim since the
/// order can be evaluation-relevant.
pub trait PolicySetStore: Send + Sync {
    fn get_all(&self, zone: &ZoneId) -> EngineResult<Vec<PolicySet>>;

    fn get(&self, zone: &ZoneId, name: &str) -> EngineResult<Option<PolicySet>> {
        Ok(self
            .get_all(zone)?
            .into_iter()
            .find(|set| set.name == name))
    }

    /// Insert or replace by name.
    fn put(&self, zone: &ZoneId, policy_set: PolicySet) -> EngineResult<()>;

    /// Returns true when a set by that name existed.
    fn remove(&self, zone: &ZoneId, name: &str) -> EngineResult<bool>;
}

#[derive(Default)]
pub struct InMemoryPolicySetStore {
    sets: Mutex<HashMap<ZoneId, Vec<PolicySet>>>,
}

impl InMemoryPolicySetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicySetStore for InMemoryPolicySetStore {
    fn get_all(&self, zone: &ZoneId) -> EngineResult<Vec<PolicySet>> {
        Ok(self
            .sets
            .lock()
            .expect("policy set store lock poisoned")
            .get(zone)
            .cloned()
            .unwrap_or_default())
    }

    fn put(&self, zone: &ZoneId, policy_set: PolicySet) -> EngineResult<()> {
        let mut sets = self.sets.lock().expect("policy set store lock poisoned");
        let zone_sets = sets.entry(zone.clone()).or_default();
        match zone_sets.iter_mut().find(|s| s.name == policy_set.name) {
            // Replacement keeps the original position in the zone order.
            Some(existing) => *existing = policy_set,
            None => zone_sets.push(policy_set),
        }
        Ok(())
    }

    fn remove(&self, zone: &ZoneId, name: &str) -> EngineResult<bool> {
        let mut sets = self.sets.lock().expect("policy set store lock poisoned");
        match sets.get_mut(zone) {
            Some(zone_sets) => {
                let before = zone_sets.len();
                zone_sets.retain(|s| s.name != name);
                Ok(zone_sets.len() != before)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory attribute stores with parent inheritance
// ---------------------------------------------------------------------------

/// Link from a subject to a parent it inherits attributes from. A
/// scoped link only contributes when its scope attribute appears in the
/// scope-filter context passed to `get` (for policy evaluation, the
/// resolved attributes of the resource under decision).
#[derive(Debug, Clone)]
pub struct ParentLink {
    pub parent: SubjectId,
    pub scope: Option<Attribute>,
}

#[derive(Debug, Clone, Default)]
struct SubjectRecord {
    attributes: Vec<Attribute>,
    parents: Vec<ParentLink>,
}

#[derive(Default)]
pub struct InMemorySubjectStore {
    subjects: Mutex<HashMap<ZoneId, HashMap<SubjectId, SubjectRecord>>>,
}

impl InMemorySubjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, zone: &ZoneId, subject_id: SubjectId, attributes: Vec<Attribute>) {
        let mut subjects = self.subjects.lock().expect("subject store lock poisoned");
        subjects
            .entry(zone.clone())
            .or_default()
            .entry(subject_id)
            .or_default()
            .attributes = attributes;
    }

    pub fn add_parent(
        &self,
        zone: &ZoneId,
        child: SubjectId,
        parent: SubjectId,
        scope: Option<Attribute>,
    ) {
        let mut subjects = self.subjects.lock().expect("subject store lock poisoned");
        subjects
            .entry(zone.clone())
            .or_default()
            .entry(child)
            .or_default()
            .parents
            .push(ParentLink { parent, scope });
    }
}

impl SubjectAttributeStore for InMemorySubjectStore {
    fn get(
        &self,
        zone: &ZoneId,
        subject_id: &SubjectId,
        scope_filter: &[Attribute],
    ) -> CoreResult<Vec<Attribute>> {
        let subjects = self.subjects.lock().expect("subject store lock poisoned");
        let Some(zone_subjects) = subjects.get(zone) else {
            return Ok(Vec::new());
        };

        let mut out: Vec<Attribute> = Vec::new();
        let mut visited: HashSet<SubjectId> = HashSet::new();
        let mut pending = vec![subject_id.clone()];

        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(record) = zone_subjects.get(&current) else {
                continue;
            };
            for attribute in &record.attributes {
                if !out.contains(attribute) {
                    out.push(attribute.clone());
                }
            }
            for link in &record.parents {
                let admitted = match &link.scope {
                    Some(scope) => scope_filter.contains(scope),
                    None => true,
                };
                if admitted {
                    pending.push(link.parent.clone());
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
struct ResourceRecord {
    attributes: Vec<Attribute>,
    parent: Option<String>,
}

/// Resource attributes are inheritance-resolved at `get` time: a
/// resource's effective set is its own attributes plus everything up
/// its (unscoped) parent chain.
#[derive(Default)]
pub struct InMemoryResourceStore {
    resources: Mutex<HashMap<ZoneId, HashMap<String, ResourceRecord>>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, zone: &ZoneId, resource_uri: impl Into<String>, attributes: Vec<Attribute>) {
        let mut resources = self.resources.lock().expect("resource store lock poisoned");
        resources
            .entry(zone.clone())
            .or_default()
            .entry(resource_uri.into())
            .or_default()
            .attributes = attributes;
    }

    pub fn set_parent(
        &self,
        zone: &ZoneId,
        resource_uri: impl Into<String>,
        parent_uri: impl Into<String>,
    ) {
        let mut resources = self.resources.lock().expect("resource store lock poisoned");
        resources
            .entry(zone.clone())
            .or_default()
            .entry(resource_uri.into())
            .or_default()
            .parent = Some(parent_uri.into());
    }
}

impl ResourceAttributeStore for InMemoryResourceStore {
    fn get(&self, zone: &ZoneId, resource_uri: &str) -> CoreResult<Vec<Attribute>> {
        let resources = self.resources.lock().expect("resource store lock poisoned");
        let Some(zone_resources) = resources.get(zone) else {
            return Ok(Vec::new());
        };

        let mut out: Vec<Attribute> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = Some(resource_uri.to_string());

        while let Some(uri) = current.take() {
            if !visited.insert(uri.clone()) {
                break;
            }
            let Some(record) = zone_resources.get(&uri) else {
                break;
            };
            for attribute in &record.attributes {
                if !out.contains(attribute) {
                    out.push(attribute.clone());
                }
            }
            current = record.parent.clone();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::Effect;

    use crate::types::Policy;

    fn permit_policy(name: &str) -> Policy {
        Policy {
            name: name.to_string(),
            target: None,
            conditions: Vec::new(),
            effect: Effect::Permit,
        }
    }

    #[test]
    fn test_policy_set_store_preserves_zone_order() {
        let store = InMemoryPolicySetStore::new();
        let zone = ZoneId::new("z1");
        store
            .put(
                &zone,
                PolicySet {
                    name: "alpha".to_string(),
                    policies: vec![permit_policy("p1")],
                },
            )
            .unwrap();
        store
            .put(
                &zone,
                PolicySet {
                    name: "beta".to_string(),
                    policies: vec![permit_policy("p2")],
                },
            )
            .unwrap();

        let all = store.get_all(&zone).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha");
        assert_eq!(all[1].name, "beta");

        // Replacement keeps position.
        store
            .put(
                &zone,
                PolicySet {
                    name: "alpha".to_string(),
                    policies: vec![permit_policy("p3")],
                },
            )
            .unwrap();
        let all = store.get_all(&zone).unwrap();
        assert_eq!(all[0].name, "alpha");
        assert_eq!(all[0].policies[0].name, "p3");
    }

    #[test]
    fn test_policy_set_store_isolates_zones() {
        let store = InMemoryPolicySetStore::new();
        let z1 = ZoneId::new("z1");
        let z2 = ZoneId::new("z2");
        store
            .put(
                &z1,
                PolicySet {
                    name: "alpha".to_string(),
                    policies: vec![permit_policy("p1")],
                },
            )
            .unwrap();

        assert_eq!(store.get_all(&z1).unwrap().len(), 1);
        assert!(store.get_all(&z2).unwrap().is_empty());
        assert!(store.get(&z2, "alpha").unwrap().is_none());
    }

    #[test]
    fn test_policy_set_store_remove() {
        let store = InMemoryPolicySetStore::new();
        let zone = ZoneId::new("z1");
        store
            .put(
                &zone,
                PolicySet {
                    name: "alpha".to_string(),
                    policies: vec![permit_policy("p1")],
                },
            )
            .unwrap();
        assert!(store.remove(&zone, "alpha").unwrap());
        assert!(!store.remove(&zone, "alpha").unwrap());
        assert!(store.get_all(&zone).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_subject_yields_empty_set() {
        let store = InMemorySubjectStore::new();
        let zone = ZoneId::new("z1");
        let attrs = store.get(&zone, &SubjectId::new("ghost"), &[]).unwrap();
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_subject_inherits_from_unscoped_parent() {
        let store = InMemorySubjectStore::new();
        let zone = ZoneId::new("z1");
        store.put(
            &zone,
            SubjectId::new("bob"),
            vec![Attribute::new("acs", "role", "analyst")],
        );
        store.put(
            &zone,
            SubjectId::new("analysts"),
            vec![Attribute::new("acs", "group", "blue")],
        );
        store.add_parent(
            &zone,
            SubjectId::new("bob"),
            SubjectId::new("analysts"),
            None,
        );

        let attrs = store.get(&zone, &SubjectId::new("bob"), &[]).unwrap();
        assert!(attrs.contains(&Attribute::new("acs", "role", "analyst")));
        assert!(attrs.contains(&Attribute::new("acs", "group", "blue")));
    }

    #[test]
    fn test_scoped_parent_link_requires_filter_match() {
        let store = InMemorySubjectStore::new();
        let zone = ZoneId::new("z1");
        store.put(&zone, SubjectId::new("bob"), vec![]);
        store.put(
            &zone,
            SubjectId::new("site42-staff"),
            vec![Attribute::new("acs", "clearance", "high")],
        );
        store.add_parent(
            &zone,
            SubjectId::new("bob"),
            SubjectId::new("site42-staff"),
            Some(Attribute::new("acs", "site", "42")),
        );

        let without = store.get(&zone, &SubjectId::new("bob"), &[]).unwrap();
        assert!(without.is_empty());

        let filter = [Attribute::new("acs", "site", "42")];
        let with = store.get(&zone, &SubjectId::new("bob"), &filter).unwrap();
        assert!(with.contains(&Attribute::new("acs", "clearance", "high")));
    }

    #[test]
    fn test_subject_parent_cycles_terminate() {
        let store = InMemorySubjectStore::new();
        let zone = ZoneId::new("z1");
        store.put(
            &zone,
            SubjectId::new("a"),
            vec![Attribute::new("acs", "from", "a")],
        );
        store.put(
            &zone,
            SubjectId::new("b"),
            vec![Attribute::new("acs", "from", "b")],
        );
        store.add_parent(&zone, SubjectId::new("a"), SubjectId::new("b"), None);
        store.add_parent(&zone, SubjectId::new("b"), SubjectId::new("a"), None);

        let attrs = store.get(&zone, &SubjectId::new("a"), &[]).unwrap();
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn test_resource_inheritance_walks_parent_chain() {
        let store = InMemoryResourceStore::new();
        let zone = ZoneId::new("z1");
        store.put(&zone, "/", vec![Attribute::new("acs", "org", "acme")]);
        store.put(
            &zone,
            "/site",
            vec![Attribute::new("acs", "kind", "site-root")],
        );
        store.put(
            &zone,
            "/site/42",
            vec![Attribute::new("acs", "group", "blue")],
        );
        store.set_parent(&zone, "/site/42", "/site");
        store.set_parent(&zone, "/site", "/");

        let attrs = store.get(&zone, "/site/42").unwrap();
        assert_eq!(attrs.len(), 3);
    }

    #[test]
    fn test_unknown_resource_yields_empty_set() {
        let store = InMemoryResourceStore::new();
        let zone = ZoneId::new("z1");
        assert!(store.get(&zone, "/nowhere").unwrap().is_empty());
    }
}
