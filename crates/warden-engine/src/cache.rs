use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use warden_core::{SubjectId, ZoneId};

use crate::error::EngineResult;
use crate::types::{EvaluationRequest, EvaluationResult};

// ---------------------------------------------------------------------------
// Decision cache
//
// Decisions are stored under an opaque digest of the cache key plus the
// current generation of every entity the decision depended on. An
// invalidation is a single counter bump: it changes the digest future
// lookups compute, making every decision written under the old
// generation unreachable without enumerating or deleting entries.
// Stale entries are reclaimed lazily via TTL.
// ---------------------------------------------------------------------------

/// Which policy sets a cached decision covered. `AnyPolicySet` is the
/// key variant for requests that supplied no explicit order (legal only
/// when the zone holds exactly one policy set); its generation advances
/// whenever any policy set in the zone is invalidated, so topology
/// changes evict those decisions too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySetScope {
    AnyPolicySet,
    Ordered(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCacheKey {
    pub zone: ZoneId,
    pub scope: PolicySetScope,
    pub resource_id: String,
    pub subject_id: SubjectId,
    pub request_hash: String,
}

/// Digest of the request fields that are not part of the cache key
/// proper (action, supplemental attributes): two requests for the same
/// zone/resource/subject but different actions must not collide.
pub fn request_hash(request: &EvaluationRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.action.as_bytes());
    for attribute in &request.supplemental_resource_attributes {
        hasher.update(b"\x1fr");
        hasher.update(attribute.to_string().as_bytes());
    }
    for attribute in &request.supplemental_subject_attributes {
        hasher.update(b"\x1fs");
        hasher.update(attribute.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub trait DecisionCache: Send + Sync {
    fn get(&self, key: &DecisionCacheKey) -> EngineResult<Option<EvaluationResult>>;

    fn put(&self, key: &DecisionCacheKey, decision: &EvaluationResult) -> EngineResult<()>;

    fn invalidate_policy_set(&self, zone: &ZoneId, name: &str) -> EngineResult<()>;

    fn invalidate_policy_sets(&self, zone: &ZoneId, names: &[String]) -> EngineResult<()> {
        for name in names {
            self.invalidate_policy_set(zone, name)?;
        }
        Ok(())
    }

    fn invalidate_resource(&self, zone: &ZoneId, resource_id: &str) -> EngineResult<()>;

    fn invalidate_resources(&self, zone: &ZoneId, resource_ids: &[String]) -> EngineResult<()> {
        for resource_id in resource_ids {
            self.invalidate_resource(zone, resource_id)?;
        }
        Ok(())
    }

    fn invalidate_subject(&self, zone: &ZoneId, subject_id: &SubjectId) -> EngineResult<()>;

    fn invalidate_subjects(&self, zone: &ZoneId, subject_ids: &[SubjectId]) -> EngineResult<()> {
        for subject_id in subject_ids {
            self.invalidate_subject(zone, subject_id)?;
        }
        Ok(())
    }

    /// Evict every decision in the zone.
    fn invalidate_zone(&self, zone: &ZoneId) -> EngineResult<()>;

    /// Drop everything, generations included.
    fn reset(&self) -> EngineResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GenerationKey {
    Zone(ZoneId),
    AnyPolicySet(ZoneId),
    PolicySet(ZoneId, String),
    Resource(ZoneId, String),
    Subject(ZoneId, SubjectId),
}

struct StoredEntry {
    decision: EvaluationResult,
    stored_at: Instant,
    /// Resource generations at write time for every URI the decision
    /// resolved attributes from. An attribute URI template can redirect
    /// resolution away from the request URI in the key, so these URIs
    /// are dependencies the storage digest alone does not cover.
    resource_generations: Vec<(String, u64)>,
}

#[derive(Default)]
struct CacheState {
    generations: HashMap<GenerationKey, u64>,
    entries: HashMap<String, StoredEntry>,
}

impl CacheState {
    fn generation(&self, key: &GenerationKey) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: GenerationKey) {
        *self.generations.entry(key).or_insert(0) += 1;
    }

    /// Digest over the key fields and the current generation of every
    /// dependency. Computed identically at write and lookup time, so a
    /// bumped generation simply makes old writes unreachable.
    fn storage_key(&self, key: &DecisionCacheKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.zone.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(
            self.generation(&GenerationKey::Zone(key.zone.clone()))
                .to_be_bytes(),
        );

        match &key.scope {
            PolicySetScope::AnyPolicySet => {
                hasher.update(b"\x1f*\x1f");
                hasher.update(
                    self.generation(&GenerationKey::AnyPolicySet(key.zone.clone()))
                        .to_be_bytes(),
                );
            }
            PolicySetScope::Ordered(names) => {
                for name in names {
                    hasher.update(b"\x1f");
                    hasher.update(name.as_bytes());
                    hasher.update(b"\x1f");
                    hasher.update(
                        self.generation(&GenerationKey::PolicySet(
                            key.zone.clone(),
                            name.clone(),
                        ))
                        .to_be_bytes(),
                    );
                }
            }
        }

        hasher.update(b"\x1f");
        hasher.update(key.resource_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(
            self.generation(&GenerationKey::Resource(
                key.zone.clone(),
                key.resource_id.clone(),
            ))
            .to_be_bytes(),
        );

        hasher.update(b"\x1f");
        hasher.update(key.subject_id.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(
            self.generation(&GenerationKey::Subject(
                key.zone.clone(),
                key.subject_id.clone(),
            ))
            .to_be_bytes(),
        );

        hasher.update(b"\x1f");
        hasher.update(key.request_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub struct InMemoryDecisionCache {
    state: Mutex<CacheState>,
    ttl: Option<Duration>,
}

impl InMemoryDecisionCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl: None,
        }
    }

    /// Entries older than `ttl` are treated as absent and reclaimed
    /// lazily on lookup or via `purge_expired`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl: Some(ttl),
        }
    }

    fn expired(&self, entry: &StoredEntry) -> bool {
        match self.ttl {
            Some(ttl) => entry.stored_at.elapsed() >= ttl,
            None => false,
        }
    }

    /// Drop every expired entry. Unreachable-but-unexpired entries stay
    /// until their TTL passes.
    pub fn purge_expired(&self) {
        if let Some(ttl) = self.ttl {
            let mut state = self.state.lock().expect("decision cache lock poisoned");
            state
                .entries
                .retain(|_, entry| entry.stored_at.elapsed() < ttl);
        }
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.state
            .lock()
            .expect("decision cache lock poisoned")
            .entries
            .len()
    }
}

impl Default for InMemoryDecisionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionCache for InMemoryDecisionCache {
    fn get(&self, key: &DecisionCacheKey) -> EngineResult<Option<EvaluationResult>> {
        let mut state = self.state.lock().expect("decision cache lock poisoned");
        let storage_key = state.storage_key(key);
        match state.entries.get(&storage_key) {
            Some(entry) if self.expired(entry) => {
                state.entries.remove(&storage_key);
                Ok(None)
            }
            Some(entry) => {
                let stale = entry.resource_generations.iter().any(|(uri, gen)| {
                    state.generation(&GenerationKey::Resource(key.zone.clone(), uri.clone()))
                        != *gen
                });
                if stale {
                    state.entries.remove(&storage_key);
                    Ok(None)
                } else {
                    Ok(Some(entry.decision.clone()))
                }
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &DecisionCacheKey, decision: &EvaluationResult) -> EngineResult<()> {
        let mut state = self.state.lock().expect("decision cache lock poisoned");
        let storage_key = state.storage_key(key);
        let resource_generations = decision
            .resolved_resource_uris
            .iter()
            .map(|uri| {
                let gen = state
                    .generation(&GenerationKey::Resource(key.zone.clone(), uri.clone()));
                (uri.clone(), gen)
            })
            .collect();
        state.entries.insert(
            storage_key,
            StoredEntry {
                decision: decision.clone(),
                stored_at: Instant::now(),
                resource_generations,
            },
        );
        Ok(())
    }

    fn invalidate_policy_set(&self, zone: &ZoneId, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().expect("decision cache lock poisoned");
        state.bump(GenerationKey::PolicySet(zone.clone(), name.to_string()));
        // Decisions cached without an explicit order depended on the
        // zone's whole policy-set topology.
        state.bump(GenerationKey::AnyPolicySet(zone.clone()));
        Ok(())
    }

    fn invalidate_resource(&self, zone: &ZoneId, resource_id: &str) -> EngineResult<()> {
        let mut state = self.state.lock().expect("decision cache lock poisoned");
        state.bump(GenerationKey::Resource(zone.clone(), resource_id.to_string()));
        Ok(())
    }

    fn invalidate_subject(&self, zone: &ZoneId, subject_id: &SubjectId) -> EngineResult<()> {
        let mut state = self.state.lock().expect("decision cache lock poisoned");
        state.bump(GenerationKey::Subject(zone.clone(), subject_id.clone()));
        Ok(())
    }

    fn invalidate_zone(&self, zone: &ZoneId) -> EngineResult<()> {
        let mut state = self.state.lock().expect("decision cache lock poisoned");
        state.bump(GenerationKey::Zone(zone.clone()));
        Ok(())
    }

    fn reset(&self) -> EngineResult<()> {
        let mut state = self.state.lock().expect("decision cache lock poisoned");
        state.entries.clear();
        state.generations.clear();
        Ok(())
    }
}

/// Cache that never hits and ignores writes, for deployments with
/// caching disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDecisionCache;

impl DecisionCache for NoopDecisionCache {
    fn get(&self, _key: &DecisionCacheKey) -> EngineResult<Option<EvaluationResult>> {
        Ok(None)
    }

    fn put(&self, _key: &DecisionCacheKey, _decision: &EvaluationResult) -> EngineResult<()> {
        Ok(())
    }

    fn invalidate_policy_set(&self, _zone: &ZoneId, _name: &str) -> EngineResult<()> {
        Ok(())
    }

    fn invalidate_resource(&self, _zone: &ZoneId, _resource_id: &str) -> EngineResult<()> {
        Ok(())
    }

    fn invalidate_subject(&self, _zone: &ZoneId, _subject_id: &SubjectId) -> EngineResult<()> {
        Ok(())
    }

    fn invalidate_zone(&self, _zone: &ZoneId) -> EngineResult<()> {
        Ok(())
    }

    fn reset(&self) -> EngineResult<()> {
        Ok(())
    }
}
