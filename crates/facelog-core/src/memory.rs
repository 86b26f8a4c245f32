use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;

use crate::store::{IdentityStore, StoreError, VisitLog};
use crate::types::{DateFilter, Embedding, GalleryEntry, Identity, IdentityId, Visit, VisitId};

/// In-process store for tests and small deployments. Nothing is persisted.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    identities: BTreeMap<IdentityId, Identity>,
    visits: BTreeMap<VisitId, Visit>,
    next_identity: i64,
    next_visit: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl State {
    fn with_portrait(&self, identity: &Identity) -> Identity {
        let portrait_ref = self
            .visits
            .values()
            .filter(|v| v.identity_id == identity.id)
            .min_by(|a, b| a.observed_at.cmp(&b.observed_at).then(a.id.cmp(&b.id)))
            .map(|v| v.evidence_ref.clone());
        Identity {
            portrait_ref,
            ..identity.clone()
        }
    }
}

impl IdentityStore for MemoryStore {
    fn create_identity(&self, embedding: &Embedding, registered_at: NaiveDateTime) -> Result<IdentityId, StoreError> {
        let mut state = self.state()?;
        state.next_identity += 1;
        let id = IdentityId(state.next_identity);
        state.identities.insert(
            id,
            Identity {
                id,
                embedding: embedding.clone(),
                sample_count: 1,
                registered_at,
                portrait_ref: None,
            },
        );
        Ok(id)
    }

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let state = self.state()?;
        Ok(state.identities.get(&id).map(|i| state.with_portrait(i)))
    }

    fn update_identity(
        &self,
        id: IdentityId,
        embedding: &Embedding,
        expected_count: u32,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let identity = state
            .identities
            .get_mut(&id)
            .ok_or(StoreError::UnknownIdentity(id))?;
        if identity.sample_count != expected_count {
            return Ok(false);
        }
        identity.embedding = embedding.clone();
        identity.sample_count = expected_count + 1;
        Ok(true)
    }

    fn all_identities(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        Ok(self
            .state()?
            .identities
            .values()
            .map(|i| GalleryEntry {
                id: i.id,
                embedding: i.embedding.clone(),
            })
            .collect())
    }

    fn identities(&self, filter: DateFilter) -> Result<Vec<Identity>, StoreError> {
        let state = self.state()?;
        Ok(state
            .identities
            .values()
            .filter(|i| filter.contains(&i.registered_at))
            .map(|i| state.with_portrait(i))
            .collect())
    }

    fn delete_identity_cascade(&self, id: IdentityId) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        state.visits.retain(|_, v| v.identity_id != id);
        Ok(state.identities.remove(&id).is_some())
    }

    fn count_identities(&self) -> Result<u64, StoreError> {
        Ok(self.state()?.identities.len() as u64)
    }
}

impl VisitLog for MemoryStore {
    fn insert_visit(
        &self,
        identity: IdentityId,
        evidence_ref: &str,
        location: &str,
        observed_at: NaiveDateTime,
    ) -> Result<VisitId, StoreError> {
        let mut state = self.state()?;
        if !state.identities.contains_key(&identity) {
            return Err(StoreError::UnknownIdentity(identity));
        }
        state.next_visit += 1;
        let id = VisitId(state.next_visit);
        state.visits.insert(
            id,
            Visit {
                id,
                identity_id: identity,
                observed_at,
                evidence_ref: evidence_ref.to_string(),
                location: location.to_string(),
            },
        );
        Ok(id)
    }

    fn delete_visit(&self, id: VisitId) -> Result<bool, StoreError> {
        Ok(self.state()?.visits.remove(&id).is_some())
    }

    fn visits(&self, filter: DateFilter) -> Result<Vec<Visit>, StoreError> {
        let mut visits: Vec<Visit> = self
            .state()?
            .visits
            .values()
            .filter(|v| filter.contains(&v.observed_at))
            .cloned()
            .collect();
        visits.sort_by(|a, b| a.observed_at.cmp(&b.observed_at).then(a.id.cmp(&b.id)));
        Ok(visits)
    }

    fn visits_for_identity(&self, identity: IdentityId, filter: DateFilter) -> Result<Vec<Visit>, StoreError> {
        let mut visits: Vec<Visit> = self
            .state()?
            .visits
            .values()
            .filter(|v| v.identity_id == identity && filter.contains(&v.observed_at))
            .cloned()
            .collect();
        visits.sort_by(|a, b| b.observed_at.cmp(&a.observed_at).then(b.id.cmp(&a.id)));
        Ok(visits)
    }

    fn count_visits(&self) -> Result<u64, StoreError> {
        Ok(self.state()?.visits.len() as u64)
    }
}
