//! Case record persistence seam.
//!
//! Cases live in a keyed store accessed only through the state machine's
//! locked read-modify-write contract; workers never hold direct mutable
//! references. Writes carry an optimistic version check so a stale writer
//! surfaces as a conflict instead of silently clobbering newer state.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::Case;

/// Failures at the case store boundary
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Case {case_id} not found in store")]
    NotFound { case_id: Uuid },

    #[error("Case {case_id} already exists in store")]
    AlreadyExists { case_id: Uuid },

    #[error("Version conflict on case {case_id}: expected {expected}, found {actual}")]
    Conflict {
        case_id: Uuid,
        expected: u64,
        actual: u64,
    },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Durable-store-shaped repository for case records.
#[async_trait]
pub trait CaseRepository: Send + Sync {
    /// Insert a new case; fails if the id is already present.
    async fn insert(&self, case: Case) -> PersistenceResult<()>;

    /// Read a case snapshot together with its store version.
    async fn get(&self, case_id: Uuid) -> PersistenceResult<(Case, u64)>;

    /// Replace a case iff the stored version still matches
    /// `expected_version`.
    async fn put(&self, case: Case, expected_version: u64) -> PersistenceResult<()>;

    /// Ids of every stored case.
    async fn case_ids(&self) -> Vec<Uuid>;
}

struct VersionedCase {
    case: Case,
    version: u64,
}

/// In-memory `CaseRepository` used by the embedded deployment and tests.
#[derive(Default)]
pub struct InMemoryCaseRepository {
    cases: DashMap<Uuid, VersionedCase>,
}

impl InMemoryCaseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseRepository for InMemoryCaseRepository {
    async fn insert(&self, case: Case) -> PersistenceResult<()> {
        let case_id = case.case_id;
        match self.cases.entry(case_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(PersistenceError::AlreadyExists { case_id })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(VersionedCase { case, version: 1 });
                Ok(())
            }
        }
    }

    async fn get(&self, case_id: Uuid) -> PersistenceResult<(Case, u64)> {
        self.cases
            .get(&case_id)
            .map(|entry| (entry.case.clone(), entry.version))
            .ok_or(PersistenceError::NotFound { case_id })
    }

    async fn put(&self, case: Case, expected_version: u64) -> PersistenceResult<()> {
        let case_id = case.case_id;
        let mut entry = self
            .cases
            .get_mut(&case_id)
            .ok_or(PersistenceError::NotFound { case_id })?;
        if entry.version != expected_version {
            return Err(PersistenceError::Conflict {
                case_id,
                expected: expected_version,
                actual: entry.version,
            });
        }
        entry.case = case;
        entry.version += 1;
        Ok(())
    }

    async fn case_ids(&self) -> Vec<Uuid> {
        self.cases.iter().map(|entry| *entry.key()).collect()
    }
}
