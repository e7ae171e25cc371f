//! Repository seams for identities and admin signup requests.
//!
//! The clinic's record store is external; the core only needs key lookups
//! and `save`. The in-memory implementations back the binary and the tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::{AdminRequest, AdminRequestId, IdentityId, IdentityRecord, Role};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_id(&self, id: IdentityId) -> Result<Option<IdentityRecord>, anyhow::Error>;

    /// Lookup inside one role partition.
    async fn find_by_email(
        &self,
        email: &str,
        role: Role,
    ) -> Result<Option<IdentityRecord>, anyhow::Error>;

    /// Lookup inside one role partition.
    async fn find_by_phone(
        &self,
        phone: &str,
        role: Role,
    ) -> Result<Option<IdentityRecord>, anyhow::Error>;

    /// Searches every partition. Expired tokens still match; callers decide validity.
    async fn find_by_token(&self, token: &str) -> Result<Option<IdentityRecord>, anyhow::Error>;

    async fn save(&self, record: IdentityRecord) -> Result<(), anyhow::Error>;

    /// Undo a `save` whose surrounding operation failed. Missing ids are not an error.
    async fn remove(&self, id: IdentityId) -> Result<(), anyhow::Error>;

    async fn next_id(&self) -> Result<IdentityId, anyhow::Error>;
}

#[async_trait]
pub trait AdminRequestStore: Send + Sync {
    async fn find(&self, id: AdminRequestId) -> Result<Option<AdminRequest>, anyhow::Error>;

    async fn find_pending_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AdminRequest>, anyhow::Error>;

    async fn list_pending(&self) -> Result<Vec<AdminRequest>, anyhow::Error>;

    async fn save(&self, request: AdminRequest) -> Result<(), anyhow::Error>;
}

pub struct InMemoryIdentityStore {
    records: DashMap<IdentityId, IdentityRecord>,
    next_id: AtomicU64,
}

impl Default for InMemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seed with existing records; new ids continue after the highest seeded id.
    pub fn with_records(records: impl IntoIterator<Item = IdentityRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.next_id.fetch_max(record.id.0 + 1, Ordering::SeqCst);
            store.records.insert(record.id, record);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn find_where(&self, predicate: impl Fn(&IdentityRecord) -> bool) -> Option<IdentityRecord> {
        self.records
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_id(&self, id: IdentityId) -> Result<Option<IdentityRecord>, anyhow::Error> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_email(
        &self,
        email: &str,
        role: Role,
    ) -> Result<Option<IdentityRecord>, anyhow::Error> {
        Ok(self.find_where(|r| {
            r.role() == role
                && r.credentials
                    .email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
        }))
    }

    async fn find_by_phone(
        &self,
        phone: &str,
        role: Role,
    ) -> Result<Option<IdentityRecord>, anyhow::Error> {
        Ok(self.find_where(|r| r.role() == role && r.credentials.phone.as_deref() == Some(phone)))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<IdentityRecord>, anyhow::Error> {
        let mut matches = self
            .records
            .iter()
            .filter(|entry| entry.value().holds_token(token))
            .map(|entry| entry.value().clone());

        let first = matches.next();
        if let Some(other) = matches.next() {
            tracing::error!(identity_id = %other.id, "Token value held by more than one identity");
            anyhow::bail!("Ambiguous token: held by more than one identity");
        }
        Ok(first)
    }

    async fn save(&self, record: IdentityRecord) -> Result<(), anyhow::Error> {
        self.next_id.fetch_max(record.id.0 + 1, Ordering::SeqCst);
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn remove(&self, id: IdentityId) -> Result<(), anyhow::Error> {
        self.records.remove(&id);
        Ok(())
    }

    async fn next_id(&self) -> Result<IdentityId, anyhow::Error> {
        Ok(IdentityId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}

#[derive(Default)]
pub struct InMemoryAdminRequestStore {
    requests: DashMap<AdminRequestId, AdminRequest>,
}

impl InMemoryAdminRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdminRequestStore for InMemoryAdminRequestStore {
    async fn find(&self, id: AdminRequestId) -> Result<Option<AdminRequest>, anyhow::Error> {
        Ok(self.requests.get(&id).map(|r| r.value().clone()))
    }

    async fn find_pending_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AdminRequest>, anyhow::Error> {
        Ok(self
            .requests
            .iter()
            .find(|r| r.is_pending() && r.email.eq_ignore_ascii_case(email))
            .map(|r| r.value().clone()))
    }

    async fn list_pending(&self) -> Result<Vec<AdminRequest>, anyhow::Error> {
        let mut pending: Vec<AdminRequest> = self
            .requests
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    async fn save(&self, request: AdminRequest) -> Result<(), anyhow::Error> {
        self.requests.insert(request.id, request);
        Ok(())
    }
}
