//! In-memory portfolio registry. Contents are lost on exit.

use crate::allocation::AllocationTarget;
use crate::composer::ComposeResponse;
use crate::config::TargetSumPolicy;
use crate::error::ComposerError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub target_alloc: AllocationTarget,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recent composition for this portfolio
    pub last_composition: Option<ComposeResponse>,
}

impl PortfolioRecord {
    fn new(user_id: &str, name: &str, target_alloc: AllocationTarget) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            target_alloc,
            created_at: now,
            updated_at: now,
            last_composition: None,
        }
    }
}

#[derive(Default)]
pub struct PortfolioStore {
    records: RwLock<HashMap<String, PortfolioRecord>>,
}

impl PortfolioStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PortfolioRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PortfolioRecord>> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Missing target defaults to value 40 / growth 40 / bonds 20.
    pub fn create(
        &self,
        user_id: &str,
        name: &str,
        target_alloc: Option<AllocationTarget>,
    ) -> Result<PortfolioRecord, ComposerError> {
        if name.trim().is_empty() {
            return Err(ComposerError::InvalidRequest("portfolio name is empty".into()));
        }
        let target_alloc = target_alloc.unwrap_or_default();
        // Reject targets that could never be composed
        target_alloc.normalize(TargetSumPolicy::Normalize)?;

        let record = PortfolioRecord::new(user_id, name.trim(), target_alloc);
        log::info!("Created portfolio {} ({}) for {}", record.id, record.name, user_id);
        self.write().insert(record.id.clone(), record.clone());
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<PortfolioRecord> {
        self.read().get(id).cloned()
    }

    /// Oldest first
    pub fn list(&self) -> Vec<PortfolioRecord> {
        let mut records: Vec<_> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn list_for_user(&self, user_id: &str) -> Vec<PortfolioRecord> {
        self.list().into_iter().filter(|r| r.user_id == user_id).collect()
    }

    pub fn record_optimization(
        &self,
        id: &str,
        response: ComposeResponse,
    ) -> Result<PortfolioRecord, ComposerError> {
        let mut records = self.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| ComposerError::InvalidRequest(format!("portfolio {} not found", id)))?;
        record.last_composition = Some(response);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    pub fn delete(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }
}
