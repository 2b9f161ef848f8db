//! FieldGroup — several named fields of one user opened and managed together,
//! e.g. all the inputs of a settings form.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::{FieldSyncError, Result};
use crate::sync::SyncCoordinator;
use crate::types::{FieldKey, SyncStatus, UserId};

use super::controller::FieldController;

/// One member of a [`FieldGroup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_id: String,
    pub category: String,
    pub default: String,
}

impl FieldSpec {
    pub fn new(
        field_id: impl Into<String>,
        category: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        Self {
            field_id: field_id.into(),
            category: category.into(),
            default: default.into(),
        }
    }
}

pub struct FieldGroup {
    fields: BTreeMap<String, FieldController>,
}

impl FieldGroup {
    /// Open every field concurrently. The first store error aborts the group.
    pub async fn open(
        coordinator: Arc<SyncCoordinator>,
        user: &UserId,
        specs: impl IntoIterator<Item = FieldSpec>,
    ) -> Result<Self> {
        let mut opening = JoinSet::new();
        for spec in specs {
            let coordinator = Arc::clone(&coordinator);
            let key = FieldKey::new(user.clone(), spec.field_id.clone());
            opening.spawn(async move {
                let field =
                    FieldController::open(coordinator, key, spec.category, spec.default).await;
                (spec.field_id, field)
            });
        }

        let mut fields = BTreeMap::new();
        while let Some(joined) = opening.join_next().await {
            let (field_id, field) = match joined {
                Ok(opened) => opened,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => return Err(FieldSyncError::Shutdown),
            };
            fields.insert(field_id, field?);
        }
        Ok(Self { fields })
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldController> {
        self.fields.get(field_id)
    }

    pub fn read(&self, field_id: &str) -> Option<String> {
        self.get(field_id).map(FieldController::read)
    }

    pub fn write(&self, field_id: &str, value: impl Into<String>) -> Result<()> {
        self.get(field_id)
            .ok_or_else(|| FieldSyncError::UnknownField(field_id.to_string()))?
            .write(value)
    }

    pub fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn values(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|(id, field)| (id.clone(), field.read()))
            .collect()
    }

    pub fn statuses(&self) -> BTreeMap<String, SyncStatus> {
        self.fields
            .iter()
            .map(|(id, field)| (id.clone(), field.current_status()))
            .collect()
    }

    /// Worst status across the group; `Synced` for an empty group.
    pub fn aggregate_status(&self) -> SyncStatus {
        self.fields
            .values()
            .map(FieldController::current_status)
            .fold(SyncStatus::Synced, SyncStatus::worst)
    }

    /// Flush every field, returning the first error after trying them all.
    pub fn flush_all(&self) -> Result<()> {
        let mut first_error = None;
        for field in self.fields.values() {
            if let Err(e) = field.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn close_all(self) -> Result<()> {
        let mut first_error = None;
        for field in self.fields.into_values() {
            if let Err(e) = field.close() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
