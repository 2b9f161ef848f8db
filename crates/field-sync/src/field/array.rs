//! ArrayField — a list of structured items stored as one JSON field value.
//!
//! Every mutation rewrites the whole list, so the usual debounce and
//! supersede rules of [`FieldController`] apply to the list as a unit.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{FieldSyncError, Result};
use crate::reactive::{ListenerId, StatusEvent};
use crate::sync::SyncCoordinator;
use crate::types::{FieldKey, SyncStatus};

use super::controller::{FieldController, RefreshOutcome};

const EMPTY_LIST: &str = "[]";

pub struct ArrayField<T> {
    field: FieldController,
    _items: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> ArrayField<T> {
    pub async fn open(
        coordinator: Arc<SyncCoordinator>,
        key: FieldKey,
        category: impl Into<String>,
    ) -> Result<Self> {
        let field = FieldController::open(coordinator, key, category, EMPTY_LIST).await?;
        Ok(Self::from_controller(field))
    }

    pub fn from_controller(field: FieldController) -> Self {
        Self {
            field,
            _items: PhantomData,
        }
    }

    /// Decoded items. A value that does not decode as a list of `T` reads
    /// as empty; use [`try_read`](Self::try_read) to see the error.
    pub fn read(&self) -> Vec<T> {
        match self.try_read() {
            Ok(items) => items,
            Err(e) => {
                warn!(key = %self.field.key(), error = %e, "field value is not a valid list");
                Vec::new()
            }
        }
    }

    pub fn try_read(&self) -> std::result::Result<Vec<T>, serde_json::Error> {
        serde_json::from_str(&self.field.read())
    }

    pub fn write(&self, items: &[T]) -> Result<()> {
        let encoded = serde_json::to_string(items).map_err(|source| FieldSyncError::Encode {
            key: self.field.key().to_string(),
            source,
        })?;
        self.field.write(encoded)
    }

    pub fn push(&self, item: T) -> Result<()> {
        let mut items = self.read();
        items.push(item);
        self.write(&items)
    }

    /// Remove the item at `index`. Out of range is a no-op returning `None`.
    pub fn remove(&self, index: usize) -> Result<Option<T>> {
        let mut items = self.read();
        if index >= items.len() {
            return Ok(None);
        }
        let removed = items.remove(index);
        self.write(&items)?;
        Ok(Some(removed))
    }

    /// Replace the item at `index`. Returns `false` if out of range.
    pub fn update(&self, index: usize, item: T) -> Result<bool> {
        let mut items = self.read();
        let Some(slot) = items.get_mut(index) else {
            return Ok(false);
        };
        *slot = item;
        self.write(&items)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn key(&self) -> &FieldKey {
        self.field.key()
    }

    pub fn current_status(&self) -> SyncStatus {
        self.field.current_status()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&StatusEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.field.subscribe(callback)
    }

    pub fn flush(&self) -> Result<()> {
        self.field.flush()
    }

    pub async fn force_refresh(&self) -> Result<RefreshOutcome> {
        self.field.force_refresh().await
    }

    pub fn controller(&self) -> &FieldController {
        &self.field
    }

    pub fn close(self) -> Result<()> {
        self.field.close()
    }
}
