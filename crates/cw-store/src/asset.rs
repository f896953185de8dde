//! Named binary assets

use crate::store::BlobStore;
use cw_core::{AssetClass, AssetKind, StoreError, SystemId};

/// An immutable named game or firmware image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub bytes: Vec<u8>,
    pub class: AssetClass,
}

impl Asset {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, class: AssetClass) -> Self {
        Self {
            name: name.into(),
            bytes,
            class,
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.class.kind
    }

    pub fn system_id(&self) -> &SystemId {
        &self.class.system_id
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read `name` from `store`, tagging it with an already resolved class
    pub async fn load(
        store: &dyn BlobStore,
        name: &str,
        class: AssetClass,
    ) -> Result<Option<Self>, StoreError> {
        Ok(store
            .get(name)
            .await?
            .map(|bytes| Self::new(name, bytes, class)))
    }

    /// Persist under the asset's name, replacing any previous value
    pub async fn save(&self, store: &dyn BlobStore) -> Result<(), StoreError> {
        store.put(&self.name, &self.bytes).await
    }
}
