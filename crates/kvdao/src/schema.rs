//! Schema provisioning
//!
//! A [`SchemaPlan`] declares the object stores and indexes a database should
//! have. It is applied inside the version change transaction of the open that
//! raised the schema version, and only there.
//!
//! The declaration format is a JSON array:
//!
//! ```json
//! [
//!   { "name": "inputIndex" },
//!   {
//!     "name": "orders",
//!     "config": { "keyPath": "id", "autoIncrement": true },
//!     "index": [
//!       { "name": "by_customer", "keyPath": "customer" },
//!       { "name": "by_ref", "keyPath": "ref", "config": { "unique": true } }
//!     ]
//!   }
//! ]
//! ```

use kvdao_core::{Engine, EngineResult, IndexParameters, StoreParameters, UpgradeTransaction};
use serde::{Deserialize, Serialize};

use crate::client::StoreClient;
use crate::error::{DaoError, Result};
use crate::tracing::prefix;

/// One object store of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    /// Descriptors without a name are reported and skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<StoreParameters>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index: Vec<IndexDescriptor>,
}

impl StoreDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn config(mut self, config: StoreParameters) -> Self {
        self.config = Some(config);
        self
    }

    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.index.push(index);
        self
    }
}

/// One index of a store descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub name: String,
    pub key_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<IndexParameters>,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            config: None,
        }
    }

    pub fn config(mut self, config: IndexParameters) -> Self {
        self.config = Some(config);
        self
    }
}

/// An ordered list of store descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaPlan {
    stores: Vec<StoreDescriptor>,
}

impl SchemaPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn store(mut self, descriptor: StoreDescriptor) -> Self {
        self.stores.push(descriptor);
        self
    }

    pub fn stores(&self) -> &[StoreDescriptor] {
        &self.stores
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// Create every named store of `plan` and its indexes.
///
/// Returns the number of stores created. Stops at the first engine error.
pub(crate) fn apply_plan<U: UpgradeTransaction>(
    upgrade: &mut U,
    plan: &SchemaPlan,
) -> EngineResult<usize> {
    let mut created = 0;
    for (position, descriptor) in plan.stores().iter().enumerate() {
        let Some(name) = descriptor.name.as_deref() else {
            tracing::error!(
                position,
                ?descriptor,
                "{} schema descriptor has no name; skipped",
                prefix::DB
            );
            continue;
        };

        let params = descriptor.config.clone().unwrap_or_default();
        upgrade.create_object_store(name, &params)?;
        for index in &descriptor.index {
            let params = index.config.clone().unwrap_or_default();
            upgrade.create_index(name, &index.name, &index.key_path, &params)?;
        }
        created += 1;
    }
    Ok(created)
}

impl<E: Engine> StoreClient<E> {
    /// Apply `plan` if this call is the one holding the pending version change.
    ///
    /// Without a version change in progress this does nothing. On failure the
    /// whole upgrade is rolled back and the session is dropped, so the next
    /// operation reopens the database.
    pub async fn create_object_stores(&self, plan: &SchemaPlan) -> Result<()> {
        let acquired = self.sessions.ensure().await?;
        let Some(mut upgrade) = acquired.upgrade else {
            tracing::debug!("{} no version change in progress; schema plan skipped", prefix::DB);
            return Ok(());
        };

        match apply_plan(&mut upgrade, plan) {
            Ok(created) => {
                let version = upgrade.new_version();
                upgrade.commit().map_err(DaoError::Schema)?;
                tracing::info!(
                    "{} provisioned {} store(s) at version {}",
                    prefix::DB,
                    created,
                    version
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("{} schema plan failed, rolling back: {}", prefix::DB, e);
                upgrade.abort();
                self.sessions.reset();
                Err(DaoError::Schema(e))
            }
        }
    }
}
