//! Read-or-create and regenerate operations over the value store.
//!
//! Front-ends depend on [`ValueService`]; the scheduler only needs the narrower
//! [`Refresher`] capability. [`RefreshService`] is the production
//! implementation of both.

use crate::error::{RefreshError, StoreError};
use crate::generator::Generator;
use crate::model::Value;
use crate::store::ValueStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Something that can regenerate the current value.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> Result<(), RefreshError>;
}

/// Operations exposed to the protocol front-ends.
#[async_trait]
pub trait ValueService: Refresher {
    /// Current value, created on first use if none exists yet.
    async fn get(&self) -> Result<Value, RefreshError>;
}

/// Production service backed by a [`ValueStore`] and a [`Generator`].
pub struct RefreshService {
    store: Arc<dyn ValueStore>,
    generator: Arc<dyn Generator>,
}

impl RefreshService {
    pub fn new(store: Arc<dyn ValueStore>, generator: Arc<dyn Generator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl Refresher for RefreshService {
    async fn refresh(&self) -> Result<(), RefreshError> {
        debug!("refresh started");

        let value = self.generator.new_value().map_err(|err| {
            error!(error = %err, "refresh failed: could not generate value");
            RefreshError::from(err)
        })?;
        let installed = value.to_string();

        self.store.set(value).map_err(|err| {
            error!(
                operation = err.operation(),
                reason = err.reason(),
                "refresh failed: store rejected value"
            );
            RefreshError::from(err)
        })?;

        debug!(value = %installed, "refresh completed");
        Ok(())
    }
}

#[async_trait]
impl ValueService for RefreshService {
    /// Concurrent callers that all find the store empty each run their own
    /// refresh; the last write wins and every caller gets a valid value.
    async fn get(&self) -> Result<Value, RefreshError> {
        if let Some(value) = self.store.get()? {
            return Ok(value);
        }

        debug!("no value stored yet, refreshing before read");
        self.refresh().await.map_err(RefreshError::upstream)?;

        self.store
            .get()?
            .ok_or_else(|| StoreError::read("value missing after refresh").into())
    }
}
