//! Read-only tariff lookup.

use std::sync::Arc;

use harvest_core::{DepositTerms, LedgerError, Result, Tariff, TariffId};
use harvest_store::{entity, Queries, Store};

use crate::timeout::within;
use crate::Shared;

/// Named presets of lock-until and daily rate.
pub struct TariffCatalog<S: Store> {
    shared: Arc<Shared<S>>,
}

impl<S: Store> Clone for TariffCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Store> TariffCatalog<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    /// Get a tariff by ID.
    pub async fn find_by_id(&self, id: TariffId) -> Result<Tariff> {
        within(self.shared.config.call_timeout, "find_tariff", async {
            let mut session = self.shared.store.acquire().await?;
            session
                .tariff(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::TARIFF, id))
        })
        .await
    }

    /// Every tariff, by name.
    pub async fn list(&self) -> Result<Vec<Tariff>> {
        within(self.shared.config.call_timeout, "list_tariffs", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.tariffs().await?)
        })
        .await
    }

    /// The terms a deposit approved under this tariff receives.
    ///
    /// Any failure other than a retryable one is a resolution failure.
    pub(crate) async fn resolve(&self, id: TariffId) -> Result<DepositTerms> {
        match self.find_by_id(id).await {
            Ok(tariff) => tariff.terms(),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => Err(LedgerError::Resolution(format!("tariff {id}: {e}"))),
        }
    }
}
