use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::DeviceStore;
use crate::device::Device;
use crate::device::MacId;
use crate::device::Schedule;
use crate::error::RegistryError;
use crate::error::RegistryResult;

/// Bounds every call on the wrapped store by a fixed deadline
///
/// An expired deadline is reported as a failed store query.
pub struct DeadlineStore {
    inner: Arc<dyn DeviceStore>,
    deadline: Duration,
}

impl DeadlineStore {
    pub fn new(inner: Arc<dyn DeviceStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = RegistryResult<T>>,
    ) -> RegistryResult<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, deadline_ms = self.deadline.as_millis() as u64, "Store call timed out");
                Err(RegistryError::DbQuery(format!(
                    "{} exceeded deadline of {}ms",
                    op,
                    self.deadline.as_millis()
                )))
            }
        }
    }
}

#[async_trait]
impl DeviceStore for DeadlineStore {
    async fn get_by_mac(&self, mac: &MacId) -> RegistryResult<Device> {
        self.bounded("get_by_mac", self.inner.get_by_mac(mac)).await
    }

    async fn get_by_id(&self, id: &str) -> RegistryResult<Device> {
        self.bounded("get_by_id", self.inner.get_by_id(id)).await
    }

    async fn insert(&self, device: Device) -> RegistryResult<Device> {
        self.bounded("insert", self.inner.insert(device)).await
    }

    async fn delete_by_mac(&self, mac: &MacId) -> RegistryResult<()> {
        self.bounded("delete_by_mac", self.inner.delete_by_mac(mac)).await
    }

    async fn patch_schedule(&self, mac: &MacId, schedule: &Schedule) -> RegistryResult<()> {
        self.bounded("patch_schedule", self.inner.patch_schedule(mac, schedule))
            .await
    }

    async fn patch_owners(
        &self,
        mac: &MacId,
        owners: Vec<String>,
        replace: bool,
    ) -> RegistryResult<()> {
        self.bounded("patch_owners", self.inner.patch_owners(mac, owners, replace))
            .await
    }

    async fn query_by_owner(&self, owner: &str) -> RegistryResult<Vec<Device>> {
        self.bounded("query_by_owner", self.inner.query_by_owner(owner))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fixtures;

    /// Store whose reads never complete
    struct StalledStore;

    #[async_trait]
    impl DeviceStore for StalledStore {
        async fn get_by_mac(&self, _mac: &MacId) -> RegistryResult<Device> {
            std::future::pending().await
        }

        async fn get_by_id(&self, _id: &str) -> RegistryResult<Device> {
            std::future::pending().await
        }

        async fn insert(&self, device: Device) -> RegistryResult<Device> {
            Ok(device)
        }

        async fn delete_by_mac(&self, _mac: &MacId) -> RegistryResult<()> {
            Ok(())
        }

        async fn patch_schedule(&self, _mac: &MacId, _schedule: &Schedule) -> RegistryResult<()> {
            std::future::pending().await
        }

        async fn patch_owners(
            &self,
            _mac: &MacId,
            _owners: Vec<String>,
            _replace: bool,
        ) -> RegistryResult<()> {
            Ok(())
        }

        async fn query_by_owner(&self, _owner: &str) -> RegistryResult<Vec<Device>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_becomes_db_query() {
        let store = DeadlineStore::new(Arc::new(StalledStore), Duration::from_secs(10));
        let mac = MacId::new("b8:27:eb:a5:be:48");

        let err = store.get_by_mac(&mac).await.unwrap_err();
        assert!(matches!(err, RegistryError::DbQuery(_)));

        let err = store
            .patch_schedule(&mac, &fixtures::schedule(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DbQuery(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_calls_pass_through() {
        let store = DeadlineStore::new(Arc::new(StalledStore), Duration::from_secs(10));
        let dev = store
            .insert(fixtures::device("b8:27:eb:a5:be:48"))
            .await
            .unwrap();
        assert_eq!(dev.mac.as_str(), "b8:27:eb:a5:be:48");
        assert!(store.query_by_owner("a@x.com").await.unwrap().is_empty());
    }
}
