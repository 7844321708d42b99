use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;

use super::DeviceStore;
use crate::device::dedup_owners;
use crate::device::Device;
use crate::device::MacId;
use crate::device::Schedule;
use crate::error::RegistryError;
use crate::error::RegistryResult;

/// In-process device collection
///
/// Documents are kept in insertion order. When a path is configured the whole
/// collection is written to it as JSON after every mutation, via a temporary
/// file and a rename, and reloaded on startup. A mutation commits the file
/// and the in-memory collection together, even when its caller stops waiting.
pub struct MemoryDeviceStore {
    devices: Arc<RwLock<Vec<Device>>>,
    path: Option<PathBuf>,
}

impl MemoryDeviceStore {
    /// Create an empty store that lives only in memory
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(Vec::new())),
            path: None,
        }
    }

    /// Open a store backed by a JSON document file, loading it if present
    pub async fn open(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let devices = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<Device>>(&bytes).map_err(|e| {
                RegistryError::DbQuery(format!("corrupt store file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(RegistryError::DbQuery(format!(
                    "failed to read store file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        info!(
            "Loaded {} device(s) from {}",
            devices.len(),
            path.display()
        );

        Ok(Self {
            devices: Arc::new(RwLock::new(devices)),
            path: Some(path),
        })
    }

    /// Apply `f` to a copy of the collection and commit it once persisted
    ///
    /// The write and the swap run on their own task holding the write lock,
    /// so dropping the returned future never leaves the file ahead of memory.
    async fn mutate<T, F>(&self, f: F) -> RegistryResult<T>
    where
        F: FnOnce(&mut Vec<Device>) -> RegistryResult<T> + Send,
        T: Send,
    {
        let mut guard = self.devices.clone().write_owned().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;

        let path = self.path.clone();
        tokio::spawn(async move {
            persist(path.as_deref(), &next).await?;
            *guard = next;
            Ok::<_, RegistryError>(())
        })
        .await
        .map_err(|e| RegistryError::DbQuery(format!("store commit aborted: {}", e)))??;

        Ok(out)
    }
}

async fn persist(path: Option<&Path>, devices: &[Device]) -> RegistryResult<()> {
    let Some(path) = path else {
        return Ok(());
    };

    let bytes =
        serde_json::to_vec_pretty(devices).map_err(|e| RegistryError::DbQuery(e.to_string()))?;
    let tmp = path.with_extension("tmp");

    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| RegistryError::DbQuery(format!("write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| RegistryError::DbQuery(format!("rename {}: {}", path.display(), e)))?;

    Ok(())
}

impl Default for MemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn require_mac(mac: &MacId) -> RegistryResult<()> {
    if mac.is_valid() {
        Ok(())
    } else {
        Err(RegistryError::InvalidParam(format!(
            "invalid MAC id {} for the device",
            mac
        )))
    }
}

fn find_mut<'a>(devices: &'a mut [Device], mac: &MacId) -> RegistryResult<&'a mut Device> {
    devices
        .iter_mut()
        .find(|d| &d.mac == mac)
        .ok_or_else(|| RegistryError::NotFound(mac.to_string()))
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get_by_mac(&self, mac: &MacId) -> RegistryResult<Device> {
        let devices = self.devices.read().await;
        devices
            .iter()
            .find(|d| &d.mac == mac)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(mac.to_string()))
    }

    async fn get_by_id(&self, id: &str) -> RegistryResult<Device> {
        let devices = self.devices.read().await;
        devices
            .iter()
            .find(|d| d.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn insert(&self, mut device: Device) -> RegistryResult<Device> {
        if !device.is_valid() {
            return Err(RegistryError::InvalidParam(
                "one or more fields on the device is invalid".to_string(),
            ));
        }

        device.users = dedup_owners(std::mem::take(&mut device.users));
        device.id = Some(uuid::Uuid::new_v4().simple().to_string());

        self.mutate(move |devices| {
            if devices.iter().any(|d| d.mac == device.mac) {
                return Err(RegistryError::Duplicate(format!(
                    "device with MAC {} already registered",
                    device.mac
                )));
            }
            devices.push(device.clone());
            Ok(device)
        })
        .await
        .inspect(|d| debug!(mac = %d.mac, id = ?d.id, "Inserted device"))
    }

    async fn delete_by_mac(&self, mac: &MacId) -> RegistryResult<()> {
        require_mac(mac)?;
        let removed = self
            .mutate(|devices| {
                let before = devices.len();
                devices.retain(|d| &d.mac != mac);
                Ok(before - devices.len())
            })
            .await?;
        debug!(mac = %mac, removed, "Deleted device");
        Ok(())
    }

    async fn patch_schedule(&self, mac: &MacId, schedule: &Schedule) -> RegistryResult<()> {
        require_mac(mac)?;
        if !schedule.is_valid() {
            return Err(RegistryError::InvalidParam(
                "invalid schedule for the device".to_string(),
            ));
        }

        self.mutate(|devices| {
            find_mut(devices, mac)?.cfg = Some(schedule.clone());
            Ok(())
        })
        .await
    }

    async fn patch_owners(
        &self,
        mac: &MacId,
        owners: Vec<String>,
        replace: bool,
    ) -> RegistryResult<()> {
        require_mac(mac)?;

        self.mutate(move |devices| {
            let device = find_mut(devices, mac)?;
            let next = if replace {
                dedup_owners(owners)
            } else {
                dedup_owners(device.users.drain(..).chain(owners))
            };
            if next.is_empty() {
                return Err(RegistryError::InvalidParam(
                    "a device needs at least one owner".to_string(),
                ));
            }
            device.users = next;
            Ok(())
        })
        .await
    }

    async fn query_by_owner(&self, owner: &str) -> RegistryResult<Vec<Device>> {
        if owner.is_empty() {
            return Err(RegistryError::InvalidParam(
                "owner identifier is required".to_string(),
            ));
        }

        let devices = self.devices.read().await;
        Ok(devices
            .iter()
            .filter(|d| d.users.iter().any(|u| u == owner))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::fixtures;
    use crate::store::DeadlineStore;

    const MAC: &str = "b8:27:eb:a5:be:48";

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let store = MemoryDeviceStore::new();
        let dev = store.insert(fixtures::device(MAC)).await.unwrap();
        assert!(dev.id.is_some());

        let by_id = store.get_by_id(dev.id.as_deref().unwrap()).await.unwrap();
        assert_eq!(by_id, dev);
    }

    #[tokio::test]
    async fn test_duplicate_mac_rejected() {
        let store = MemoryDeviceStore::new();
        store.insert(fixtures::device(MAC)).await.unwrap();

        let err = store.insert(fixtures::device(MAC)).await.unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));

        let owned = store.query_by_owner("owner@example.com").await.unwrap();
        assert_eq!(owned.iter().filter(|d| d.mac.as_str() == MAC).count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_device_rejected() {
        let store = MemoryDeviceStore::new();
        let mut dev = fixtures::device(MAC);
        dev.users.clear();

        let err = store.insert(dev).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParam(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryDeviceStore::new();
        let mac = MacId::new(MAC);

        store.delete_by_mac(&mac).await.unwrap();
        let err = store.get_by_mac(&mac).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));

        store.insert(fixtures::device(MAC)).await.unwrap();
        store.delete_by_mac(&mac).await.unwrap();
        store.delete_by_mac(&mac).await.unwrap();
        assert!(store.get_by_mac(&mac).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_validates_mac() {
        let store = MemoryDeviceStore::new();
        let err = store.delete_by_mac(&MacId::new("zz")).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParam(_)));
    }

    #[tokio::test]
    async fn test_patch_schedule() {
        let store = MemoryDeviceStore::new();
        let mac = MacId::new(MAC);
        store.insert(fixtures::device(MAC)).await.unwrap();

        store
            .patch_schedule(&mac, &fixtures::schedule(120))
            .await
            .unwrap();
        let dev = store.get_by_mac(&mac).await.unwrap();
        assert_eq!(dev.cfg, Some(fixtures::schedule(120)));

        let err = store
            .patch_schedule(&mac, &fixtures::schedule(0))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParam(_)));

        let err = store
            .patch_schedule(&MacId::new("aa:bb:cc:dd:ee:ff"), &fixtures::schedule(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_owner_append_is_idempotent() {
        let store = MemoryDeviceStore::new();
        let mac = MacId::new(MAC);
        store.insert(fixtures::device(MAC)).await.unwrap();

        store
            .patch_owners(&mac, vec!["owner@example.com".to_string()], false)
            .await
            .unwrap();
        store
            .patch_owners(&mac, vec!["a@x.com".to_string()], false)
            .await
            .unwrap();
        store
            .patch_owners(&mac, vec!["b@x.com".to_string()], false)
            .await
            .unwrap();

        let dev = store.get_by_mac(&mac).await.unwrap();
        assert_eq!(dev.users, vec!["owner@example.com", "a@x.com", "b@x.com"]);
    }

    #[tokio::test]
    async fn test_owner_replace() {
        let store = MemoryDeviceStore::new();
        let mac = MacId::new(MAC);
        store.insert(fixtures::device(MAC)).await.unwrap();

        store
            .patch_owners(
                &mac,
                vec!["c@x.com".to_string(), "c@x.com".to_string()],
                true,
            )
            .await
            .unwrap();
        assert_eq!(store.get_by_mac(&mac).await.unwrap().users, vec!["c@x.com"]);

        let err = store.patch_owners(&mac, Vec::new(), true).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParam(_)));
        assert_eq!(store.get_by_mac(&mac).await.unwrap().users, vec!["c@x.com"]);
    }

    #[tokio::test]
    async fn test_query_by_owner() {
        let store = MemoryDeviceStore::new();
        store.insert(fixtures::device(MAC)).await.unwrap();
        let mut other = fixtures::device("aa:bb:cc:dd:ee:ff");
        other.users = vec!["someone@else.com".to_string()];
        store.insert(other).await.unwrap();

        let owned = store.query_by_owner("owner@example.com").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].mac.as_str(), MAC);

        assert!(store.query_by_owner("nobody@x.com").await.unwrap().is_empty());
        assert!(matches!(
            store.query_by_owner("").await.unwrap_err(),
            RegistryError::InvalidParam(_)
        ));
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("devices.json");

        {
            let store = MemoryDeviceStore::open(&path).await.unwrap();
            store.insert(fixtures::device(MAC)).await.unwrap();
            store
                .patch_owners(&MacId::new(MAC), vec!["a@x.com".to_string()], false)
                .await
                .unwrap();
        }

        let store = MemoryDeviceStore::open(&path).await.unwrap();
        let dev = store.get_by_mac(&MacId::new(MAC)).await.unwrap();
        assert_eq!(dev.users, vec!["owner@example.com", "a@x.com"]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_expired_deadline_still_commits_file_and_memory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("devices.json");
        let store = Arc::new(MemoryDeviceStore::open(&path).await.unwrap());
        let bounded = DeadlineStore::new(store.clone(), Duration::ZERO);

        // May or may not beat the deadline; either way the commit completes
        let _ = bounded.insert(fixtures::device(MAC)).await;

        let in_memory = store.get_by_mac(&MacId::new(MAC)).await.unwrap();
        let reopened = MemoryDeviceStore::open(&path).await.unwrap();
        let on_disk = reopened.get_by_mac(&MacId::new(MAC)).await.unwrap();
        assert_eq!(in_memory, on_disk);
    }

    #[tokio::test]
    async fn test_corrupt_store_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("devices.json");
        std::fs::write(&path, "not json").unwrap();

        let result = MemoryDeviceStore::open(&path).await;
        assert!(matches!(result, Err(RegistryError::DbQuery(_))));
    }
}
