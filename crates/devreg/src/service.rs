use std::sync::Arc;

use tracing::debug;
use tracing::info;

use crate::device::Device;
use crate::device::MacId;
use crate::device::Schedule;
use crate::error::RegistryError;
use crate::error::RegistryResult;
use crate::store::DeviceStore;
use crate::sync::ConfigSync;

/// How an owner patch combines with the owners already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OwnerAction {
    /// Add owners not already present
    Append,
    /// Overwrite the owner list
    Replace,
}

/// Device operations behind the HTTP handlers
///
/// Identifiers accepted here are either a MAC or a store-assigned id.
pub struct DeviceService {
    store: Arc<dyn DeviceStore>,
    sync: ConfigSync,
}

impl DeviceService {
    pub fn new(store: Arc<dyn DeviceStore>, sync: ConfigSync) -> Self {
        Self { store, sync }
    }

    /// Find the one device matching a MAC or id
    pub async fn resolve(&self, identifier: &str) -> RegistryResult<Device> {
        let mac = MacId::new(identifier);
        if mac.is_valid() {
            self.store.get_by_mac(&mac).await
        } else {
            self.store.get_by_id(identifier).await
        }
    }

    pub async fn create(&self, device: Device) -> RegistryResult<Device> {
        debug!(mac = %device.mac, "Registering device");
        let device = self.store.insert(device).await?;
        info!(mac = %device.mac, id = ?device.id, "Device registered");
        Ok(device)
    }

    /// Delete by MAC or id
    ///
    /// A well-formed MAC with no record is not an error. Anything else must
    /// name an existing device by id.
    pub async fn delete(&self, identifier: &str) -> RegistryResult<()> {
        let mac = MacId::new(identifier);
        let mac = if mac.is_valid() {
            mac
        } else {
            match self.store.get_by_id(identifier).await {
                Ok(device) => device.mac,
                Err(RegistryError::NotFound(_)) => {
                    return Err(RegistryError::InvalidParam(format!(
                        "invalid MAC for the device to delete {}",
                        identifier
                    )))
                }
                Err(e) => return Err(e),
            }
        };

        self.store.delete_by_mac(&mac).await?;
        info!(mac = %mac, "Device deleted");
        Ok(())
    }

    pub async fn list_by_owner(&self, owner: &str) -> RegistryResult<Vec<Device>> {
        let devices = self.store.query_by_owner(owner).await?;
        debug!(owner, count = devices.len(), "Listed devices");
        Ok(devices)
    }

    /// Patch the owner list and return the updated device
    pub async fn patch_owners(
        &self,
        identifier: &str,
        owners: Vec<String>,
        action: OwnerAction,
    ) -> RegistryResult<Device> {
        let device = self.resolve(identifier).await?;
        self.store
            .patch_owners(&device.mac, owners, action == OwnerAction::Replace)
            .await?;
        info!(mac = %device.mac, %action, "Owners updated");
        self.store.get_by_mac(&device.mac).await
    }

    /// Replace the schedule and synchronize it to the device
    pub async fn replace_config(
        &self,
        identifier: &str,
        schedule: Schedule,
    ) -> RegistryResult<Device> {
        let device = self.resolve(identifier).await?;
        self.sync.replace(&device.mac, schedule).await
    }
}
