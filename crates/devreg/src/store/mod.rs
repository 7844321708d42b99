//! Device persistence.
//!
//! The registry only needs a handful of single-document operations. None of
//! them are transactional with one another; cross-operation consistency is the
//! config sync coordinator's job.

mod deadline;
mod memory;

pub use deadline::DeadlineStore;
pub use memory::MemoryDeviceStore;

use async_trait::async_trait;

use crate::device::Device;
use crate::device::MacId;
use crate::device::Schedule;
use crate::error::RegistryResult;

/// Single-document operations over the device collection
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Fetch one device by MAC, `NotFound` if absent
    async fn get_by_mac(&self, mac: &MacId) -> RegistryResult<Device>;

    /// Fetch one device by its store-assigned id, `NotFound` if absent
    async fn get_by_id(&self, id: &str) -> RegistryResult<Device>;

    /// Insert a new device and return it with its assigned id
    ///
    /// Rejects devices failing the validity invariant (`InvalidParam`) and
    /// MACs that are already registered (`Duplicate`).
    async fn insert(&self, device: Device) -> RegistryResult<Device>;

    /// Delete by MAC; deleting an absent record succeeds
    async fn delete_by_mac(&self, mac: &MacId) -> RegistryResult<()>;

    /// Replace the schedule of one device
    async fn patch_schedule(&self, mac: &MacId, schedule: &Schedule) -> RegistryResult<()>;

    /// Append owners with set semantics, or replace the owner list wholesale
    async fn patch_owners(
        &self,
        mac: &MacId,
        owners: Vec<String>,
        replace: bool,
    ) -> RegistryResult<()>;

    /// Devices owned by `owner`, in insertion order
    async fn query_by_owner(&self, owner: &str) -> RegistryResult<Vec<Device>>;
}
