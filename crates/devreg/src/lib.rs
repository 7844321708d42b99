pub mod api;
pub mod broker;
pub mod config;
pub mod device;
pub mod error;
pub mod service;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use device::Device;
pub use device::MacId;
pub use device::Schedule;
pub use error::ErrorKind;
pub use error::RegistryError;
pub use service::DeviceService;
pub use sync::ConfigSync;
pub use sync::RollbackPolicy;
