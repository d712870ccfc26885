pub mod error;
pub mod fake;
pub mod instance;
pub mod os_plugin;
pub mod provider;
pub mod registry;
pub mod rhel;

pub use error::{ProviderError, Result};
pub use instance::{sorted_addresses, Instance, InstanceAddress, InstanceStatus};
pub use os_plugin::{NoopOsPlugin, OsPlugin, OsPluginRegistry};
pub use provider::{MachineContext, Provider};
pub use registry::ProviderRegistry;
pub use rhel::{RhelOsPlugin, RhsmClient, FINALIZER_REDHAT_SUBSCRIPTION};
