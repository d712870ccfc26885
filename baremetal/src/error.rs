use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("no unclaimed hardware available")]
    NoHardwareAvailable,

    #[error("ssh command failed: {0}")]
    SshFailed(String),

    #[error("invalid netmask: {0}")]
    InvalidNetmask(String),
}
