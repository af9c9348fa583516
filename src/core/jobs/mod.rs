//! Job records and the registry that owns them.

mod store;
mod types;

pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{
    InstallRequest, JobId, JobSnapshot, JobState, JobStatus, JobUpdate, NameChoice,
};

#[cfg(test)]
pub use types::Phase;
