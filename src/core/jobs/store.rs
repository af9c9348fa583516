use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::types::{
    InstallRequest, JobId, JobRecord, JobSnapshot, JobState, JobUpdate, NameChoice,
};
use crate::core::transport::DeliveryTarget;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobStoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),
    #[error("Job {0} is not waiting for a name")]
    NotAwaitingInput(JobId),
}

/// What a resumed worker needs, handed out exactly once per pause.
#[derive(Debug, Clone)]
pub struct ResumeContext {
    pub choice: NameChoice,
    pub target: DeliveryTarget,
}

/// Registry of install jobs.
///
/// Mutations against a job that is missing or already terminal are
/// silently dropped; callers must not assume they are observable.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, request: InstallRequest) -> JobId;

    async fn get(&self, id: &str) -> Result<JobSnapshot, JobStoreError>;

    /// Every job, newest first.
    async fn list(&self) -> Vec<JobSnapshot>;

    async fn update(&self, id: &str, update: JobUpdate);

    async fn append_logs(&self, id: &str, stdout: &str, stderr: &str);

    /// Atomically move a paused job into the copy phase.
    async fn claim_resume(&self, id: &str, message: &str) -> Result<ResumeContext, JobStoreError>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_update(record: &mut JobRecord, update: JobUpdate) {
    if let Some(next) = update.state {
        if !record.state.can_transition(&next) {
            debug!(
                "Job {}: ignoring transition {}/{} -> {}/{}",
                record.id,
                record.state.status().as_str(),
                record.state.phase().as_str(),
                next.status().as_str(),
                next.phase().as_str()
            );
            return;
        }
        record.state = next;
    }

    if let Some(progress) = update.progress
        && let JobState::Copying { progress: current } = &mut record.state
    {
        *current = (*current).max(progress.min(100));
    }

    if let Some(message) = update.message {
        record.message = message;
    }
    record.updated_at = Utc::now();
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, request: InstallRequest) -> JobId {
        let id = uuid::Uuid::new_v4().to_string();
        let record = JobRecord::new(id.clone(), request);
        self.jobs.write().await.insert(id.clone(), record);
        id
    }

    async fn get(&self, id: &str) -> Result<JobSnapshot, JobStoreError> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(JobRecord::snapshot)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let mut snapshots: Vec<JobSnapshot> = jobs.values().map(JobRecord::snapshot).collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    async fn update(&self, id: &str, update: JobUpdate) {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(id) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        apply_update(record, update);
    }

    async fn append_logs(&self, id: &str, stdout: &str, stderr: &str) {
        if stdout.is_empty() && stderr.is_empty() {
            return;
        }
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(id) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        record.stdout.push_str(stdout);
        record.stderr.push_str(stderr);
        record.updated_at = Utc::now();
    }

    async fn claim_resume(&self, id: &str, message: &str) -> Result<ResumeContext, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        let (JobState::NeedsInput(choice), Some(target)) = (&record.state, &record.request.target)
        else {
            return Err(JobStoreError::NotAwaitingInput(id.to_string()));
        };
        let context = ResumeContext {
            choice: choice.clone(),
            target: target.clone(),
        };

        record.state = JobState::Copying { progress: 0 };
        record.message = message.to_string();
        record.updated_at = Utc::now();
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::types::{JobStatus, Phase};
    use std::path::PathBuf;

    fn request(target: bool) -> InstallRequest {
        InstallRequest {
            image_type: "qemu".to_string(),
            image_id: "1".to_string(),
            name: "vyos".to_string(),
            target: target.then(|| DeliveryTarget::new("10.0.0.5", "root", "pw")),
        }
    }

    fn choice() -> NameChoice {
        NameChoice {
            choices: vec!["vyos-vyos".to_string()],
            suggested: "vyos-vyos".to_string(),
            current_name: "vyos".to_string(),
            parent_dir: PathBuf::from("/opt/unetlab/addons/qemu"),
            pulled_path: PathBuf::from("/opt/unetlab/addons/qemu/vyos"),
        }
    }

    async fn paused(store: &InMemoryJobStore) -> JobId {
        let id = store.create(request(true)).await;
        store.update(&id, JobUpdate::to(JobState::Pulling)).await;
        store.update(&id, JobUpdate::to(JobState::Resolving)).await;
        store
            .update(&id, JobUpdate::to(JobState::NeedsInput(choice())))
            .await;
        id
    }

    #[tokio::test]
    async fn create_starts_pending_with_empty_logs() {
        let store = InMemoryJobStore::new();
        let id = store.create(request(false)).await;
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.phase, Phase::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.stdout.is_empty() && job.stderr.is_empty());
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = InMemoryJobStore::new();
        let a = store.create(request(false)).await;
        let b = store.create(request(false)).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        assert_eq!(
            store.get("missing").await.unwrap_err(),
            JobStoreError::NotFound("missing".to_string())
        );
        // Updates to a missing job are a no-op.
        store.update("missing", JobUpdate::message("x")).await;
        store.append_logs("missing", "a", "b").await;
    }

    #[tokio::test]
    async fn logs_are_appended_in_order() {
        let store = InMemoryJobStore::new();
        let id = store.create(request(false)).await;
        store.append_logs(&id, "one\n", "").await;
        store.append_logs(&id, "two\n", "warn\n").await;
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.stdout, "one\ntwo\n");
        assert_eq!(job.stderr, "warn\n");
    }

    #[tokio::test]
    async fn copy_progress_is_clamped_and_never_decreases() {
        let store = InMemoryJobStore::new();
        let id = store.create(request(true)).await;
        store.update(&id, JobUpdate::to(JobState::Pulling)).await;
        store.update(&id, JobUpdate::to(JobState::Resolving)).await;
        store
            .update(&id, JobUpdate::to(JobState::Copying { progress: 0 }))
            .await;

        store.update(&id, JobUpdate::progress(60)).await;
        store.update(&id, JobUpdate::progress(20)).await;
        assert_eq!(store.get(&id).await.unwrap().progress, 60);

        store.update(&id, JobUpdate::progress(250)).await;
        assert_eq!(store.get(&id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn progress_outside_copy_is_ignored() {
        let store = InMemoryJobStore::new();
        let id = store.create(request(false)).await;
        store.update(&id, JobUpdate::to(JobState::Pulling)).await;
        store.update(&id, JobUpdate::progress(50)).await;
        assert_eq!(store.get(&id).await.unwrap().progress, 0);
    }

    #[tokio::test]
    async fn terminal_jobs_are_frozen() {
        let store = InMemoryJobStore::new();
        let id = store.create(request(false)).await;
        store.update(&id, JobUpdate::to(JobState::Pulling)).await;
        store
            .update(
                &id,
                JobUpdate::to(JobState::Failed {
                    progress: 0,
                    error: "not found".to_string(),
                })
                .with_message("Fetch failed"),
            )
            .await;

        store.update(&id, JobUpdate::message("overwritten")).await;
        store.append_logs(&id, "late", "late").await;

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.message, "Fetch failed");
        assert_eq!(job.error.as_deref(), Some("not found"));
        assert!(job.stdout.is_empty());
    }

    #[tokio::test]
    async fn invalid_transition_is_dropped() {
        let store = InMemoryJobStore::new();
        let id = store.create(request(false)).await;
        store
            .update(&id, JobUpdate::to(JobState::Fixing).with_message("skip ahead"))
            .await;
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.phase, Phase::Pending);
        assert_eq!(job.message, "Queued");
    }

    #[tokio::test]
    async fn claim_resume_succeeds_once() {
        let store = InMemoryJobStore::new();
        let id = paused(&store).await;

        let context = store.claim_resume(&id, "Copying").await.unwrap();
        assert_eq!(context.choice.current_name, "vyos");
        assert_eq!(context.target.password, "pw");

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.phase, Phase::Copy);
        assert_eq!(job.progress, 0);
        assert!(job.choice.is_none());

        assert_eq!(
            store.claim_resume(&id, "again").await.unwrap_err(),
            JobStoreError::NotAwaitingInput(id.clone())
        );
    }

    #[tokio::test]
    async fn claim_resume_rejects_running_job_without_mutation() {
        let store = InMemoryJobStore::new();
        let id = store.create(request(true)).await;
        store
            .update(&id, JobUpdate::to(JobState::Pulling).with_message("Pulling"))
            .await;
        let before = store.get(&id).await.unwrap();

        assert!(store.claim_resume(&id, "Copying").await.is_err());
        let after = store.get(&id).await.unwrap();
        assert_eq!(after.phase, before.phase);
        assert_eq!(after.message, before.message);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let store = InMemoryJobStore::new();
        let first = store.create(request(false)).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create(request(false)).await;

        let ids: Vec<JobId> = store.list().await.into_iter().map(|j| j.job_id).collect();
        assert_eq!(ids, vec![second, first]);
    }
}
