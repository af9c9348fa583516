use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::transport::DeliveryTarget;

pub type JobId = String;

/// Coarse, caller-facing status. Only this field decides completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    NeedsInput,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::NeedsInput => "needs_input",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }
}

/// Pipeline sub-step, informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Pull,
    Choose,
    Copy,
    Fix,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Pull => "pull",
            Phase::Choose => "choose",
            Phase::Copy => "copy",
            Phase::Fix => "fix",
            Phase::Done => "done",
        }
    }
}

/// Everything needed to finish a job paused on the directory name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameChoice {
    pub choices: Vec<String>,
    pub suggested: String,
    pub current_name: String,
    pub parent_dir: PathBuf,
    pub pulled_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Pulling,
    Resolving,
    NeedsInput(NameChoice),
    Copying { progress: u8 },
    Fixing,
    Succeeded,
    Failed { progress: u8, error: String },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Pulling | JobState::Resolving | JobState::Copying { .. } | JobState::Fixing => {
                JobStatus::Running
            }
            JobState::NeedsInput(_) => JobStatus::NeedsInput,
            JobState::Succeeded => JobStatus::Success,
            JobState::Failed { .. } => JobStatus::Error,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            JobState::Pending => Phase::Pending,
            JobState::Pulling => Phase::Pull,
            JobState::Resolving | JobState::NeedsInput(_) => Phase::Choose,
            JobState::Copying { .. } => Phase::Copy,
            JobState::Fixing => Phase::Fix,
            JobState::Succeeded | JobState::Failed { .. } => Phase::Done,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            JobState::Copying { progress } | JobState::Failed { progress, .. } => *progress,
            JobState::Fixing | JobState::Succeeded => 100,
            _ => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn choice(&self) -> Option<&NameChoice> {
        match self {
            JobState::NeedsInput(choice) => Some(choice),
            _ => None,
        }
    }

    /// Whether the pipeline may move a job from `self` to `next`.
    ///
    /// `NeedsInput -> Copying` is deliberately absent: only the atomic
    /// resume claim in the store performs it.
    pub fn can_transition(&self, next: &JobState) -> bool {
        if matches!(next, JobState::Failed { .. }) {
            return !self.is_terminal() && !matches!(self, JobState::NeedsInput(_));
        }
        match self {
            JobState::Pending => matches!(next, JobState::Pulling),
            JobState::Pulling => matches!(next, JobState::Resolving | JobState::Succeeded),
            JobState::Resolving => matches!(
                next,
                JobState::NeedsInput(_) | JobState::Copying { .. } | JobState::Succeeded
            ),
            JobState::NeedsInput(_) => false,
            JobState::Copying { .. } => matches!(next, JobState::Fixing),
            JobState::Fixing => matches!(next, JobState::Succeeded),
            JobState::Succeeded | JobState::Failed { .. } => false,
        }
    }
}

/// What a caller asked for when starting a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub image_type: String,
    pub image_id: String,
    pub name: String,
    pub target: Option<DeliveryTarget>,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub request: InstallRequest,
    pub state: JobState,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, request: InstallRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            request,
            state: JobState::Pending,
            message: "Queued".to_string(),
            stdout: String::new(),
            stderr: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            status: self.state.status(),
            phase: self.state.phase(),
            progress: self.state.progress(),
            message: self.message.clone(),
            error: self.state.error().map(str::to_string),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            image_type: self.request.image_type.clone(),
            image_id: self.request.image_id.clone(),
            name: self.request.name.clone(),
            eve_ip: self.request.target.as_ref().map(|t| t.host.clone()),
            eve_user: self.request.target.as_ref().map(|t| t.user.clone()),
            choice: self.state.choice().cloned(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only view handed to pollers. Never carries the password.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub phase: Phase,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "type")]
    pub image_type: String,
    #[serde(rename = "id")]
    pub image_id: String,
    pub name: String,
    pub eve_ip: Option<String>,
    pub eve_user: Option<String>,
    #[serde(flatten)]
    pub choice: Option<NameChoice>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields to merge into a record. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub message: Option<String>,
    pub progress: Option<u8>,
}

impl JobUpdate {
    pub fn to(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
