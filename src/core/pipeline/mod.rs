//! The install pipeline: fetch, resolve the directory name, copy, repair
//! permissions.
//!
//! Every job runs on its own spawned task and talks to the outside world
//! only through the [`JobStore`]. A job that needs an operator decision
//! parks itself in `needs_input`; [`Installer::resume`] picks it back up at
//! the copy phase.

pub mod progress;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::config::{Config, FetchConfig};
use crate::core::jobs::{
    InstallRequest, JobId, JobSnapshot, JobState, JobStatus, JobStore, JobStoreError, JobUpdate,
    NameChoice,
};
use crate::core::naming;
use crate::core::process::{CommandRunner, CommandSpec, ProcessOutput};
use crate::core::transport::{DeliveryTarget, RemoteTransport, is_plain_remote_path};

use progress::{parse_fetch_path, parse_progress_line, strip_ansi};

/// Synchronous rejections. Pipeline failures are recorded on the job instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    InvalidName(String),
    #[error("Job {0} not found")]
    UnknownJob(JobId),
    #[error("Job {0} is not waiting for a name")]
    NotAwaitingInput(JobId),
}

impl From<JobStoreError> for InstallError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => InstallError::UnknownJob(id),
            JobStoreError::NotAwaitingInput(id) => InstallError::NotAwaitingInput(id),
        }
    }
}

/// Validate raw request fields into an [`InstallRequest`].
pub fn install_request(
    image_type: &str,
    image_id: &str,
    name: Option<&str>,
    host: Option<&str>,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<InstallRequest, InstallError> {
    let image_type = image_type.trim().to_lowercase();
    let image_id = image_id.trim().to_string();
    if image_type.is_empty() || image_id.is_empty() {
        return Err(InstallError::InvalidRequest(
            "Image type and id are required".to_string(),
        ));
    }
    let target =
        DeliveryTarget::from_parts(host, user, password).map_err(InstallError::InvalidRequest)?;

    Ok(InstallRequest {
        image_type,
        image_id,
        name: name.map(str::trim).unwrap_or_default().to_string(),
        target,
    })
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch: FetchConfig,
    pub base_dir: PathBuf,
    pub fix_permissions: String,
    pub transport: RemoteTransport,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch: config.fetch.clone(),
            base_dir: config.remote.base_dir.clone(),
            fix_permissions: config.remote.fix_permissions.clone(),
            transport: RemoteTransport::new(&config.remote),
        }
    }

    fn fetch_command(&self, request: &InstallRequest) -> CommandSpec {
        CommandSpec::new(&self.fetch.program)
            .args(self.fetch.args.iter().cloned())
            .arg(&request.image_type)
            .arg(&request.image_id)
    }
}

/// Where the fetched directory should land on the lab host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Copy to the given path unchanged.
    Keep(PathBuf),
    /// A family rule renamed the directory.
    Rename(PathBuf, String),
    /// No safe default; an operator has to pick.
    Ask(NameChoice),
}

/// Decide the remote directory for a fetched artifact at `local`.
///
/// Only directories directly under `base_dir` are subject to the
/// `vendor-product` convention; anything else is copied to the same path.
pub fn resolve_destination(local: &Path, base_dir: &Path, catalog_name: &str) -> Resolution {
    let keep = Resolution::Keep(local.to_path_buf());
    let (Some(parent), Some(current)) = (
        local.parent(),
        local.file_name().and_then(|name| name.to_str()),
    ) else {
        return keep;
    };
    if parent != base_dir {
        return keep;
    }

    if let Some(suggestion) = naming::apply_family_rules(current, catalog_name) {
        if suggestion == current {
            return keep;
        }
        return Resolution::Rename(parent.join(&suggestion), suggestion);
    }
    if current.contains('-') {
        return keep;
    }

    let (suggested, choices) = naming::build_choices(current, catalog_name);
    if choices.is_empty() {
        warn!(
            "No hyphenated name can be formed for {}; copying unchanged",
            local.display()
        );
        return keep;
    }
    Resolution::Ask(NameChoice {
        choices,
        suggested,
        current_name: current.to_string(),
        parent_dir: parent.to_path_buf(),
        pulled_path: local.to_path_buf(),
    })
}

/// A fatal condition inside one phase.
#[derive(Debug)]
struct PhaseFailure {
    message: String,
    error: String,
}

impl PhaseFailure {
    fn new(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: error.into(),
        }
    }

    fn spawn(what: &str, err: io::Error) -> Self {
        Self::new(format!("Failed to start {what}"), err.to_string())
    }

    fn process(message: impl Into<String>, output: &ProcessOutput) -> Self {
        Self::new(message, strip_ansi(&output.failure_reason()))
    }
}

/// Job control surface: start, resume and poll install jobs.
#[derive(Clone)]
pub struct Installer {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn CommandRunner>,
    settings: Arc<PipelineSettings>,
}

impl Installer {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn CommandRunner>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            runner,
            settings: Arc::new(settings),
        }
    }

    /// Create a job and run it in the background. Returns immediately.
    pub async fn start(&self, request: InstallRequest) -> Result<JobId, InstallError> {
        let (job_id, _) = self.launch(request).await?;
        Ok(job_id)
    }

    /// Blocking variant: returns once the job pauses or finishes.
    pub async fn start_and_wait(&self, request: InstallRequest) -> Result<JobSnapshot, InstallError> {
        let (job_id, handle) = self.launch(request).await?;
        if let Err(e) = handle.await {
            error!("Install worker for job {} panicked: {}", job_id, e);
        }
        self.poll(&job_id).await
    }

    /// Continue a paused job with the operator's directory name.
    pub async fn resume(&self, job_id: &str, name: &str) -> Result<(), InstallError> {
        self.launch_resume(job_id, name).await.map(|_| ())
    }

    pub async fn resume_and_wait(&self, job_id: &str, name: &str) -> Result<JobSnapshot, InstallError> {
        let handle = self.launch_resume(job_id, name).await?;
        if let Err(e) = handle.await {
            error!("Install worker for job {} panicked: {}", job_id, e);
        }
        self.poll(job_id).await
    }

    pub async fn poll(&self, job_id: &str) -> Result<JobSnapshot, InstallError> {
        Ok(self.store.get(job_id).await?)
    }

    pub async fn list(&self) -> Vec<JobSnapshot> {
        self.store.list().await
    }

    /// Run the permission-repair command once, outside any job.
    pub async fn fix_permissions(&self, target: &DeliveryTarget) -> io::Result<ProcessOutput> {
        let spec = self
            .settings
            .transport
            .remote_command(target, &self.settings.fix_permissions);
        info!("Running permission repair on {}", target.host);
        let mut output = self.runner.run(&spec).await?;
        output.stdout = strip_ansi(&output.stdout);
        output.stderr = strip_ansi(&output.stderr);
        Ok(output)
    }

    async fn launch(&self, request: InstallRequest) -> Result<(JobId, JoinHandle<()>), InstallError> {
        if request.image_type.trim().is_empty() || request.image_id.trim().is_empty() {
            return Err(InstallError::InvalidRequest(
                "Image type and id are required".to_string(),
            ));
        }

        let job_id = self.store.create(request.clone()).await;
        info!(
            "Job {}: install {} {} queued",
            job_id, request.image_type, request.image_id
        );

        let installer = self.clone();
        let id = job_id.clone();
        let handle = tokio::spawn(async move {
            installer.run_job(id, request).await;
        });
        Ok((job_id, handle))
    }

    async fn launch_resume(&self, job_id: &str, raw_name: &str) -> Result<JoinHandle<()>, InstallError> {
        let job = self.store.get(job_id).await?;
        let choice = match (job.status, job.choice) {
            (JobStatus::NeedsInput, Some(choice)) => choice,
            _ => return Err(InstallError::NotAwaitingInput(job_id.to_string())),
        };

        if raw_name.trim().is_empty() {
            return Err(InstallError::InvalidRequest("A name is required".to_string()));
        }
        let name = naming::normalize_choice(raw_name).ok_or_else(|| {
            InstallError::InvalidName(format!("'{}' is not a valid directory name", raw_name.trim()))
        })?;
        if choice.parent_dir == self.settings.base_dir && !name.contains('-') {
            return Err(InstallError::InvalidName(format!(
                "'{name}' must be hyphenated like vendor-product"
            )));
        }

        let remote = choice.parent_dir.join(&name);
        let context = self
            .store
            .claim_resume(job_id, &format!("Copying to {}", remote.display()))
            .await?;
        info!("Job {}: resuming with directory '{}'", job_id, name);

        let installer = self.clone();
        let id = job_id.to_string();
        Ok(tokio::spawn(async move {
            let local = context.choice.pulled_path;
            if let Err(failure) = installer.deliver(&id, &context.target, &local, &remote).await {
                installer.fail(&id, failure).await;
            }
        }))
    }

    async fn run_job(self, job_id: JobId, request: InstallRequest) {
        if let Err(failure) = self.drive(&job_id, &request).await {
            self.fail(&job_id, failure).await;
        }
    }

    async fn drive(&self, job_id: &str, request: &InstallRequest) -> Result<(), PhaseFailure> {
        let pulled = self.pull(job_id, request).await?;

        let (Some(local), Some(target)) = (pulled, request.target.as_ref()) else {
            let message = if request.target.is_none() {
                "Image fetched; no delivery target given"
            } else {
                "Image fetched; no path reported for delivery"
            };
            info!("Job {}: {}", job_id, message);
            self.store
                .update(job_id, JobUpdate::to(JobState::Succeeded).with_message(message))
                .await;
            return Ok(());
        };

        self.store
            .update(
                job_id,
                JobUpdate::to(JobState::Resolving).with_message("Resolving directory name"),
            )
            .await;

        let catalog_name = naming::sanitize(&request.name);
        let remote = match resolve_destination(&local, &self.settings.base_dir, &catalog_name) {
            Resolution::Keep(remote) => remote,
            Resolution::Rename(remote, name) => {
                info!(
                    "Job {}: family rule renames '{}' to '{}'",
                    job_id,
                    local.display(),
                    name
                );
                remote
            }
            Resolution::Ask(choice) => {
                info!(
                    "Job {}: waiting for a directory name ({} candidates)",
                    job_id,
                    choice.choices.len()
                );
                let message = format!(
                    "'{}' is not hyphenated; choose a directory name",
                    choice.current_name
                );
                self.store
                    .update(job_id, JobUpdate::to(JobState::NeedsInput(choice)).with_message(message))
                    .await;
                return Ok(());
            }
        };

        if !is_plain_remote_path(&remote) {
            return Err(PhaseFailure::new(
                "Unsupported remote path",
                format!(
                    "'{}' contains whitespace or shell metacharacters",
                    remote.display()
                ),
            ));
        }

        self.store
            .update(
                job_id,
                JobUpdate::to(JobState::Copying { progress: 0 })
                    .with_message(format!("Copying to {}", remote.display())),
            )
            .await;
        self.deliver(job_id, target, &local, &remote).await
    }

    async fn pull(&self, job_id: &str, request: &InstallRequest) -> Result<Option<PathBuf>, PhaseFailure> {
        self.store
            .update(
                job_id,
                JobUpdate::to(JobState::Pulling).with_message(format!(
                    "Fetching {} {}",
                    request.image_type, request.image_id
                )),
            )
            .await;

        let spec = self.settings.fetch_command(request);
        info!("Job {}: {}", job_id, spec);
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| PhaseFailure::spawn("fetch", e))?;

        let stdout = strip_ansi(&output.stdout);
        let stderr = strip_ansi(&output.stderr);
        self.store.append_logs(job_id, &stdout, &stderr).await;

        if !output.success() {
            return Err(PhaseFailure::process("Fetch failed", &output));
        }
        Ok(parse_fetch_path(&format!("{stdout}\n{stderr}")))
    }

    /// Copy then fix. Expects the job to already be in the copy phase.
    async fn deliver(
        &self,
        job_id: &str,
        target: &DeliveryTarget,
        local: &Path,
        remote: &Path,
    ) -> Result<(), PhaseFailure> {
        let transport = &self.settings.transport;

        let mkdir = transport.make_dir(target, remote);
        info!("Job {}: {}", job_id, mkdir);
        let output = self
            .runner
            .run(&mkdir)
            .await
            .map_err(|e| PhaseFailure::spawn("ssh", e))?;
        self.store
            .append_logs(job_id, &strip_ansi(&output.stdout), &strip_ansi(&output.stderr))
            .await;
        if !output.success() {
            return Err(PhaseFailure::process(
                "Failed to create remote directory",
                &output,
            ));
        }

        let copy = transport.copy_tree(target, local, remote);
        info!("Job {}: {}", job_id, copy);
        let output = self.copy_with_progress(job_id, &copy).await?;
        self.store
            .append_logs(job_id, &strip_ansi(&output.stdout), "")
            .await;
        if !output.success() {
            return Err(PhaseFailure::process("Copy failed", &output));
        }

        self.store
            .update(
                job_id,
                JobUpdate::to(JobState::Fixing).with_message("Fixing permissions"),
            )
            .await;
        let fix = transport.remote_command(target, &self.settings.fix_permissions);
        info!("Job {}: {}", job_id, fix);
        let output = self
            .runner
            .run(&fix)
            .await
            .map_err(|e| PhaseFailure::spawn("ssh", e))?;
        self.store
            .append_logs(job_id, &strip_ansi(&output.stdout), &strip_ansi(&output.stderr))
            .await;
        if !output.success() {
            return Err(PhaseFailure::process("Permission repair failed", &output));
        }

        info!("Job {}: installed to {}", job_id, remote.display());
        self.store
            .update(
                job_id,
                JobUpdate::to(JobState::Succeeded)
                    .with_message(format!("Installed to {}", remote.display())),
            )
            .await;
        Ok(())
    }

    /// Run the copy, feeding each diagnostic line to the job as it arrives.
    ///
    /// The returned stderr holds only the non-progress lines, so a failure
    /// reason is never buried under progress redraws.
    async fn copy_with_progress(
        &self,
        job_id: &str,
        spec: &CommandSpec,
    ) -> Result<ProcessOutput, PhaseFailure> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let consume = async {
            let mut diagnostics = String::new();
            while let Some(line) = rx.recv().await {
                let cleaned = strip_ansi(&line);
                match parse_progress_line(&cleaned) {
                    Some(pct) => self.store.update(job_id, JobUpdate::progress(pct)).await,
                    None => {
                        let entry = format!("{cleaned}\n");
                        self.store.append_logs(job_id, "", &entry).await;
                        diagnostics.push_str(&entry);
                    }
                }
            }
            diagnostics
        };

        let (result, diagnostics) = tokio::join!(self.runner.run_streaming(spec, tx), consume);
        let mut output = result.map_err(|e| PhaseFailure::spawn("scp", e))?;
        output.stderr = diagnostics;
        Ok(output)
    }

    async fn fail(&self, job_id: &str, failure: PhaseFailure) {
        let progress = self
            .store
            .get(job_id)
            .await
            .map(|job| job.progress)
            .unwrap_or(0);
        error!("Job {}: {}: {}", job_id, failure.message, failure.error);
        self.store
            .update(
                job_id,
                JobUpdate::to(JobState::Failed {
                    progress,
                    error: failure.error,
                })
                .with_message(failure.message),
            )
            .await;
    }
}
