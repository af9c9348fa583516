use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use crate::core::config::Config;
use crate::core::jobs::{JobSnapshot, JobStatus, NameChoice};
use crate::core::pipeline::{InstallError, Installer, install_request};
use crate::core::terminal::{
    print_error, print_info, print_progress, print_status, print_step, print_success, print_warn,
};

use super::InstallArgs;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const OTHER_NAME: &str = "Other name...";

/// Run one install job in-process, rendering its progress on the terminal.
pub async fn run_install(config: &Config, args: InstallArgs) -> Result<()> {
    let request = install_request(
        args.image_type.as_deref().unwrap_or_default(),
        args.image_id.as_deref().unwrap_or_default(),
        args.name.as_deref(),
        args.target.eve_ip.as_deref(),
        args.target.eve_user.as_deref(),
        args.target.eve_pass.as_deref(),
    )?;

    let installer = super::build_installer(config);
    print_step(&format!(
        "Installing {} {}",
        request.image_type, request.image_id
    ));
    if request.target.is_none() {
        print_info("No lab host given; the image will only be fetched.");
    }

    let job_id = installer.start(request).await?;
    let mut preset = args.choose;

    loop {
        let job = wait_until_settled(&installer, &job_id).await?;
        println!();
        match job.status {
            JobStatus::Success => {
                print_success(&job.message);
                return Ok(());
            }
            JobStatus::Error => {
                print_error(&job.message);
                let stderr = job.stderr.trim();
                if !stderr.is_empty() {
                    for line in stderr.lines().rev().take(5).collect::<Vec<_>>().into_iter().rev() {
                        print_status("stderr", line);
                    }
                }
                bail!(
                    "Install failed: {}",
                    job.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            JobStatus::NeedsInput => {
                let choice = job
                    .choice
                    .ok_or_else(|| anyhow!("Job is waiting for a name but offered no choices"))?;
                print_warn(&job.message);
                resume_with_name(&installer, &job_id, &choice, preset.take()).await?;
            }
            JobStatus::Pending | JobStatus::Running => {}
        }
    }
}

/// Poll until the job needs input or reaches a terminal state.
async fn wait_until_settled(installer: &Installer, job_id: &str) -> Result<JobSnapshot> {
    let mut last: Option<(String, u8, String)> = None;
    loop {
        let job = installer.poll(job_id).await?;
        let current = (job.phase.as_str().to_string(), job.progress, job.message.clone());
        if last.as_ref() != Some(&current) {
            print_progress(&current.0, current.1, &current.2);
            last = Some(current);
        }
        if job.status.is_terminal() || job.status == JobStatus::NeedsInput {
            return Ok(job);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn resume_with_name(
    installer: &Installer,
    job_id: &str,
    choice: &NameChoice,
    mut preset: Option<String>,
) -> Result<()> {
    print_status(
        "Current directory",
        &choice.parent_dir.join(&choice.current_name).display().to_string(),
    );
    loop {
        let interactive = preset.is_none();
        let name = match preset.take() {
            Some(name) => name,
            None => prompt_for_name(choice)?,
        };
        match installer.resume(job_id, &name).await {
            Ok(()) => {
                print_info(&format!("Using '{name}'"));
                return Ok(());
            }
            Err(e @ (InstallError::InvalidName(_) | InstallError::InvalidRequest(_)))
                if interactive =>
            {
                print_error(&e.to_string());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn prompt_for_name(choice: &NameChoice) -> Result<String> {
    let mut options: Vec<&str> = choice.choices.iter().map(String::as_str).collect();
    options.push(OTHER_NAME);
    let start = choice
        .choices
        .iter()
        .position(|c| *c == choice.suggested)
        .unwrap_or(0);

    let picked = inquire::Select::new("Directory name on the lab host:", options)
        .with_starting_cursor(start)
        .with_help_message("Folders here must be named vendor-product")
        .prompt()?;

    if picked == OTHER_NAME {
        Ok(inquire::Text::new("Directory name:")
            .with_help_message("e.g. huaweine40e-ne40e")
            .prompt()?)
    } else {
        Ok(picked.to_string())
    }
}
