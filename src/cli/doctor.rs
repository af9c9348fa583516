use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use console::style;

use crate::core::config::Config;
use crate::core::terminal::{LOOKING_GLASS, print_status, print_step, print_success, print_warn};

/// Locate `program` the way the shell would: as given if it contains a
/// path separator, otherwise on `PATH`.
pub(crate) fn find_program(program: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return path.is_file().then(|| path.to_path_buf());
    }
    let path_var = path_var?;
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Check that every external tool the pipeline shells out to is present.
pub async fn run_doctor(config: &Config) -> Result<()> {
    print_step("Checking required tools...");
    println!();

    let path_var = std::env::var_os("PATH");
    let tools = [
        ("Catalog fetch", config.fetch.program.as_str()),
        ("sshpass", config.remote.sshpass.as_str()),
        ("ssh", config.remote.ssh.as_str()),
        ("scp", config.remote.scp.as_str()),
    ];

    let mut missing = 0;
    for (label, program) in tools {
        match find_program(program, path_var.as_deref()) {
            Some(found) => print_success(&format!("{label}: {}", found.display())),
            None => {
                print_warn(&format!("{label}: '{program}' not found"));
                missing += 1;
            }
        }
    }

    println!("\n{}{}", LOOKING_GLASS, style("Configuration").bold());
    print_status(
        "Managed base directory",
        &config.remote.base_dir.display().to_string(),
    );
    print_status("Permission repair", &config.remote.fix_permissions);

    if missing > 0 {
        bail!("{missing} required tool(s) missing");
    }
    print_success("All required tools are available.");
    Ok(())
}
