use anyhow::{Result, anyhow, bail};

use crate::core::config::Config;
use crate::core::terminal::{print_error, print_status, print_step, print_success};
use crate::core::transport::DeliveryTarget;

use super::TargetArgs;

/// Run the permission-repair command once against a lab host.
pub async fn run_fix(config: &Config, args: TargetArgs) -> Result<()> {
    let target = DeliveryTarget::from_parts(
        args.eve_ip.as_deref(),
        args.eve_user.as_deref(),
        args.eve_pass.as_deref(),
    )
    .map_err(|e| anyhow!(e))?
    .ok_or_else(|| anyhow!("--eve-ip, --eve-user and --eve-pass are required"))?;

    print_step(&format!("Fixing permissions on {}", target.host));
    let installer = super::build_installer(config);
    let output = installer.fix_permissions(&target).await?;

    for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
        print_status("stdout", line);
    }
    if output.success() {
        print_success("Permissions fixed.");
        Ok(())
    } else {
        print_error(&output.failure_reason());
        bail!("Permission repair failed");
    }
}
