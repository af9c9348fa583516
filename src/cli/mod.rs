mod doctor;
mod fix;
mod install;
mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::core::config::Config;
use crate::core::jobs::InMemoryJobStore;
use crate::core::pipeline::{Installer, PipelineSettings};
use crate::core::process::TokioCommandRunner;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Run the HTTP API for install jobs")
        .command("install", "Fetch an image and deliver it to a lab host")
        .command("fix", "Run the permission repair on a lab host")
        .print();

    GuideSection::new("Diagnostics")
        .command("doctor", "Check that required tools are installed")
        .command("help", "Show this help")
        .print();

    GuideSection::new("Common flags")
        .text("--config <path>   TOML config file (default: $LABDROP_CONFIG, then ~/.config/labdrop/config.toml)")
        .text("--verbose, -v     Debug logging")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("labdrop").green()
    );
}

fn print_install_help() {
    GuideSection::new("labdrop install")
        .text("Fetch a catalog image and copy it onto an EVE host.")
        .blank()
        .text("--type <type>       Image type, e.g. qemu (required)")
        .text("--id <id>           Catalog id (required)")
        .text("--name <name>       Catalog name, used to suggest a directory")
        .text("--eve-ip <addr>     Lab host address")
        .text("--eve-user <user>   Lab host user")
        .text("--eve-pass <pass>   Lab host password")
        .text("--choose <name>     Directory name to use if one must be picked")
        .blank()
        .text("Without --eve-* flags the image is only fetched.")
        .print();
    println!();
}

/// Flags every command accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct GlobalFlags {
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

pub(crate) fn parse_global_flags(args: &[String], start: usize) -> GlobalFlags {
    let mut flags = GlobalFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    flags
}

pub(crate) fn parse_serve_flags(
    args: &[String],
    start: usize,
    mut host: String,
    mut port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().unwrap_or(port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (host, port)
}

/// Lab host credentials shared by `install` and `fix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TargetArgs {
    pub eve_ip: Option<String>,
    pub eve_user: Option<String>,
    pub eve_pass: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct InstallArgs {
    pub image_type: Option<String>,
    pub image_id: Option<String>,
    pub name: Option<String>,
    pub target: TargetArgs,
    pub choose: Option<String>,
    pub show_help: bool,
}

pub(crate) fn parse_install_args(args: &[String], start: usize) -> InstallArgs {
    let mut parsed = InstallArgs::default();
    let mut i = start;
    while i < args.len() {
        let slot = match args[i].as_str() {
            "--help" | "-h" => {
                parsed.show_help = true;
                i += 1;
                continue;
            }
            "--type" | "-t" => &mut parsed.image_type,
            "--id" => &mut parsed.image_id,
            "--name" => &mut parsed.name,
            "--eve-ip" => &mut parsed.target.eve_ip,
            "--eve-user" => &mut parsed.target.eve_user,
            "--eve-pass" => &mut parsed.target.eve_pass,
            "--choose" => &mut parsed.choose,
            _ => {
                i += 1;
                continue;
            }
        };
        if i + 1 < args.len() {
            *slot = Some(args[i + 1].clone());
            i += 2;
        } else {
            i += 1;
        }
    }
    parsed
}

pub(crate) fn parse_target_args(args: &[String], start: usize) -> TargetArgs {
    let install = parse_install_args(args, start);
    install.target
}

/// Wire the installer the way every command uses it.
pub(crate) fn build_installer(config: &Config) -> Installer {
    Installer::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(TokioCommandRunner),
        PipelineSettings::from_config(config),
    )
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");
    let flags = parse_global_flags(&args, 2);

    match cmd {
        "serve" => {
            let log_tx = crate::logging::init(flags.verbose, false);
            let config = Config::load(flags.config.as_deref()).await?;
            let (host, port) =
                parse_serve_flags(&args, 2, config.server.host.clone(), config.server.port);
            serve::run_serve(&config, log_tx, host, port).await?;
        }
        "install" => {
            let parsed = parse_install_args(&args, 2);
            if parsed.show_help {
                print_install_help();
                return Ok(());
            }
            crate::logging::init(flags.verbose, !flags.verbose);
            let config = Config::load(flags.config.as_deref()).await?;
            install::run_install(&config, parsed).await?;
        }
        "fix" => {
            crate::logging::init(flags.verbose, !flags.verbose);
            let config = Config::load(flags.config.as_deref()).await?;
            fix::run_fix(&config, parse_target_args(&args, 2)).await?;
        }
        "doctor" => {
            crate::logging::init(flags.verbose, !flags.verbose);
            let config = Config::load(flags.config.as_deref()).await?;
            doctor::run_doctor(&config).await?;
        }
        "help" | "--help" | "-h" => print_help(),
        other => {
            print_error(&format!("Unknown command: {other}"));
            print_help();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn parse_global_flags_reads_config_and_verbose() {
        let args = argv(&["labdrop", "serve", "--config", "/etc/labdrop.toml", "-v"]);
        let flags = parse_global_flags(&args, 2);
        assert_eq!(flags.config, Some(PathBuf::from("/etc/labdrop.toml")));
        assert!(flags.verbose);
    }

    #[test]
    fn parse_serve_flags_overrides_defaults() {
        let args = argv(&["labdrop", "serve", "--host", "127.0.0.1", "--port", "9000"]);
        let (host, port) = parse_serve_flags(&args, 2, "0.0.0.0".to_string(), 8080);
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 9000);
    }

    #[test]
    fn parse_serve_flags_keeps_default_on_bad_port() {
        let args = argv(&["labdrop", "serve", "--port", "eighty"]);
        let (_, port) = parse_serve_flags(&args, 2, "0.0.0.0".to_string(), 8080);
        assert_eq!(port, 8080);
    }

    #[test]
    fn parse_install_args_reads_all_fields() {
        let args = argv(&[
            "labdrop",
            "install",
            "--type",
            "qemu",
            "--id",
            "812",
            "--name",
            "Huawei NE40E",
            "--eve-ip",
            "10.0.0.5",
            "--eve-user",
            "root",
            "--eve-pass",
            "eve",
            "--choose",
            "huaweine40e-ne40e",
        ]);
        let parsed = parse_install_args(&args, 2);
        assert_eq!(parsed.image_type.as_deref(), Some("qemu"));
        assert_eq!(parsed.image_id.as_deref(), Some("812"));
        assert_eq!(parsed.name.as_deref(), Some("Huawei NE40E"));
        assert_eq!(parsed.target.eve_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(parsed.target.eve_pass.as_deref(), Some("eve"));
        assert_eq!(parsed.choose.as_deref(), Some("huaweine40e-ne40e"));
        assert!(!parsed.show_help);
    }

    #[test]
    fn parse_install_args_tolerates_dangling_flag() {
        let args = argv(&["labdrop", "install", "--id"]);
        let parsed = parse_install_args(&args, 2);
        assert!(parsed.image_id.is_none());
    }

    #[test]
    fn parse_target_args_ignores_install_fields() {
        let args = argv(&["labdrop", "fix", "--eve-ip", "fd00::5", "--eve-user", "root"]);
        let target = parse_target_args(&args, 2);
        assert_eq!(target.eve_ip.as_deref(), Some("fd00::5"));
        assert_eq!(target.eve_user.as_deref(), Some("root"));
        assert!(target.eve_pass.is_none());
    }
}
