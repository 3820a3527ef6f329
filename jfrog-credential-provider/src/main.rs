/*!
# Introduction

jfrog-credential-provider is a kubelet image credential provider for JFrog
Artifactory. Invoked by the kubelet with no subcommand, it reads a
`CredentialProviderRequest` on stdin, exchanges the node's (or workload's)
cloud identity for an Artifactory access token, and writes a
`CredentialProviderResponse` on stdout. While the exchange runs, a background
pipeline keeps the binary itself current: it discovers newer releases,
downloads and cryptographically verifies them, validates them against the
real credential flow, and atomically swaps them into place.

Two operator-facing subcommands manage the kubelet side of the installation:

* `add-provider-config` generates this provider's descriptor from environment
  variables or merges it into the kubelet's multi-provider config, taking a
  pristine backup of the config first.
* `watch-kubelet` watches kubelet liveness after the config rollout and rolls
  the config back to the best available backup if kubelet does not stay
  healthy.

Logging in provider mode goes to a log file, because stdout belongs to the
kubelet protocol. Update failures never surface to the kubelet: the worst
outcome of a broken update attempt is a log line and an unchanged binary.
*/

mod args;
mod auth;
mod autoupdate;
mod descriptor;
mod error;
mod provider;
mod service_check;
mod settings;
mod watch;

use crate::args::{AddProviderConfigArgs, Args, SubCommand, WatchKubeletArgs};
use crate::error::Result;
use crate::service_check::SystemdCheck;
use crate::watch::WatchSession;
use kubelet_provider_config::backup::backup_config;
use kubelet_provider_config::{merge_config_files, Format};
use log::{warn, LevelFilter};
use simplelog::{Config as LogConfig, SimpleLogger, WriteLogger};
use snafu::ResultExt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::{env, io, process};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_PROVIDER_HOME: &str = "/etc/eks/image-credential-provider/";
const DEFAULT_CONFIG_NAME: &str = "config";
const DESCRIPTOR_NAME: &str = "jfrog-provider";
const DEFAULT_LOG_FILE: &str = "/var/log/jfrog-credential-provider.log";

fn main() -> ! {
    let args: Args = argh::from_env();
    process::exit(match run(args) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    })
}

fn run(args: Args) -> Result<()> {
    match args.subcommand {
        None => {
            init_provider_logger()?;
            provider::run(VERSION)
        }
        Some(SubCommand::AddProviderConfig(subcommand_args)) => {
            SimpleLogger::init(subcommand_args.log_level, LogConfig::default())
                .context(error::LoggerSnafu)?;
            run_add_provider_config(subcommand_args)
        }
        Some(SubCommand::WatchKubelet(subcommand_args)) => {
            SimpleLogger::init(subcommand_args.log_level, LogConfig::default())
                .context(error::LoggerSnafu)?;
            run_watch_kubelet(subcommand_args)
        }
    }
}

/// In provider mode stdout carries the protocol response, so logs go to the
/// provider log file; if that cannot be opened, stderr keeps the log stream
/// rather than silencing it.
fn init_provider_logger() -> Result<()> {
    let log_file = env::var("provider_log_file")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
    match OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => WriteLogger::init(LevelFilter::Info, LogConfig::default(), file)
            .context(error::LoggerSnafu),
        Err(_) => WriteLogger::init(LevelFilter::Info, LogConfig::default(), io::stderr())
            .context(error::LoggerSnafu),
    }
}

/// Resolves the provider home directory and config file name, applying
/// defaults and stripping any extension from the config name.
fn resolve_config_location(
    provider_home: Option<String>,
    provider_config: Option<String>,
) -> (String, String) {
    let mut home = provider_home
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_PROVIDER_HOME.to_string());
    if !home.ends_with('/') {
        home.push('/');
    }

    let mut name = provider_config
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_NAME.to_string());
    for extension in [".yaml", ".yml", ".json"] {
        if let Some(stripped) = name.strip_suffix(extension) {
            name = stripped.to_string();
            break;
        }
    }

    (home, name)
}

fn config_file_path(home: &str, name: &str, format: Format) -> PathBuf {
    PathBuf::from(format!("{}{}.{}", home, name, format.extension()))
}

fn run_add_provider_config(args: AddProviderConfigArgs) -> Result<()> {
    let format = Format::from_yaml_flag(args.yaml);
    let (home, name) = resolve_config_location(args.provider_home, args.provider_config);

    if args.generate_config {
        let descriptor_path = config_file_path(&home, &name, format);
        return descriptor::generate_descriptor(&descriptor_path, format);
    }

    let config_path = config_file_path(&home, &name, format);
    let descriptor_path = config_file_path(&home, DESCRIPTOR_NAME, format);

    let client = provider::http_client(provider::HTTP_TIMEOUT)?;
    let cloud = auth::detect_cloud(&client, &settings_for_merge())?;

    // The pristine backup protects the pre-install config; failing to take it
    // is not worth failing the install over.
    if let Err(e) = backup_config(&config_path, format, false) {
        warn!("Could not create pre-merge backup: {}", e);
    }

    merge_config_files(
        &config_path,
        &descriptor_path,
        &config_path,
        format,
        args.dry_run,
        cloud,
    )?;
    Ok(())
}

/// Cloud detection during a merge only needs the optional `cloud_provider`
/// override; none of the provider-mode settings apply.
fn settings_for_merge() -> settings::Settings {
    settings::Settings {
        artifactory_url: String::new(),
        releases_url: String::new(),
        download_url: String::new(),
        download_suffix: "/".to_string(),
        autoupdate_disabled: true,
        cloud_provider: env::var("cloud_provider").ok().filter(|v| !v.is_empty()),
        secret_ttl_seconds: String::new(),
        kubelet_config_path: None,
        target_provider_name: String::new(),
        aws_auth_method: None,
        aws_role_name: None,
        jfrog_oidc_provider_name: None,
        jfrog_oidc_audience: None,
        azure_app_client_id: None,
        azure_tenant_id: None,
        azure_app_audience: None,
        azure_nodepool_client_id: None,
    }
}

fn run_watch_kubelet(args: WatchKubeletArgs) -> Result<()> {
    let format = Format::from_yaml_flag(args.yaml);
    let (home, name) = resolve_config_location(args.provider_home, args.provider_config);
    let config_path = config_file_path(&home, &name, format);
    let session = WatchSession::new(args.timeout);
    watch::watch_kubelet(&config_path, format, &session, &SystemdCheck {})?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_location_defaults() {
        let (home, name) = resolve_config_location(None, None);
        assert_eq!(DEFAULT_PROVIDER_HOME, home);
        assert_eq!(DEFAULT_CONFIG_NAME, name);
    }

    #[test]
    fn config_location_normalizes_input() {
        let (home, name) = resolve_config_location(
            Some("/etc/kubernetes/image-credential-provider".to_string()),
            Some("config.yaml".to_string()),
        );
        assert_eq!("/etc/kubernetes/image-credential-provider/", home);
        assert_eq!("config", name);
    }

    #[test]
    fn config_path_carries_the_format_extension() {
        assert_eq!(
            PathBuf::from("/etc/eks/image-credential-provider/config.yaml"),
            config_file_path(DEFAULT_PROVIDER_HOME, DEFAULT_CONFIG_NAME, Format::Yaml)
        );
        assert_eq!(
            PathBuf::from("/etc/eks/image-credential-provider/config.json"),
            config_file_path(DEFAULT_PROVIDER_HOME, DEFAULT_CONFIG_NAME, Format::Json)
        );
    }
}
