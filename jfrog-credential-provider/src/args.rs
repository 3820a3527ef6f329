use argh::FromArgs;
use log::LevelFilter;

pub(crate) fn parse_log_level(level: &str) -> Result<LevelFilter, String> {
    level
        .parse()
        .map_err(|_| format!("invalid log level '{}'", level))
}

/// Kubelet image credential provider for JFrog Artifactory. Without a
/// subcommand it reads a CredentialProviderRequest on stdin and writes a
/// CredentialProviderResponse on stdout, running the binary auto-update
/// pipeline in the background.
#[derive(FromArgs, Debug)]
pub(crate) struct Args {
    #[argh(subcommand)]
    pub(crate) subcommand: Option<SubCommand>,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub(crate) enum SubCommand {
    AddProviderConfig(AddProviderConfigArgs),
    WatchKubelet(WatchKubeletArgs),
}

/// Generate this provider's descriptor from environment variables, or merge
/// an existing descriptor into the kubelet's credential provider config.
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "add-provider-config")]
pub(crate) struct AddProviderConfigArgs {
    /// compute and log the merged config without writing it
    #[argh(switch)]
    pub(crate) dry_run: bool,

    /// generate the provider descriptor from environment variables
    #[argh(switch)]
    pub(crate) generate_config: bool,

    /// read and write the config in YAML instead of JSON
    #[argh(switch)]
    pub(crate) yaml: bool,

    /// directory holding the kubelet provider config
    #[argh(option)]
    pub(crate) provider_home: Option<String>,

    /// provider config file name, without extension
    #[argh(option)]
    pub(crate) provider_config: Option<String>,

    /// logging verbosity [trace|debug|info|warn|error]
    #[argh(
        option,
        default = "LevelFilter::Info",
        from_str_fn(parse_log_level)
    )]
    pub(crate) log_level: LevelFilter,
}

/// Watch kubelet liveness after a config rollout and roll the config back to
/// the best available backup if kubelet does not stay active.
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "watch-kubelet")]
pub(crate) struct WatchKubeletArgs {
    /// config is in YAML instead of JSON
    #[argh(switch)]
    pub(crate) yaml: bool,

    /// directory holding the kubelet provider config
    #[argh(option)]
    pub(crate) provider_home: Option<String>,

    /// provider config file name, without extension
    #[argh(option)]
    pub(crate) provider_config: Option<String>,

    /// seconds to watch kubelet health before declaring success
    #[argh(option, default = "60")]
    pub(crate) timeout: u64,

    /// logging verbosity [trace|debug|info|warn|error]
    #[argh(
        option,
        default = "LevelFilter::Info",
        from_str_fn(parse_log_level)
    )]
    pub(crate) log_level: LevelFilter,
}
