//! Runtime settings for the provider path, resolved from the environment once
//! at startup and threaded through the pipeline. The kubelet injects this
//! provider's `env` entries from its config document into our process
//! environment, so everything the credential exchange and the update pipeline
//! need arrives as environment variables.

use crate::error::{self, Result};
use log::debug;
use std::env;
use std::path::PathBuf;

const DEFAULT_RELEASES_URL: &str =
    "https://releases.jfrog.io/artifactory/api/storage/run/jfrog-credentials-provider";
const DEFAULT_DOWNLOAD_URL: &str =
    "https://releases.jfrog.io/artifactory/run/jfrog-credentials-provider";
const DEFAULT_SECRET_TTL_SECONDS: &str = "18000";

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    /// Artifactory instance the provider authenticates against, e.g.
    /// `myorg.jfrog.io`. Required for the credential exchange and for
    /// candidate validation.
    pub(crate) artifactory_url: String,
    /// Release index listing available provider versions.
    pub(crate) releases_url: String,
    /// Base URL the binary artifacts are downloaded from.
    pub(crate) download_url: String,
    /// Path component between the download URL and the version directory.
    pub(crate) download_suffix: String,
    pub(crate) autoupdate_disabled: bool,
    /// Cloud platform override; detected via instance metadata when unset.
    pub(crate) cloud_provider: Option<String>,
    /// Requested lifetime for exchanged Artifactory tokens, in seconds.
    pub(crate) secret_ttl_seconds: String,
    /// The installed kubelet credential provider config, used to validate an
    /// update candidate under the environment it would actually run with.
    pub(crate) kubelet_config_path: Option<PathBuf>,
    /// Provider entry to read environment from in the kubelet config.
    pub(crate) target_provider_name: String,
    pub(crate) aws_auth_method: Option<String>,
    pub(crate) aws_role_name: Option<String>,
    pub(crate) jfrog_oidc_provider_name: Option<String>,
    pub(crate) jfrog_oidc_audience: Option<String>,
    pub(crate) azure_app_client_id: Option<String>,
    pub(crate) azure_tenant_id: Option<String>,
    pub(crate) azure_app_audience: Option<String>,
    pub(crate) azure_nodepool_client_id: Option<String>,
}

impl Settings {
    /// Resolves settings for the provider path. `artifactory_url` is the one
    /// variable nothing works without, so its absence is an error here rather
    /// than at first use.
    pub(crate) fn from_env() -> Result<Self> {
        let artifactory_url = required("artifactory_url")?;
        debug!("artifactory_url: {}", artifactory_url);

        Ok(Self {
            artifactory_url,
            releases_url: env_or("JFROG_CREDENTIAL_PROVIDER_RELEASES_URL", DEFAULT_RELEASES_URL),
            download_url: env_or("JFROG_CREDENTIAL_PROVIDER_DOWNLOAD_URL", DEFAULT_DOWNLOAD_URL),
            download_suffix: env_or("JFROG_CREDENTIAL_PROVIDER_DOWNLOAD_SUFFIX", "/"),
            autoupdate_disabled: env_bool("disable_provider_autoupdate", false),
            cloud_provider: optional("cloud_provider"),
            secret_ttl_seconds: env_or("secret_ttl_seconds", DEFAULT_SECRET_TTL_SECONDS),
            kubelet_config_path: optional("KUBELET_PLUGIN_CONFIG_PATH").map(PathBuf::from),
            target_provider_name: env_or(
                "TARGET_PROVIDER_NAME",
                kubelet_provider_config::PROVIDER_IDENTIFIER,
            ),
            aws_auth_method: optional("aws_auth_method"),
            aws_role_name: optional("aws_role_name"),
            jfrog_oidc_provider_name: optional("jfrog_oidc_provider_name"),
            jfrog_oidc_audience: optional("jfrog_oidc_audience"),
            azure_app_client_id: optional("azure_app_client_id"),
            azure_tenant_id: optional("azure_tenant_id"),
            azure_app_audience: optional("azure_app_audience"),
            azure_nodepool_client_id: optional("azure_nodepool_client_id"),
        })
    }
}

fn required(name: &'static str) -> Result<String> {
    match optional(name) {
        Some(value) => Ok(value),
        None => error::MissingEnvironmentSnafu { name }.fail(),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    optional(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
