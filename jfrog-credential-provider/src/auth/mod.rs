//! Cloud-platform authentication: turns the identity of the node (or of the
//! workload's service account) into an Artifactory username and access token.
//! Every flow ends in a token exchange against the Artifactory access API;
//! what differs per platform is how the subject identity is proven.

pub(crate) mod artifactory;
pub(crate) mod aws;
pub(crate) mod azure;

use crate::error::{self, Result};
use crate::provider::CredentialProviderRequest;
use crate::settings::Settings;
use kubelet_provider_config::CloudPlatform;
use log::{debug, info};
use reqwest::blocking::Client;

/// The `artifactory_url` setting is a bare host in production configs, but a
/// scheme is honored when present so non-TLS endpoints remain reachable.
pub(crate) fn registry_base_url(artifactory_url: &str) -> String {
    if artifactory_url.starts_with("http://") || artifactory_url.starts_with("https://") {
        artifactory_url.to_string()
    } else {
        format!("https://{}", artifactory_url)
    }
}

/// Determines the cloud platform, preferring the explicit `cloud_provider`
/// setting and falling back to probing the instance metadata services.
pub(crate) fn detect_cloud(client: &Client, settings: &Settings) -> Result<CloudPlatform> {
    if let Some(name) = &settings.cloud_provider {
        return match name.as_str() {
            "aws" => Ok(CloudPlatform::Aws),
            "azure" => Ok(CloudPlatform::Azure),
            other => error::UnknownCloudProviderSnafu {
                value: other.to_string(),
            }
            .fail(),
        };
    }

    if aws::is_aws(client) {
        debug!("Detected AWS via instance metadata");
        return Ok(CloudPlatform::Aws);
    }
    if azure::is_azure(client) {
        debug!("Detected Azure via instance metadata");
        return Ok(CloudPlatform::Azure);
    }
    error::CloudDetectSnafu.fail()
}

/// Produces registry credentials for the configured Artifactory instance.
pub(crate) fn registry_credentials(
    client: &Client,
    settings: &Settings,
    request: &CredentialProviderRequest,
) -> Result<(String, String)> {
    match detect_cloud(client, settings)? {
        CloudPlatform::Aws => {
            info!("Using AWS authentication flow");
            aws::registry_credentials(client, settings, request)
        }
        CloudPlatform::Azure => {
            info!("Using Azure authentication flow");
            azure::registry_credentials(client, settings)
        }
    }
}
