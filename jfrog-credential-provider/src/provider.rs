//! The kubelet-facing credential exchange: decode the request from stdin,
//! obtain registry credentials from the cloud platform, and write the
//! response to stdout. Nothing else in this process may write to stdout; it
//! is the protocol channel.

use crate::auth;
use crate::autoupdate;
use crate::error::{self, Result};
use crate::settings::Settings;
use log::{error, info};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

pub(crate) const KUBELET_API_VERSION: &str = "credentialprovider.kubelet.k8s.io/v1";

/// Per-call timeout for credential-exchange and update-pipeline HTTP calls;
/// keeps the whole invocation well inside the 30 seconds the kubelet allows
/// an exec plugin.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// The request the kubelet sends on stdin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CredentialProviderRequest {
    pub(crate) api_version: String,
    pub(crate) kind: String,
    pub(crate) image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) service_account_token: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) service_account_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegistryCredential {
    pub(crate) username: String,
    pub(crate) password: String,
}

/// The response the kubelet expects on stdout. The `auth` section maps a
/// registry host to the credentials for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CredentialProviderResponse {
    pub(crate) api_version: String,
    pub(crate) kind: String,
    pub(crate) cache_key_type: String,
    pub(crate) auth: BTreeMap<String, RegistryCredential>,
}

/// The registry a pull is directed at is the first path segment of the image
/// reference.
pub(crate) fn extract_registry(image: &str) -> &str {
    image.split('/').next().unwrap_or("")
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context(error::HttpClientSnafu)
}

pub(crate) fn build_response(
    image: &str,
    username: String,
    password: String,
) -> CredentialProviderResponse {
    let mut auth = BTreeMap::new();
    auth.insert(
        extract_registry(image).to_string(),
        RegistryCredential { username, password },
    );
    CredentialProviderResponse {
        api_version: KUBELET_API_VERSION.to_string(),
        kind: "CredentialProviderResponse".to_string(),
        cache_key_type: "Registry".to_string(),
        auth,
    }
}

/// Runs the provider: answers the kubelet synchronously while the update
/// pipeline runs on its own thread. Failures on the update side are logged
/// and contained there; failures here propagate to `main`, which exits
/// non-zero without writing a response.
pub(crate) fn run(running_version: &str) -> Result<()> {
    info!("Running JFrog credential provider {}", running_version);

    let request: CredentialProviderRequest =
        serde_json::from_reader(io::stdin()).context(error::RequestDecodeSnafu)?;
    info!("Request image: {}", request.image);

    let settings = Settings::from_env()?;
    let client = http_client(HTTP_TIMEOUT)?;

    // The update pipeline must never fail or delay the kubelet response; it
    // reports through the log stream only.
    let update_handle = {
        let settings = settings.clone();
        let request = request.clone();
        let version = running_version.to_string();
        thread::spawn(move || autoupdate::run_in_background(&settings, &request, &version))
    };

    let (username, token) = auth::registry_credentials(&client, &settings, &request)?;
    info!("JFrog username used for pull: {}", username);

    let response = build_response(&request.image, username, token);
    let body = serde_json::to_vec(&response).context(error::ResponseEncodeSnafu)?;
    let mut stdout = io::stdout();
    stdout
        .write_all(&body)
        .and_then(|_| stdout.flush())
        .context(error::ResponseWriteSnafu)?;

    // Keep the process alive until the update pipeline has finished; the
    // kubelet already has its response at this point.
    if update_handle.join().is_err() {
        error!("Auto-update task panicked");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_is_first_image_path_segment() {
        assert_eq!(
            "myorg.jfrog.io",
            extract_registry("myorg.jfrog.io/docker-local/app:1.2.3")
        );
        assert_eq!("myorg.jfrog.io", extract_registry("myorg.jfrog.io"));
        assert_eq!("", extract_registry(""));
    }

    #[test]
    fn response_is_keyed_by_registry() {
        let response = build_response(
            "myorg.jfrog.io/docker-local/app:1.2.3",
            "k8s-pull".to_string(),
            "token".to_string(),
        );
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(
            "k8s-pull",
            body["auth"]["myorg.jfrog.io"]["username"].as_str().unwrap()
        );
        assert_eq!("Registry", body["cacheKeyType"].as_str().unwrap());
        assert_eq!("CredentialProviderResponse", body["kind"].as_str().unwrap());
    }

    #[test]
    fn request_tolerates_missing_optional_fields() {
        let request: CredentialProviderRequest = serde_json::from_str(
            r#"{
              "apiVersion": "credentialprovider.kubelet.k8s.io/v1",
              "kind": "CredentialProviderRequest",
              "image": "myorg.jfrog.io/repo/app"
            }"#,
        )
        .unwrap();
        assert!(request.service_account_token.is_none());
        assert!(request.service_account_annotations.is_empty());
    }
}
