//! Azure authentication flow: the kubelet's managed identity proves itself to
//! the instance metadata service, the resulting identity token is used as a
//! client assertion against Microsoft Entra, and the Entra token is exchanged
//! at Artifactory's OIDC endpoint.

use crate::auth::artifactory;
use crate::error::{self, Result};
use crate::settings::Settings;
use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use snafu::{ensure, OptionExt, ResultExt};

const IDENTITY_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IDENTITY_API_VERSION: &str = "2023-11-01";
const METADATA_URL: &str =
    "http://169.254.169.254/metadata/instance?api-version=2021-02-01";

#[derive(Debug, Deserialize)]
struct IdentityTokenResult {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct EntraTokenResult {
    access_token: String,
}

/// The Azure instance metadata endpoint answers only when the `Metadata`
/// header is present, which makes it a reliable platform probe.
pub(crate) fn is_azure(client: &Client) -> bool {
    client
        .get(METADATA_URL)
        .header("Metadata", "true")
        .send()
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

/// Fetches an identity token for the nodepool's managed identity.
fn cluster_identity_token(
    client: &Client,
    audience: &str,
    nodepool_client_id: &str,
) -> Result<String> {
    let response = client
        .get(IDENTITY_ENDPOINT)
        .query(&[
            ("api-version", IDENTITY_API_VERSION),
            ("resource", audience),
            ("client_id", nodepool_client_id),
        ])
        .header("Metadata", "true")
        .send()
        .context(error::HttpSendSnafu {
            url: IDENTITY_ENDPOINT,
        })?;
    let status = response.status();
    ensure!(
        status.is_success(),
        error::HttpStatusSnafu {
            url: IDENTITY_ENDPOINT,
            status,
            body: response.text().unwrap_or_default(),
        }
    );
    let result: IdentityTokenResult = response.json().context(error::HttpResponseSnafu {
        url: IDENTITY_ENDPOINT,
    })?;
    Ok(result.access_token)
}

/// Exchanges the managed-identity token for an Entra token for the provider
/// application, using the identity token as the client assertion.
fn entra_oidc_token(
    client: &Client,
    tenant_id: &str,
    client_id: &str,
    assertion: &str,
) -> Result<String> {
    let url = format!(
        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
        tenant_id
    );
    debug!("Entra token url: {}", url);
    let scope = format!("{}/.default", client_id);
    let response = client
        .post(&url)
        .form(&[
            ("client_id", client_id),
            (
                "client_assertion_type",
                "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            ),
            ("client_assertion", assertion),
            ("grant_type", "client_credentials"),
            ("scope", &scope),
            ("subject_token_type", "urn:ietf:params:oauth:token-type:jwt"),
        ])
        .send()
        .context(error::HttpSendSnafu { url: url.clone() })?;
    let status = response.status();
    ensure!(
        status.is_success(),
        error::HttpStatusSnafu {
            url: url.clone(),
            status,
            body: response.text().unwrap_or_default(),
        }
    );
    let result: EntraTokenResult = response
        .json()
        .context(error::HttpResponseSnafu { url })?;
    Ok(result.access_token)
}

pub(crate) fn registry_credentials(
    client: &Client,
    settings: &Settings,
) -> Result<(String, String)> {
    let client_id = settings
        .azure_app_client_id
        .as_deref()
        .context(error::MissingEnvironmentSnafu {
            name: "azure_app_client_id",
        })?;
    let tenant_id = settings
        .azure_tenant_id
        .as_deref()
        .context(error::MissingEnvironmentSnafu {
            name: "azure_tenant_id",
        })?;
    let audience = settings
        .azure_app_audience
        .as_deref()
        .context(error::MissingEnvironmentSnafu {
            name: "azure_app_audience",
        })?;
    let nodepool_client_id = settings.azure_nodepool_client_id.as_deref().context(
        error::MissingEnvironmentSnafu {
            name: "azure_nodepool_client_id",
        },
    )?;
    let oidc_provider_name = settings.jfrog_oidc_provider_name.as_deref().context(
        error::MissingEnvironmentSnafu {
            name: "jfrog_oidc_provider_name",
        },
    )?;

    let assertion = cluster_identity_token(client, audience, nodepool_client_id)?;
    let entra_token = entra_oidc_token(client, tenant_id, client_id, &assertion)?;

    // The OIDC integration's audience defaults to the application the Entra
    // token was issued for, but can be pinned explicitly.
    let oidc_audience = settings
        .jfrog_oidc_audience
        .as_deref()
        .unwrap_or(client_id);
    artifactory::exchange_oidc_token(
        client,
        &settings.artifactory_url,
        oidc_provider_name,
        &entra_token,
        oidc_audience,
    )
}
