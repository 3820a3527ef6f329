//! Token exchanges against the Artifactory access API.

use crate::error::{self, Result};
use log::debug;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};

const OIDC_ENDPOINT: &str = "/access/api/v1/oidc/token";
const AWS_TOKEN_ENDPOINT: &str = "/access/api/v1/aws/token";

#[derive(Debug, Serialize)]
struct OidcTokenRequest<'a> {
    grant_type: &'static str,
    provider_name: &'a str,
    subject_token_type: &'static str,
    subject_token: &'a str,
    provider_type: &'static str,
    audience: &'a str,
}

#[derive(Debug, Deserialize)]
struct OidcAccessResponse {
    access_token: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct AwsRoleAccessResponse {
    access_token: String,
    username: String,
}

/// Exchanges an OIDC subject token for an Artifactory access token through
/// the configured OIDC integration. Returns `(username, token)`.
pub(crate) fn exchange_oidc_token(
    client: &Client,
    artifactory_url: &str,
    provider_name: &str,
    subject_token: &str,
    audience: &str,
) -> Result<(String, String)> {
    let url = format!("{}{}", super::registry_base_url(artifactory_url), OIDC_ENDPOINT);
    debug!("Artifactory OIDC token url: {}", url);

    let request = OidcTokenRequest {
        grant_type: "urn:ietf:params:oauth:grant-type:token-exchange",
        provider_name,
        subject_token_type: "urn:ietf:params:oauth:token-type:id_token",
        subject_token,
        provider_type: "Generic OpenID Connect",
        audience,
    };

    let response = client
        .post(&url)
        .json(&request)
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

    let access: OidcAccessResponse = response
        .json()
        .context(error::HttpResponseSnafu { url })?;
    Ok((access.username, access.access_token))
}

/// Exchanges a signed STS GetCallerIdentity request for an Artifactory access
/// token. The signed request's headers are forwarded so Artifactory can replay
/// the call and establish the caller's IAM identity.
pub(crate) fn exchange_signed_sts_request(
    client: &Client,
    artifactory_url: &str,
    secret_ttl_seconds: &str,
    signed_headers: &http::HeaderMap,
) -> Result<(String, String)> {
    let url = format!(
        "{}{}",
        super::registry_base_url(artifactory_url),
        AWS_TOKEN_ENDPOINT
    );
    debug!("Artifactory AWS token url: {}", url);

    let mut request = client
        .post(&url)
        .body(format!("{{\"expires_in\": {}}}", secret_ttl_seconds))
        .header("Content-Type", "application/json");
    for (name, value) in signed_headers {
        request = request.header(name, value);
    }

    let response = request
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

    let access: AwsRoleAccessResponse = response
        .json()
        .context(error::HttpResponseSnafu { url })?;
    Ok((access.username, access.access_token))
}
