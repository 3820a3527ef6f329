//! AWS authentication flows. Both flows end by proving the caller's IAM
//! identity to Artifactory with a SigV4-signed STS GetCallerIdentity request:
//! Artifactory replays the signed call and maps the identity to a user.
//!
//! * `assume_role` uses the node's instance role credentials from IMDS.
//! * `web_identity` first trades the workload's service-account token for
//!   role credentials via STS AssumeRoleWithWebIdentity.

use crate::auth::artifactory;
use crate::error::{self, Result};
use crate::provider::CredentialProviderRequest;
use crate::settings::Settings;
use aws_sigv4::http_request::{sign, SignableRequest, SigningParams, SigningSettings};
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::time::SystemTime;

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/latest/api/token";
const IMDS_CREDENTIALS_URL: &str =
    "http://169.254.169.254/latest/meta-data/iam/security-credentials/";
const IMDS_REGION_URL: &str = "http://169.254.169.254/latest/meta-data/placement/region";
const STS_URL: &str = "https://sts.amazonaws.com/";
const STS_CALLER_IDENTITY_URL: &str =
    "https://sts.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15";

/// Region used for request signing when the instance metadata service cannot
/// tell us where we are.
const FALLBACK_REGION: &str = "us-east-1";

const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";
const EXCHANGE_ANNOTATION: &str = "JFrogExchange";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TempCredentials {
    pub(crate) code: String,
    pub(crate) access_key_id: String,
    pub(crate) secret_access_key: String,
    pub(crate) token: String,
}

#[derive(Debug, Deserialize)]
struct WebIdentityEnvelope {
    #[serde(rename = "AssumeRoleWithWebIdentityResponse")]
    response: WebIdentityResponse,
}

#[derive(Debug, Deserialize)]
struct WebIdentityResponse {
    #[serde(rename = "AssumeRoleWithWebIdentityResult")]
    result: WebIdentityResult,
}

#[derive(Debug, Deserialize)]
struct WebIdentityResult {
    #[serde(rename = "Credentials")]
    credentials: WebIdentityCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WebIdentityCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
}

/// A successful IMDSv2 token request is the cheapest reliable signal that we
/// are on an EC2 instance.
pub(crate) fn is_aws(client: &Client) -> bool {
    client
        .put(IMDS_TOKEN_URL)
        .header("X-aws-ec2-metadata-token-ttl-seconds", "600")
        .send()
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

fn imds_token(client: &Client) -> Result<String> {
    let response = client
        .put(IMDS_TOKEN_URL)
        .header("X-aws-ec2-metadata-token-ttl-seconds", "600")
        .send()
        .context(error::HttpSendSnafu {
            url: IMDS_TOKEN_URL,
        })?;
    let status = response.status();
    ensure!(
        status.is_success(),
        error::HttpStatusSnafu {
            url: IMDS_TOKEN_URL,
            status,
            body: response.text().unwrap_or_default(),
        }
    );
    response.text().context(error::HttpResponseSnafu {
        url: IMDS_TOKEN_URL,
    })
}

fn imds_credentials(client: &Client, token: &str, role_name: &str) -> Result<TempCredentials> {
    let url = format!("{}{}", IMDS_CREDENTIALS_URL, role_name);
    debug!("Fetching role credentials from {}", url);
    let response = client
        .get(&url)
        .header("X-aws-ec2-metadata-token", token)
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
    let credentials: TempCredentials = response
        .json()
        .context(error::HttpResponseSnafu { url })?;
    ensure!(
        credentials.code == "Success",
        error::CredentialsUnavailableSnafu {
            code: credentials.code,
        }
    );
    Ok(credentials)
}

fn imds_region(client: &Client, token: &str) -> Result<String> {
    let response = client
        .get(IMDS_REGION_URL)
        .header("X-aws-ec2-metadata-token", token)
        .send()
        .context(error::HttpSendSnafu {
            url: IMDS_REGION_URL,
        })?;
    let status = response.status();
    ensure!(
        status.is_success(),
        error::HttpStatusSnafu {
            url: IMDS_REGION_URL,
            status,
            body: response.text().unwrap_or_default(),
        }
    );
    response.text().context(error::HttpResponseSnafu {
        url: IMDS_REGION_URL,
    })
}

/// Trades a service-account token for role credentials. This STS action
/// authenticates with the web identity token itself, so the request is
/// unsigned.
fn assume_role_with_web_identity(
    client: &Client,
    role_arn: &str,
    web_identity_token: &str,
) -> Result<TempCredentials> {
    let response = client
        .post(STS_URL)
        .header("Accept", "application/json")
        .form(&[
            ("Action", "AssumeRoleWithWebIdentity"),
            ("Version", "2011-06-15"),
            ("RoleArn", role_arn),
            ("RoleSessionName", "jfrog-credential-provider"),
            ("WebIdentityToken", web_identity_token),
        ])
        .send()
        .context(error::HttpSendSnafu { url: STS_URL })?;
    let status = response.status();
    ensure!(
        status.is_success(),
        error::HttpStatusSnafu {
            url: STS_URL,
            status,
            body: response.text().unwrap_or_default(),
        }
    );
    let envelope: WebIdentityEnvelope = response
        .json()
        .context(error::HttpResponseSnafu { url: STS_URL })?;
    let credentials = envelope.response.result.credentials;
    Ok(TempCredentials {
        code: "Success".to_string(),
        access_key_id: credentials.access_key_id,
        secret_access_key: credentials.secret_access_key,
        token: credentials.session_token,
    })
}

/// Signs an STS GetCallerIdentity request with the given credentials and
/// returns the resulting headers for Artifactory to replay.
pub(crate) fn signed_caller_identity_headers(
    credentials: &TempCredentials,
    region: &str,
) -> Result<http::HeaderMap> {
    let signing_settings = SigningSettings::default();
    let params = SigningParams::builder()
        .access_key(&credentials.access_key_id)
        .secret_key(&credentials.secret_access_key)
        .security_token(&credentials.token)
        .region(region)
        .service_name("sts")
        .time(SystemTime::now())
        .settings(signing_settings)
        .build()
        .context(error::SigningParamsSnafu)?;

    let mut request = http::Request::builder()
        .method("GET")
        .uri(STS_CALLER_IDENTITY_URL)
        .body(String::new())
        .context(error::BuildRequestSnafu)?;
    let (instructions, _signature) = sign(SignableRequest::from(&request), &params)
        .context(error::SignRequestSnafu)?
        .into_parts();
    instructions.apply_to_request(&mut request);
    Ok(request.headers().clone())
}

pub(crate) fn registry_credentials(
    client: &Client,
    settings: &Settings,
    request: &CredentialProviderRequest,
) -> Result<(String, String)> {
    let mut auth_method = settings
        .aws_auth_method
        .clone()
        .unwrap_or_else(|| "assume_role".to_string());
    if auth_method != "assume_role" && auth_method != "cognito_oidc" {
        return error::InvalidAuthMethodSnafu { value: auth_method }.fail();
    }

    let mut role_name = settings.aws_role_name.clone();
    let annotations = &request.service_account_annotations;
    if annotations.get(EXCHANGE_ANNOTATION).map(String::as_str) == Some("true") {
        if let Some(role_arn) = annotations.get(ROLE_ARN_ANNOTATION) {
            info!("Using web_identity auth method based on service account annotations");
            auth_method = "web_identity".to_string();
            role_name = Some(role_arn.clone());
        }
    }

    let role_name = role_name.context(error::MissingEnvironmentSnafu {
        name: "aws_role_name",
    })?;

    let credentials = match auth_method.as_str() {
        "web_identity" => {
            let subject_token = request.service_account_token.as_deref().context(
                error::MissingServiceAccountTokenSnafu,
            )?;
            assume_role_with_web_identity(client, &role_name, subject_token)?
        }
        "assume_role" => {
            let token = imds_token(client)?;
            imds_credentials(client, &token, &role_name)?
        }
        other => {
            // cognito_oidc needs the Cognito and Secrets Manager service
            // clients; this build does not carry them.
            return error::UnsupportedAuthMethodSnafu {
                method: other.to_string(),
            }
            .fail();
        }
    };

    let region = match imds_token(client).and_then(|token| imds_region(client, &token)) {
        Ok(region) => region,
        Err(e) => {
            warn!(
                "Could not determine region from instance metadata ({}), signing with {}",
                e, FALLBACK_REGION
            );
            FALLBACK_REGION.to_string()
        }
    };

    let signed_headers = signed_caller_identity_headers(&credentials, &region)?;
    artifactory::exchange_signed_sts_request(
        client,
        &settings.artifactory_url,
        &settings.secret_ttl_seconds,
        &signed_headers,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn temp_credentials_parse_imds_document() {
        let credentials: TempCredentials = serde_json::from_str(
            r#"{
              "Code": "Success",
              "LastUpdated": "2025-08-07T01:00:00Z",
              "Type": "AWS-HMAC",
              "AccessKeyId": "ASIAEXAMPLE",
              "SecretAccessKey": "secret",
              "Token": "session-token",
              "Expiration": "2025-08-07T07:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!("Success", credentials.code);
        assert_eq!("ASIAEXAMPLE", credentials.access_key_id);
        assert_eq!("session-token", credentials.token);
    }

    #[test]
    fn web_identity_response_parses_nested_credentials() {
        let envelope: WebIdentityEnvelope = serde_json::from_str(
            r#"{
              "AssumeRoleWithWebIdentityResponse": {
                "AssumeRoleWithWebIdentityResult": {
                  "Credentials": {
                    "AccessKeyId": "ASIAEXAMPLE",
                    "SecretAccessKey": "secret",
                    "SessionToken": "session-token",
                    "Expiration": 1754500000
                  }
                }
              }
            }"#,
        )
        .unwrap();
        let credentials = envelope.response.result.credentials;
        assert_eq!("ASIAEXAMPLE", credentials.access_key_id);
        assert_eq!("session-token", credentials.session_token);
    }

    #[test]
    fn signed_headers_carry_sigv4_authorization() {
        let credentials = TempCredentials {
            code: "Success".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            token: "session-token".to_string(),
        };
        let headers = signed_caller_identity_headers(&credentials, "us-east-1").unwrap();
        let authorization = headers.get("authorization").unwrap().to_str().unwrap();
        assert!(authorization.starts_with("AWS4-HMAC-SHA256"));
        assert!(authorization.contains("us-east-1/sts/aws4_request"));
        assert!(headers.contains_key("x-amz-date"));
        assert!(headers.contains_key("x-amz-security-token"));
    }
}
