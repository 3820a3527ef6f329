//! Functional validation of an update candidate before it replaces the live
//! binary. Structural checks alone are not enough: a candidate can speak the
//! kubelet protocol perfectly and still be unable to authenticate, so the
//! credentials it produces are tried against the real registry.

use crate::auth::registry_base_url;
use crate::error::{self, Result};
use crate::provider::{
    extract_registry, CredentialProviderRequest, CredentialProviderResponse, RegistryCredential,
    KUBELET_API_VERSION,
};
use crate::settings::Settings;
use kubelet_provider_config::{CredentialProviderConfig, Format};
use log::{debug, info, warn};
use reqwest::blocking::Client;
use snafu::{ensure, OptionExt, ResultExt};
use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};

const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";
const AZURE_CLIENT_ID_ANNOTATION: &str = "azure.workload.identity/client-id";
const EXCHANGE_ANNOTATION: &str = "JFrogExchange";

/// Builds the synthetic request fed to the candidate. The target image is the
/// configured registry itself; the kubelet's service-account fields are
/// forwarded only when the workload opted into token exchange, mirroring what
/// the candidate would receive from the kubelet.
fn synthetic_request(
    settings: &Settings,
    request: &CredentialProviderRequest,
) -> CredentialProviderRequest {
    let mut synthetic = CredentialProviderRequest {
        api_version: KUBELET_API_VERSION.to_string(),
        kind: "CredentialProviderRequest".to_string(),
        image: settings.artifactory_url.clone(),
        service_account_token: None,
        service_account_annotations: Default::default(),
    };

    let annotations = &request.service_account_annotations;
    let wants_exchange = annotations.get(EXCHANGE_ANNOTATION).map(String::as_str) == Some("true");
    let has_identity = annotations.contains_key(ROLE_ARN_ANNOTATION)
        || annotations.contains_key(AZURE_CLIENT_ID_ANNOTATION);
    if wants_exchange && has_identity {
        synthetic.service_account_token = request.service_account_token.clone();
        synthetic.service_account_annotations = annotations.clone();
    }
    synthetic
}

/// Reads this provider's `env` entries from the installed kubelet config so
/// the candidate runs under the same environment it would get once installed.
/// A missing or unreadable config degrades to the inherited environment.
fn provider_env_from_config(settings: &Settings) -> Vec<(String, String)> {
    let path = match &settings.kubelet_config_path {
        Some(path) if path.exists() => path,
        _ => return Vec::new(),
    };

    let format = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Format::Yaml,
        _ => Format::Json,
    };

    match CredentialProviderConfig::from_path(path, format) {
        Ok(config) => match config.find_provider(&settings.target_provider_name) {
            Some(provider) => provider
                .env
                .iter()
                .map(|e| (e.name.clone(), e.value.clone()))
                .collect(),
            None => {
                debug!(
                    "No provider matching '{}' in {}",
                    settings.target_provider_name,
                    path.display()
                );
                Vec::new()
            }
        },
        Err(e) => {
            warn!(
                "Could not read installed kubelet config {}: {}",
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

/// Runs the candidate with the synthetic request on stdin and parses its
/// response.
fn run_candidate(
    candidate: &Path,
    request_body: &[u8],
    extra_env: Vec<(String, String)>,
) -> Result<CredentialProviderResponse> {
    let mut child = Command::new(candidate)
        .envs(extra_env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context(error::CandidateSpawnSnafu { path: candidate })?;

    child
        .stdin
        .take()
        .context(error::CandidateStdinSnafu)?
        .write_all(request_body)
        .context(error::CandidateWriteSnafu)?;

    let output = child
        .wait_with_output()
        .context(error::CandidateWaitSnafu)?;
    ensure!(
        output.status.success(),
        error::CandidateFailedSnafu {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    );

    serde_json::from_slice(&output.stdout).context(error::CandidateResponseSnafu)
}

fn registry_credential<'a>(
    response: &'a CredentialProviderResponse,
    registry: &str,
) -> Option<&'a RegistryCredential> {
    response
        .auth
        .get(registry)
        .or_else(|| response.auth.values().next())
}

/// Validates the candidate binary end to end: it must execute, answer the
/// credential protocol, and the credentials it produces must authenticate
/// against the configured registry.
pub(crate) fn validate_candidate(
    client: &Client,
    settings: &Settings,
    request: &CredentialProviderRequest,
    candidate: &Path,
) -> Result<()> {
    ensure!(
        candidate.exists(),
        error::CandidateMissingSnafu { path: candidate }
    );
    fs::set_permissions(candidate, Permissions::from_mode(0o755))
        .context(error::SetPermissionsSnafu { path: candidate })?;

    let synthetic = synthetic_request(settings, request);
    let body = serde_json::to_vec(&synthetic).context(error::RequestEncodeSnafu)?;
    let extra_env = provider_env_from_config(settings);

    info!("Validating candidate binary {}", candidate.display());
    let response = run_candidate(candidate, &body, extra_env)?;

    let registry = extract_registry(&settings.artifactory_url);
    let credential = registry_credential(&response, registry).context(
        error::CandidateNoCredentialsSnafu {
            registry: registry.to_string(),
        },
    )?;

    let probe_url = registry_base_url(&settings.artifactory_url);
    let probe = client
        .get(&probe_url)
        .basic_auth(&credential.username, Some(&credential.password))
        .send()
        .context(error::LiveAuthSnafu {
            url: probe_url.clone(),
        })?;
    let status = probe.status();
    ensure!(
        status == reqwest::StatusCode::OK,
        error::LiveAuthStatusSnafu {
            url: probe_url,
            status,
        }
    );

    info!("Candidate binary validated successfully against the registry");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::provider::{http_client, HTTP_TIMEOUT};
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use kubelet_provider_config::{EnvVar, Provider};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn settings_for(server: &Server, kubelet_config: Option<std::path::PathBuf>) -> Settings {
        Settings {
            artifactory_url: format!("http://{}", server.addr()),
            releases_url: String::new(),
            download_url: String::new(),
            download_suffix: "/".to_string(),
            autoupdate_disabled: false,
            cloud_provider: None,
            secret_ttl_seconds: "18000".to_string(),
            kubelet_config_path: kubelet_config,
            target_provider_name: "jfrog".to_string(),
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

    /// Writes a stand-in candidate that consumes stdin and answers with a
    /// canned response, as the real binary would.
    fn fake_candidate(dir: &TempDir, registry: &str, exit_code: i32) -> std::path::PathBuf {
        let path = dir.path().join("candidate");
        let response = format!(
            "{{\"apiVersion\":\"credentialprovider.kubelet.k8s.io/v1\",\
             \"kind\":\"CredentialProviderResponse\",\"cacheKeyType\":\"Registry\",\
             \"auth\":{{\"{}\":{{\"username\":\"k8s-pull\",\"password\":\"token\"}}}}}}",
            registry
        );
        let script = format!(
            "#!/bin/sh\ncat > /dev/null\nprintf '%s' '{}'\nexit {}\n",
            response, exit_code
        );
        fs::write(&path, script).unwrap();
        path
    }

    #[test]
    fn candidate_with_working_credentials_validates() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/"),
                request::headers(contains(key("authorization"))),
            ])
            .respond_with(status_code(200)),
        );

        let dir = TempDir::new().unwrap();
        let settings = settings_for(&server, None);
        let registry = extract_registry(&settings.artifactory_url).to_string();
        let candidate = fake_candidate(&dir, &registry, 0);

        let client = http_client(HTTP_TIMEOUT).unwrap();
        validate_candidate(
            &client,
            &settings,
            &CredentialProviderRequest::default(),
            &candidate,
        )
        .unwrap();
    }

    #[test]
    fn rejected_credentials_fail_validation() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/"))
                .respond_with(status_code(401)),
        );

        let dir = TempDir::new().unwrap();
        let settings = settings_for(&server, None);
        let registry = extract_registry(&settings.artifactory_url).to_string();
        let candidate = fake_candidate(&dir, &registry, 0);

        let client = http_client(HTTP_TIMEOUT).unwrap();
        let err = validate_candidate(
            &client,
            &settings,
            &CredentialProviderRequest::default(),
            &candidate,
        )
        .unwrap_err();
        assert!(matches!(err, Error::LiveAuthStatus { .. }));
    }

    #[test]
    fn failing_candidate_process_fails_validation() {
        let server = Server::run();
        let dir = TempDir::new().unwrap();
        let settings = settings_for(&server, None);
        let candidate = fake_candidate(&dir, "unused", 3);

        let client = http_client(HTTP_TIMEOUT).unwrap();
        let err = validate_candidate(
            &client,
            &settings,
            &CredentialProviderRequest::default(),
            &candidate,
        )
        .unwrap_err();
        assert!(matches!(err, Error::CandidateFailed { .. }));
    }

    #[test]
    fn garbage_candidate_output_fails_validation() {
        let server = Server::run();
        let dir = TempDir::new().unwrap();
        let settings = settings_for(&server, None);
        let candidate = dir.path().join("candidate");
        fs::write(&candidate, "#!/bin/sh\ncat > /dev/null\necho not-json\n").unwrap();

        let client = http_client(HTTP_TIMEOUT).unwrap();
        let err = validate_candidate(
            &client,
            &settings,
            &CredentialProviderRequest::default(),
            &candidate,
        )
        .unwrap_err();
        assert!(matches!(err, Error::CandidateResponse { .. }));
    }

    #[test]
    fn missing_candidate_fails_validation() {
        let server = Server::run();
        let dir = TempDir::new().unwrap();
        let settings = settings_for(&server, None);
        let client = http_client(HTTP_TIMEOUT).unwrap();
        let err = validate_candidate(
            &client,
            &settings,
            &CredentialProviderRequest::default(),
            &dir.path().join("does-not-exist"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::CandidateMissing { .. }));
    }

    #[test]
    fn provider_env_is_loaded_from_installed_config() {
        let server = Server::run();
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        let config = kubelet_provider_config::CredentialProviderConfig {
            api_version: "kubelet.config.k8s.io/v1".to_string(),
            kind: "CredentialProviderConfig".to_string(),
            providers: vec![Provider {
                name: "jfrog-credential-provider".to_string(),
                match_images: vec!["*.jfrog.io".to_string()],
                default_cache_duration: "4h".to_string(),
                api_version: "credentialprovider.kubelet.k8s.io/v1".to_string(),
                env: vec![EnvVar {
                    name: "artifactory_url".to_string(),
                    value: "myorg.jfrog.io".to_string(),
                }],
                token_attributes: None,
            }],
        };
        config.write_to(&config_path, Format::Json).unwrap();

        let settings = settings_for(&server, Some(config_path));
        let env = provider_env_from_config(&settings);
        assert_eq!(
            vec![("artifactory_url".to_string(), "myorg.jfrog.io".to_string())],
            env
        );
    }

    #[test]
    fn service_account_fields_forwarded_only_for_exchange_workloads() {
        let server = Server::run();
        let settings = settings_for(&server, None);

        let mut annotations = BTreeMap::new();
        annotations.insert(EXCHANGE_ANNOTATION.to_string(), "true".to_string());
        annotations.insert(
            ROLE_ARN_ANNOTATION.to_string(),
            "arn:aws:iam::123456789012:role/pull".to_string(),
        );
        let request = CredentialProviderRequest {
            service_account_token: Some("sa-token".to_string()),
            service_account_annotations: annotations,
            ..Default::default()
        };
        let synthetic = synthetic_request(&settings, &request);
        assert_eq!(Some("sa-token"), synthetic.service_account_token.as_deref());

        let plain = synthetic_request(&settings, &CredentialProviderRequest::default());
        assert!(plain.service_account_token.is_none());
        assert!(plain.service_account_annotations.is_empty());
    }
}
