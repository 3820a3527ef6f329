//! Generates this provider's descriptor from installer-supplied environment
//! variables. The installer exports uppercase variables; the descriptor's
//! `env` entries use the lowercase names the provider reads at runtime.

use crate::error::{self, Result};
use kubelet_provider_config::{EnvVar, Format, Provider};
use log::info;
use std::env;
use std::path::Path;

pub(crate) const PROVIDER_NAME: &str = "jfrog-credential-provider";
pub(crate) const PROVIDER_API_VERSION: &str = "credentialprovider.kubelet.k8s.io/v1";

const DEFAULT_MATCH_IMAGES: &str = "*.jfrog.io";
const DEFAULT_CACHE_DURATION: &str = "4h";

/// Descriptor `env` entries and the installer variables they come from.
const ENV_SOURCES: &[(&str, &str)] = &[
    ("artifactory_url", "ARTIFACTORY_URL"),
    ("artifactory_user", "ARTIFACTORY_USER"),
    ("aws_auth_method", "AWS_AUTH_METHOD"),
    ("aws_role_name", "AWS_ROLE_NAME"),
    ("secret_name", "SECRET_NAME"),
    ("secret_ttl_seconds", "SECRET_TTL_SECONDS"),
    ("jfrog_oidc_provider_name", "JFROG_OIDC_PROVIDER_NAME"),
    ("user_pool_name", "USER_POOL_NAME"),
    ("user_pool_resource_scope", "USER_POOL_RESOURCE_SCOPE"),
    ("resource_server_name", "RESOURCE_SERVER_NAME"),
    ("google_service_account_email", "GOOGLE_SERVICE_ACCOUNT_EMAIL"),
    ("jfrog_oidc_audience", "JFROG_OIDC_AUDIENCE"),
];

fn build_descriptor(lookup: impl Fn(&str) -> Option<String>) -> Result<Provider> {
    let auth_method = lookup("AWS_AUTH_METHOD").unwrap_or_default();
    match auth_method.as_str() {
        // assume_role is the default when unset.
        "assume_role" | "" => {
            if lookup("IAM_ROLE_ARN").is_none() {
                return error::GenerateRequiresSnafu {
                    auth_method: "assume_role",
                    name: "IAM_ROLE_ARN",
                }
                .fail();
            }
        }
        "cognito_oidc" => {
            for name in [
                "JFROG_OIDC_PROVIDER_NAME",
                "SECRET_NAME",
                "USER_POOL_NAME",
                "RESOURCE_SERVER_NAME",
                "USER_POOL_RESOURCE_SCOPE",
                "ARTIFACTORY_USER",
            ] {
                if lookup(name).is_none() {
                    return error::GenerateRequiresSnafu {
                        auth_method: "cognito_oidc",
                        name,
                    }
                    .fail();
                }
            }
        }
        _ => {}
    }

    let env = ENV_SOURCES
        .iter()
        .filter_map(|(name, source)| {
            lookup(source).map(|value| EnvVar {
                name: (*name).to_string(),
                value,
            })
        })
        .collect();

    Ok(Provider {
        name: PROVIDER_NAME.to_string(),
        match_images: vec![lookup("MATCH_IMAGES")
            .unwrap_or_else(|| DEFAULT_MATCH_IMAGES.to_string())],
        default_cache_duration: lookup("DEFAULT_CACHE_DURATION")
            .unwrap_or_else(|| DEFAULT_CACHE_DURATION.to_string()),
        api_version: PROVIDER_API_VERSION.to_string(),
        env,
        token_attributes: None,
    })
}

/// Generates the descriptor from the environment and writes it to
/// `descriptor_path`.
pub(crate) fn generate_descriptor(descriptor_path: &Path, format: Format) -> Result<()> {
    let descriptor =
        build_descriptor(|name| env::var(name).ok().filter(|v| !v.is_empty()))?;
    descriptor.write_to(descriptor_path, format)?;
    info!("Provider config written to {}", descriptor_path.display());
    Ok(())
}
