/*!
This library models the kubelet's image credential provider configuration: the
multi-provider `CredentialProviderConfig` document the kubelet reads at
startup, and the single-provider descriptor this plugin contributes to it.

It provides typed parsing for both the JSON and YAML renditions of the
document, validation of required fields (including the per-cloud environment
entries the JFrog provider needs), an idempotent merge of the JFrog descriptor
into an existing multi-provider config, and the backup/rollback scheme that
protects the document across kubelet restarts.
*/

pub mod backup;
pub mod error;

use crate::error::Result;
use log::info;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fs;
use std::path::Path;

/// Substring that identifies this plugin's entry in a provider list.
pub const PROVIDER_IDENTIFIER: &str = "jfrog";

/// The environment entry that acts as the merge key between providers.
pub const ARTIFACTORY_URL_ENV: &str = "artifactory_url";

/// On-disk rendition of the kubelet config document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn from_yaml_flag(yaml: bool) -> Self {
        if yaml {
            Format::Yaml
        } else {
            Format::Json
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
        }
    }
}

/// Cloud platform a provider descriptor is validated against. The descriptor
/// carries different required environment entries per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudPlatform {
    Aws,
    Azure,
}

/// A `name`/`value` pair injected into the provider subprocess environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Service-account token handling for providers that opt into it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_token_audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_type: Option<String>,
    pub require_service_account: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_service_account_annotation_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional_service_account_annotation_keys: Vec<String>,
}

/// One provider entry in the kubelet's credential provider config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub name: String,
    pub match_images: Vec<String>,
    pub default_cache_duration: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_attributes: Option<TokenAttributes>,
}

impl Provider {
    /// Reads a single provider descriptor from disk.
    pub fn from_path<P: AsRef<Path>>(path: P, format: Format) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).context(error::FileReadSnafu { path })?;
        match format {
            Format::Json => serde_json::from_str(&data).context(error::ParseJsonSnafu { path }),
            Format::Yaml => serde_yaml::from_str(&data).context(error::ParseYamlSnafu { path }),
        }
    }

    /// Serializes the descriptor in the requested on-disk rendition.
    pub fn to_document(&self, format: Format) -> Result<String> {
        match format {
            Format::Json => {
                serde_json::to_string_pretty(self).context(error::SerializeJsonSnafu)
            }
            Format::Yaml => serde_yaml::to_string(self).context(error::SerializeYamlSnafu),
        }
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P, format: Format) -> Result<()> {
        let path = path.as_ref();
        let data = self.to_document(format)?;
        fs::write(path, data).context(error::FileWriteSnafu { path })
    }

    /// Returns the value of the named environment entry, if present and
    /// non-empty.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn artifactory_url(&self) -> Option<&str> {
        self.env_value(ARTIFACTORY_URL_ENV)
    }
}

/// The kubelet's full credential provider config document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProviderConfig {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub providers: Vec<Provider>,
}

impl CredentialProviderConfig {
    pub fn from_path<P: AsRef<Path>>(path: P, format: Format) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).context(error::FileReadSnafu { path })?;
        Self::from_str(&data, format, path)
    }

    fn from_str(data: &str, format: Format, path: &Path) -> Result<Self> {
        match format {
            Format::Json => serde_json::from_str(data).context(error::ParseJsonSnafu { path }),
            Format::Yaml => serde_yaml::from_str(data).context(error::ParseYamlSnafu { path }),
        }
    }

    /// Serializes the document in the requested on-disk rendition.
    pub fn to_document(&self, format: Format) -> Result<String> {
        match format {
            Format::Json => {
                serde_json::to_string_pretty(self).context(error::SerializeJsonSnafu)
            }
            Format::Yaml => serde_yaml::to_string(self).context(error::SerializeYamlSnafu),
        }
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P, format: Format) -> Result<()> {
        let path = path.as_ref();
        let data = self.to_document(format)?;
        fs::write(path, data).context(error::FileWriteSnafu { path })
    }

    /// True if any provider entry belongs to this plugin, identified by name.
    /// Parsing the document and checking provider names is safer than a raw
    /// substring search over the file, which could false-positive on URLs or
    /// unrelated fields.
    pub fn contains_plugin(&self) -> bool {
        self.providers
            .iter()
            .any(|p| p.name.contains(PROVIDER_IDENTIFIER))
    }

    /// Finds the provider entry whose name contains `name`.
    pub fn find_provider(&self, name: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.name.contains(name))
    }

    /// True if a provider pointing at the same Artifactory instance already
    /// exists. `artifactory_url` is the merge key: two providers for the same
    /// instance would race each other for the same image patterns.
    pub fn contains_artifactory_url(&self, url: &str) -> bool {
        self.providers
            .iter()
            .any(|p| p.artifactory_url() == Some(url))
    }

    /// Appends `provider` unless an entry with the same `artifactory_url`
    /// already exists. Returns whether the document changed.
    pub fn merge_provider(&mut self, provider: Provider) -> bool {
        match provider.artifactory_url() {
            Some(url) if self.contains_artifactory_url(url) => false,
            _ => {
                self.providers.push(provider);
                true
            }
        }
    }
}

/// Validates the fields the kubelet requires of every provider entry.
pub fn validate_config(config: &CredentialProviderConfig) -> Result<()> {
    for provider in &config.providers {
        validate_common_fields(provider)?;
    }
    Ok(())
}

fn validate_common_fields(provider: &Provider) -> Result<()> {
    if provider.name.is_empty() {
        return error::MissingFieldSnafu {
            provider: provider.name.clone(),
            field: "name",
        }
        .fail();
    }
    if provider.match_images.is_empty() {
        return error::MissingFieldSnafu {
            provider: provider.name.clone(),
            field: "matchImages",
        }
        .fail();
    }
    if provider.default_cache_duration.is_empty() {
        return error::MissingFieldSnafu {
            provider: provider.name.clone(),
            field: "defaultCacheDuration",
        }
        .fail();
    }
    Ok(())
}

/// Validates the JFrog provider descriptor, including the environment entries
/// required by the detected cloud platform. Produces a typed error naming the
/// missing entries rather than a generic parse failure.
pub fn validate_provider(provider: &Provider, cloud: CloudPlatform) -> Result<()> {
    validate_common_fields(provider)?;

    if provider.artifactory_url().is_none() {
        return error::MissingEnvSnafu {
            provider: provider.name.clone(),
            name: ARTIFACTORY_URL_ENV,
        }
        .fail();
    }

    match cloud {
        CloudPlatform::Aws => {
            let auth_method = provider.env_value("aws_auth_method").unwrap_or("assume_role");
            match auth_method {
                "assume_role" => Ok(()),
                "cognito_oidc" => {
                    let missing: Vec<String> = [
                        "jfrog_oidc_provider_name",
                        "secret_name",
                        "user_pool_name",
                        "resource_server_name",
                        "user_pool_resource_scope",
                    ]
                    .iter()
                    .filter(|name| provider.env_value(name).is_none())
                    .map(|name| (*name).to_string())
                    .collect();
                    if missing.is_empty() {
                        Ok(())
                    } else {
                        error::MissingAuthEnvSnafu {
                            auth_method: auth_method.to_string(),
                            missing,
                        }
                        .fail()
                    }
                }
                other => error::InvalidAuthMethodSnafu {
                    value: other.to_string(),
                }
                .fail(),
            }
        }
        CloudPlatform::Azure => {
            let missing: Vec<String> = [
                "azure_app_client_id",
                "azure_tenant_id",
                "azure_app_audience",
                "azure_nodepool_client_id",
                "jfrog_oidc_provider_name",
            ]
            .iter()
            .filter(|name| provider.env_value(name).is_none())
            .map(|name| (*name).to_string())
            .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                error::MissingAuthEnvSnafu {
                    auth_method: "azure".to_string(),
                    missing,
                }
                .fail()
            }
        }
    }
}

/// Merges the descriptor at `descriptor_path` into the multi-provider config
/// at `base_path` and writes the result to `output_path` in the same format.
/// A provider with the same `artifactory_url` already present makes the merge
/// a no-op. `dry_run` logs the resulting document without writing it.
pub fn merge_config_files<P: AsRef<Path>>(
    base_path: P,
    descriptor_path: P,
    output_path: P,
    format: Format,
    dry_run: bool,
    cloud: CloudPlatform,
) -> Result<()> {
    let mut config = CredentialProviderConfig::from_path(&base_path, format)?;
    validate_config(&config)?;

    let provider = Provider::from_path(&descriptor_path, format)?;
    validate_provider(&provider, cloud)?;

    if !config.merge_provider(provider) {
        info!("Provider with the same artifactory_url already exists, skipping addition");
        return Ok(());
    }

    let document = config.to_document(format)?;
    if dry_run {
        info!(
            "Dry run: the following config would be written to {}",
            output_path.as_ref().display()
        );
        info!("{}", document);
        return Ok(());
    }

    let output_path = output_path.as_ref();
    fs::write(output_path, document).context(error::FileWriteSnafu { path: output_path })?;
    info!("Merged config written to {}", output_path.display());
    Ok(())
}
