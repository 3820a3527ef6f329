use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read {}: {}", path.display(), source))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write {}: {}", path.display(), source))]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse JSON document {}: {}", path.display(), source))]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to parse YAML document {}: {}", path.display(), source))]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("Failed to serialize config to JSON: {}", source))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("Failed to serialize config to YAML: {}", source))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("Provider '{}' is missing required field '{}'", provider, field))]
    MissingField {
        provider: String,
        field: &'static str,
    },

    #[snafu(display(
        "Provider '{}' is missing required environment entry '{}'",
        provider,
        name
    ))]
    MissingEnv { provider: String, name: String },

    #[snafu(display(
        "aws_auth_method must be 'assume_role' or 'cognito_oidc', found '{}'",
        value
    ))]
    InvalidAuthMethod { value: String },

    #[snafu(display(
        "aws_auth_method '{}' requires environment entries: {}",
        auth_method,
        missing.join(", ")
    ))]
    MissingAuthEnv {
        auth_method: String,
        missing: Vec<String>,
    },

    #[snafu(display(
        "No backup found for {}; neither last-good nor pristine generation exists",
        path.display()
    ))]
    NoBackupAvailable { path: PathBuf },
}
