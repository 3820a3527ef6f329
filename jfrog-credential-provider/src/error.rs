use snafu::Snafu;
use std::path::PathBuf;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Failed to build HTTP request: {}", source))]
    BuildRequest { source: http::Error },

    #[snafu(display(
        "Candidate binary exited with {}; stderr: {}",
        status,
        stderr
    ))]
    CandidateFailed { status: String, stderr: String },

    #[snafu(display("Candidate binary does not exist at {}", path.display()))]
    CandidateMissing { path: PathBuf },

    #[snafu(display(
        "Candidate binary produced no credentials for registry '{}'",
        registry
    ))]
    CandidateNoCredentials { registry: String },

    #[snafu(display("Failed to parse candidate binary response: {}", source))]
    CandidateResponse { source: serde_json::Error },

    #[snafu(display("Failed to run candidate binary {}: {}", path.display(), source))]
    CandidateSpawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Candidate binary stdin was not captured"))]
    CandidateStdin,

    #[snafu(display("Failed waiting for candidate binary: {}", source))]
    CandidateWait { source: std::io::Error },

    #[snafu(display("Failed to write request to candidate binary: {}", source))]
    CandidateWrite { source: std::io::Error },

    #[snafu(display("Could not determine the cloud platform from instance metadata; set 'cloud_provider' to aws or azure"))]
    CloudDetect,

    #[snafu(display("Command '{}' with args '{:?}' failed: {}", command, args, source))]
    Command {
        command: String,
        args: Vec<String>,
        source: std::io::Error,
    },

    #[snafu(display("Failed to create staging tempfile: {}", source))]
    CreateTempfile { source: std::io::Error },

    #[snafu(display("Instance credentials unavailable, code '{}'", code))]
    CredentialsUnavailable { code: String },

    #[snafu(display("Failed to determine current binary path: {}", source))]
    CurrentExe { source: std::io::Error },

    #[snafu(display("Failed to download {}: {}", url, source))]
    Download { url: String, source: reqwest::Error },

    #[snafu(display("Download of {} returned {}", url, status))]
    DownloadStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[snafu(display("Failed to fetch release index from {}: {}", url, source))]
    FetchIndex { url: String, source: reqwest::Error },

    #[snafu(display("Failed to read {}: {}", path.display(), source))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "Auth method '{}' requires environment variable '{}'",
        auth_method,
        name
    ))]
    GenerateRequires {
        auth_method: String,
        name: String,
    },

    #[snafu(display("Failed to build HTTP client: {}", source))]
    HttpClient { source: reqwest::Error },

    #[snafu(display("Failed to parse response from {}: {}", url, source))]
    HttpResponse { url: String, source: reqwest::Error },

    #[snafu(display("Failed to send request to {}: {}", url, source))]
    HttpSend { url: String, source: reqwest::Error },

    #[snafu(display("Request to {} returned {}: {}", url, status, body))]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[snafu(display("Release index request to {} returned {}", url, status))]
    IndexStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[snafu(display(
        "aws_auth_method must be 'assume_role' or 'cognito_oidc', found '{}'",
        value
    ))]
    InvalidAuthMethod { value: String },

    #[snafu(display("Current version '{}' is not a valid semantic version", version))]
    InvalidCurrentVersion { version: String },

    #[snafu(display("Live auth probe of {} failed: {}", url, source))]
    LiveAuth { url: String, source: reqwest::Error },

    #[snafu(display("Live auth probe of {} returned {}", url, status))]
    LiveAuthStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[snafu(display("Update lock {} is held by another invocation: {}", path.display(), source))]
    LockBusy {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to open update lock file {}: {}", path.display(), source))]
    LockOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Logger setup error: {}", source))]
    Logger { source: log::SetLoggerError },

    #[snafu(display("Required environment variable '{}' is not set", name))]
    MissingEnvironment { name: String },

    #[snafu(display(
        "The web_identity auth method requires a service account token in the request"
    ))]
    MissingServiceAccountToken,

    #[snafu(display("Failed to parse release index from {}: {}", url, source))]
    ParseIndex {
        url: String,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to stage artifact at {}: {}", path.display(), source))]
    PersistArtifact {
        path: PathBuf,
        source: tempfile::PersistError,
    },

    #[snafu(display("{}", source))]
    #[snafu(context(false))]
    ProviderConfig {
        source: kubelet_provider_config::error::Error,
    },

    #[snafu(display("Failed to replace {} with {}: {}", to.display(), from.display(), source))]
    ReplaceBinary {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to decode request on stdin: {}", source))]
    RequestDecode { source: serde_json::Error },

    #[snafu(display("Failed to encode provider request: {}", source))]
    RequestEncode { source: serde_json::Error },

    #[snafu(display("Failed to encode provider response: {}", source))]
    ResponseEncode { source: serde_json::Error },

    #[snafu(display("Failed to write response to stdout: {}", source))]
    ResponseWrite { source: std::io::Error },

    #[snafu(display("Failed setting permissions of {}: {}", path.display(), source))]
    SetPermissions {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to sign STS request: {}", source))]
    SignRequest {
        source: aws_sigv4::http_request::SigningError,
    },

    #[snafu(display("Signature verification failed for {}", path.display()))]
    SignatureMismatch { path: PathBuf },

    #[snafu(display("Failed to parse detached signature {}: {}", path.display(), source))]
    SignatureParse {
        path: PathBuf,
        source: pgp::errors::Error,
    },

    #[snafu(display("Failed to build signing parameters: {}", source))]
    SigningParams {
        source: aws_sigv4::signing_params::BuildError,
    },

    #[snafu(display("Staged artifact path {} has no parent directory", path.display()))]
    StagingDir { path: PathBuf },

    #[snafu(display("Failed to parse embedded trusted public key: {}", source))]
    TrustedKeyParse { source: pgp::errors::Error },

    #[snafu(display(
        "cloud_provider must be 'aws' or 'azure', found '{}'",
        value
    ))]
    UnknownCloudProvider { value: String },

    #[snafu(display("Auth method '{}' is not supported by this build", method))]
    UnsupportedAuthMethod { method: String },

    #[snafu(display("Failed writing artifact to {}: {}", path.display(), source))]
    WriteArtifact {
        path: PathBuf,
        source: std::io::Error,
    },
}
