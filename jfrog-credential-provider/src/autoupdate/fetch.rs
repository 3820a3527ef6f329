//! Downloads the candidate binary and its detached signature, staged next to
//! the current binary. Downloads land in a temporary file that is renamed
//! into place once complete, so a crash mid-download never leaves a
//! half-written artifact at the staged path.

use crate::error::{self, Result};
use crate::settings::Settings;
use log::{info, warn};
use reqwest::blocking::Client;
use semver::Version;
use snafu::{ensure, OptionExt, ResultExt};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub(crate) const SIGNATURE_EXTENSION: &str = ".asc";

#[derive(Debug)]
pub(crate) struct StagedArtifacts {
    pub(crate) binary: PathBuf,
    pub(crate) signature: PathBuf,
}

/// Maps the host architecture to the release artifact suffix. Unknown
/// architectures fall back to amd64 with a warning; the candidate will fail
/// validation if the guess is wrong, so this never needs to be fatal.
pub(crate) fn arch_suffix() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        other => {
            warn!(
                "Unrecognized architecture '{}', defaulting to the amd64 binary",
                other
            );
            "amd64"
        }
    }
}

fn append_to_path(path: &Path, suffix: &str) -> PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(suffix);
    PathBuf::from(os_string)
}

fn download(client: &Client, url: &str, dest: &Path) -> Result<()> {
    info!("Downloading {} to {}", url, dest.display());
    let mut response = client
        .get(url)
        .send()
        .context(error::DownloadSnafu { url })?;
    let status = response.status();
    ensure!(
        status.is_success(),
        error::DownloadStatusSnafu { url, status }
    );

    let staging_dir = dest.parent().context(error::StagingDirSnafu { path: dest })?;
    let mut temp = NamedTempFile::new_in(staging_dir).context(error::CreateTempfileSnafu)?;
    io::copy(&mut response, temp.as_file_mut())
        .context(error::WriteArtifactSnafu { path: dest })?;
    temp.persist(dest)
        .context(error::PersistArtifactSnafu { path: dest })?;
    Ok(())
}

/// Downloads the binary and signature for `version`, staging them as
/// `<current-binary>v<version>` and `<current-binary>v<version>.asc`.
pub(crate) fn fetch_artifacts(
    client: &Client,
    settings: &Settings,
    version: &Version,
    current_binary: &Path,
) -> Result<StagedArtifacts> {
    let binary = append_to_path(current_binary, &format!("v{}", version));
    let signature = append_to_path(&binary, SIGNATURE_EXTENSION);

    let download_url = format!(
        "{}{}{}/jfrog-credential-provider-linux-{}",
        settings.download_url,
        settings.download_suffix,
        version,
        arch_suffix()
    );
    download(client, &download_url, &binary)?;
    download(
        client,
        &format!("{}{}", download_url, SIGNATURE_EXTENSION),
        &signature,
    )?;

    Ok(StagedArtifacts { binary, signature })
}
