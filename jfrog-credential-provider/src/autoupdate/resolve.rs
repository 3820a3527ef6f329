//! Release resolution: fetch the remote release index and find the highest
//! version strictly newer than the one we are running.

use crate::error::{self, Result};
use log::{debug, info};
use reqwest::blocking::Client;
use semver::Version;
use serde::Deserialize;
use snafu::{ensure, OptionExt, ResultExt};

/// The release index is an Artifactory storage listing; each child entry's
/// `uri` is a version directory like `/1.2.3`.
#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseIndex {
    #[serde(default)]
    children: Vec<ReleaseEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    uri: String,
}

/// Parses a release tag, tolerating a leading `v` and a leading `/` from the
/// listing format. Returns `None` for anything that is not a semantic
/// version.
fn parse_release_tag(tag: &str) -> Option<Version> {
    let tag = tag.trim_start_matches('/').trim_start_matches('v');
    Version::parse(tag).ok()
}

fn fetch_release_index(client: &Client, url: &str) -> Result<ReleaseIndex> {
    info!("Fetching release index from {}", url);
    let response = client
        .get(url)
        .send()
        .context(error::FetchIndexSnafu { url })?;
    let status = response.status();
    ensure!(status.is_success(), error::IndexStatusSnafu { url, status });
    let body = response.text().context(error::FetchIndexSnafu { url })?;
    serde_json::from_str(&body).context(error::ParseIndexSnafu { url })
}

fn latest_available(index: &ReleaseIndex, current: &Version) -> Option<Version> {
    let mut latest = current.clone();
    for entry in &index.children {
        match parse_release_tag(&entry.uri) {
            Some(candidate) => {
                if candidate > latest {
                    debug!("Found newer version: {}", candidate);
                    latest = candidate;
                }
            }
            None => debug!(
                "Skipping release entry '{}': not a semantic version",
                entry.uri
            ),
        }
    }
    if latest > *current {
        Some(latest)
    } else {
        None
    }
}

/// Returns the newest released version strictly greater than
/// `current_version`, or `None` when we are already up to date.
pub(crate) fn newer_version(
    client: &Client,
    current_version: &str,
    releases_url: &str,
) -> Result<Option<Version>> {
    let current =
        parse_release_tag(current_version).context(error::InvalidCurrentVersionSnafu {
            version: current_version,
        })?;
    info!("Current version: v{}", current);
    let index = fetch_release_index(client, releases_url)?;
    Ok(latest_available(&index, &current))
}
