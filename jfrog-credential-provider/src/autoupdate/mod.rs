//! The binary auto-update pipeline: discover a newer release, fetch it,
//! verify its signature, validate it against the real credential flow, and
//! swap it into place. The pipeline runs in the background of a normal
//! credential exchange and is non-fatal end to end: any failure leaves the
//! current binary untouched and is visible only in the log stream.

mod fetch;
mod install;
mod lock;
mod resolve;
mod validate;
mod verify;

use crate::error::{self, Error, Result};
use crate::provider::{http_client, CredentialProviderRequest, HTTP_TIMEOUT};
use crate::settings::Settings;
use log::{debug, error, info};
use snafu::ResultExt;
use std::env;

use lock::UpdateLock;

/// Pipeline states, advanced strictly in order. `Aborted` is reachable from
/// any state after `Locked`; only `Done` means a new binary was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateState {
    Disabled,
    Idle,
    Locked,
    Resolving,
    Fetching,
    Verifying,
    Validating,
    Installing,
    Done,
}

fn advance(state: &mut UpdateState, next: UpdateState) {
    debug!("Update pipeline: {:?} -> {:?}", state, next);
    *state = next;
}

/// Entry point for the background thread. Errors are contained here: the
/// kubelet-facing response must never reflect an update failure.
pub(crate) fn run_in_background(
    settings: &Settings,
    request: &CredentialProviderRequest,
    running_version: &str,
) {
    match run(settings, request, running_version) {
        Ok(UpdateState::Done) => {}
        Ok(state) => debug!("Update pipeline finished without installing ({:?})", state),
        Err(e) => error!("Auto-update aborted, keeping the current binary: {}", e),
    }
}

fn run(
    settings: &Settings,
    request: &CredentialProviderRequest,
    running_version: &str,
) -> Result<UpdateState> {
    let mut state = UpdateState::Idle;

    if settings.autoupdate_disabled {
        info!("Auto-update is disabled, skipping");
        advance(&mut state, UpdateState::Disabled);
        return Ok(state);
    }

    let current_binary = env::current_exe().context(error::CurrentExeSnafu)?;
    let lock_path = {
        let mut os_string = current_binary.as_os_str().to_os_string();
        os_string.push(".lock");
        os_string
    };

    // Only one of the concurrent provider invocations on this node may run
    // the pipeline; the rest skip without waiting.
    let _lock = match UpdateLock::acquire(&lock_path) {
        Ok(lock) => lock,
        Err(Error::LockBusy { .. }) => {
            info!("Another invocation holds the update lock, skipping this attempt");
            return Ok(state);
        }
        Err(e) => return Err(e),
    };
    advance(&mut state, UpdateState::Locked);

    let client = http_client(HTTP_TIMEOUT)?;

    advance(&mut state, UpdateState::Resolving);
    let version = match resolve::newer_version(&client, running_version, &settings.releases_url)? {
        Some(version) => version,
        None => {
            info!(
                "No newer version available, current version {} is up to date",
                running_version
            );
            return Ok(state);
        }
    };
    info!("Newer version available: v{}", version);

    advance(&mut state, UpdateState::Fetching);
    let staged = fetch::fetch_artifacts(&client, settings, &version, &current_binary)?;

    advance(&mut state, UpdateState::Verifying);
    verify::verify_detached_signature(&staged.binary, &staged.signature)?;

    advance(&mut state, UpdateState::Validating);
    validate::validate_candidate(&client, settings, request, &staged.binary)?;

    advance(&mut state, UpdateState::Installing);
    install::install(&staged.binary, &current_binary)?;

    advance(&mut state, UpdateState::Done);
    info!(
        "Auto-update to v{} completed; the new binary serves the next invocation",
        version
    );
    Ok(state)
}
