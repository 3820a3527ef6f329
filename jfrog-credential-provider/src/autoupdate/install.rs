//! Installs a validated candidate over the live binary. The rename is atomic
//! because the candidate is staged in the same directory as the target; the
//! process currently executing keeps running its in-memory image, and the
//! next invocation picks up the new binary.

use crate::error::{self, Result};
use log::info;
use snafu::ResultExt;
use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub(crate) fn install(candidate: &Path, current: &Path) -> Result<()> {
    fs::rename(candidate, current).context(error::ReplaceBinarySnafu {
        from: candidate,
        to: current,
    })?;
    fs::set_permissions(current, Permissions::from_mode(0o755))
        .context(error::SetPermissionsSnafu { path: current })?;
    info!(
        "Replaced {} with the new version; it takes effect on the next invocation",
        current.display()
    );
    Ok(())
}
