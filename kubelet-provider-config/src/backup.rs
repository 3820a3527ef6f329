//! Backup generations for the kubelet credential provider config.
//!
//! Two generations protect the document, each representing a different trust
//! level:
//!
//! * `<config>.backup`: the pristine config from before this plugin was
//!   installed. Written once, before the first merge, and never overwritten:
//!   it must always represent "no plugin".
//! * `<config>.jfrog`: the last config that contained this plugin and
//!   survived a full kubelet health-watch window. Refreshed after every
//!   successful window.
//!
//! Rollback restores the best available generation: `.jfrog` keeps the plugin
//! functioning with a proven config, `.backup` removes it entirely, and with
//! neither present the operator has to intervene.

use crate::error::{self, Result};
use crate::{CredentialProviderConfig, Format};
use log::{info, warn};
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix of the pristine, pre-install generation.
pub const PRISTINE_SUFFIX: &str = ".backup";

/// Suffix of the last-known-good generation with this plugin present.
pub const LAST_GOOD_SUFFIX: &str = ".jfrog";

/// What a backup request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Wrote the pristine generation.
    Pristine(PathBuf),
    /// Wrote (or refreshed) the last-good generation.
    LastGood(PathBuf),
    /// The config state did not call for this generation; nothing written.
    NotNeeded,
}

fn sibling_path(config_path: &Path, suffix: &str) -> PathBuf {
    let mut os_string = config_path.as_os_str().to_os_string();
    os_string.push(suffix);
    PathBuf::from(os_string)
}

/// Snapshots the config at `config_path` into the generation appropriate for
/// the current config state.
///
/// Before a merge (`post_success = false`) the pristine generation is written,
/// but only when the config does not yet contain this plugin, since a config
/// that already carries it must never masquerade as pristine. After a successful
/// health-watch window (`post_success = true`) the last-good generation is
/// written, but only when the plugin is actually present; there is nothing to
/// certify otherwise.
pub fn backup_config(config_path: &Path, format: Format, post_success: bool) -> Result<BackupOutcome> {
    let data = fs::read(config_path).context(error::FileReadSnafu { path: config_path })?;

    // Plugin presence decides the generation. A config we cannot parse is
    // treated as not containing the plugin, which can only route us to the
    // pristine generation below.
    let has_plugin = match CredentialProviderConfig::from_path(config_path, format) {
        Ok(config) => config.contains_plugin(),
        Err(e) => {
            warn!("Could not parse config to check for plugin presence: {}", e);
            false
        }
    };

    match (has_plugin, post_success) {
        (false, false) => {
            let backup_path = sibling_path(config_path, PRISTINE_SUFFIX);
            if backup_path.exists() {
                info!(
                    "Pristine backup {} already exists, not overwriting",
                    backup_path.display()
                );
                return Ok(BackupOutcome::NotNeeded);
            }
            fs::write(&backup_path, &data).context(error::FileWriteSnafu {
                path: &backup_path,
            })?;
            info!("Config backed up to {}", backup_path.display());
            Ok(BackupOutcome::Pristine(backup_path))
        }
        (true, true) => {
            let backup_path = sibling_path(config_path, LAST_GOOD_SUFFIX);
            fs::write(&backup_path, &data).context(error::FileWriteSnafu {
                path: &backup_path,
            })?;
            info!("Config backed up to {}", backup_path.display());
            Ok(BackupOutcome::LastGood(backup_path))
        }
        _ => Ok(BackupOutcome::NotNeeded),
    }
}

/// Which generation a rollback restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Restored the last config proven to work with this plugin.
    LastGood(PathBuf),
    /// Restored the pre-install config; the plugin is removed from the node.
    Pristine(PathBuf),
}

/// Restores the best available backup generation over the live config path.
/// Does not restart kubelet; process recovery is external to this subsystem.
pub fn rollback_config(config_path: &Path) -> Result<RollbackOutcome> {
    let last_good = sibling_path(config_path, LAST_GOOD_SUFFIX);
    let pristine = sibling_path(config_path, PRISTINE_SUFFIX);

    let (restore_from, outcome) = if last_good.exists() {
        info!(
            "Rolling back kubelet config from last-good backup {}",
            last_good.display()
        );
        (last_good.clone(), RollbackOutcome::LastGood(last_good))
    } else if pristine.exists() {
        info!(
            "Rolling back kubelet config from pristine backup {}",
            pristine.display()
        );
        (pristine.clone(), RollbackOutcome::Pristine(pristine))
    } else {
        return error::NoBackupAvailableSnafu { path: config_path }.fail();
    };

    let data = fs::read(&restore_from).context(error::FileReadSnafu {
        path: &restore_from,
    })?;
    fs::write(config_path, data).context(error::FileWriteSnafu { path: config_path })?;
    info!("Restored config from {}", restore_from.display());
    Ok(outcome)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    const WITHOUT_PLUGIN: &str = r#"{
      "apiVersion": "kubelet.config.k8s.io/v1",
      "kind": "CredentialProviderConfig",
      "providers": [
        {
          "name": "ecr-credential-provider",
          "matchImages": ["*.dkr.ecr.*.amazonaws.com"],
          "defaultCacheDuration": "12h",
          "apiVersion": "credentialprovider.kubelet.k8s.io/v1"
        }
      ]
    }"#;

    const WITH_PLUGIN: &str = r#"{
      "apiVersion": "kubelet.config.k8s.io/v1",
      "kind": "CredentialProviderConfig",
      "providers": [
        {
          "name": "jfrog-credential-provider",
          "matchImages": ["*.jfrog.io"],
          "defaultCacheDuration": "4h",
          "apiVersion": "credentialprovider.kubelet.k8s.io/v1",
          "env": [{"name": "artifactory_url", "value": "myorg.jfrog.io"}]
        }
      ]
    }"#;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn pre_merge_backup_without_plugin_writes_pristine() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, WITHOUT_PLUGIN);
        let outcome = backup_config(&config, Format::Json, false).unwrap();
        let backup = sibling_path(&config, PRISTINE_SUFFIX);
        assert_eq!(BackupOutcome::Pristine(backup.clone()), outcome);
        assert_eq!(WITHOUT_PLUGIN, fs::read_to_string(&backup).unwrap());
    }

    #[test]
    fn pre_merge_backup_with_plugin_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, WITH_PLUGIN);
        let outcome = backup_config(&config, Format::Json, false).unwrap();
        assert_eq!(BackupOutcome::NotNeeded, outcome);
        assert!(!sibling_path(&config, PRISTINE_SUFFIX).exists());
        assert!(!sibling_path(&config, LAST_GOOD_SUFFIX).exists());
    }

    #[test]
    fn pristine_backup_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, WITHOUT_PLUGIN);
        let backup = sibling_path(&config, PRISTINE_SUFFIX);
        fs::write(&backup, "original pristine content").unwrap();
        let outcome = backup_config(&config, Format::Json, false).unwrap();
        assert_eq!(BackupOutcome::NotNeeded, outcome);
        assert_eq!(
            "original pristine content",
            fs::read_to_string(&backup).unwrap()
        );
    }

    #[test]
    fn post_success_backup_with_plugin_writes_last_good() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, WITH_PLUGIN);
        let outcome = backup_config(&config, Format::Json, true).unwrap();
        let backup = sibling_path(&config, LAST_GOOD_SUFFIX);
        assert_eq!(BackupOutcome::LastGood(backup.clone()), outcome);
        assert_eq!(WITH_PLUGIN, fs::read_to_string(&backup).unwrap());
    }

    #[test]
    fn post_success_backup_without_plugin_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, WITHOUT_PLUGIN);
        let outcome = backup_config(&config, Format::Json, true).unwrap();
        assert_eq!(BackupOutcome::NotNeeded, outcome);
        assert!(!sibling_path(&config, LAST_GOOD_SUFFIX).exists());
    }

    #[test]
    fn rollback_prefers_last_good() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, WITH_PLUGIN);
        fs::write(sibling_path(&config, LAST_GOOD_SUFFIX), "last good").unwrap();
        fs::write(sibling_path(&config, PRISTINE_SUFFIX), "pristine").unwrap();
        let outcome = rollback_config(&config).unwrap();
        assert!(matches!(outcome, RollbackOutcome::LastGood(_)));
        assert_eq!("last good", fs::read_to_string(&config).unwrap());
    }

    #[test]
    fn rollback_falls_back_to_pristine() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, WITH_PLUGIN);
        fs::write(sibling_path(&config, PRISTINE_SUFFIX), "pristine").unwrap();
        let outcome = rollback_config(&config).unwrap();
        assert!(matches!(outcome, RollbackOutcome::Pristine(_)));
        assert_eq!("pristine", fs::read_to_string(&config).unwrap());
    }

    #[test]
    fn rollback_without_backups_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, WITH_PLUGIN);
        let err = rollback_config(&config).unwrap_err();
        assert!(matches!(err, Error::NoBackupAvailable { .. }));
        assert_eq!(WITH_PLUGIN, fs::read_to_string(&config).unwrap());
    }
}
