//! Kubelet health watch after a config rollout. The kubelet is restarted
//! externally to pick up the new credential provider config; this watcher
//! gives the restart a grace period, then polls liveness for the remainder of
//! the window. A single unhealthy reading rolls the config back immediately:
//! a kubelet that cannot start stops every image pull on the node, so fast
//! recovery wins over tolerance of transient blips. A fully healthy window
//! certifies the config as the new last-good backup.

use crate::error::Result;
use crate::service_check::ServiceCheck;
use kubelet_provider_config::backup::{
    backup_config, rollback_config, BackupOutcome, RollbackOutcome,
};
use kubelet_provider_config::Format;
use log::{error, info};
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

const KUBELET_SERVICE: &str = "kubelet";

/// Timing of one watch run. The grace period counts toward the timeout, so
/// the caller-supplied timeout bounds total wall-clock time.
#[derive(Debug, Clone)]
pub(crate) struct WatchSession {
    pub(crate) timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) grace_period: Duration,
}

impl WatchSession {
    pub(crate) fn new(timeout_seconds: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds),
            poll_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WatchOutcome {
    /// Kubelet stayed active for the whole window; the config was certified.
    HealthyWindow(BackupOutcome),
    /// Kubelet went down; the config was restored from a backup.
    RolledBack(RollbackOutcome),
}

pub(crate) fn watch_kubelet(
    config_path: &Path,
    format: Format,
    session: &WatchSession,
    check: &dyn ServiceCheck,
) -> Result<WatchOutcome> {
    info!(
        "Watcher: waiting {} seconds grace period before monitoring kubelet",
        session.grace_period.as_secs()
    );
    sleep(session.grace_period);
    let mut elapsed = session.grace_period;

    while elapsed < session.timeout {
        if !check.is_active(KUBELET_SERVICE)? {
            error!("Kubelet is not active, triggering rollback");
            let outcome = rollback_config(config_path)?;
            if let RollbackOutcome::Pristine(_) = &outcome {
                error!(
                    "The provider has been removed from this node's kubelet config; \
                     check the configuration and retry the install"
                );
            }
            return Ok(WatchOutcome::RolledBack(outcome));
        }
        info!(
            "Watcher: kubelet active ({}/{} seconds elapsed)",
            elapsed.as_secs(),
            session.timeout.as_secs()
        );
        sleep(session.poll_interval);
        elapsed += session.poll_interval;
    }

    info!("Watcher: kubelet healthy for the full timeout window");
    let outcome = backup_config(config_path, format, true)?;
    Ok(WatchOutcome::HealthyWindow(outcome))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

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

    /// Plays back a scripted sequence of liveness readings; the last reading
    /// repeats if the watcher polls longer than the script.
    struct ScriptedCheck {
        readings: RefCell<Vec<bool>>,
    }

    impl ScriptedCheck {
        fn new(readings: &[bool]) -> Self {
            let mut readings: Vec<bool> = readings.to_vec();
            readings.reverse();
            Self {
                readings: RefCell::new(readings),
            }
        }
    }

    impl ServiceCheck for ScriptedCheck {
        fn is_active(&self, _service_name: &str) -> Result<bool> {
            let mut readings = self.readings.borrow_mut();
            if readings.len() > 1 {
                Ok(readings.pop().unwrap())
            } else {
                Ok(*readings.last().unwrap())
            }
        }
    }

    fn fast_session() -> WatchSession {
        WatchSession {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            grace_period: Duration::from_millis(1),
        }
    }

    fn write_config(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, WITH_PLUGIN).unwrap();
        path
    }

    #[test]
    fn healthy_window_writes_last_good_backup() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let check = ScriptedCheck::new(&[true]);
        let outcome = watch_kubelet(&config, Format::Json, &fast_session(), &check).unwrap();
        match outcome {
            WatchOutcome::HealthyWindow(BackupOutcome::LastGood(path)) => {
                assert_eq!(WITH_PLUGIN, fs::read_to_string(path).unwrap());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn unhealthy_reading_rolls_back_to_last_good() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let last_good = dir.path().join("config.json.jfrog");
        let pristine = dir.path().join("config.json.backup");
        fs::write(&last_good, "last good").unwrap();
        fs::write(&pristine, "pristine").unwrap();

        // Second poll reads "failed".
        let check = ScriptedCheck::new(&[true, false]);
        let outcome = watch_kubelet(&config, Format::Json, &fast_session(), &check).unwrap();
        assert!(matches!(
            outcome,
            WatchOutcome::RolledBack(RollbackOutcome::LastGood(_))
        ));
        assert_eq!("last good", fs::read_to_string(&config).unwrap());
    }

    #[test]
    fn unhealthy_reading_falls_back_to_pristine() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let pristine = dir.path().join("config.json.backup");
        fs::write(&pristine, "pristine").unwrap();

        let check = ScriptedCheck::new(&[false]);
        let outcome = watch_kubelet(&config, Format::Json, &fast_session(), &check).unwrap();
        assert!(matches!(
            outcome,
            WatchOutcome::RolledBack(RollbackOutcome::Pristine(_))
        ));
        assert_eq!("pristine", fs::read_to_string(&config).unwrap());
    }

    #[test]
    fn rollback_without_backups_reports_the_failure() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let check = ScriptedCheck::new(&[false]);
        let err = watch_kubelet(&config, Format::Json, &fast_session(), &check).unwrap_err();
        assert!(matches!(
            err,
            Error::ProviderConfig {
                source: kubelet_provider_config::error::Error::NoBackupAvailable { .. }
            }
        ));
        assert_eq!(WITH_PLUGIN, fs::read_to_string(&config).unwrap());
    }
}
