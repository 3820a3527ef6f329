use crate::error::{self, Result};
use log::{info, trace};
use snafu::ResultExt;
use std::process::Command;

/// Liveness query for a systemd service. The watcher takes this as a trait
/// object so tests can script status sequences.
pub(crate) trait ServiceCheck {
    fn is_active(&self, service_name: &str) -> Result<bool>;
}

pub(crate) struct SystemdCheck {}

impl ServiceCheck for SystemdCheck {
    fn is_active(&self, service_name: &str) -> Result<bool> {
        let outcome = systemctl(&["is-active", service_name])?;
        if !outcome.is_exit_true() {
            info!(
                "systemctl reports '{}' status '{}'",
                service_name,
                outcome.stdout.trim()
            );
        }
        Ok(outcome.is_exit_true())
    }
}

struct Outcome {
    exit: i32,
    stdout: String,
}

impl Outcome {
    fn is_exit_true(&self) -> bool {
        self.exit == 0
    }
}

fn systemctl(args: &[&str]) -> Result<Outcome> {
    trace!("calling systemctl with '{:?}'", args);
    let output = Command::new("systemctl")
        .args(args)
        .output()
        .with_context(|_| error::CommandSnafu {
            command: "systemctl",
            args: args.iter().map(|&s| s.to_owned()).collect::<Vec<String>>(),
        })?;
    Ok(Outcome {
        exit: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(output.stdout.as_slice()).into(),
    })
}
