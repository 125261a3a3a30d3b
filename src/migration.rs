//! Migration applier - brings the schema up to the latest revision
//!
//! The upgrade command is always invoked; it is the migration tool's job to
//! make an already-current schema a no-op. A failed run is fatal and never
//! retried.

use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::CommandSpec;
use crate::error::MigrationError;
use crate::signals::signal_group;
use crate::supervisor::exit_code;
use crate::tools::get_tool_path;

/// Something that can bring the schema to the latest revision
pub trait MigrationStep {
    /// Description used in log lines
    fn describe(&self) -> String;

    fn apply(&self) -> impl Future<Output = Result<(), MigrationError>> + Send;

    /// Pass a termination signal on to an in-flight `apply`. The pending
    /// `apply` future still has to be driven to completion.
    fn interrupt(&self, _signal: i32) {}
}

/// Runs the configured upgrade command as a child process
///
/// The child inherits stdio and the full environment, so the migration tool
/// reads the same database settings as the service.
pub struct CommandMigration {
    command: CommandSpec,
    // Process group of the running command, 0 when idle
    running: AtomicU32,
}

impl CommandMigration {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            running: AtomicU32::new(0),
        }
    }
}

impl MigrationStep for CommandMigration {
    fn describe(&self) -> String {
        self.command.to_string()
    }

    async fn apply(&self) -> Result<(), MigrationError> {
        let program = get_tool_path(self.command.program());
        let start = Instant::now();

        let mut child = Command::new(&program)
            .args(self.command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            // Own process group: signals reach the tool and its children only through us
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MigrationError::Spawn {
                program: program.clone(),
                source,
            })?;

        self.running.store(child.id().unwrap_or(0), Ordering::SeqCst);
        let status = child.wait().await;
        self.running.store(0, Ordering::SeqCst);

        let status = status.map_err(|source| MigrationError::Spawn {
            program: program.clone(),
            source,
        })?;

        match status.code() {
            Some(0) => {
                info!(
                    "Migration command finished in {:.1}s",
                    start.elapsed().as_secs_f64()
                );
                Ok(())
            }
            Some(code) => Err(MigrationError::Failed {
                command: self.command.to_string(),
                code,
            }),
            None => {
                warn!("Migration command ended with status {}", exit_code(status));
                Err(MigrationError::Terminated {
                    command: self.command.to_string(),
                })
            }
        }
    }

    fn interrupt(&self, signal: i32) {
        let pgid = self.running.load(Ordering::SeqCst);
        if pgid != 0 {
            info!("Forwarding signal {} to migration command", signal);
            signal_group(pgid, signal);
        }
    }
}
