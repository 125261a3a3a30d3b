//! Mode dispatcher - launches the long-running service process
//!
//! Production replaces the bootstrap process image so the service becomes
//! PID 1 and receives container signals directly. Development runs the
//! service under the restart [`Supervisor`](crate::supervisor::Supervisor).

use serde::Serialize;
use std::future::Future;
use std::os::unix::process::CommandExt;
use tracing::info;

use crate::config::{BootstrapConfig, CommandSpec, RunMode, WatchConfig};
use crate::error::DispatchError;
use crate::supervisor::Supervisor;
use crate::tools::find_executable;

/// How the service process is started
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "launch", rename_all = "snake_case")]
pub enum LaunchPlan {
    /// exec(2) into the service; never returns on success
    ReplaceCurrentProcess { command: CommandSpec },
    /// Child process restarted on source changes, signals forwarded
    SpawnSupervised {
        command: CommandSpec,
        watch: WatchConfig,
        restart_on_change: bool,
        forward_signals: bool,
    },
}

impl LaunchPlan {
    /// The single place run mode turns into launch behavior
    pub fn for_mode(mode: RunMode, config: &BootstrapConfig) -> Self {
        match mode {
            RunMode::Dev => LaunchPlan::SpawnSupervised {
                command: config.service.command.clone(),
                watch: config.watch.clone(),
                restart_on_change: true,
                forward_signals: true,
            },
            RunMode::Prod => LaunchPlan::ReplaceCurrentProcess {
                command: config.service.command.clone(),
            },
        }
    }

    pub fn command(&self) -> &CommandSpec {
        match self {
            LaunchPlan::ReplaceCurrentProcess { command }
            | LaunchPlan::SpawnSupervised { command, .. } => command,
        }
    }

    pub fn is_supervised(&self) -> bool {
        matches!(self, LaunchPlan::SpawnSupervised { .. })
    }
}

/// Starts the service according to a [`LaunchPlan`]
pub trait Launcher {
    /// Returns the service's exit code. A successful process replacement
    /// never returns.
    fn launch(&self, plan: LaunchPlan) -> impl Future<Output = Result<i32, DispatchError>>;
}

/// Launches real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    async fn launch(&self, plan: LaunchPlan) -> Result<i32, DispatchError> {
        let command = plan.command();
        let program = find_executable(command.program()).ok_or_else(|| {
            DispatchError::ExecutableNotFound {
                program: command.program().to_string(),
            }
        })?;

        match plan {
            LaunchPlan::ReplaceCurrentProcess { command } => {
                info!("Replacing bootstrap process with {}", program.display());
                let err = std::process::Command::new(&program)
                    .args(command.args())
                    .exec();
                Err(DispatchError::Exec {
                    program: program.display().to_string(),
                    source: err,
                })
            }
            LaunchPlan::SpawnSupervised {
                command,
                watch,
                restart_on_change,
                forward_signals,
            } => {
                Supervisor::new(program, command.args().to_vec(), watch)
                    .restart_on_change(restart_on_change)
                    .forward_signals(forward_signals)
                    .run()
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;

    fn config(force_dev: bool) -> BootstrapConfig {
        BootstrapConfig::from_parts(FileConfig::default(), |_| None, force_dev).unwrap()
    }

    #[test]
    fn test_dev_selects_supervised() {
        let config = config(true);
        let plan = LaunchPlan::for_mode(RunMode::Dev, &config);

        match &plan {
            LaunchPlan::SpawnSupervised {
                restart_on_change,
                forward_signals,
                watch,
                ..
            } => {
                assert!(*restart_on_change);
                assert!(*forward_signals);
                assert_eq!(watch, &config.watch);
            }
            other => panic!("expected supervised launch, got {:?}", other),
        }
        assert_eq!(plan.command(), &config.service.command);
    }

    #[test]
    fn test_prod_selects_replacement() {
        let config = config(false);
        let plan = LaunchPlan::for_mode(RunMode::Prod, &config);

        assert!(!plan.is_supervised());
        assert_eq!(plan.command(), &config.service.command);
    }

    #[tokio::test]
    async fn test_missing_executable_is_reported() {
        let plan = LaunchPlan::ReplaceCurrentProcess {
            command: CommandSpec::new(["definitely-not-a-service-binary", "--serve"]),
        };

        match ProcessLauncher.launch(plan).await {
            Err(DispatchError::ExecutableNotFound { program }) => {
                assert_eq!(program, "definitely-not-a-service-binary");
            }
            other => panic!("expected ExecutableNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_supervised_launch_returns_child_code() {
        let plan = LaunchPlan::SpawnSupervised {
            command: CommandSpec::new(["sh", "-c", "exit 7"]),
            watch: WatchConfig::default(),
            restart_on_change: false,
            forward_signals: false,
        };

        assert_eq!(ProcessLauncher.launch(plan).await.unwrap(), 7);
    }
}
