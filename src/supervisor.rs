//! Development supervisor
//!
//! Runs the service as a child process and restarts it whenever a watched
//! source file changes. SIGINT and SIGTERM received by the supervisor are
//! forwarded to the child's process group, and the supervisor waits for the
//! child before exiting so no service process outlives it.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::process::ExitStatus;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::error::DispatchError;
use crate::signals::{signal_group, termination_signal};

pub struct Supervisor {
    program: PathBuf,
    args: Vec<String>,
    watch: WatchConfig,
    restart_on_change: bool,
    forward_signals: bool,
}

impl Supervisor {
    pub fn new(program: PathBuf, args: Vec<String>, watch: WatchConfig) -> Self {
        Self {
            program,
            args,
            watch,
            restart_on_change: true,
            forward_signals: true,
        }
    }

    pub fn restart_on_change(mut self, enabled: bool) -> Self {
        self.restart_on_change = enabled;
        self
    }

    pub fn forward_signals(mut self, enabled: bool) -> Self {
        self.forward_signals = enabled;
        self
    }

    /// Supervise until SIGINT/SIGTERM (or until the child exits, when
    /// restarts are disabled). Returns the child's exit code.
    pub async fn run(self) -> Result<i32, DispatchError> {
        if !self.forward_signals {
            return self.run_until(std::future::pending()).await;
        }

        let shutdown = termination_signal().map_err(DispatchError::Signal)?;
        self.run_until(shutdown).await
    }

    /// Supervise until `shutdown` resolves to a signal number, which is then
    /// forwarded to the child
    pub async fn run_until<F>(self, shutdown: F) -> Result<i32, DispatchError>
    where
        F: Future<Output = i32>,
    {
        let (tx, mut changes) = mpsc::unbounded_channel::<PathBuf>();
        let _watcher = if self.restart_on_change {
            Some(self.start_watcher(tx)?)
        } else {
            drop(tx);
            None
        };

        let mut shutdown = pin!(shutdown);
        let mut child = Some(self.spawn()?);
        let mut restarts: u64 = 0;

        loop {
            tokio::select! {
                status = wait_running(&mut child) => {
                    child = None;
                    let code = match status {
                        Ok(status) => exit_code(status),
                        Err(e) => {
                            error!("Failed to wait for service process: {}", e);
                            1
                        }
                    };
                    if !self.restart_on_change {
                        info!("Service exited with code {}", code);
                        return Ok(code);
                    }
                    warn!("Service exited with code {} - waiting for source changes to restart", code);
                }
                Some(path) = changes.recv() => {
                    let coalesced = self.debounce(&mut changes).await;
                    info!(
                        "Change detected in {} ({} more) - restarting service",
                        path.display(),
                        coalesced
                    );
                    if let Some(running) = child.take() {
                        stop_child(running, libc::SIGINT, &self.watch).await;
                    }
                    child = Some(self.spawn()?);
                    restarts += 1;
                    debug!("Service restarted {} time(s)", restarts);
                }
                sig = &mut shutdown => {
                    info!("Received signal {} - stopping service", sig);
                    return Ok(match child.take() {
                        Some(running) => stop_child(running, sig, &self.watch).await,
                        None => 128 + sig,
                    });
                }
            }
        }
    }

    fn spawn(&self) -> Result<Child, DispatchError> {
        info!(
            "Starting supervised service: {} {}",
            self.program.display(),
            self.args.join(" ")
        );
        Command::new(&self.program)
            .args(&self.args)
            // Own process group: terminal signals reach the child only through us
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                program: self.program.display().to_string(),
                source,
            })
    }

    fn start_watcher(
        &self,
        tx: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<RecommendedWatcher, DispatchError> {
        let extensions = self.watch.extensions.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !is_change(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if is_watched_file(&path, &extensions) {
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            },
            notify::Config::default(),
        )?;

        for path in &self.watch.paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
            info!(path = ?path, "Watching for source changes");
        }

        Ok(watcher)
    }

    /// Swallow follow-up events until the channel has been quiet for the
    /// debounce window. Returns how many were swallowed.
    async fn debounce(&self, changes: &mut mpsc::UnboundedReceiver<PathBuf>) -> usize {
        let mut swallowed = 0;
        while let Ok(Some(_)) = tokio::time::timeout(self.watch.debounce(), changes.recv()).await {
            swallowed += 1;
        }
        swallowed
    }
}

async fn wait_running(child: &mut Option<Child>) -> io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

/// Signal the child's process group, then SIGKILL it after the grace period
async fn stop_child(mut child: Child, sig: i32, watch: &WatchConfig) -> i32 {
    if let Some(pid) = child.id() {
        signal_group(pid, sig);
    }

    match tokio::time::timeout(watch.grace_period(), child.wait()).await {
        Ok(Ok(status)) => exit_code(status),
        Ok(Err(e)) => {
            error!("Failed to wait for service process: {}", e);
            1
        }
        Err(_) => {
            warn!(
                "Service did not exit within {}s - killing it",
                watch.grace_period_secs
            );
            if let Some(pid) = child.id() {
                signal_group(pid, libc::SIGKILL);
            }
            match child.wait().await {
                Ok(status) => exit_code(status),
                Err(_) => 128 + libc::SIGKILL,
            }
        }
    }
}

/// Shell convention: a signal-terminated child maps to 128 + signal
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Whether a changed path should trigger a restart. An empty extension
/// list matches every file.
pub fn is_watched_file(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn watch_config(dir: &Path) -> WatchConfig {
        WatchConfig {
            paths: vec![dir.to_path_buf()],
            extensions: vec!["py".to_string()],
            debounce_ms: 100,
            grace_period_secs: 2,
        }
    }

    fn line_count(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    async fn wait_for_lines(path: &Path, lines: usize) {
        for _ in 0..200 {
            if line_count(path) >= lines {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} never reached {} line(s)", path.display(), lines);
    }

    #[test]
    fn test_is_watched_file() {
        let py = vec!["py".to_string()];
        assert!(is_watched_file(Path::new("src/core/entrypoint.py"), &py));
        assert!(is_watched_file(Path::new("src/APP.PY"), &py));
        assert!(!is_watched_file(Path::new("src/__pycache__/app.cpython-312.pyc"), &py));
        assert!(!is_watched_file(Path::new("src/Makefile"), &py));

        assert!(is_watched_file(Path::new("src/Makefile"), &[]));
    }

    #[test]
    fn test_exit_code_from_status() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGTERM)), 128 + libc::SIGTERM);
    }

    #[tokio::test]
    async fn test_child_exit_ends_supervision_without_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), "exit 4".to_string()],
            watch_config(dir.path()),
        )
        .restart_on_change(false);

        let code = supervisor.run_until(std::future::pending()).await.unwrap();
        assert_eq!(code, 4);
    }

    #[tokio::test]
    async fn test_restart_on_change_and_forward_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let starts = dir.path().join("starts.log");
        let script = format!("echo started >> {}; exec sleep 30", starts.display());

        let supervisor = Supervisor::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), script],
            watch_config(dir.path()),
        );

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let shutdown = async move {
            let _ = stop_rx.await;
            libc::SIGTERM
        };

        let driver = async {
            wait_for_lines(&starts, 1).await;

            // Ignored extension: no restart
            std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
            tokio::time::sleep(Duration::from_millis(400)).await;
            assert_eq!(line_count(&starts), 1);

            std::fs::write(dir.path().join("app.py"), "print('hi')").unwrap();
            wait_for_lines(&starts, 2).await;

            let _ = stop_tx.send(());
        };

        let (result, ()) = tokio::join!(supervisor.run_until(shutdown), driver);

        // sleep was exec'd, so SIGTERM reaches it directly
        assert_eq!(result.unwrap(), 128 + libc::SIGTERM);
        assert_eq!(line_count(&starts), 2);
    }

    #[tokio::test]
    async fn test_missing_watch_path_fails() {
        let supervisor = Supervisor::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), "exit 0".to_string()],
            watch_config(Path::new("/nonexistent/bootstrap-watch-dir")),
        );

        let result = supervisor.run_until(std::future::pending()).await;
        assert!(matches!(result, Err(DispatchError::Watch(_))));
    }
}
