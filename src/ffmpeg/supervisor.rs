use super::commands::EncodeCommand;
use super::progress::{parse_progress_line, ProgressSample, StatusLineSplitter, StatusReading};
use crate::error::SyncError;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Re-emit the latest sample this often so the elapsed clock keeps moving
/// while FFmpeg is quiet.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Trailing stderr lines kept for failure reports.
const DIAGNOSTIC_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Killed,
}

/// How an encode ended. Delivered exactly once, after the last progress.
#[derive(Debug)]
pub enum EncodeOutcome {
    Succeeded,
    Failed(SyncError),
    Cancelled,
}

#[derive(Debug)]
pub enum SupervisorEvent {
    /// The encoder process is running and may have written the output.
    Started,
    Progress(ProgressSample),
    Complete(EncodeOutcome),
}

enum Exit {
    Exited(std::io::Result<ExitStatus>),
    Stop,
}

/// Runs one FFmpeg encode and reports on it over an ordered channel.
///
/// Clones share state, so a clone kept by the control thread can `stop()`
/// a run awaited on the runtime.
#[derive(Clone)]
pub struct ProcessSupervisor {
    grace_period: Duration,
    state: Arc<Mutex<SupervisorState>>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl ProcessSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            grace_period,
            state: Arc::new(Mutex::new(SupervisorState::NotStarted)),
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    /// Request termination. Calling it again has no further effect.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            debug!("Stop requested");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Resolves once `stop()` has been called.
    pub async fn stop_requested(&self) {
        let mut rx = self.stop_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    fn set_state(&self, state: SupervisorState) {
        *self.state.lock() = state;
    }

    fn finish<T: From<SupervisorEvent>>(
        &self,
        state: SupervisorState,
        outcome: EncodeOutcome,
        sink: &Sender<T>,
    ) {
        self.set_state(state);
        let _ = sink.send(T::from(SupervisorEvent::Complete(outcome)));
    }

    /// Launch `command` and drive it to completion.
    ///
    /// `Started` is sent once the child is spawned. Progress samples go to
    /// `sink` in the order they were observed, followed by exactly one
    /// `Complete`. After `stop()` no further
    /// progress is sent, and `Complete(Cancelled)` is only sent once the
    /// child has exited.
    pub async fn run<T: From<SupervisorEvent>>(&self, command: &EncodeCommand, sink: &Sender<T>) {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow_and_update() {
            self.finish(SupervisorState::Killed, EncodeOutcome::Cancelled, sink);
            return;
        }

        debug!("Launching: {}", command.command_line());

        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = SyncError::ProcessLaunch {
                    program: command.program().to_string(),
                    source,
                };
                self.finish(SupervisorState::Failed, EncodeOutcome::Failed(err), sink);
                return;
            }
        };

        let started = Instant::now();
        self.set_state(SupervisorState::Running);
        let _ = sink.send(T::from(SupervisorEvent::Started));

        let stdin = child.stdin.take();
        let mut stderr = match child.stderr.take() {
            Some(stderr) => stderr,
            None => {
                let _ = child.kill().await;
                let err = SyncError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "failed to capture ffmpeg stderr",
                ));
                self.finish(SupervisorState::Failed, EncodeOutcome::Failed(err), sink);
                return;
            }
        };

        let total = command.expected_duration_seconds();
        let mut splitter = StatusLineSplitter::new();
        let mut diagnostics: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_LINES);
        let mut latest: Option<StatusReading> = None;
        let mut buf = [0u8; 4096];
        let mut stderr_open = true;

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + TICK_INTERVAL,
            TICK_INTERVAL,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut handle_line = |line: String, latest: &mut Option<StatusReading>| {
            match parse_progress_line(&line) {
                Some(reading) => {
                    *latest = Some(reading);
                    let sample = ProgressSample::from_reading(
                        started.elapsed().as_secs_f64(),
                        reading,
                        total,
                    );
                    let _ = sink.send(T::from(SupervisorEvent::Progress(sample)));
                }
                None => {
                    if diagnostics.len() == DIAGNOSTIC_LINES {
                        diagnostics.pop_front();
                    }
                    diagnostics.push_back(line);
                }
            }
        };

        let exit = loop {
            tokio::select! {
                biased;

                _ = stop_rx.changed() => {
                    // the sender lives in `self`, so an error cannot happen mid-run
                    if *stop_rx.borrow() {
                        break Exit::Stop;
                    }
                }

                read = stderr.read(&mut buf), if stderr_open => match read {
                    Ok(0) | Err(_) => {
                        stderr_open = false;
                        if let Some(line) = splitter.finish() {
                            handle_line(line, &mut latest);
                        }
                    }
                    Ok(n) => {
                        for line in splitter.push(&buf[..n]) {
                            handle_line(line, &mut latest);
                        }
                    }
                },

                status = child.wait(), if !stderr_open => break Exit::Exited(status),

                _ = ticker.tick() => {
                    if let Some(reading) = latest {
                        let sample = ProgressSample::from_reading(
                            started.elapsed().as_secs_f64(),
                            reading,
                            total,
                        );
                        let _ = sink.send(T::from(SupervisorEvent::Progress(sample)));
                    }
                }
            }
        };
        drop(handle_line);

        match exit {
            Exit::Stop => {
                self.terminate(&mut child, stdin, stderr).await;
                info!("Encode stopped after {:.1}s", started.elapsed().as_secs_f64());
                self.finish(SupervisorState::Killed, EncodeOutcome::Cancelled, sink);
            }
            Exit::Exited(Ok(status)) if status.success() => {
                info!("Encode finished in {:.1}s", started.elapsed().as_secs_f64());
                self.finish(SupervisorState::Completed, EncodeOutcome::Succeeded, sink);
            }
            Exit::Exited(Ok(status)) => {
                let diagnostics = diagnostics.into_iter().collect::<Vec<_>>().join("\n");
                let err = SyncError::ProcessExecution {
                    exit_code: status.code(),
                    diagnostics,
                };
                self.finish(SupervisorState::Failed, EncodeOutcome::Failed(err), sink);
            }
            Exit::Exited(Err(e)) => {
                let _ = child.kill().await;
                self.finish(SupervisorState::Failed, EncodeOutcome::Failed(SyncError::Io(e)), sink);
            }
        }
    }

    /// Ask FFmpeg to quit (`q` on stdin), then kill it if it is still
    /// running once the grace period is over. Returns after the child exited.
    async fn terminate(&self, child: &mut Child, stdin: Option<ChildStdin>, mut stderr: ChildStderr) {
        // keep stderr drained so FFmpeg cannot block on a full pipe while quitting
        let drain = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
        });

        if let Some(mut stdin) = stdin {
            let _ = stdin.write_all(b"q\n").await;
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => debug!("ffmpeg quit with {}", status),
            Ok(Err(e)) => {
                warn!("Waiting for ffmpeg failed ({}), killing it", e);
                let _ = child.kill().await;
            }
            Err(_) => {
                warn!(
                    "ffmpeg did not quit within {:?}, killing it",
                    self.grace_period
                );
                let _ = child.kill().await;
            }
        }

        drain.abort();
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn command_for(script: &Path, total: f64) -> EncodeCommand {
        EncodeCommand::new(
            script.to_string_lossy().to_string(),
            Vec::new(),
            PathBuf::from("out.mkv"),
            total,
        )
    }

    struct Collected {
        started: usize,
        samples: Vec<ProgressSample>,
        outcomes: Vec<EncodeOutcome>,
    }

    fn collect(rx: &Receiver<SupervisorEvent>) -> Collected {
        let mut collected = Collected {
            started: 0,
            samples: Vec::new(),
            outcomes: Vec::new(),
        };
        for event in rx.try_iter() {
            match event {
                SupervisorEvent::Started => {
                    assert!(collected.samples.is_empty() && collected.outcomes.is_empty());
                    collected.started += 1;
                }
                SupervisorEvent::Progress(s) => {
                    assert_eq!(collected.started, 1, "progress before start");
                    assert!(collected.outcomes.is_empty(), "progress after completion");
                    collected.samples.push(s);
                }
                SupervisorEvent::Complete(o) => collected.outcomes.push(o),
            }
        }
        collected
    }

    #[tokio::test]
    async fn test_successful_encode_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "ffmpeg",
            r#"printf 'Stream mapping:\n'
printf 'size=1kB time=00:00:02.50 bitrate=N/A speed=5x\r' >&2
printf 'size=2kB time=00:00:05.00 bitrate=N/A speed=5x\r' >&2
printf 'size=4kB time=00:00:10.00 bitrate=N/A speed=5x\n' >&2
exit 0"#,
        );

        let (tx, rx) = unbounded();
        let supervisor = ProcessSupervisor::default();
        supervisor.run(&command_for(&script, 10.0), &tx).await;

        let Collected {
            started,
            samples,
            outcomes,
        } = collect(&rx);
        assert_eq!(started, 1);
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], EncodeOutcome::Succeeded));
        assert_eq!(supervisor.state(), SupervisorState::Completed);

        // timer ticks may repeat the latest reading
        let mut processed: Vec<f64> = samples.iter().map(|s| s.processed_duration_seconds).collect();
        processed.dedup();
        assert_eq!(processed, vec![2.5, 5.0, 10.0]);
        assert!(samples
            .windows(2)
            .all(|w| w[0].elapsed_seconds <= w[1].elapsed_seconds));
        assert_eq!(samples.last().unwrap().estimated_remaining_seconds, Some(0.0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "ffmpeg",
            "echo 'Unknown encoder foo' >&2\necho 'Conversion failed!' >&2\nexit 1",
        );

        let (tx, rx) = unbounded();
        let supervisor = ProcessSupervisor::default();
        supervisor.run(&command_for(&script, 10.0), &tx).await;

        let collected = collect(&rx);
        assert_eq!(collected.started, 1);
        assert!(collected.samples.is_empty());
        match &collected.outcomes[..] {
            [EncodeOutcome::Failed(SyncError::ProcessExecution {
                exit_code,
                diagnostics,
            })] => {
                assert_eq!(*exit_code, Some(1));
                assert!(diagnostics.contains("Unknown encoder foo"));
                assert!(diagnostics.contains("Conversion failed!"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let (tx, rx) = unbounded();
        let supervisor = ProcessSupervisor::default();
        let cmd = command_for(Path::new("/nonexistent/ffmpeg-binary"), 1.0);
        supervisor.run(&cmd, &tx).await;

        let collected = collect(&rx);
        assert_eq!(collected.started, 0);
        assert!(matches!(
            &collected.outcomes[..],
            [EncodeOutcome::Failed(SyncError::ProcessLaunch { .. })]
        ));
    }

    #[tokio::test]
    async fn test_stop_quits_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("quit");
        let script = write_script(
            dir.path(),
            "ffmpeg",
            &format!(
                "printf 'size=1kB time=00:00:01.00 speed=1x\\r' >&2\nread key\necho \"$key\" > '{}'\nexit 255",
                marker.display()
            ),
        );

        let (tx, rx) = unbounded();
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        let handle = supervisor.clone();
        let cmd = command_for(&script, 10.0);
        let run = tokio::spawn(async move { handle.run(&cmd, &tx).await });

        // wait for the first progress line before stopping
        let events = tokio::task::spawn_blocking({
            let rx = rx.clone();
            move || {
                let started = rx.recv_timeout(Duration::from_secs(5));
                let first = rx.recv_timeout(Duration::from_secs(5));
                (started, first)
            }
        })
        .await
        .unwrap();
        assert!(matches!(events.0, Ok(SupervisorEvent::Started)));
        assert!(matches!(events.1, Ok(SupervisorEvent::Progress(_))));

        supervisor.stop();
        supervisor.stop();
        run.await.unwrap();

        let collected = collect(&rx);
        assert_eq!(collected.outcomes.len(), 1);
        assert!(matches!(collected.outcomes[0], EncodeOutcome::Cancelled));
        assert_eq!(supervisor.state(), SupervisorState::Killed);
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "q");
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "ffmpeg",
            "trap '' INT TERM\nprintf 'time=00:00:01.00\\n' >&2\nexec sleep 30",
        );

        let (tx, rx) = unbounded();
        let supervisor = ProcessSupervisor::new(Duration::from_millis(200));
        let handle = supervisor.clone();
        let cmd = command_for(&script, 10.0);
        let started = Instant::now();
        let run = tokio::spawn(async move { handle.run(&cmd, &tx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        supervisor.stop();
        run.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        let collected = collect(&rx);
        assert_eq!(collected.started, 1);
        assert_eq!(collected.outcomes.len(), 1);
        assert!(matches!(collected.outcomes[0], EncodeOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_stop_before_run_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("launched");
        let script = write_script(
            dir.path(),
            "ffmpeg",
            &format!("touch '{}'", marker.display()),
        );

        let (tx, rx) = unbounded();
        let supervisor = ProcessSupervisor::default();
        supervisor.stop();
        supervisor.run(&command_for(&script, 1.0), &tx).await;

        let collected = collect(&rx);
        assert_eq!(collected.started, 0);
        assert!(matches!(&collected.outcomes[..], [EncodeOutcome::Cancelled]));
        assert!(!marker.exists());
    }
}
