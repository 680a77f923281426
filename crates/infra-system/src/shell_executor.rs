// Shell Executor - CommandExecutor backed by one long-lived bash process
//
// Jobs are written to the shell's stdin as protocol lines and tracked in a
// table keyed by start timestamp. A reader task applies the pid/return_code
// updates the shell prints back. `finish_jobs` is the periodic sweep.
//
// Every shell gets a generation number. When a shell's output closes, its
// still-running jobs become unresolved: their pids are no longer ours to signal.

use crate::process_signal::{terminate, terminate_group};
use crate::shell_protocol::{
    decode_line, encode_job, encode_maintenance, export_command, is_valid_env_name, unset_command,
    InboundLine, DRIVER_SCRIPT,
};
use async_trait::async_trait;
use outpost_core::application::{spawn_supervised, AgentConfig, JobClock};
use outpost_core::domain::{Job, JobOutput, JobStatus};
use outpost_core::port::{CommandExecutor, ErrorReporter, ExecutionError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ShellExecutorConfig {
    pub shell: PathBuf,
    /// Directory holding `<timestamp>.out` files
    pub temp_dir: PathBuf,
    pub command_timeout_ms: i64,
    /// Commands run before an idle shell is replaced
    pub recycle_threshold: u64,
}

impl ShellExecutorConfig {
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            shell: PathBuf::from("bash"),
            temp_dir: config.temp_dir.clone(),
            command_timeout_ms: config.command_timeout_millis(),
            recycle_threshold: config.recycle_threshold,
        }
    }
}

struct TrackedJob {
    job: Job,
    /// Generation of the shell running it; None for jobs that never reach a shell
    shell: Option<u64>,
}

#[derive(Default)]
struct JobTracker {
    jobs: BTreeMap<i64, TrackedJob>,
    /// Jobs whose outcome can no longer be observed
    unresolved: Vec<Job>,
}

impl JobTracker {
    /// Move the running jobs of a shell that went away to the unresolved list
    fn release_shell(&mut self, generation: u64) -> usize {
        let orphaned: Vec<i64> = self
            .jobs
            .iter()
            .filter(|(_, tracked)| {
                tracked.shell == Some(generation) && tracked.job.status == JobStatus::Running
            })
            .map(|(key, _)| *key)
            .collect();

        for key in &orphaned {
            if let Some(tracked) = self.jobs.remove(key) {
                self.unresolved.push(tracked.job);
            }
        }
        orphaned.len()
    }
}

type SharedTracker = Arc<Mutex<JobTracker>>;

struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    pid: Option<u32>,
    generation: u64,
}

struct ProcessSlot {
    shell: Option<ShellProcess>,
    /// Variables currently exported into the shell
    env: BTreeMap<String, String>,
    commands_executed: u64,
    generations: u64,
}

pub struct ShellExecutor {
    config: ShellExecutorConfig,
    clock: Arc<JobClock>,
    reporter: Arc<dyn ErrorReporter>,
    tracker: SharedTracker,
    process: tokio::sync::Mutex<ProcessSlot>,
}

impl ShellExecutor {
    /// Prepare the output directory; the shell itself starts with the first job
    pub fn new(
        config: ShellExecutorConfig,
        clock: Arc<JobClock>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, ExecutionError> {
        std::fs::create_dir_all(&config.temp_dir).map_err(|e| {
            ExecutionError::IoError(format!(
                "cannot create {}: {}",
                config.temp_dir.display(),
                e
            ))
        })?;
        purge_stale_outputs(&config.temp_dir);

        Ok(Self {
            config,
            clock,
            reporter,
            tracker: Arc::new(Mutex::new(JobTracker::default())),
            process: tokio::sync::Mutex::new(ProcessSlot {
                shell: None,
                env: BTreeMap::new(),
                commands_executed: 0,
                generations: 0,
            }),
        })
    }

    /// Pid of the running shell, if one is up
    pub async fn shell_pid(&self) -> Option<u32> {
        self.process
            .lock()
            .await
            .shell
            .as_ref()
            .and_then(|shell| shell.pid)
    }

    pub fn in_flight(&self) -> usize {
        self.lock_tracker().jobs.len()
    }

    fn lock_tracker(&self) -> MutexGuard<'_, JobTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_shell(
        &self,
        env: &BTreeMap<String, String>,
        generation: u64,
    ) -> Result<ShellProcess, ExecutionError> {
        let mut command = Command::new(&self.config.shell);
        command
            .arg("-c")
            .arg(DRIVER_SCRIPT)
            .current_dir(&self.config.temp_dir)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::SpawnFailed("shell stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::SpawnFailed("shell stdout unavailable".to_string()))?;
        let pid = child.id();

        spawn_supervised(
            "shell-reader",
            Arc::clone(&self.reporter),
            read_shell_output(stdout, Arc::clone(&self.tracker), generation),
        );

        info!(pid = ?pid, generation, "Shell started");
        Ok(ShellProcess {
            child,
            stdin,
            pid,
            generation,
        })
    }

    /// Return a live shell, starting a new one when missing or dead
    fn ensure_shell<'a>(
        &self,
        slot: &'a mut ProcessSlot,
    ) -> Result<&'a mut ShellProcess, ExecutionError> {
        if let Some(shell) = slot.shell.as_mut() {
            match shell.child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    error!(pid = ?shell.pid, status = %status, "Shell exited unexpectedly");
                    slot.shell = None;
                }
                Err(e) => {
                    error!(pid = ?shell.pid, error = %e, "Cannot query shell state");
                    slot.shell = None;
                }
            }
        }

        if slot.shell.is_none() {
            slot.generations += 1;
            slot.shell = Some(self.spawn_shell(&slot.env, slot.generations)?);
            slot.commands_executed = 0;
        }
        slot.shell
            .as_mut()
            .ok_or_else(|| ExecutionError::SpawnFailed("shell unavailable".to_string()))
    }

    /// Replace a shell that has run too many commands, but only while idle
    async fn limit_process_usage(&self) {
        let mut slot = self.process.lock().await;
        if slot.commands_executed <= self.config.recycle_threshold || slot.shell.is_none() {
            return;
        }
        if self.in_flight() > 0 {
            return;
        }

        if let Some(mut shell) = slot.shell.take() {
            info!(
                pid = ?shell.pid,
                commands = slot.commands_executed,
                "Recycling shell"
            );
            kill_shell(&mut shell).await;
        }
        slot.commands_executed = 0;
    }
}

async fn write_line(shell: &mut ShellProcess, line: &str) -> Result<(), ExecutionError> {
    shell
        .stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ExecutionError::WriteFailed(e.to_string()))?;
    shell
        .stdin
        .flush()
        .await
        .map_err(|e| ExecutionError::WriteFailed(e.to_string()))
}

async fn kill_shell(shell: &mut ShellProcess) {
    if let Some(pid) = shell.pid {
        if let Err(e) = terminate_group(pid as i32) {
            debug!(pid, error = %e, "Shell group already gone");
        }
    }
    if let Err(e) = shell.child.kill().await {
        debug!(pid = ?shell.pid, error = %e, "Shell already exited");
    }
}

async fn read_shell_output(
    stdout: ChildStdout,
    tracker: SharedTracker,
    generation: u64,
) -> outpost_core::Result<()> {
    let result = pump_lines(stdout, &tracker).await;

    let released = tracker
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .release_shell(generation);
    if released > 0 {
        warn!(generation, released, "Shell went away with commands in flight");
    }
    result
}

async fn pump_lines(stdout: ChildStdout, tracker: &Mutex<JobTracker>) -> outpost_core::Result<()> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            debug!("Shell output closed");
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        apply_line(tracker, &line);
    }
}

fn apply_line(tracker: &Mutex<JobTracker>, line: &str) {
    match decode_line(line) {
        InboundLine::Update { key, field, value } => {
            let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
            match tracker.jobs.get_mut(&key) {
                Some(TrackedJob { job, .. }) => {
                    if let Err(e) = job.apply_field(field, value) {
                        warn!(job = %job, field, value, error = %e, "Rejected shell update");
                    }
                }
                None => debug!(key, field, "Update for unknown job"),
            }
        }
        InboundLine::Warning(message) => warn!(line = message, "Shell warning"),
        InboundLine::Log(message) => info!(line = message, "Shell output"),
        InboundLine::Empty => {}
    }
}

fn purge_stale_outputs(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list output directory");
            return;
        }
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "out") && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        info!(removed, "Removed stale output files");
    }
}

fn remove_output(job: &Job) {
    if let Some(path) = job.output_path() {
        if let Err(e) = std::fs::remove_file(path) {
            debug!(path = %path.display(), error = %e, "Output file not removed");
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn add_job(&self, mut job: Job) -> Result<(), ExecutionError> {
        let started_at = self.clock.next_timestamp();
        job.prepare(started_at)
            .map_err(|e| ExecutionError::InvalidCommand(e.to_string()))?;

        if job.status == JobStatus::Blocked {
            info!(job = %job, "Command blocked by whitelist");
            self.lock_tracker()
                .jobs
                .insert(started_at, TrackedJob { job, shell: None });
            return Ok(());
        }

        let target = self.config.temp_dir.join(format!("{}.out", started_at));
        let line = match encode_job(started_at, &target, &job.command) {
            Ok(line) => line,
            Err(e) => {
                warn!(job = %job, error = %e, "Command cannot be sent to the shell");
                self.lock_tracker().unresolved.push(job);
                return Err(e);
            }
        };
        job.output = JobOutput::File(target);
        debug!(job = %job, "Starting command");

        let mut slot = self.process.lock().await;
        let shell = match self.ensure_shell(&mut slot) {
            Ok(shell) => shell,
            Err(e) => {
                error!(error = %e, "No shell to hand command to");
                self.lock_tracker().unresolved.push(job);
                return Err(e);
            }
        };

        // Tracked before the write so the shell's first update finds it
        let generation = shell.generation;
        self.lock_tracker().jobs.insert(
            started_at,
            TrackedJob {
                job,
                shell: Some(generation),
            },
        );

        match write_line(shell, &line).await {
            Ok(()) => {
                slot.commands_executed += 1;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to hand command to shell");
                if let Some(mut shell) = slot.shell.take() {
                    kill_shell(&mut shell).await;
                }
                let mut tracker = self.lock_tracker();
                if let Some(tracked) = tracker.jobs.remove(&started_at) {
                    tracker.unresolved.push(tracked.job);
                }
                Err(e)
            }
        }
    }

    async fn finish_jobs(&self) -> Vec<Job> {
        let now = self.clock.now_millis();
        let timeout_ms = self.config.command_timeout_ms;

        let (finished, table_empty) = {
            let mut tracker = self.lock_tracker();
            let mut done = Vec::new();

            for (key, TrackedJob { job, .. }) in tracker.jobs.iter_mut() {
                if job.is_expired(now, timeout_ms) {
                    match job.pid {
                        Some(pid) => {
                            warn!(job = %job, pid, "Command timed out, terminating");
                            if let Err(e) = terminate(pid) {
                                warn!(job = %job, error = %e, "Failed to terminate command");
                            }
                            if let Err(e) = job.time_out() {
                                error!(job = %job, error = %e, "Invalid timeout transition");
                            }
                        }
                        None => {
                            warn!(job = %job, "Command never reported a pid");
                            done.push(*key);
                            continue;
                        }
                    }
                }
                if job.status.is_terminal() {
                    done.push(*key);
                }
            }

            let mut finished: Vec<Job> = done
                .into_iter()
                .filter_map(|key| tracker.jobs.remove(&key))
                .map(|tracked| tracked.job)
                .collect();
            finished.append(&mut tracker.unresolved);
            (finished, tracker.jobs.is_empty())
        };

        if finished.is_empty() && table_empty {
            self.limit_process_usage().await;
        }
        finished
    }

    async fn set_env_variables(&self, variables: &BTreeMap<String, String>) {
        let mut slot = self.process.lock().await;

        let mut commands = Vec::new();
        for (name, value) in variables {
            if !is_valid_env_name(name) {
                warn!(name = %name, "Skipping invalid environment variable name");
                continue;
            }
            if slot.env.get(name) != Some(value) {
                commands.push(export_command(name, value));
            }
        }
        for name in slot.env.keys().filter(|name| !variables.contains_key(*name)) {
            match std::env::var(name) {
                Ok(original) => commands.push(export_command(name, &original)),
                Err(_) => commands.push(unset_command(name)),
            }
        }

        slot.env = variables
            .iter()
            .filter(|(name, _)| is_valid_env_name(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if commands.is_empty() {
            return;
        }
        info!(changes = commands.len(), "Updating shell environment");

        // A fresh shell picks the variables up at spawn time
        let Some(shell) = slot.shell.as_mut() else {
            return;
        };
        for command in commands {
            let written = match encode_maintenance(&command) {
                Ok(line) => write_line(shell, &line).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!(error = %e, "Failed to update shell environment");
            }
        }
    }

    async fn stop(&self) {
        let mut slot = self.process.lock().await;
        if let Some(mut shell) = slot.shell.take() {
            info!(pid = ?shell.pid, "Stopping shell");
            kill_shell(&mut shell).await;
        }

        let in_flight: Vec<Job> = {
            let mut tracker = self.lock_tracker();
            let mut jobs: Vec<Job> = std::mem::take(&mut tracker.jobs)
                .into_values()
                .map(|tracked| tracked.job)
                .collect();
            jobs.append(&mut tracker.unresolved);
            jobs
        };
        in_flight.iter().for_each(remove_output);
    }
}
