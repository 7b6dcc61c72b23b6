//! External commands: maven builds, git clones, `oc` uploads
//!
//! [`Command`] is an immutable plan. Every builder call returns a new plan,
//! so a base such as `Command::maven(dir)` can be shared and specialised.
//! Execution streams output into the log, keeps a tail for error reports,
//! retries non-zero exits per policy and kills the whole process group on
//! deadline or cancellation.
//!
//! # Example
//!
//! ```ignore
//! use kogito_bdd::command::Command;
//!
//! let output = Command::maven(&project_dir)
//!     .with_env("MAVEN_OPTS", "-Xmx1g")
//!     .with_retry(3)
//!     .skip_tests()
//!     .execute(["clean", "install"])
//!     .await?;
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::pending;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lines of output kept for error messages
const TAIL_LINES: usize = 30;

/// Errors from running an external command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("working directory {0} does not exist")]
    MissingWorkingDir(PathBuf),

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with {}\n{tail}", exit_description(.code))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        tail: String,
    },

    #[error("{program} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        program: String,
        attempts: u32,
        last: Box<CommandError>,
    },

    #[error("{program} timed out after {deadline:?}")]
    Timeout { program: String, deadline: Duration },

    #[error("{program} cancelled")]
    Cancelled { program: String },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    /// Spawns it took to succeed
    pub attempts: u32,
}

impl CommandOutput {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Immutable subprocess plan
#[derive(Debug, Clone)]
pub struct Command {
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    env_remove: BTreeSet<String>,
    max_attempts: u32,
    backoff: Duration,
    deadline: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            env: BTreeMap::new(),
            env_remove: BTreeSet::new(),
            max_attempts: 1,
            backoff: Duration::from_secs(5),
            deadline: None,
            cancel: None,
        }
    }

    /// `mvn -B` in `dir`
    pub fn maven(dir: impl AsRef<Path>) -> Self {
        Self::new("mvn").arg("-B").in_dir(dir)
    }

    pub fn git() -> Self {
        Self::new("git").with_env("GIT_TERMINAL_PROMPT", "0")
    }

    pub fn oc() -> Self {
        Self::new("oc")
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Fixed argument placed before the ones given to `execute`
    #[must_use]
    pub fn arg(&self, arg: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.args.push(arg.into());
        next
    }

    #[must_use]
    pub fn in_dir(&self, dir: impl AsRef<Path>) -> Self {
        let mut next = self.clone();
        next.dir = Some(dir.as_ref().to_path_buf());
        next
    }

    #[must_use]
    pub fn with_env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        let key = key.into();
        next.env_remove.remove(&key);
        next.env.insert(key, value.into());
        next
    }

    #[must_use]
    pub fn with_envs<K, V>(&self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        vars.into_iter()
            .fold(self.clone(), |cmd, (k, v)| cmd.with_env(k, v))
    }

    /// Drop an inherited variable
    #[must_use]
    pub fn without_env(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        let key = key.into();
        next.env.remove(&key);
        next.env_remove.insert(key);
        next
    }

    /// Total attempts for non-zero exits (1 = no retry)
    #[must_use]
    pub fn with_retry(&self, max_attempts: u32) -> Self {
        let mut next = self.clone();
        next.max_attempts = max_attempts.max(1);
        next
    }

    #[must_use]
    pub fn with_backoff(&self, backoff: Duration) -> Self {
        let mut next = self.clone();
        next.backoff = backoff;
        next
    }

    /// Per-attempt deadline
    #[must_use]
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        let mut next = self.clone();
        next.deadline = Some(deadline);
        next
    }

    #[must_use]
    pub fn cancel_on(&self, token: CancellationToken) -> Self {
        let mut next = self.clone();
        next.cancel = Some(token);
        next
    }

    /// Maven `-DskipTests`
    #[must_use]
    pub fn skip_tests(&self) -> Self {
        self.arg("-DskipTests")
    }

    /// Run with `args` appended, retrying non-zero exits per policy
    #[instrument(skip_all, fields(program = %self.program))]
    pub async fn execute<I, S>(&self, args: I) -> Result<CommandOutput, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = self
            .args
            .iter()
            .cloned()
            .chain(args.into_iter().map(Into::into))
            .collect();

        if let Some(dir) = &self.dir {
            let is_dir = tokio::fs::metadata(dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                return Err(CommandError::MissingWorkingDir(dir.clone()));
            }
        }

        let token = self.cancel.clone().unwrap_or_default();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            info!(
                attempt,
                max_attempts = self.max_attempts,
                command = %format!("{} {}", self.program, args.join(" ")),
                dir = ?self.dir,
                "Running command"
            );

            let failure = match self.run_once(&args, &token).await? {
                Attempt::Succeeded(mut output) => {
                    output.attempts = attempt;
                    return Ok(output);
                }
                Attempt::Failed(err) => err,
            };

            if attempt >= self.max_attempts {
                return Err(if self.max_attempts > 1 {
                    CommandError::RetriesExhausted {
                        program: self.program.clone(),
                        attempts: attempt,
                        last: Box::new(failure),
                    }
                } else {
                    failure
                });
            }

            warn!(attempt, backoff = ?self.backoff, error = %failure, "Command failed, retrying");
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(CommandError::Cancelled { program: self.program.clone() });
                }
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }

    async fn run_once(&self, args: &[String], token: &CancellationToken) -> Result<Attempt, CommandError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        cmd.envs(&self.env);
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| CommandError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().map(|s| pump(s, self.program.clone(), "stdout"));
        let stderr = child.stderr.take().map(|s| pump(s, self.program.clone(), "stderr"));

        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => pending::<()>().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| CommandError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?,
            _ = expiry => {
                kill_group(pid);
                let _ = child.wait().await;
                return Err(CommandError::Timeout {
                    program: self.program.clone(),
                    deadline: deadline.unwrap_or_default(),
                });
            }
            _ = token.cancelled() => {
                kill_group(pid);
                let _ = child.wait().await;
                return Err(CommandError::Cancelled { program: self.program.clone() });
            }
        };

        let (stdout, stdout_tail) = collect(stdout).await;
        let (stderr, stderr_tail) = collect(stderr).await;
        let elapsed = start.elapsed();
        debug!(status = ?status.code(), elapsed = ?elapsed, "Command finished");

        if status.success() {
            return Ok(Attempt::Succeeded(CommandOutput {
                exit_code: 0,
                stdout,
                stderr,
                elapsed,
                attempts: 1,
            }));
        }

        let tail = if stderr_tail.is_empty() { stdout_tail } else { stderr_tail };
        Ok(Attempt::Failed(CommandError::NonZeroExit {
            program: self.program.clone(),
            code: status.code(),
            tail,
        }))
    }
}

enum Attempt {
    Succeeded(CommandOutput),
    Failed(CommandError),
}

struct Captured {
    all: String,
    tail: VecDeque<String>,
}

/// Forward each line to the log while keeping the full text and a tail
fn pump<R>(reader: R, program: String, stream: &'static str) -> tokio::task::JoinHandle<Captured>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut captured = Captured {
            all: String::new(),
            tail: VecDeque::with_capacity(TAIL_LINES),
        };
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "kogito_bdd::command", program = %program, stream, "{line}");
            captured.all.push_str(&line);
            captured.all.push('\n');
            if captured.tail.len() == TAIL_LINES {
                captured.tail.pop_front();
            }
            captured.tail.push_back(line);
        }
        captured
    })
}

async fn collect(handle: Option<tokio::task::JoinHandle<Captured>>) -> (String, String) {
    match handle {
        Some(handle) => match handle.await {
            Ok(captured) => (captured.all, Vec::from(captured.tail).join("\n")),
            Err(_) => (String::new(), String::new()),
        },
        None => (String::new(), String::new()),
    }
}

/// SIGKILL the child's process group so build tool children die too
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(pid, error = %e, "Process group already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant as StdInstant;

    /// Script that fails until it has been spawned `succeed_on` times
    fn flaky_script(dir: &Path, succeed_on: u32) -> PathBuf {
        let counter = dir.join("spawns");
        let script = dir.join("flaky.sh");
        let mut file = std::fs::File::create(&script).unwrap();
        writeln!(
            file,
            "echo spawn >> '{}'\nn=$(wc -l < '{}')\necho \"attempt $n\"\n[ \"$n\" -ge {} ]",
            counter.display(),
            counter.display(),
            succeed_on
        )
        .unwrap();
        script
    }

    fn spawns(dir: &Path) -> usize {
        std::fs::read_to_string(dir.join("spawns"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_run_simple_command() {
        let output = Command::new("echo").execute(["hello"]).await.unwrap();
        assert!(output.passed());
        assert_eq!(output.attempts, 1);
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_captures_stderr_tail_on_failure() {
        let err = Command::new("sh")
            .execute(["-c", "echo first >&2; echo boom >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            CommandError::NonZeroExit { code, tail, .. } => {
                assert_eq!(code, Some(3));
                assert!(tail.contains("boom"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_env_overlay_last_write_wins() {
        std::env::set_var("KOGITO_BDD_TEST_INHERITED", "parent");
        let cmd = Command::new("sh")
            .with_env("A", "one")
            .with_env("A", "two")
            .without_env("KOGITO_BDD_TEST_INHERITED");
        let output = cmd
            .execute(["-c", "echo \"A=$A inherited=${KOGITO_BDD_TEST_INHERITED:-unset}\""])
            .await
            .unwrap();
        assert!(output.stdout.contains("A=two inherited=unset"));

        let restored = cmd.with_env("KOGITO_BDD_TEST_INHERITED", "again");
        let output = restored
            .execute(["-c", "echo $KOGITO_BDD_TEST_INHERITED"])
            .await
            .unwrap();
        assert!(output.stdout.contains("again"));
    }

    #[tokio::test]
    async fn test_builder_does_not_mutate_base() {
        let base = Command::new("sh");
        let with_dir = base.in_dir("/tmp").with_retry(3);
        assert!(base.dir.is_none());
        assert_eq!(base.max_attempts, 1);
        assert_eq!(with_dir.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_missing_working_dir_fails_before_spawn() {
        let err = Command::new("sh")
            .in_dir("/definitely/not/here")
            .execute(["-c", "true"])
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::MissingWorkingDir(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = Command::new("nonexistent_command_xyz")
            .execute(Vec::<String>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_retry_until_success_spawns_exactly_k_times() {
        let dir = tempfile::tempdir().unwrap();
        let script = flaky_script(dir.path(), 3);

        let output = Command::new("sh")
            .with_retry(3)
            .with_backoff(Duration::from_millis(10))
            .execute([script.display().to_string()])
            .await
            .unwrap();

        assert_eq!(output.attempts, 3);
        assert_eq!(spawns(dir.path()), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let script = flaky_script(dir.path(), 4);

        let err = Command::new("sh")
            .with_retry(2)
            .with_backoff(Duration::from_millis(10))
            .execute([script.display().to_string()])
            .await
            .unwrap_err();

        match err {
            CommandError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, CommandError::NonZeroExit { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(spawns(dir.path()), 2);
    }

    #[tokio::test]
    async fn test_deadline_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let start = StdInstant::now();

        let err = Command::new("sh")
            .with_deadline(Duration::from_millis(300))
            .execute([
                "-c".to_string(),
                format!("(sleep 2; touch '{}') & wait", marker.display()),
            ])
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists(), "grandchild outlived the deadline");
    }

    #[tokio::test]
    async fn test_cancellation_stops_running_command() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let start = StdInstant::now();
        let err = Command::new("sleep")
            .cancel_on(token)
            .execute(["10"])
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_skip_tests_adds_flag() {
        let output = Command::new("echo").skip_tests().execute(["clean"]).await.unwrap();
        assert!(output.stdout.contains("-DskipTests clean"));
    }
}
