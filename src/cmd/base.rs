// ============================================================================
// src/cmd/base.rs – Shell command runner (plain + elevated) for system tools
// ============================================================================

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Combined output of one subprocess invocation.
///
/// `output` holds stdout followed by stderr (newline separated when stderr is
/// non-empty). Callers grep the merged text, so parsers downstream must shrug
/// off trailing diagnostic lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub output: String,
    pub succeeded: bool,
}

impl CommandResult {
    pub fn new<S: Into<String>>(output: S, succeeded: bool) -> Self {
        Self {
            output: output.into(),
            succeeded,
        }
    }

    /// Result used when the shell itself could not be started or awaited.
    pub fn launch_failure(reason: impl std::fmt::Display) -> Self {
        Self {
            output: format!("Error: {reason}"),
            succeeded: false,
        }
    }

    pub fn trimmed(&self) -> &str {
        self.output.trim()
    }

    /// True when the command exited zero and printed something.
    pub fn has_output(&self) -> bool {
        self.succeeded && !self.trimmed().is_empty()
    }
}

/// Anything able to execute a shell command line. Every probe in the crate
/// goes through this seam so tests can script the OS.
pub trait Runner: Send + Sync {
    fn run(&self, command_line: &str, elevated: bool) -> CommandResult;

    fn run_plain(&self, command_line: &str) -> CommandResult {
        self.run(command_line, false)
    }

    fn run_elevated(&self, command_line: &str) -> CommandResult {
        self.run(command_line, true)
    }
}

/// Rewrites a command line so it executes with administrator rights.
pub trait Elevator: Send + Sync {
    fn elevate(&self, command_line: &str) -> String;
}

/// macOS authorization dialog via `osascript ... with administrator privileges`.
/// Prompts once per invocation; nothing is cached.
#[derive(Debug, Clone)]
pub struct AppleScriptElevator {
    prompt: String,
}

impl AppleScriptElevator {
    pub fn new<S: Into<String>>(prompt: S) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Elevator for AppleScriptElevator {
    fn elevate(&self, command_line: &str) -> String {
        let script = format!(
            "do shell script \"{}\" with administrator privileges with prompt \"{}\" without altering line endings",
            applescript_escape(command_line),
            applescript_escape(&self.prompt)
        );
        format!("osascript -e {}", shell_quote(&script))
    }
}

/// Non-interactive `sudo -n`, for headless sessions with a sudoers rule.
#[derive(Debug, Clone, Default)]
pub struct SudoElevator;

impl Elevator for SudoElevator {
    fn elevate(&self, command_line: &str) -> String {
        format!("sudo -n /bin/sh -c {}", shell_quote(command_line))
    }
}

/// Runs `<shell> -c <command line>` and folds every failure into a
/// `CommandResult`; never returns an error to its caller.
pub struct ShellRunner {
    shell: PathBuf,
    elevator: Box<dyn Elevator>,
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new<P: AsRef<Path>>(shell: P, elevator: Box<dyn Elevator>) -> Self {
        Self {
            shell: shell.as_ref().to_path_buf(),
            elevator,
            timeout: None,
        }
    }

    /// Bound every call; the child is terminated once the limit passes.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn spawn(&self, line: &str) -> Result<Child> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // A bounded call gets its own process group so a timeout can take
        // down grandchildren that still hold the pipes.
        if self.timeout.is_some() {
            command.process_group(0);
        }
        command
            .spawn()
            .with_context(|| format!("spawn {} failed", self.shell.display()))
    }

    fn collect(&self, mut child: Child) -> Result<CommandResult> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = thread::spawn(move || drain(stdout));
        let err_reader = thread::spawn(move || drain(stderr));

        let waited = match self.timeout {
            Some(limit) => wait_with_timeout(&mut child, limit),
            None => child.wait().context("wait for shell").map(Waited::Exited),
        };
        // Every writer is gone by now, so both readers reach EOF.
        let stdout = out_reader
            .join()
            .map_err(|_| anyhow!("stdout reader panicked"))?;
        let stderr = err_reader
            .join()
            .map_err(|_| anyhow!("stderr reader panicked"))?;

        let mut output = combine(&stdout, &stderr);
        let succeeded = match waited? {
            Waited::Exited(status) => status.success(),
            Waited::TimedOut(limit) => {
                warn!(?limit, "command timed out; process group terminated");
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(&format!("Error: command timed out after {limit:?}"));
                false
            }
        };
        Ok(CommandResult { output, succeeded })
    }
}

impl Runner for ShellRunner {
    fn run(&self, command_line: &str, elevated: bool) -> CommandResult {
        let line = if elevated {
            self.elevator.elevate(command_line)
        } else {
            command_line.to_string()
        };
        debug!(elevated, command = command_line, "running shell command");

        let result = self
            .spawn(&line)
            .and_then(|child| self.collect(child))
            .unwrap_or_else(|err| {
                warn!(command = command_line, "shell command could not run: {err:#}");
                CommandResult::launch_failure(format!("{err:#}"))
            });

        if !result.succeeded {
            debug!(command = command_line, output = %result.trimmed(), "command failed");
        }
        result
    }
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn combine(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut(Duration),
}

/// Polls the child; past `limit` its whole process group gets SIGTERM, then
/// SIGKILL, and is reaped.
fn wait_with_timeout(child: &mut Child, limit: Duration) -> Result<Waited> {
    let start = Instant::now();
    loop {
        let polled = child.try_wait();
        let status = match polled {
            Ok(status) => status,
            Err(err) => {
                terminate_group(child);
                return Err(err).context("try_wait");
            }
        };
        if let Some(status) = status {
            return Ok(Waited::Exited(status));
        }
        if start.elapsed() > limit {
            terminate_group(child);
            return Ok(Waited::TimedOut(limit));
        }
        thread::sleep(Duration::from_millis(30));
    }
}

fn terminate_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    let _ = killpg(group, Signal::SIGTERM);
    thread::sleep(Duration::from_millis(200));
    let _ = killpg(group, Signal::SIGKILL);
    let _ = child.wait();
}

/// Single-quote a string for POSIX shells.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

fn applescript_escape(raw: &str) -> String {
    raw.replace('\\', r"\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl Elevator for Passthrough {
        fn elevate(&self, command_line: &str) -> String {
            command_line.to_string()
        }
    }

    fn sh() -> ShellRunner {
        ShellRunner::new("/bin/sh", Box::new(Passthrough))
    }

    #[test]
    fn stdout_and_stderr_are_merged_and_exit_status_respected() {
        let res = sh().run_plain("echo A; echo B >&2; exit 1");
        assert!(!res.succeeded);
        assert!(res.output.contains('A'));
        assert!(res.output.contains('B'));
        assert_eq!(res.output, "A\n\nB\n");
    }

    #[test]
    fn clean_exit_reports_success_without_stderr_separator() {
        let res = sh().run_plain("printf hello");
        assert!(res.succeeded);
        assert_eq!(res.output, "hello");
    }

    #[test]
    fn missing_shell_becomes_failed_result() {
        let runner = ShellRunner::new("/nonexistent/shell", Box::new(Passthrough));
        let res = runner.run_plain("true");
        assert!(!res.succeeded);
        assert!(res.output.starts_with("Error: "));
    }

    #[test]
    fn elevated_calls_go_through_the_elevator() {
        struct Marker;
        impl Elevator for Marker {
            fn elevate(&self, command_line: &str) -> String {
                format!("echo elevated; {command_line}")
            }
        }
        let runner = ShellRunner::new("/bin/sh", Box::new(Marker));
        let res = runner.run_elevated("echo body");
        assert!(res.succeeded);
        assert_eq!(res.output, "elevated\nbody\n");
    }

    #[test]
    fn timeout_terminates_hung_command() {
        let runner = sh().with_timeout(Some(Duration::from_millis(200)));
        let res = runner.run_plain("sleep 5");
        assert!(!res.succeeded);
        assert!(res.output.contains("timed out"));
    }

    #[test]
    fn timeout_keeps_partial_output_and_stops_grandchildren() {
        let runner = sh().with_timeout(Some(Duration::from_millis(300)));
        let started = Instant::now();
        // the subshell sleep is a grandchild holding stdout open
        let res = runner.run_plain("echo partial; (sleep 5; echo late); echo never");
        assert!(!res.succeeded);
        assert!(res.output.starts_with("partial\n"), "{:?}", res.output);
        assert!(res.output.ends_with("timed out after 300ms"));
        assert!(!res.output.contains("late"));
        assert!(!res.output.contains("never"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn bounded_call_that_finishes_in_time_is_untouched() {
        let runner = sh().with_timeout(Some(Duration::from_secs(5)));
        let res = runner.run_plain("echo quick");
        assert!(res.succeeded);
        assert_eq!(res.output, "quick\n");
    }

    #[test]
    fn applescript_wrapper_escapes_quotes() {
        let elevator = AppleScriptElevator::new("Needs admin");
        let wrapped = elevator.elevate(r#"diskutil mount "disk2s1""#);
        assert!(wrapped.starts_with("osascript -e '"));
        assert!(wrapped.contains(r#"do shell script "diskutil mount \"disk2s1\"""#));
        assert!(wrapped.contains("with administrator privileges"));
        assert!(wrapped.contains(r#"with prompt "Needs admin""#));
    }

    #[test]
    fn single_quotes_survive_shell_quoting() {
        let res = sh().run_plain(&format!("printf %s {}", shell_quote("it's")));
        assert_eq!(res.output, "it's");
    }

    #[test]
    fn sudo_wrapper_quotes_command() {
        let wrapped = SudoElevator.elevate("touch /tmp/x");
        assert_eq!(wrapped, "sudo -n /bin/sh -c 'touch /tmp/x'");
    }
}
