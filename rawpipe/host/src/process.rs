/*!
    Spawning and supervising transcoder subprocesses.

    The transcoder is a black box reached through its standard streams. The
    one non-obvious rule lives here: whenever the diagnostic stream is
    captured, a dedicated thread drains it from the moment of spawn onward,
    whether or not anybody is listening. A child that fills its stderr buffer
    stalls the whole pipeline.
*/

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rawpipe_types::{Error, Result};

/**
    Which of the child's standard streams are captured.
*/
#[derive(Clone, Copy, Debug)]
pub struct IoMode {
    input: bool,
    output: bool,
    diagnostics: bool,
    console_diagnostics: bool,
}

impl IoMode {
    /**
        Capture the child's output and diagnostics. Used by readers: the
        child decodes to its stdout.
    */
    pub fn read() -> Self {
        Self {
            input: false,
            output: true,
            diagnostics: true,
            console_diagnostics: false,
        }
    }

    /**
        Capture the child's input and diagnostics. Used by writers: the
        child encodes from its stdin.
    */
    pub fn write() -> Self {
        Self {
            input: true,
            output: false,
            diagnostics: true,
            console_diagnostics: false,
        }
    }

    /**
        Capture input, output and diagnostics. Used by writers that send
        the encoded result back through a pipe instead of a file.
    */
    pub fn duplex() -> Self {
        Self {
            input: true,
            output: true,
            diagnostics: true,
            console_diagnostics: false,
        }
    }

    /**
        Let diagnostics pass through to the hosting console instead of the
        drain thread. Progress monitoring is unavailable in this mode.
    */
    pub fn with_console_diagnostics(mut self) -> Self {
        self.diagnostics = false;
        self.console_diagnostics = true;
        self
    }
}

/**
    Diagnostic verbosity requested from the transcoder.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Nothing at all.
    Quiet,
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warning,
    /// Errors, warnings and informational chatter, including the progress
    /// lines the monitor parses.
    #[default]
    Info,
}

impl Verbosity {
    /**
        The level name the transcoder's `-v` flag expects.
    */
    pub const fn as_level(self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/**
    Options callers render into the argument vector when a process is
    spawned. Rendered at spawn time, so a later change never affects a
    running child.
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct SpawnOptions {
    /// Diagnostic verbosity, rendered as the transcoder's `-v` flag.
    pub verbosity: Verbosity,
}

impl SpawnOptions {
    /**
        The `-v <level>` argument pair for the configured verbosity.
    */
    pub fn verbosity_args(&self) -> [String; 2] {
        ["-v".to_string(), self.verbosity.as_level().to_string()]
    }
}

/**
    Spawns transcoder subprocesses.
*/
pub struct ProcessHost;

impl ProcessHost {
    /**
        Start `executable` with the given arguments and stream captures.

        The argument vector is passed through untouched. A missing or
        non-runnable executable yields [`Error::SpawnFailure`] naming it.
    */
    pub fn spawn<I, S>(executable: &str, args: I, io: IoMode) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        log::debug!("spawning: {} {}", executable, args.join(" "));

        let mut command = Command::new(executable);
        command
            .args(&args)
            .stdin(if io.input { Stdio::piped() } else { Stdio::null() })
            .stdout(if io.output { Stdio::piped() } else { Stdio::null() })
            .stderr(if io.diagnostics {
                Stdio::piped()
            } else if io.console_diagnostics {
                Stdio::inherit()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(|e| Error::spawn(executable, e))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        let (diagnostics, drain) = match child.stderr.take() {
            Some(stderr) => {
                let (tx, rx) = mpsc::channel();
                let drain = thread::spawn(move || {
                    let reader = BufReader::new(stderr);
                    for line in reader.lines() {
                        let Ok(line) = line else { break };
                        // Receiver may be long gone; keep draining anyway so
                        // the child never blocks on a full stderr buffer.
                        let _ = tx.send(line);
                    }
                });
                (Some(rx), Some(drain))
            }
            None => (None, None),
        };

        Ok(ProcessHandle {
            child,
            executable: executable.to_string(),
            stdin,
            stdout,
            diagnostics,
            drain,
        })
    }
}

/**
    Owner of a running transcoder subprocess and its captured streams.
*/
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    executable: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    diagnostics: Option<Receiver<String>>,
    drain: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /**
        OS process id of the child.
    */
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /**
        Name of the executable this handle was spawned with.
    */
    pub fn executable(&self) -> &str {
        &self.executable
    }

    /**
        Take ownership of the child's input pipe. Returns None when input
        was not captured or was already taken.
    */
    pub fn take_input(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /**
        Take ownership of the child's output pipe.
    */
    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /**
        Take the receiver of drained diagnostic lines.
    */
    pub fn take_diagnostics(&mut self) -> Option<Receiver<String>> {
        self.diagnostics.take()
    }

    /**
        Wait up to `timeout` for the child to exit on its own. Returns true
        when it exited within the window.
    */
    pub fn wait_exit(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.child.try_wait().map_err(Error::Io)?.is_some() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /**
        Kill the child. A child that exited on its own in the meantime is
        not an error.
    */
    pub fn terminate(&mut self) {
        // kill() errors when the child is already reaped; either way the
        // child is gone, which is all the caller asked for.
        if self.child.kill().is_ok() {
            let _ = self.child.wait();
        }
    }

    /**
        Orderly teardown: give the child `grace` to exit, kill it otherwise,
        then join the diagnostic drain. Returns true when the exit was
        voluntary.
    */
    pub fn shutdown(&mut self, grace: Duration) -> Result<bool> {
        let graceful = self.wait_exit(grace)?;
        if !graceful {
            log::debug!("{} (pid {}) outlived its grace period, killing", self.executable, self.id());
            self.terminate();
        }
        self.diagnostics = None;
        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
        }
        Ok(graceful)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Last line of defence; normal teardown goes through shutdown().
        self.terminate();
        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn missing_executable_names_itself() {
        let err = ProcessHost::spawn(
            "definitely-not-a-real-transcoder",
            ["-i", "x"],
            IoMode::read(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::SpawnFailure { .. }));
        assert!(err.to_string().contains("definitely-not-a-real-transcoder"));
    }

    #[test]
    fn duplex_round_trip_through_cat() {
        let mut handle = ProcessHost::spawn(
            "cat",
            Vec::<String>::new(),
            IoMode::duplex(),
        )
        .unwrap();

        let mut input = handle.take_input().unwrap();
        let mut output = handle.take_output().unwrap();
        input.write_all(b"raw bytes through the pipe").unwrap();
        drop(input);

        let mut echoed = Vec::new();
        output.read_to_end(&mut echoed).unwrap();
        assert_eq!(echoed, b"raw bytes through the pipe");

        assert!(handle.wait_exit(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn pipes_can_only_be_taken_once() {
        let mut handle = ProcessHost::spawn(
            "cat",
            Vec::<String>::new(),
            IoMode::duplex(),
        )
        .unwrap();

        assert!(handle.take_input().is_some());
        assert!(handle.take_input().is_none());
        assert!(handle.take_diagnostics().is_some());
        assert!(handle.take_diagnostics().is_none());
        handle.terminate();
    }

    #[test]
    fn diagnostics_are_drained_line_by_line() {
        let mut handle = ProcessHost::spawn(
            "sh",
            ["-c", "echo first >&2; echo second >&2"],
            IoMode::read(),
        )
        .unwrap();

        let rx = handle.take_diagnostics().unwrap();
        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(lines, ["first", "second"]);
    }

    #[test]
    fn diagnostics_keep_draining_without_a_receiver() {
        // Enough stderr to overflow an undrained pipe buffer.
        let mut handle = ProcessHost::spawn(
            "sh",
            ["-c", "i=0; while [ $i -lt 5000 ]; do echo long-diagnostic-line-with-some-padding >&2; i=$((i+1)); done"],
            IoMode::read(),
        )
        .unwrap();

        // No take_diagnostics(): the drain thread must keep the child moving.
        assert!(handle.wait_exit(Duration::from_secs(10)).unwrap());
    }

    #[test]
    fn wait_exit_times_out_on_a_lingering_child() {
        let mut handle = ProcessHost::spawn(
            "sleep",
            ["5"],
            IoMode::read(),
        )
        .unwrap();

        assert!(!handle.wait_exit(Duration::from_millis(100)).unwrap());
        assert!(!handle.shutdown(Duration::from_millis(50)).unwrap());
    }

    #[test]
    fn terminate_after_natural_exit_is_harmless() {
        let mut handle = ProcessHost::spawn(
            "true",
            Vec::<String>::new(),
            IoMode::read(),
        )
        .unwrap();

        assert!(handle.wait_exit(Duration::from_secs(5)).unwrap());
        handle.terminate();
        handle.terminate();
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(Verbosity::Quiet.as_level(), "quiet");
        assert_eq!(Verbosity::default().as_level(), "info");
    }
}
