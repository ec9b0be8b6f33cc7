//! The game engine process behind one connection.
//!
//! A [`GameProcess`] owns the child and all three of its pipes. Exit is
//! only ever *recorded* by [`GameProcess::poll_exit`], which returns the
//! status exactly once and drops the pipes at the same time. Everything
//! else ([`ProcessEvent::Exited`], a SIGHUP, a SIGKILL) just makes the
//! next poll see it.

use std::process::{ExitStatus, Stdio};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use rogueport_config::GameLaunch;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::ProcessError;

/// Something the process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line of game output, for the client.
    Stdout(String),
    /// A diagnostic line, for the log.
    Stderr(String),
    /// The child has exited. Call [`GameProcess::poll_exit`] to record it.
    Exited,
}

/// A spawned game engine.
#[derive(Debug)]
pub struct GameProcess {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<LineReader<ChildStdout>>,
    stderr: Option<LineReader<ChildStderr>>,
    status: Option<ExitStatus>,
}

impl GameProcess {
    /// Starts the engine with all three standard streams piped.
    ///
    /// Returns as soon as the child exists; nothing waits for output.
    ///
    /// # Errors
    ///
    /// [`ProcessError::Spawn`] if the binary can't be executed.
    pub fn spawn(launch: &GameLaunch) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &launch.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: launch.program.display().to_string(),
            source,
        })?;

        let pid = child.id();
        tracing::debug!(?pid, program = %launch.program.display(), "spawned game process");

        Ok(Self {
            pid,
            stdin: child.stdin.take(),
            stdout: child.stdout.take().map(LineReader::new),
            stderr: child.stderr.take().map(LineReader::new),
            status: None,
            child,
        })
    }

    /// OS process id, if the child was started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// `true` once [`poll_exit`](Self::poll_exit) has recorded the exit.
    pub fn has_exited(&self) -> bool {
        self.status.is_some()
    }

    /// The recorded exit status.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Checks whether the process has exited.
    ///
    /// Returns `Some(status)` the first time the exit is seen, and closes
    /// every pipe. Later calls return `None`.
    pub fn poll_exit(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        if self.status.is_some() {
            return Ok(None);
        }
        let Some(status) = self.child.try_wait()? else {
            return Ok(None);
        };
        self.status = Some(status);
        self.close_pipes();
        Ok(Some(status))
    }

    /// Waits for the next line on stdout or stderr, or for the child to
    /// exit, whichever comes first. Output is preferred over exit.
    ///
    /// Bytes that aren't UTF-8 become U+FFFD and the pipe keeps being
    /// read. A pipe at end of file stops being read. Once the exit is
    /// recorded this pends forever, so it can sit in a `select!` loop.
    /// Until then it keeps reporting [`ProcessEvent::Exited`].
    ///
    /// Cancel safe.
    ///
    /// # Errors
    ///
    /// [`ProcessError::Pipe`] if a read fails. That pipe is dropped.
    pub async fn next_event(&mut self) -> Result<ProcessEvent, ProcessError> {
        let exited = self.status.is_some();
        loop {
            tokio::select! {
                biased;
                line = next_line(&mut self.stdout) => match line {
                    Ok(Some(line)) => return Ok(ProcessEvent::Stdout(line)),
                    Ok(None) => self.stdout = None,
                    Err(e) => {
                        self.stdout = None;
                        return Err(e.into());
                    }
                },
                line = next_line(&mut self.stderr) => match line {
                    Ok(Some(line)) => return Ok(ProcessEvent::Stderr(line)),
                    Ok(None) => self.stderr = None,
                    Err(e) => {
                        self.stderr = None;
                        return Err(e.into());
                    }
                },
                status = self.child.wait(), if !exited => {
                    status?;
                    return Ok(ProcessEvent::Exited);
                }
            }
        }
    }

    /// Writes client input to the process, byte for byte.
    pub async fn write_input(&mut self, text: &str) -> Result<(), ProcessError> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::Closed("stdin"))?;
        stdin.write_all(text.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Asks the engine to save and exit (SIGHUP). Does nothing if the
    /// exit is already recorded.
    pub fn hangup(&self) -> Result<(), ProcessError> {
        self.signal(Signal::SIGHUP)
    }

    /// Kills the engine outright (SIGKILL).
    pub fn kill(&mut self) -> Result<(), ProcessError> {
        if self.status.is_some() {
            return Ok(());
        }
        self.child.start_kill()?;
        Ok(())
    }

    fn signal(&self, sig: Signal) -> Result<(), ProcessError> {
        let Some(pid) = self.pid.filter(|_| self.status.is_none()) else {
            return Ok(());
        };
        #[allow(clippy::cast_possible_wrap)]
        let target = Pid::from_raw(pid as i32);
        signal::kill(target, sig).map_err(|source| ProcessError::Signal { pid, source })
    }

    fn close_pipes(&mut self) {
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
    }
}

/// Splits a pipe into lines without requiring UTF-8.
#[derive(Debug)]
struct LineReader<R> {
    reader: BufReader<R>,
    /// The line read so far. Survives a cancelled read.
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next line without its `\n` (or `\r\n`), decoded lossily. `None` at
    /// end of file.
    ///
    /// Cancel safe: a partial line stays in the buffer for the next call.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

async fn next_line<R>(lines: &mut Option<LineReader<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}
