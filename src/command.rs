// Copyright (C) 2022 Electronic Arts, Inc. All rights reserved.

//! Run a binary executable
//!
//! This will run a Unix command, and keep track of stdout, stderr, and any errors.
//! Arguments registered as sensitive are masked whenever the command line is displayed.

use std::{
    error::Error,
    ffi::{OsStr, OsString},
    fmt::Display,
    path::Path,
    process::{Output, Stdio},
    str::{self, Utf8Error},
    time::{Duration, Instant},
};
use tokio::{io, process::Command};

use crate::duration::duration_string;

const REDACTED: &str = "<redacted>";

#[derive(Debug)]
pub struct CommandSuccess {
    pub cmd: CommandLine,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct CommandError {
    pub cmd: CommandLine,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub exit_code: i32,
    pub kind: CommandErrorKind,
}

#[derive(Debug)]
pub enum CommandErrorKind {
    BadExitCode {},
    FailedToStart { err: std::io::Error },
    Utf8Error { err: Utf8Error },
}

impl From<Utf8Error> for CommandErrorKind {
    fn from(err: Utf8Error) -> Self {
        CommandErrorKind::Utf8Error { err }
    }
}

impl CommandError {
    pub fn result_line(&self) -> String {
        match &self.kind {
            CommandErrorKind::BadExitCode {} => format!("Bad Exit code {}", self.exit_code),
            CommandErrorKind::FailedToStart { err } => format!("Failed to start: {err}"),
            CommandErrorKind::Utf8Error { err } => format!("UTF-8 error: {err}"),
        }
    }

    /// The last non-empty stderr line, which is where git puts its `fatal:` message.
    pub fn last_stderr_line(&self) -> Option<&str> {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }
}

impl Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.result_line(), self.cmd)?;
        if let Some(line) = self.last_stderr_line() {
            write!(f, ": {line}")?;
        }
        write!(f, " after {}", duration_string(&self.duration))
    }
}

impl Error for CommandError {}

pub type CommandResult = Result<CommandSuccess, CommandError>;

#[derive(Clone, Eq, PartialEq)]
pub struct CommandLine {
    cmd: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    sensitive: Vec<OsString>,
}

impl CommandLine {
    pub fn new(cmd: impl Into<OsString>, args: Vec<OsString>) -> Self {
        CommandLine {
            cmd: cmd.into(),
            args,
            envs: Vec::new(),
            sensitive: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Append an argument that must never be printed.
    pub fn with_sensitive_arg(mut self, arg: impl Into<OsString>) -> Self {
        let arg = arg.into();
        self.sensitive.push(arg.clone());
        self.args.push(arg);
        self
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn display_arg<'a>(&self, arg: &'a OsStr) -> std::borrow::Cow<'a, str> {
        if self.sensitive.iter().any(|s| s == arg) {
            std::borrow::Cow::Borrowed(REDACTED)
        } else {
            arg.to_string_lossy()
        }
    }
}

fn get_exit_code(output: &Result<Output, io::Error>) -> i32 {
    output
        .as_ref()
        .map_or(-1, |output| output.status.code().unwrap_or(-1))
}

fn get_stdin_out(output: &Result<Output, io::Error>) -> Result<(String, String), CommandErrorKind> {
    if let Ok(output) = &output {
        let stdin = str::from_utf8(&output.stdout)?;
        let stderr = str::from_utf8(&output.stderr)?;
        Ok((stdin.to_string(), stderr.to_string()))
    } else {
        Ok((String::new(), String::new()))
    }
}

impl CommandLine {
    pub async fn run(&self) -> CommandResult {
        self.run_in(None).await
    }

    /// Run the command with `dir` as its working directory.
    pub async fn run_in(&self, dir: Option<&Path>) -> CommandResult {
        let start = Instant::now();

        let CommandLine {
            cmd, args, envs, ..
        } = &self;
        let mut command = Command::new(cmd);
        command
            .args(args)
            .envs(envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        let output = command.output().await;

        let exit_code = get_exit_code(&output);
        let duration = start.elapsed();

        let (stdout, stderr) = match get_stdin_out(&output) {
            Ok(output) => output,
            Err(err) => {
                return Err(CommandError {
                    cmd: self.clone(),
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code,
                    duration,
                    kind: err,
                });
            }
        };

        let kind = match output {
            Err(err) => Err(CommandErrorKind::FailedToStart { err }),
            Ok(_output) => {
                if exit_code == 0 {
                    Ok(())
                } else {
                    Err(CommandErrorKind::BadExitCode {})
                }
            }
        };

        match kind {
            Ok(()) => Ok(CommandSuccess {
                cmd: self.clone(),
                stdout,
                stderr,
                duration,
            }),
            Err(kind) => Err(CommandError {
                cmd: self.clone(),
                stdout,
                stderr,
                exit_code,
                duration,
                kind,
            }),
        }
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cmd.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", self.display_arg(arg))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandLine(\"{:?}", self.cmd)?;
        for arg in &self.args {
            write!(f, " {:?}", self.display_arg(arg))?;
        }
        write!(f, "\")")?;
        Ok(())
    }
}
