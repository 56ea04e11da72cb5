use std::{fmt::Debug, path::Path, process::Stdio};

use async_trait::async_trait;
use log::{debug, trace};
use tokio::process::Command;

/// Result of one privileged command line. Never an error: a spawn failure is
/// reported as a non-zero code with the reason as output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub out: Vec<String>,
}

impl CommandOutput {
    pub fn ok() -> Self {
        CommandOutput::default()
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        CommandOutput {
            code: -1,
            out: vec![message.into()],
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn out_string(&self) -> String {
        self.out.join("\n")
    }

    pub fn first_line(&self) -> &str {
        self.out.first().map_or("", |line| line.trim())
    }

    /// Folds another step into this one: output accumulates, failure sticks.
    pub fn and(mut self, other: CommandOutput) -> Self {
        if self.is_success() {
            self.code = other.code;
        }
        self.out.extend(other.out);
        self
    }
}

/// The single privileged command channel every device operation goes through.
#[async_trait]
pub trait Shell: Debug + Send + Sync {
    async fn run_in(&self, line: &str, dir: Option<&Path>) -> CommandOutput;

    async fn run(&self, line: &str) -> CommandOutput {
        self.run_in(line, None).await
    }
}

#[derive(Debug, Clone)]
pub struct SystemShell {
    program: String,
}

impl SystemShell {
    pub fn new() -> Self {
        SystemShell::with_program("sh")
    }

    /// Uses another interpreter, e.g. `su` on rooted devices.
    pub fn with_program<S: Into<String>>(program: S) -> Self {
        SystemShell {
            program: program.into(),
        }
    }
}

impl Default for SystemShell {
    fn default() -> Self {
        SystemShell::new()
    }
}

#[async_trait]
impl Shell for SystemShell {
    async fn run_in(&self, line: &str, dir: Option<&Path>) -> CommandOutput {
        debug!("$ {line}");

        let mut command = Command::new(&self.program);
        command
            .arg("-c")
            .arg(line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            command.current_dir(dir);
        }

        let output = match command.output().await {
            Ok(output) => output,
            Err(err) => return CommandOutput::failed(format!("failed to spawn `{line}`: {err}")),
        };

        let out = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>();
        let code = output.status.code().unwrap_or(-1);
        trace!("exit {code}: {out:?}");

        CommandOutput { code, out }
    }
}

pub fn quote<S: AsRef<str>>(s: S) -> String {
    format!("\"{}\"", s.as_ref())
}
