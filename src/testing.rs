use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::shell::{CommandOutput, Shell, SystemShell};

/// Scripted stand-in for the privileged channel. Lines matching a passthrough
/// prefix run for real, lines matching a scripted prefix get the canned reply,
/// everything else succeeds silently. Every line is recorded.
#[derive(Debug, Default)]
pub struct FakeShell {
    lines: Mutex<Vec<String>>,
    replies: Mutex<Vec<(String, CommandOutput)>>,
    passthrough: Vec<String>,
}

impl FakeShell {
    pub fn new() -> Self {
        FakeShell {
            passthrough: vec!["tar ".to_owned(), "mkdir ".to_owned()],
            ..FakeShell::default()
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn reply<S: Into<String>>(self, prefix: S, output: CommandOutput) -> Self {
        self.replies.lock().unwrap().push((prefix.into(), output));
        self
    }

    pub fn reply_lines<S: Into<String>>(self, prefix: S, lines: &[&str]) -> Self {
        let output = CommandOutput {
            code: 0,
            out: lines.iter().map(|line| (*line).to_owned()).collect(),
        };
        self.reply(prefix, output)
    }

    pub fn fail<S: Into<String>>(self, prefix: S) -> Self {
        self.reply(prefix, CommandOutput::failed("scripted failure"))
    }

    /// Replaces the first scripted reply for `prefix` while the shell is shared.
    pub fn rescript<S: Into<String>>(&self, prefix: S, output: CommandOutput) {
        let prefix = prefix.into();
        let mut replies = self.replies.lock().unwrap();
        replies.retain(|(p, _)| *p != prefix);
        replies.insert(0, (prefix, output));
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn lines_starting_with(&self, prefix: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl Shell for FakeShell {
    async fn run_in(&self, line: &str, dir: Option<&Path>) -> CommandOutput {
        self.lines.lock().unwrap().push(line.to_owned());

        let scripted = self
            .replies
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone());
        if let Some(output) = scripted {
            return output;
        }

        if self.passthrough.iter().any(|prefix| line.starts_with(prefix.as_str())) {
            return SystemShell::new().run_in(line, dir).await;
        }

        CommandOutput::ok()
    }
}
