//! Test doubles for the process and generation seams

use crate::errors::{Result, TestForgeError};
use crate::generator::{CandidateFile, GenerationRequest, RegenerationRequest, TestGenerator};
use crate::runner::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    Timeout,
}

struct Rule {
    pattern: String,
    /// Replies in order; the last one repeats
    replies: VecDeque<Reply>,
}

/// Canned command outputs matched by substring; first matching rule wins.
///
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, PathBuf)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, output: CommandOutput) -> Self {
        self.push_rule(pattern, vec![Reply::Output(output)])
    }

    /// Successive replies for repeated matches
    pub fn on_sequence(self, pattern: &str, outputs: Vec<CommandOutput>) -> Self {
        self.push_rule(pattern, outputs.into_iter().map(Reply::Output).collect())
    }

    pub fn on_timeout(self, pattern: &str) -> Self {
        self.push_rule(pattern, vec![Reply::Timeout])
    }

    fn push_rule(self, pattern: &str, replies: Vec<Reply>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule { pattern: pattern.to_string(), replies: replies.into() });
        }
        self
    }

    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|(cmd, _)| cmd.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((command.to_string(), working_dir.to_path_buf()));
        }

        let reply = {
            let mut rules = self.rules.lock().map_err(|_| TestForgeError::config("poisoned"))?;
            rules.iter_mut().find(|r| command.contains(&r.pattern)).and_then(|rule| {
                if rule.replies.len() > 1 { rule.replies.pop_front() } else { rule.replies.front().cloned() }
            })
        };

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Timeout) => Err(TestForgeError::timeout(command, timeout)),
            None => Ok(CommandOutput::default()),
        }
    }
}

/// Generator returning fixed candidates per project name
#[derive(Default)]
pub struct StubGenerator {
    files: HashMap<String, Vec<CandidateFile>>,
    failing: Vec<String>,
    regenerated: Option<String>,
    regenerations: Mutex<Vec<PathBuf>>,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(mut self, project: &str, files: Vec<CandidateFile>) -> Self {
        self.files.insert(project.to_string(), files);
        self
    }

    pub fn failing_for(mut self, project: &str) -> Self {
        self.failing.push(project.to_string());
        self
    }

    pub fn regenerates_with(mut self, content: &str) -> Self {
        self.regenerated = Some(content.to_string());
        self
    }

    pub fn regenerated_files(&self) -> Vec<PathBuf> {
        self.regenerations.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TestGenerator for StubGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Vec<CandidateFile>> {
        let name = &request.project.name;
        if self.failing.contains(name) {
            return Err(TestForgeError::generation(name, "stub failure"));
        }
        Ok(self
            .files
            .get(name)
            .map(|files| {
                files.iter().filter(|f| request.categories.contains(&f.category)).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn regenerate(&self, request: &RegenerationRequest<'_>) -> Result<String> {
        if let Ok(mut seen) = self.regenerations.lock() {
            seen.push(request.file.to_path_buf());
        }
        self.regenerated
            .clone()
            .ok_or_else(|| TestForgeError::generation(&request.project.name, "no regeneration scripted"))
    }
}
