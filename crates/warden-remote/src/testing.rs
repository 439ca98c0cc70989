//! In-memory [`RemoteExecutor`] double for tests.
//!
//! [`ScriptedExecutor`] matches incoming commands against substring rules
//! and plays back canned responses, recording every command and upload so
//! assertions can check what would have hit the wire. Commands with no
//! matching rule succeed with empty output, which keeps tests focused on
//! the probes they actually care about.
//!
//! Lives in the main crate (not behind `cfg(test)`) so dependent crates
//! can drive their own tests with it.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::executor::{HostSpec, RemoteExecutor};
use crate::script::{CommandStep, StepOutput};

/// One response a rule can play back.
#[derive(Debug, Clone)]
enum CannedResponse {
    Output(StepOutput),
    Unreachable(String),
}

#[derive(Debug)]
struct Rule {
    needle: String,
    /// Responses are consumed front-to-back; the last one is sticky.
    responses: VecDeque<CannedResponse>,
}

/// A recorded `run_step` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub host: String,
    pub label: String,
    pub command: String,
}

/// A recorded `upload` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub host: String,
    pub remote_path: String,
    pub content: String,
}

/// Scripted transport double. Build with the `respond*` methods, wrap in
/// an `Arc`, hand to the code under test, then assert on the recordings.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    upload_failures: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<RecordedCall>>,
    uploads: Mutex<Vec<RecordedUpload>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `needle` reply with `output` (every time).
    #[must_use]
    pub fn respond(self, needle: impl Into<String>, output: StepOutput) -> Self {
        self.push_rule(needle.into(), vec![CannedResponse::Output(output)]);
        self
    }

    /// Commands containing `needle` fail as unreachable (every time).
    #[must_use]
    pub fn respond_unreachable(self, needle: impl Into<String>, detail: impl Into<String>) -> Self {
        self.push_rule(
            needle.into(),
            vec![CannedResponse::Unreachable(detail.into())],
        );
        self
    }

    /// Commands containing `needle` play back `outputs` in order; the last
    /// entry repeats once the queue drains. Drives retry tests.
    #[must_use]
    pub fn respond_seq(self, needle: impl Into<String>, outputs: Vec<StepOutput>) -> Self {
        self.push_rule(
            needle.into(),
            outputs.into_iter().map(CannedResponse::Output).collect(),
        );
        self
    }

    /// First matching call is unreachable, subsequent calls get `then`.
    #[must_use]
    pub fn respond_unreachable_then(
        self,
        needle: impl Into<String>,
        detail: impl Into<String>,
        then: StepOutput,
    ) -> Self {
        self.push_rule(
            needle.into(),
            vec![
                CannedResponse::Unreachable(detail.into()),
                CannedResponse::Output(then),
            ],
        );
        self
    }

    /// Uploads whose remote path contains `needle` fail.
    #[must_use]
    pub fn fail_upload(self, needle: impl Into<String>, detail: impl Into<String>) -> Self {
        self.upload_failures
            .lock()
            .expect("upload_failures lock poisoned")
            .push((needle.into(), detail.into()));
        self
    }

    fn push_rule(&self, needle: String, responses: Vec<CannedResponse>) {
        self.rules.lock().expect("rules lock poisoned").push(Rule {
            needle,
            responses: responses.into(),
        });
    }

    // ── Recordings ──────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    /// Every executed command string, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.command)
            .collect()
    }

    /// How many executed commands contained `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.command.contains(needle))
            .count()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().expect("uploads lock poisoned").clone()
    }

    /// Content of the most recent upload to a path containing `needle`.
    pub fn upload_content(&self, needle: &str) -> Option<String> {
        self.uploads()
            .into_iter()
            .rev()
            .find(|upload| upload.remote_path.contains(needle))
            .map(|upload| upload.content)
    }

    fn next_response(&self, command: &str) -> CannedResponse {
        let mut rules = self.rules.lock().expect("rules lock poisoned");
        for rule in rules.iter_mut() {
            if command.contains(rule.needle.as_str()) {
                if rule.responses.len() > 1 {
                    return rule
                        .responses
                        .pop_front()
                        .unwrap_or(CannedResponse::Output(StepOutput::ok("")));
                }
                if let Some(last) = rule.responses.front() {
                    return last.clone();
                }
            }
        }
        CannedResponse::Output(StepOutput::ok(""))
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn run_step(
        &self,
        host: &HostSpec,
        step: &CommandStep,
    ) -> Result<StepOutput, RemoteError> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(RecordedCall {
                host: host.name.clone(),
                label: step.label.clone(),
                command: step.command.clone(),
            });
        match self.next_response(&step.command) {
            CannedResponse::Output(output) => Ok(output),
            CannedResponse::Unreachable(detail) => Err(RemoteError::Unreachable {
                host: host.name.clone(),
                detail,
            }),
        }
    }

    async fn upload(
        &self,
        host: &HostSpec,
        remote_path: &str,
        content: &str,
    ) -> Result<(), RemoteError> {
        self.uploads
            .lock()
            .expect("uploads lock poisoned")
            .push(RecordedUpload {
                host: host.name.clone(),
                remote_path: remote_path.to_owned(),
                content: content.to_owned(),
            });
        let failure = self
            .upload_failures
            .lock()
            .expect("upload_failures lock poisoned")
            .iter()
            .find(|(needle, _)| remote_path.contains(needle.as_str()))
            .map(|(_, detail)| detail.clone());
        match failure {
            Some(detail) => Err(RemoteError::UploadFailed {
                host: host.name.clone(),
                remote_path: remote_path.to_owned(),
                detail,
            }),
            None => Ok(()),
        }
    }
}
