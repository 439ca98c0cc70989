//! Typed remote command scripts.
//!
//! Installers never hand raw strings to the transport. They build a
//! [`Script`] of labelled [`CommandStep`]s, each carrying an [`Expect`]
//! predicate that says what a healthy run of that step looks like. The
//! executor evaluates the predicate after every step and aborts the script
//! on the first violation, so a failure report always names the exact step
//! that went wrong rather than an opaque shell transcript.

use crate::error::RemoteError;

/// Success predicate attached to a [`CommandStep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Expect {
    /// The step must exit with status zero.
    #[default]
    Succeeds,
    /// Combined stdout+stderr must contain the needle. The exit status is
    /// ignored, so probe commands may carry `|| echo FALLBACK` tails.
    Contains(String),
    /// Combined stdout+stderr must not contain the needle. Exit status is
    /// ignored here too.
    NotContains(String),
    /// No check at all. The caller inspects the output itself.
    Any,
}

impl Expect {
    /// Evaluate the predicate against a finished step.
    ///
    /// # Errors
    /// Returns the violated expectation rendered for the error report.
    pub fn check(&self, output: &StepOutput) -> Result<(), String> {
        match self {
            Self::Succeeds => {
                if output.success() {
                    Ok(())
                } else {
                    Err(format!("exit status zero (got {:?})", output.code))
                }
            }
            Self::Contains(needle) => {
                if output.combined().contains(needle.as_str()) {
                    Ok(())
                } else {
                    Err(format!("output containing `{needle}`"))
                }
            }
            Self::NotContains(needle) => {
                if output.combined().contains(needle.as_str()) {
                    Err(format!("output free of `{needle}`"))
                } else {
                    Ok(())
                }
            }
            Self::Any => Ok(()),
        }
    }
}

/// One labelled command in a [`Script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    /// Short stable identifier, surfaced in logs and verification errors
    /// (e.g. `pull-image`, `wait-healthy`).
    pub label: String,
    /// The shell command executed on the remote host.
    pub command: String,
    /// What a healthy run looks like.
    pub expect: Expect,
}

impl CommandStep {
    /// A step that must exit zero.
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            expect: Expect::Succeeds,
        }
    }

    /// Replace the default predicate.
    #[must_use]
    pub fn expecting(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    /// Run the step purely for its side effect; never fail on it.
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.expect = Expect::Any;
        self
    }
}

/// Ordered sequence of [`CommandStep`]s executed on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<CommandStep>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step that must exit zero.
    #[must_use]
    pub fn step(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.steps.push(CommandStep::new(label, command));
        self
    }

    /// Append a step with an explicit predicate.
    #[must_use]
    pub fn step_expect(
        mut self,
        label: impl Into<String>,
        command: impl Into<String>,
        expect: Expect,
    ) -> Self {
        self.steps.push(CommandStep::new(label, command).expecting(expect));
        self
    }

    /// Append an already-built step.
    pub fn push(&mut self, step: CommandStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[CommandStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Raw result of a single remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl StepOutput {
    /// Shorthand for fixtures and probes: a zero-exit result with stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: Some(0),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout and stderr joined, for `Contains` checks against commands
    /// that write diagnostics to either stream.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// stdout with surrounding whitespace removed, the shape most probe
    /// callers want (`docker inspect --format` output ends in `\n`).
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Enforce `expect` against this output, mapping a violation to the
    /// transport error type.
    ///
    /// # Errors
    /// [`RemoteError::CommandFailed`] when a `Succeeds` predicate saw a
    /// non-zero exit, [`RemoteError::ExpectationFailed`] for the rest.
    pub fn enforce(&self, host: &str, step: &CommandStep) -> Result<(), RemoteError> {
        match step.expect.check(self) {
            Ok(()) => Ok(()),
            Err(expectation) => {
                if matches!(step.expect, Expect::Succeeds) {
                    Err(RemoteError::CommandFailed {
                        host: host.to_owned(),
                        step: step.label.clone(),
                        code: self.code,
                        stderr: self.stderr.trim().to_owned(),
                    })
                } else {
                    Err(RemoteError::ExpectationFailed {
                        host: host.to_owned(),
                        step: step.label.clone(),
                        expectation,
                    })
                }
            }
        }
    }
}
