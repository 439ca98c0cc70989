use thiserror::Error;

/// Top-level error type for the `warden-remote` crate.
///
/// Covers every failure mode of the SSH/SCP transport: unreachable hosts,
/// non-zero exit statuses, violated output expectations, upload failures,
/// and timeouts. `warden-core` wraps these into component-level diagnostics.
#[derive(Debug, Error)]
pub enum RemoteError {
    // ── Connectivity ────────────────────────────────────────────────
    /// The SSH client could not reach the host at all (DNS failure,
    /// connection refused, key rejected).
    #[error("Cannot reach `{host}`: {detail}")]
    Unreachable { host: String, detail: String },

    /// The whole operation exceeded the configured deadline.
    #[error("Remote operation on `{host}` timed out after {timeout_secs}s")]
    Timeout { host: String, timeout_secs: u64 },

    // ── Command execution ───────────────────────────────────────────
    /// A step exited non-zero while its expectation required success.
    #[error("Step `{step}` failed on `{host}` (exit {code:?}): {stderr}")]
    CommandFailed {
        host: String,
        step: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A step ran, but its output did not satisfy the declared expectation.
    #[error("Step `{step}` on `{host}` did not meet expectation: {expectation}")]
    ExpectationFailed {
        host: String,
        step: String,
        expectation: String,
    },

    // ── File transfer ───────────────────────────────────────────────
    /// SCP upload (or the follow-up atomic rename) failed.
    #[error("Upload to `{host}:{remote_path}` failed: {detail}")]
    UploadFailed {
        host: String,
        remote_path: String,
        detail: String,
    },

    // ── Local plumbing ──────────────────────────────────────────────
    /// Spawning the local `ssh`/`scp` binary or staging a temp file failed.
    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Returns `true` if the failure is at the transport layer rather than
    /// inside the remote command itself. Transport failures are worth
    /// retrying; command failures usually are not without a config change.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Timeout { .. })
    }

    /// The step label that produced this error, if one applies.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { step, .. } | Self::ExpectationFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
