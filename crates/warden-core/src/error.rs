// ── Component failure taxonomy ──
//
// Every fallible stack operation funnels into `ComponentError`. The
// variants split along one axis that matters to the orchestrator:
// whether retrying the same work later could plausibly succeed.

use thiserror::Error;
use warden_remote::RemoteError;

/// Desired state conflicts with what is already deployed, in a way no
/// retry can fix. Someone has to change one side or the other.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A label payload that still decodes as base64 after the two
    /// supported passes. Deployment tools stack at most two layers;
    /// anything deeper is corrupt.
    #[error("label payload is base64-encoded more than twice")]
    DoubleEncoding,

    /// A ban duration the compact grammar cannot express.
    #[error("invalid ban duration `{value}`: {reason}")]
    Duration { value: String, reason: String },

    /// A LAPI key containing characters the Traefik bouncer plugin
    /// rejects at load time. Embedding it would brick the proxy config.
    #[error("LAPI key contains characters outside the bouncer plugin charset")]
    KeyCharset,
}

/// Errors produced while installing, verifying or reconciling a stack
/// component.
#[derive(Debug, Error)]
pub enum ComponentError {
    // ── Terminal: the host or the request is wrong ──
    /// A requirement the target host had to satisfy before work could
    /// start (docker present, port free, CrowdSec installed, ...).
    #[error("precondition not met for {component}: {reason}")]
    Precondition { component: String, reason: String },

    /// Stored and desired state disagree irreconcilably.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    // ── Retryable: transient infrastructure trouble ──
    /// Transport or command failure on the remote host.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A post-install check did not observe the evidence it expected.
    #[error("verification failed for {component} at {step}: {detail}")]
    Verification {
        component: String,
        step: String,
        detail: String,
    },

    // ── Recoverable: log, skip the offending item, continue ──
    /// Remote output or a stored payload did not have the expected
    /// shape. Never aborts a batch; callers drop the item.
    #[error("could not parse {context}: {detail}")]
    Parse { context: String, detail: String },

    // ── Upstream ──
    /// The CrowdSec Local API returned an error.
    #[error(transparent)]
    Lapi(#[from] warden_api::Error),
}

impl ComponentError {
    pub fn precondition(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Precondition {
            component: component.into(),
            reason: reason.into(),
        }
    }

    pub fn verification(
        component: impl Into<String>,
        step: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Verification {
            component: component.into(),
            step: step.into(),
            detail: detail.into(),
        }
    }

    pub fn parse(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// Whether a later attempt with the same inputs could succeed.
    /// Preconditions and conflicts need a human; everything touching
    /// the network might just have been unlucky.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(_) | Self::Verification { .. } => true,
            Self::Lapi(e) => e.is_transient(),
            Self::Precondition { .. } | Self::Conflict(_) | Self::Parse { .. } => false,
        }
    }

    /// Whether callers should log the error, skip the offending item
    /// and keep going with the rest of the batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}
