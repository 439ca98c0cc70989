//! SSH/SCP transport layer for the Warden fleet.
//!
//! Everything Warden does to a managed host goes through one seam:
//!
//! - **[`RemoteExecutor`]** — async trait with two primitives (`run_step`,
//!   `upload`) and shared script execution on top. Component installers,
//!   the health validator, and the rule engine all speak this trait and
//!   never touch a socket themselves.
//!
//! - **[`Script`] / [`CommandStep`] / [`Expect`]** — typed command
//!   sequences where each step declares what a healthy run looks like.
//!   Failures name the violated step instead of dumping a shell log.
//!
//! - **[`SshExecutor`]** — the production transport. Shells out to the
//!   local OpenSSH binaries with `BatchMode=yes` and a per-command
//!   deadline; uploads stage to a temp path and rename into place.
//!
//! - **[`testing::ScriptedExecutor`]** — substring-matched playback double
//!   used by the test suites of every crate that depends on this one.

pub mod error;
pub mod executor;
pub mod script;
pub mod ssh;
pub mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use error::RemoteError;
pub use executor::{HostSpec, RemoteExecutor};
pub use script::{CommandStep, Expect, Script, StepOutput};
pub use ssh::{SshExecutor, SshOptions};
