//! Per-invocation wiring: config file, persisted state, fleet store,
//! SSH executor and orchestrator, assembled once and shared by every
//! command handler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use warden_config::{Config, KeyringSecrets, PersistedState};
use warden_core::store::{FleetStore, PlainSecrets, SecretStore};
use warden_core::{InstallContext, StackOrchestrator};
use warden_remote::SshExecutor;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub struct Session {
    pub store: Arc<FleetStore>,
    pub ctx: InstallContext,
    pub orchestrator: StackOrchestrator,
    secrets: Box<dyn SecretStore>,
    state_path: PathBuf,
    loaded: PersistedState,
}

impl Session {
    /// Load config and state, hydrate the store, and wire up the
    /// executor and orchestrator. An explicitly passed config path must
    /// exist; the default location is allowed to be absent and yields
    /// an empty inventory.
    pub fn open(global: &GlobalOpts) -> Result<Self, CliError> {
        let config = match &global.config {
            Some(path) => {
                if !path.exists() {
                    return Err(CliError::NoConfig {
                        path: path.display().to_string(),
                    });
                }
                warden_config::load_config_from(path)?
            }
            None => warden_config::load_config()?,
        };
        config.validate()?;

        let secrets = secret_backend(&config)?;
        let state_path = config.state_path();
        let loaded = warden_config::load_state(&state_path)?;
        let store = Arc::new(warden_config::hydrate_store(
            &config,
            &loaded,
            secrets.as_ref(),
        )?);

        let mut options = config.ssh.options();
        if let Some(seconds) = global.timeout {
            options.command_timeout = Duration::from_secs(seconds);
        }
        let executor = Arc::new(SshExecutor::new(options));
        let settings = Arc::new(config.stack.clone());
        let ctx = InstallContext::new(executor, Arc::clone(&store), settings);
        let orchestrator = StackOrchestrator::new(ctx.clone());

        Ok(Self {
            store,
            ctx,
            orchestrator,
            secrets,
            state_path,
            loaded,
        })
    }

    /// Write runtime state back to disk. Keys that did not change keep
    /// their sealed form from the loaded state.
    pub fn persist(&self) -> Result<(), CliError> {
        let state =
            warden_config::snapshot_state(&self.store, self.secrets.as_ref(), &self.loaded)?;
        warden_config::save_state(&self.state_path, &state)?;
        Ok(())
    }
}

fn secret_backend(config: &Config) -> Result<Box<dyn SecretStore>, CliError> {
    match config.defaults.secrets.as_str() {
        "keyring" => Ok(Box::new(KeyringSecrets)),
        "plain" => {
            tracing::warn!("plain secret backend: keys are readable in the state file");
            Ok(Box::new(PlainSecrets))
        }
        other => Err(CliError::Validation {
            field: "defaults.secrets".into(),
            reason: format!("expected `keyring` or `plain`, got `{other}`"),
        }),
    }
}
