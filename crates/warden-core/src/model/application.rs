use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::FirewallConfig;

/// An application deployed behind the reverse proxy on one server.
///
/// `custom_labels` holds the container label block exactly as the
/// deployment tooling stores it, which may be plain text or base64
/// (possibly applied more than once). The label rewriter decodes and
/// normalizes it on every edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub uuid: Uuid,
    pub name: String,
    /// Name of the [`Server`](crate::model::Server) hosting it.
    pub server: String,
    #[serde(default)]
    pub custom_labels: String,
    /// When set, the label block must not be edited automatically and
    /// middleware attachment is skipped with a warning.
    #[serde(default)]
    pub label_readonly: bool,
    #[serde(default)]
    pub firewall: Option<FirewallConfig>,
}

impl Application {
    pub fn new(uuid: Uuid, name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            server: server.into(),
            custom_labels: String::new(),
            label_readonly: false,
            firewall: None,
        }
    }

    pub fn firewall_enabled(&self) -> bool {
        self.firewall.as_ref().is_some_and(|f| f.enabled)
    }

    /// Traefik router key the platform generates for the app.
    pub fn router_name(&self) -> String {
        format!("http-0-{}", self.uuid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn firewall_enabled_requires_config_and_flag() {
        let mut app = Application::new(Uuid::new_v4(), "shop", "web-1");
        assert!(!app.firewall_enabled());

        app.firewall = Some(FirewallConfig::default());
        assert!(!app.firewall_enabled());

        app.firewall.as_mut().unwrap().enabled = true;
        assert!(app.firewall_enabled());
    }

    #[test]
    fn router_name_embeds_uuid() {
        let uuid = Uuid::new_v4();
        let app = Application::new(uuid, "shop", "web-1");
        assert_eq!(app.router_name(), format!("http-0-{uuid}"));
    }
}
