//! Per-application bouncer wiring.
//!
//! Registers an application-scoped bouncer with the agent, writes the
//! middleware definition labels into the application's label blob, and
//! separately attaches the middleware names to the application's
//! router line. Definitions and attachment are independent steps and
//! both are required; only the attachment tolerates a missing router
//! line, since the deploy engine regenerates router labels on every
//! deploy anyway.

use uuid::Uuid;

use crate::error::ComponentError;
use crate::install::crowdsec::extract_bouncer_key;
use crate::install::{Component, InstallContext, InstallReport, cscli};
use crate::labels::{
    LabelDocument, appsec_middleware_name, bouncer_middleware_labels, bouncer_middleware_name,
    decode_labels, rewrite,
};
use crate::model::Application;

pub(crate) fn application_bouncer_name(application: &Uuid) -> String {
    format!("app-{application}")
}

/// Registers (or rotates) the application's own bouncer on the server's
/// agent and returns the fresh API key.
pub async fn create_application_bouncer(
    ctx: &InstallContext,
    server_name: &str,
    application: &Uuid,
) -> Result<String, ComponentError> {
    let component = Component::Bouncer;
    let server = ctx.server(server_name, component)?;
    let name = application_bouncer_name(application);
    let container = &ctx.settings.container_name;

    ctx.executor
        .probe(
            &server.host,
            "bouncer-delete",
            &cscli(container, &format!("bouncers delete {name}")),
        )
        .await?;
    let added = ctx
        .executor
        .probe(
            &server.host,
            "bouncer-add",
            &cscli(container, &format!("bouncers add {name} -o raw")),
        )
        .await?;
    extract_bouncer_key(component, &added.stdout)
}

/// Wires one application to the bouncer plugin through its labels.
///
/// Idempotent: when the middleware definitions are already in the
/// blob, no new key is minted and only the router attachment is
/// re-checked. The label-readonly flag is force-disabled (and loudly
/// reported) because custom labels are otherwise ignored at deploy
/// time, which would leave the application silently unprotected.
pub async fn apply_bouncer(
    ctx: &InstallContext,
    application: &Uuid,
) -> Result<InstallReport, ComponentError> {
    let component = Component::Bouncer;
    let app = ctx.store.application(application).ok_or_else(|| {
        ComponentError::precondition(
            component.to_string(),
            format!("unknown application `{application}`"),
        )
    })?;
    let server = ctx.server(&app.server, component)?;
    let host = &server.host;
    let settings = &ctx.settings;
    let mut report = InstallReport::begin(component);

    if !server.security.crowdsec_installed || !server.security.crowdsec_available {
        return Err(ComponentError::precondition(
            component.to_string(),
            format!(
                "CrowdSec must be installed and available on `{}` before the bouncer is wired",
                app.server
            ),
        ));
    }

    let mut label_readonly = app.label_readonly;
    if label_readonly {
        label_readonly = false;
        report.warn("label-readonly flag disabled so middleware labels apply at deploy time");
    }

    // Peek before mutating: an existing definition block means the key
    // already embedded in the labels is the registered one, and minting
    // a replacement would orphan it.
    let decoded = decode_labels(&app.custom_labels)?;
    let bouncer_mw = bouncer_middleware_name(application);
    let already_wired = LabelDocument::parse(&decoded.text).contains_key(&format!(
        "traefik.http.middlewares.{bouncer_mw}.plugin.bouncer.enabled"
    ));

    let key = if already_wired {
        report.step("middleware definitions already present");
        None
    } else {
        let key = create_application_bouncer(ctx, &app.server, application).await?;
        report.step("application bouncer registered");
        Some(key)
    };

    let appsec_enabled = app.firewall.as_ref().is_none_or(|f| f.appsec_enabled);
    let router = app.router_name();
    let appsec_mw = appsec_middleware_name(application);
    let (new_labels, router_found) = rewrite(&app.custom_labels, |doc| {
        if let Some(key) = key.as_deref() {
            for (name, value) in bouncer_middleware_labels(
                application,
                &settings.lapi_host(),
                &settings.appsec_host(),
                key,
            ) {
                doc.upsert(&name, &value);
            }
        }
        let primary = doc.attach_router_middleware(&router, &bouncer_mw);
        if appsec_enabled {
            doc.attach_router_middleware(&router, &appsec_mw);
        }
        primary.is_some()
    })?;

    if router_found {
        report.step("router middlewares attached");
    } else {
        report.warn(
            "router middlewares line not found in labels; middleware is defined but not attached",
        );
    }

    ctx.store.upsert_application(Application {
        custom_labels: new_labels,
        label_readonly,
        ..(*app).clone()
    });
    report.step("labels updated");

    // Restart so the labels apply now; failure just defers them to the
    // next deploy.
    let found = ctx
        .executor
        .probe(
            host,
            "find-container",
            &format!(
                "docker ps --format '{{{{.Names}}}}' | grep {application} || echo NOT_RUNNING"
            ),
        )
        .await?;
    let container = found
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_owned();
    if container.is_empty() || container == "NOT_RUNNING" {
        report.warn("application container not running; labels apply on next deploy");
    } else {
        let restarted = ctx
            .executor
            .probe(host, "restart-container", &format!("docker restart {container}"))
            .await?;
        if restarted.success() {
            report.step("application container restarted");
        } else {
            report.warn("container restart failed; labels apply on next deploy");
        }
    }

    Ok(report.installed())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::labels::router_middlewares_key;
    use crate::model::{SecurityUpdate, Server};
    use crate::settings::StackSettings;
    use crate::store::FleetStore;
    use std::sync::Arc;
    use warden_remote::testing::ScriptedExecutor;
    use warden_remote::{HostSpec, StepOutput};

    fn fixture(app_labels: &str) -> (Arc<FleetStore>, Uuid) {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        store
            .update_security(
                "web-1",
                SecurityUpdate::default()
                    .crowdsec_installed(true)
                    .crowdsec_available(true),
            )
            .unwrap();
        let uuid = Uuid::new_v4();
        let mut app = Application::new(uuid, "shop", "web-1");
        app.custom_labels = app_labels.to_owned();
        store.upsert_application(app);
        (Arc::new(store), uuid)
    }

    fn keyed_executor() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .respond(
                "bouncers add app-",
                StepOutput::ok("API key for 'app':\n\n   fedcba9876543210fedcba9876543210\n"),
            )
            .respond("grep", StepOutput::ok("shop-abc123\n"))
            .respond("docker restart", StepOutput::ok("shop-abc123"))
    }

    #[tokio::test]
    async fn apply_wires_definitions_and_attachment() {
        let uuid = Uuid::new_v4();
        let router_line = format!("{}=gzip", router_middlewares_key(&format!("http-0-{uuid}")));
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        store
            .update_security(
                "web-1",
                SecurityUpdate::default()
                    .crowdsec_installed(true)
                    .crowdsec_available(true),
            )
            .unwrap();
        let mut app = Application::new(uuid, "shop", "web-1");
        app.custom_labels = router_line;
        store.upsert_application(app);

        let executor = Arc::new(keyed_executor());
        let ctx = InstallContext::new(
            Arc::clone(&executor) as Arc<dyn warden_remote::RemoteExecutor>,
            Arc::new(store),
            Arc::new(StackSettings::default()),
        );

        let report = apply_bouncer(&ctx, &uuid).await.unwrap();
        assert_eq!(report.phase, crate::install::InstallPhase::Installed);
        assert!(report.warnings.is_empty());

        let updated = ctx.store.application(&uuid).unwrap();
        let decoded = decode_labels(&updated.custom_labels).unwrap();
        assert_eq!(decoded.levels, 1);
        let doc = LabelDocument::parse(&decoded.text);
        assert!(doc.contains_key(&format!(
            "traefik.http.middlewares.crowdsec-{uuid}.plugin.bouncer.CrowdsecLapiKey"
        )));
        let attached = doc
            .get(&router_middlewares_key(&format!("http-0-{uuid}")))
            .unwrap();
        assert!(attached.contains(&format!("crowdsec-{uuid}")));
        assert!(attached.contains(&format!("appsec-{uuid}")));
        assert_eq!(executor.count_matching("docker restart"), 1);
    }

    #[tokio::test]
    async fn apply_is_idempotent_and_never_rotates_an_embedded_key() {
        let (store, uuid) = fixture("");
        let executor = Arc::new(keyed_executor());
        let ctx = InstallContext::new(
            Arc::clone(&executor) as Arc<dyn warden_remote::RemoteExecutor>,
            store,
            Arc::new(StackSettings::default()),
        );

        apply_bouncer(&ctx, &uuid).await.unwrap();
        let first = ctx.store.application(&uuid).unwrap().custom_labels.clone();
        apply_bouncer(&ctx, &uuid).await.unwrap();
        let second = ctx.store.application(&uuid).unwrap().custom_labels.clone();

        assert_eq!(first, second);
        assert_eq!(executor.count_matching("bouncers add app-"), 1);
    }

    #[tokio::test]
    async fn readonly_flag_is_disabled_loudly() {
        let (store, uuid) = fixture("");
        let mut app = (*store.application(&uuid).unwrap()).clone();
        app.label_readonly = true;
        store.upsert_application(app);

        let ctx = InstallContext::new(
            Arc::new(keyed_executor()),
            store,
            Arc::new(StackSettings::default()),
        );

        let report = apply_bouncer(&ctx, &uuid).await.unwrap();
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.contains("label-readonly"))
        );
        assert!(!ctx.store.application(&uuid).unwrap().label_readonly);
    }

    #[tokio::test]
    async fn missing_router_line_is_warned_not_fatal() {
        let (store, uuid) = fixture("a=b");
        let ctx = InstallContext::new(
            Arc::new(keyed_executor()),
            store,
            Arc::new(StackSettings::default()),
        );

        let report = apply_bouncer(&ctx, &uuid).await.unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("router")));

        let updated = ctx.store.application(&uuid).unwrap();
        let decoded = decode_labels(&updated.custom_labels).unwrap();
        assert!(decoded.text.contains("plugin.bouncer.enabled=true"));
    }

    #[tokio::test]
    async fn crowdsec_missing_is_a_precondition() {
        let store = FleetStore::new();
        store.upsert_server(Server::new("web-1", HostSpec::new("web-1", "203.0.113.7")));
        let uuid = Uuid::new_v4();
        store.upsert_application(Application::new(uuid, "shop", "web-1"));

        let ctx = InstallContext::new(
            Arc::new(ScriptedExecutor::new()),
            Arc::new(store),
            Arc::new(StackSettings::default()),
        );

        let err = apply_bouncer(&ctx, &uuid).await.unwrap_err();
        assert!(matches!(err, ComponentError::Precondition { .. }));
    }
}
