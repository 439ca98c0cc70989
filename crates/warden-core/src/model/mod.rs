// ── Domain model ──

mod application;
mod firewall;
mod server;

pub use application::Application;
pub use firewall::{
    AlertStatus, AlertType, ConditionSet, FirewallAlert, FirewallConfig, FirewallRule, LogicalOp,
    ProtectionMode, RuleAction, RuleCondition, Severity,
};
pub use server::{
    ComponentCheck, SecurityState, SecurityUpdate, Server, ValidationDetails,
};
