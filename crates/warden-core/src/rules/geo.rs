//! Country catalog and geo-rule builders.
//!
//! The catalog backs the geo-blocking surface: country pickers, the
//! suggested allow/block lists, and the prebuilt whitelist/blacklist
//! rules. Codes are ISO 3166-1 alpha-2, matching what the GeoIP
//! enrichment writes into `evt.Enriched.IsoCode`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use crate::model::{ConditionSet, FirewallRule, LogicalOp, ProtectionMode, RuleAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Country {
    pub code: &'static str,
    pub name: &'static str,
    pub flag: &'static str,
    pub continent: &'static str,
}

const fn c(
    code: &'static str,
    name: &'static str,
    flag: &'static str,
    continent: &'static str,
) -> Country {
    Country {
        code,
        name,
        flag,
        continent,
    }
}

pub const COUNTRIES: &[Country] = &[
    c("US", "United States", "🇺🇸", "Americas"),
    c("GB", "United Kingdom", "🇬🇧", "Europe"),
    c("FR", "France", "🇫🇷", "Europe"),
    c("DE", "Germany", "🇩🇪", "Europe"),
    c("ES", "Spain", "🇪🇸", "Europe"),
    c("IT", "Italy", "🇮🇹", "Europe"),
    c("NL", "Netherlands", "🇳🇱", "Europe"),
    c("BE", "Belgium", "🇧🇪", "Europe"),
    c("CH", "Switzerland", "🇨🇭", "Europe"),
    c("CA", "Canada", "🇨🇦", "Americas"),
    c("CN", "China", "🇨🇳", "Asia"),
    c("RU", "Russia", "🇷🇺", "Europe"),
    c("IN", "India", "🇮🇳", "Asia"),
    c("BR", "Brazil", "🇧🇷", "Americas"),
    c("JP", "Japan", "🇯🇵", "Asia"),
    c("KR", "South Korea", "🇰🇷", "Asia"),
    c("AU", "Australia", "🇦🇺", "Oceania"),
    c("MX", "Mexico", "🇲🇽", "Americas"),
    c("AR", "Argentina", "🇦🇷", "Americas"),
    c("ZA", "South Africa", "🇿🇦", "Africa"),
    c("NG", "Nigeria", "🇳🇬", "Africa"),
    c("EG", "Egypt", "🇪🇬", "Africa"),
    c("TR", "Turkey", "🇹🇷", "Asia"),
    c("SA", "Saudi Arabia", "🇸🇦", "Asia"),
    c("AE", "United Arab Emirates", "🇦🇪", "Asia"),
    c("SG", "Singapore", "🇸🇬", "Asia"),
    c("MY", "Malaysia", "🇲🇾", "Asia"),
    c("TH", "Thailand", "🇹🇭", "Asia"),
    c("VN", "Vietnam", "🇻🇳", "Asia"),
    c("PH", "Philippines", "🇵🇭", "Asia"),
    c("ID", "Indonesia", "🇮🇩", "Asia"),
    c("PK", "Pakistan", "🇵🇰", "Asia"),
    c("BD", "Bangladesh", "🇧🇩", "Asia"),
    c("PL", "Poland", "🇵🇱", "Europe"),
    c("UA", "Ukraine", "🇺🇦", "Europe"),
    c("RO", "Romania", "🇷🇴", "Europe"),
    c("CZ", "Czech Republic", "🇨🇿", "Europe"),
    c("SE", "Sweden", "🇸🇪", "Europe"),
    c("NO", "Norway", "🇳🇴", "Europe"),
    c("DK", "Denmark", "🇩🇰", "Europe"),
    c("FI", "Finland", "🇫🇮", "Europe"),
    c("PT", "Portugal", "🇵🇹", "Europe"),
    c("GR", "Greece", "🇬🇷", "Europe"),
    c("AT", "Austria", "🇦🇹", "Europe"),
    c("HU", "Hungary", "🇭🇺", "Europe"),
    c("IE", "Ireland", "🇮🇪", "Europe"),
    c("NZ", "New Zealand", "🇳🇿", "Oceania"),
    c("CL", "Chile", "🇨🇱", "Americas"),
    c("CO", "Colombia", "🇨🇴", "Americas"),
    c("PE", "Peru", "🇵🇪", "Americas"),
    c("VE", "Venezuela", "🇻🇪", "Americas"),
];

/// Countries frequently blocked outright, with the operator-facing
/// reason.
pub const HIGH_RISK: &[(&str, &str)] = &[
    ("CN", "China - high bot traffic"),
    ("RU", "Russia - high attack rate"),
    ("KP", "North Korea - security threat"),
    ("IR", "Iran - high risk"),
    ("VN", "Vietnam - high spam rate"),
];

/// Common business countries, offered as an allowlist starting point.
pub const SUGGESTED_WHITELIST: &[&str] = &[
    "US", "GB", "FR", "DE", "ES", "IT", "NL", "BE", "CH", "CA", "AU", "JP", "SG", "IE", "SE",
    "NO", "DK", "FI",
];

pub const SUGGESTED_BLACKLIST: &[&str] = &["CN", "RU", "KP", "IR"];

pub fn country(code: &str) -> Option<&'static Country> {
    COUNTRIES
        .iter()
        .find(|country| country.code.eq_ignore_ascii_case(code))
}

/// Catalog grouped by continent, continents sorted.
pub fn by_continent() -> BTreeMap<&'static str, Vec<&'static Country>> {
    let mut grouped: BTreeMap<&'static str, Vec<&'static Country>> = BTreeMap::new();
    for country in COUNTRIES {
        grouped.entry(country.continent).or_default().push(country);
    }
    grouped
}

fn display_names(codes: &[&str]) -> Vec<String> {
    codes
        .iter()
        .map(|code| {
            country(code).map_or_else(|| (*code).to_owned(), |c| c.name.to_owned())
        })
        .collect()
}

fn summary(names: &[String]) -> String {
    let head = names.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    if names.len() > 3 {
        format!("{head}...")
    } else {
        head
    }
}

fn geo_rule(
    id: i64,
    codes: &[&str],
    action: RuleAction,
    name: Option<String>,
    default_name: String,
    description: String,
) -> FirewallRule {
    FirewallRule {
        id,
        name: name.unwrap_or(default_name),
        description: Some(description),
        protection_mode: ProtectionMode::GeoBlock,
        action,
        enabled: true,
        // Geo rules evaluate ahead of the regular rule set.
        priority: 10,
        conditions: ConditionSet::new(json!([{
            "field": "country_code",
            "operator": "in",
            "value": codes.join(","),
        }])),
        remediation_duration: None,
        capacity: None,
        leakspeed: None,
        logical_operator: LogicalOp::And,
    }
}

/// Rule allowing traffic only from `codes`; everything else gets
/// banned.
pub fn whitelist_rule(id: i64, codes: &[&str], name: Option<String>) -> FirewallRule {
    let names = display_names(codes);
    geo_rule(
        id,
        codes,
        RuleAction::Allow,
        name,
        format!("Geo-Blocking: Allow {}", summary(&names)),
        format!("Allow traffic only from: {}", names.join(", ")),
    )
}

/// Rule banning traffic from `codes`.
pub fn blacklist_rule(id: i64, codes: &[&str], name: Option<String>) -> FirewallRule {
    let names = display_names(codes);
    geo_rule(
        id,
        codes,
        RuleAction::Block,
        name,
        format!("Geo-Blocking: Block {}", summary(&names)),
        format!("Block traffic from: {}", names.join(", ")),
    )
}
