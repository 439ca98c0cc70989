//! Country catalog command handler.

use tabled::Tabled;
use warden_core::rules::geo::{self, Country};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct CountryRow {
    #[tabled(rename = "Code")]
    code: &'static str,
    #[tabled(rename = "Name")]
    name: &'static str,
    #[tabled(rename = "Continent")]
    continent: &'static str,
    #[tabled(rename = "Risk")]
    risk: &'static str,
}

impl From<&Country> for CountryRow {
    fn from(c: &Country) -> Self {
        let risk = if geo::HIGH_RISK.iter().any(|(code, _)| *code == c.code) {
            "high"
        } else {
            ""
        };
        Self {
            code: c.code,
            name: c.name,
            continent: c.continent,
            risk,
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::unnecessary_wraps)]
pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let out = output::render_list(
        &global.output,
        geo::COUNTRIES,
        |c| CountryRow::from(c),
        |c| c.code.to_owned(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
