// ── CrowdSec compact duration grammar ──
//
// Decisions and scenario blackholes take durations as `<N><unit>` with
// a single unit. Formatting picks the unit by magnitude and floors, so
// 90s becomes "1m", not "1m30s".

use crate::error::ConflictError;

const MINUTE: u64 = 60;
const HOUR: u64 = 3_600;
const DAY: u64 = 86_400;

/// Upper bound on formattable durations. Ten years of ban is a typo,
/// not a policy.
const MAX_SECONDS: u64 = 10 * 365 * DAY;

/// Format a ban duration in seconds as CrowdSec's compact grammar.
///
/// `< 60 → Ns`, `< 3600 → Nm`, `< 86400 → Nh`, otherwise `Nd`,
/// flooring in every bracket.
pub fn format_ban_duration(seconds: u64) -> Result<String, ConflictError> {
    if seconds == 0 || seconds > MAX_SECONDS {
        return Err(ConflictError::Duration {
            value: format!("{seconds}s"),
            reason: "must be between 1 second and 10 years".into(),
        });
    }

    Ok(if seconds < MINUTE {
        format!("{seconds}s")
    } else if seconds < HOUR {
        format!("{}m", seconds / MINUTE)
    } else if seconds < DAY {
        format!("{}h", seconds / HOUR)
    } else {
        format!("{}d", seconds / DAY)
    })
}

/// Parse a compact duration (`30s`, `2h`, `1d`, and Go-style compounds
/// like `1h30m` which LAPI reports on live decisions) back to seconds.
///
/// Returns `None` for anything it cannot fully account for.
pub fn parse_compact_duration(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut saw_unit = false;

    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        // LAPI reports sub-second precision as e.g. "59m59.5s"; drop
        // the fractional part rather than failing the whole parse.
        if ch == '.' {
            if digits.is_empty() {
                return None;
            }
            digits.push(ch);
            continue;
        }
        let whole: u64 = digits.split('.').next()?.parse().ok()?;
        let unit = match ch {
            's' => 1,
            'm' => MINUTE,
            'h' => HOUR,
            'd' => DAY,
            _ => return None,
        };
        total = total.checked_add(whole.checked_mul(unit)?)?;
        digits.clear();
        saw_unit = true;
    }

    if !digits.is_empty() || !saw_unit {
        return None;
    }
    Some(total)
}
