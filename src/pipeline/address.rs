//! Address heuristics shared by the resolution steps.
//!
//! Everything here is a pure function so the rules can be tested on their own.

use crate::app::ports::Row;
use crate::common::constants::{LONDON, LONDON_PREFIXES, STREET_SUFFIXES};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(flat\s+|apartment\s+)?\d+[a-z]?\b").expect("static regex"));

/// Partner fields tried in order when picking an address
pub const PARTNER_ADDRESS_FIELDS: [&str; 3] = ["fullAddress", "displayAddress", "title"];

/// Does `candidate` look like a street address: a digit, a street-suffix word,
/// or a leading house number.
pub fn looks_like_address(candidate: &str) -> bool {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    if LEADING_NUMBER.is_match(&lower) {
        return true;
    }
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| STREET_SUFFIXES.contains(&word))
}

/// First named field holding a string that passes `looks_like_address`.
/// Returns the field name alongside the address.
pub fn first_plausible_address(
    data: &Map<String, Value>,
    fields: &[&'static str],
) -> Option<(&'static str, String)> {
    fields.iter().find_map(|field| {
        data.get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| looks_like_address(s))
            .map(|s| (*field, s.to_string()))
    })
}

pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_london_outcode(postcode: &str) -> bool {
    let outward = postcode.split_whitespace().next().unwrap_or("").to_uppercase();
    LONDON_PREFIXES.iter().any(|p| outward.starts_with(p))
}

/// "6, Whistler Square, London, SW1W 8BT" from a registry row.
/// Empty parts are skipped.
pub fn format_registry_address(row: &Row) -> String {
    let field = |k: &str| row.get(k).map(|v| v.trim()).unwrap_or("");
    let building = if field("paon").is_empty() { field("saon") } else { field("paon") };
    let street = title_case(field("street"));
    let postcode = field("postcode").to_uppercase();
    let city = if !postcode.is_empty() && is_london_outcode(&postcode) { LONDON } else { "" };

    [building, street.as_str(), city, postcode.as_str()]
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn heuristic_accepts_numbers_and_street_words() {
        assert!(looks_like_address("12 Blenheim Crescent, London"));
        assert!(looks_like_address("Blenheim Crescent, London"));
        assert!(looks_like_address("Flat 3b The Mansions"));
        assert!(!looks_like_address("Stunning family home"));
        assert!(!looks_like_address("   "));
    }

    #[test]
    fn accessors_skip_implausible_fields() {
        let data = json!({
            "fullAddress": "",
            "displayAddress": "Beautiful period conversion",
            "title": "Ladbroke Grove, London W11"
        });
        let picked = first_plausible_address(data.as_object().unwrap(), &PARTNER_ADDRESS_FIELDS);
        assert_eq!(picked, Some(("title", "Ladbroke Grove, London W11".to_string())));
    }

    #[test]
    fn accessors_prefer_full_address() {
        let data = json!({
            "fullAddress": "12 Blenheim Crescent, London",
            "displayAddress": "Blenheim Crescent, W11"
        });
        let picked = first_plausible_address(data.as_object().unwrap(), &PARTNER_ADDRESS_FIELDS);
        assert_eq!(picked.map(|p| p.0), Some("fullAddress"));
    }

    #[test]
    fn formats_london_registry_row() {
        let r = row(&[("paon", "6"), ("street", "whistler square"), ("postcode", "SW1W 8BT")]);
        assert_eq!(format_registry_address(&r), "6, Whistler Square, London, SW1W 8BT");
    }

    #[test]
    fn formats_non_london_row_and_skips_empty_parts() {
        let r = row(&[("paon", ""), ("saon", "FLAT 2"), ("street", "HIGH STREET"), ("postcode", "BS1 4DJ")]);
        assert_eq!(format_registry_address(&r), "FLAT 2, High Street, BS1 4DJ");

        let r = row(&[("street", "mill lane")]);
        assert_eq!(format_registry_address(&r), "Mill Lane");
    }

    #[test]
    fn london_prefix_check_uses_outward_part() {
        assert!(is_london_outcode("NW3 1AB"));
        assert!(is_london_outcode("e1 6an"));
        assert!(!is_london_outcode("BS1 4DJ"));
    }
}
