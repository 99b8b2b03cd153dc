/*!
Canonicalization of vendor interface-name spellings.

`Gi0/1`, `gi0/1` and `GigabitEthernet0/1` all describe the same port; the
neighbor side of an LLDP report frequently uses a different spelling than
the local side, so link keys are always built from the canonical form.
*/

use once_cell::sync::Lazy;

/// Substitution pairs sorted longest-spelling-first. Applying in that order
/// keeps `tengigabitethernet` from being clipped by the `gigabitethernet`
/// rule into `tengi`.
pub fn ordered_substitutions(table: &[(String, String)]) -> Vec<(String, String)> {
    let mut ordered = table.to_vec();
    ordered.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    ordered
}

static DEFAULT_SUBSTITUTIONS: Lazy<Vec<(String, String)>> =
    Lazy::new(|| ordered_substitutions(&crate::config::Config::default().port_substitutions));

/// Canonicalizes a raw interface name: trim, lowercase, vendor substitutions.
///
/// Total and deterministic; an unrecognized spelling passes through trimmed
/// and lowercased. An empty name canonicalizes to `unknown` so that links
/// whose remote port was not reported still get a stable key.
pub fn normalize_port(table: &[(String, String)], raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    let mut port = trimmed.to_ascii_lowercase();
    for (pattern, replacement) in table {
        if port.contains(pattern.as_str()) {
            port = port.replace(pattern.as_str(), replacement);
        }
    }
    port
}

/// `normalize_port` with the built-in substitution table.
pub fn normalize_port_default(raw: &str) -> String {
    normalize_port(&DEFAULT_SUBSTITUTIONS, raw)
}

mod tests {
    #[allow(unused_imports)]
    use super::*;

    #[test]
    fn test_short_and_long_spellings_collapse() {
        assert_eq!(normalize_port_default("Gi0/1"), "gi0/1");
        assert_eq!(normalize_port_default("GigabitEthernet0/1"), "gi0/1");
        assert_eq!(normalize_port_default("TenGigabitEthernet1/0/48"), "te1/0/48");
        assert_eq!(normalize_port_default("FastEthernet0/24"), "fa0/24");
        assert_eq!(normalize_port_default("Port-Channel12"), "po12");
        assert_eq!(normalize_port_default("Ethernet1/1"), "et1/1");
    }

    #[test]
    fn test_unknown_formats_pass_through_lowercased() {
        assert_eq!(normalize_port_default("  xe-0/0/3 "), "xe-0/0/3");
        assert_eq!(normalize_port_default("MGMT0"), "mgmt0");
    }

    #[test]
    fn test_empty_name_is_stable() {
        assert_eq!(normalize_port_default(""), "unknown");
        assert_eq!(normalize_port_default("   "), "unknown");
    }

    #[test]
    fn test_idempotence() {
        for raw in [
            "GigabitEthernet0/1",
            "TenGigabitEthernet1/0/48",
            "HundredGigabitEthernet0/0/0",
            "po1",
            "",
            "weird port 9",
        ] {
            let once = normalize_port_default(raw);
            assert_eq!(normalize_port_default(&once), once, "raw = {raw:?}");
        }
    }
}
