//! Pure HA canonicalization: raw device name -> firewall key. No I/O.

pub const HA_PREFIX: &str = "ha:";
pub const HA_MASTER_SUFFIX: &str = "_Master";
pub const HA_SLAVE_SUFFIX: &str = "_Slave";

/// Return `(firewall_key, member)` for a raw device name.
///
/// `gw-foo_Master` / `gw-foo_Slave` collapse to `("ha:gw-foo", Some(raw))`;
/// a standalone device maps to `(raw, None)`. The key is what inventory,
/// endpoints, and flows group on; the member keeps the raw hostname for
/// display.
pub fn canonical_firewall_key(device_raw: &str) -> (String, Option<String>) {
    let d = device_raw.trim();
    if d.is_empty() {
        return (String::new(), None);
    }

    for suffix in [HA_MASTER_SUFFIX, HA_SLAVE_SUFFIX] {
        if let Some(base) = d.strip_suffix(suffix) {
            let base = base.trim();
            let key = if base.is_empty() {
                d.to_string()
            } else {
                format!("{HA_PREFIX}{base}")
            };
            return (key, Some(d.to_string()));
        }
    }
    (d.to_string(), None)
}

/// Canonical key for the live syslog path: `_Master`/`_Slave` -> `ha:<base>`.
pub fn canonical_firewall_key_syslog(device_raw: &str) -> String {
    canonical_firewall_key(device_raw).0
}

/// Canonical key for the import path: no HA collapsing. Import firewalls
/// are always single-node exports.
pub fn canonical_firewall_key_import(device_raw: &str) -> String {
    device_raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_and_slave_collapse_to_same_key() {
        assert_eq!(canonical_firewall_key_syslog("gw-x_Master"), "ha:gw-x");
        assert_eq!(canonical_firewall_key_syslog("gw-x_Slave"), "ha:gw-x");
    }

    #[test]
    fn standalone_device_keeps_its_name() {
        assert_eq!(canonical_firewall_key_syslog("fw1"), "fw1");
        let (key, member) = canonical_firewall_key("fw1");
        assert_eq!(key, "fw1");
        assert_eq!(member, None);
    }

    #[test]
    fn member_carries_raw_name() {
        let (key, member) = canonical_firewall_key("gw-mand_Slave");
        assert_eq!(key, "ha:gw-mand");
        assert_eq!(member.as_deref(), Some("gw-mand_Slave"));
    }

    #[test]
    fn import_variant_never_collapses() {
        assert_eq!(canonical_firewall_key_import("gw-x_Master"), "gw-x_Master");
        assert_eq!(canonical_firewall_key_import("  fw1  "), "fw1");
    }

    #[test]
    fn bare_suffix_falls_back_to_raw() {
        let (key, member) = canonical_firewall_key("_Master");
        assert_eq!(key, "_Master");
        assert_eq!(member.as_deref(), Some("_Master"));
    }

    #[test]
    fn empty_input_yields_empty_key() {
        assert_eq!(canonical_firewall_key_syslog("   "), "");
        assert_eq!(canonical_firewall_key_import(""), "");
    }
}
