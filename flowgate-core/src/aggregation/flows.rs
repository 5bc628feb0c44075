//! Per-event flow derivation: which endpoints an event references and which
//! flow rows it contributes to. Pure; the writer owns the actual upserts.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use flowgate_model::{FlowBasis, FlowIdentity, NewEvent, ViewKind};

/// Endpoint id lookup key: (firewall_key, ip, mac).
pub type EndpointKey = (String, String, Option<String>);

/// One endpoint an event needs to exist before its flows can be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub firewall_key: String,
    pub ip: String,
    pub mac: Option<String>,
    pub device_name: Option<String>,
}

impl EndpointSpec {
    pub fn key(&self) -> EndpointKey {
        (self.firewall_key.clone(), self.ip.clone(), self.mac.clone())
    }
}

/// One flow row contribution: identity plus the per-event merge payload.
#[derive(Debug, Clone)]
pub struct FlowUpsert {
    pub identity: FlowIdentity,
    pub event_ts: DateTime<Utc>,
    pub rule: Option<String>,
    pub app_name: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn event_firewall_key(event: &NewEvent) -> Option<String> {
    let key = if event.firewall_key.trim().is_empty() {
        event.device.trim()
    } else {
        event.firewall_key.trim()
    };
    (!key.is_empty()).then(|| key.to_string())
}

/// The up-to-four distinct endpoints referenced by a connection-open event:
/// original and translated source/destination. Translated sides fall back
/// to the original address when no NAT address is present.
pub fn endpoint_specs(event: &NewEvent) -> Vec<EndpointSpec> {
    if !event.is_open() {
        return Vec::new();
    }
    let Some(fk) = event_firewall_key(event) else {
        return Vec::new();
    };

    let src_mac = non_empty(&event.src_mac);
    let dest_mac = non_empty(&event.dest_mac);
    let src_name = non_empty(&event.src_device);
    let dest_name = non_empty(&event.dest_device);

    let candidates = [
        (non_empty(&event.src_ip), src_mac.clone(), src_name.clone()),
        (non_empty(&event.dest_ip), dest_mac.clone(), dest_name.clone()),
        (
            non_empty(&event.xlat_src_ip).or_else(|| non_empty(&event.src_ip)),
            src_mac,
            src_name,
        ),
        (
            non_empty(&event.xlat_dest_ip).or_else(|| non_empty(&event.dest_ip)),
            dest_mac,
            dest_name,
        ),
    ];

    let mut seen: Vec<(String, Option<String>)> = Vec::new();
    let mut specs = Vec::new();
    for (ip, mac, device_name) in candidates {
        let Some(ip) = ip else { continue };
        let dedup_key = (ip.clone(), mac.clone());
        if seen.contains(&dedup_key) {
            continue;
        }
        seen.push(dedup_key);
        specs.push(EndpointSpec {
            firewall_key: fk.clone(),
            ip,
            mac,
            device_name,
        });
    }
    specs
}

/// Derive the flow rows an event contributes: 3 bases x 2 views, dropping
/// combinations with an empty basis value or an unresolved endpoint id.
pub fn flow_rows(
    event: &NewEvent,
    endpoint_ids: &HashMap<EndpointKey, i64>,
) -> Vec<FlowUpsert> {
    if !event.is_open() {
        return Vec::new();
    }
    let Some(fk) = event_firewall_key(event) else {
        return Vec::new();
    };

    let ep_id = |ip: &Option<String>, mac: &Option<String>| -> Option<i64> {
        let ip = non_empty(ip)?;
        let key = (fk.clone(), ip, non_empty(mac));
        endpoint_ids.get(&key).copied()
    };

    let src_orig = ep_id(&event.src_ip, &event.src_mac);
    let dst_orig = ep_id(&event.dest_ip, &event.dest_mac);
    let xlat_src = non_empty(&event.xlat_src_ip).or_else(|| non_empty(&event.src_ip));
    let xlat_dst = non_empty(&event.xlat_dest_ip).or_else(|| non_empty(&event.dest_ip));
    let src_nat = ep_id(&xlat_src, &event.src_mac);
    let dst_nat = ep_id(&xlat_dst, &event.dest_mac);

    // Open events without both original endpoints contribute nothing.
    let (Some(src_orig), Some(dst_orig)) = (src_orig, dst_orig) else {
        return Vec::new();
    };

    let event_ts = event.ts_utc.unwrap_or_else(Utc::now);
    let proto = non_empty(&event.proto);
    let dest_port = event.dest_port;
    let rule = non_empty(&event.rule);
    let app_name = non_empty(&event.app_name);

    let bases = [
        (FlowBasis::Side, &event.recv_side, &event.dest_side),
        (FlowBasis::Zone, &event.recv_zone, &event.dest_zone),
        (FlowBasis::Interface, &event.recv_if, &event.dest_if),
    ];
    let views = [
        (ViewKind::Original, Some(src_orig), Some(dst_orig)),
        (ViewKind::Translated, src_nat, dst_nat),
    ];

    let mut rows = Vec::new();
    for (view_kind, sid, did) in views {
        let (Some(sid), Some(did)) = (sid, did) else {
            continue;
        };
        for (basis, from, to) in &bases {
            let (Some(from_value), Some(to_value)) = (non_empty(from), non_empty(to)) else {
                continue;
            };
            rows.push(FlowUpsert {
                identity: FlowIdentity {
                    device: fk.clone(),
                    basis: *basis,
                    from_value,
                    to_value,
                    proto: proto.clone(),
                    dest_port,
                    src_endpoint_id: sid,
                    dst_endpoint_id: did,
                    view_kind,
                },
                event_ts,
                rule: rule.clone(),
                app_name: app_name.clone(),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_event() -> NewEvent {
        NewEvent {
            ts_utc: Some(Utc::now()),
            device: "fw1".into(),
            firewall_key: "fw1".into(),
            event_type: Some("conn_open_natsat".into()),
            proto: Some("TCP".into()),
            recv_if: Some("lan".into()),
            recv_zone: Some("trust".into()),
            recv_side: Some("inside".into()),
            src_ip: Some("10.0.0.1".into()),
            src_mac: Some("AA-BB-CC-DD-EE-FF".into()),
            dest_if: Some("wan".into()),
            dest_zone: Some("untrust".into()),
            dest_side: Some("outside".into()),
            dest_ip: Some("20.0.0.2".into()),
            dest_port: Some(443),
            xlat_src_ip: Some("62.1.1.1".into()),
            rule: Some("allow_out".into()),
            app_name: Some("tls".into()),
            ..Default::default()
        }
    }

    fn ids_for(specs: &[EndpointSpec]) -> HashMap<EndpointKey, i64> {
        specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.key(), i as i64 + 1))
            .collect()
    }

    #[test]
    fn close_events_contribute_nothing() {
        let mut event = open_event();
        event.event_type = Some("conn_close".into());
        assert!(endpoint_specs(&event).is_empty());
        assert!(flow_rows(&event, &HashMap::new()).is_empty());
    }

    #[test]
    fn endpoint_specs_cover_original_and_translated() {
        let event = open_event();
        let specs = endpoint_specs(&event);
        // src, dst, xlat-src; xlat-dst falls back to dest and dedups away
        assert_eq!(specs.len(), 3);
        assert!(specs.iter().any(|s| s.ip == "10.0.0.1"));
        assert!(specs.iter().any(|s| s.ip == "20.0.0.2"));
        assert!(specs.iter().any(|s| s.ip == "62.1.1.1"));
    }

    #[test]
    fn full_event_yields_six_flow_rows() {
        let event = open_event();
        let ids = ids_for(&endpoint_specs(&event));
        let rows = flow_rows(&event, &ids);
        assert_eq!(rows.len(), 6);

        let originals: Vec<_> = rows
            .iter()
            .filter(|r| r.identity.view_kind == ViewKind::Original)
            .collect();
        assert_eq!(originals.len(), 3);
        for basis in FlowBasis::ALL {
            assert!(originals.iter().any(|r| r.identity.basis == basis));
        }

        let side = rows
            .iter()
            .find(|r| {
                r.identity.basis == FlowBasis::Side
                    && r.identity.view_kind == ViewKind::Original
            })
            .unwrap();
        assert_eq!(side.identity.from_value, "inside");
        assert_eq!(side.identity.to_value, "outside");
        assert_eq!(side.identity.dest_port, Some(443));
        assert_eq!(side.rule.as_deref(), Some("allow_out"));
    }

    #[test]
    fn empty_basis_values_drop_those_rows() {
        let mut event = open_event();
        event.recv_zone = None;
        event.dest_zone = Some("".into());
        let ids = ids_for(&endpoint_specs(&event));
        let rows = flow_rows(&event, &ids);
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.identity.basis != FlowBasis::Zone));
    }

    #[test]
    fn missing_original_endpoint_skips_event() {
        let event = open_event();
        // No ids resolved at all
        assert!(flow_rows(&event, &HashMap::new()).is_empty());
    }

    #[test]
    fn translated_view_reuses_original_when_no_nat() {
        let mut event = open_event();
        event.xlat_src_ip = None;
        let specs = endpoint_specs(&event);
        assert_eq!(specs.len(), 2);
        let ids = ids_for(&specs);
        let rows = flow_rows(&event, &ids);
        assert_eq!(rows.len(), 6);
        let translated: Vec<_> = rows
            .iter()
            .filter(|r| r.identity.view_kind == ViewKind::Translated)
            .collect();
        // Same endpoint ids as the original view
        assert!(translated
            .iter()
            .all(|r| r.identity.src_endpoint_id == 1 && r.identity.dst_endpoint_id == 2));
    }

    #[test]
    fn firewall_key_falls_back_to_device() {
        let mut event = open_event();
        event.firewall_key = String::new();
        let specs = endpoint_specs(&event);
        assert!(specs.iter().all(|s| s.firewall_key == "fw1"));
    }
}
