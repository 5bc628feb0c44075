//! End-to-end tests for the pure half of the ingest pipeline:
//! reconstruction -> parsing -> event mapping -> flow derivation.

use std::collections::HashMap;

use flowgate_core::aggregation::flows::{endpoint_specs, flow_rows};
use flowgate_core::ingest::parser::{normalize_to_event, parse_record};
use flowgate_core::{
    RecordReconstructor, canonical_firewall_key_import, canonical_firewall_key_syslog,
};
use flowgate_model::{FlowBasis, ViewKind};

#[test]
fn wrapped_bsd_record_parses_after_reconstruction() {
    let mut reconstructor = RecordReconstructor::new();
    assert!(
        reconstructor
            .feed_line(
                "<134>Feb 10 17:37:13 fw1 EFW: CONN: id=00600004 event=conn_open_natsat connsrcip=10.0.0.1",
            )
            .is_none()
    );
    assert!(
        reconstructor
            .feed_line("conndestip=10.0.0.2 connipproto=TCP conndestport=443")
            .is_none()
    );
    let record = reconstructor.flush().expect("one reconstructed record");

    let parsed = parse_record(&record);
    assert!(parsed.parse_status.is_ok());
    assert_eq!(parsed.device, "fw1");
    assert_eq!(parsed.record_id(), "00600004");

    let event = normalize_to_event(&parsed);
    assert_eq!(event.event_type.as_deref(), Some("conn_open_natsat"));
    assert_eq!(event.src_ip.as_deref(), Some("10.0.0.1"));
    assert_eq!(event.dest_ip.as_deref(), Some("10.0.0.2"));
    assert_eq!(event.proto.as_deref(), Some("TCP"));
    assert_eq!(event.dest_port, Some(443));
}

#[test]
fn incontrol_export_parses_with_nat_fields() {
    let line = "<1>1 2026-02-09T07:32:47Z host-uuid CONN : id=600004 event=conn_open_natsat \
                [conn [conn connsrcip=10.48.11.55 conndestip=20.242.39.171 connipproto=TCP \
                conndestport=443 connrecvif=lan conndestif=wan connnewsrcip=62.111.230.212 ]]";
    let parsed = parse_record(line);
    assert!(parsed.parse_status.is_ok());
    assert_eq!(parsed.device, "host-uuid");
    assert_eq!(
        parsed.extra.get("log_type").and_then(|v| v.as_str()),
        Some("CONN")
    );
    assert_eq!(parsed.record_id(), "600004");

    let mut event = normalize_to_event(&parsed);
    event.firewall_key = canonical_firewall_key_import(&parsed.device);
    assert_eq!(event.firewall_key, "host-uuid");
    assert_eq!(event.xlat_src_ip.as_deref(), Some("62.111.230.212"));

    // Interface basis survives; zone and side values are absent.
    let specs = endpoint_specs(&event);
    let ids: HashMap<_, _> = specs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.key(), i as i64 + 1))
        .collect();
    let rows = flow_rows(&event, &ids);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.identity.basis == FlowBasis::Interface));
    assert!(rows.iter().any(|r| r.identity.view_kind == ViewKind::Original));
    assert!(
        rows.iter()
            .any(|r| r.identity.view_kind == ViewKind::Translated)
    );
    let translated = rows
        .iter()
        .find(|r| r.identity.view_kind == ViewKind::Translated)
        .unwrap();
    let original = rows
        .iter()
        .find(|r| r.identity.view_kind == ViewKind::Original)
        .unwrap();
    // NAT source address lands on a different endpoint id.
    assert_ne!(
        translated.identity.src_endpoint_id,
        original.identity.src_endpoint_id
    );
    assert_eq!(
        translated.identity.dst_endpoint_id,
        original.identity.dst_endpoint_id
    );
}

#[test]
fn ha_member_keys_diverge_between_paths() {
    // The live path collapses HA members; imports keep raw names.
    assert_eq!(canonical_firewall_key_syslog("gw-x_Master"), "ha:gw-x");
    assert_eq!(canonical_firewall_key_syslog("gw-x_Slave"), "ha:gw-x");
    assert_eq!(canonical_firewall_key_import("gw-x_Master"), "gw-x_Master");
}

#[test]
fn parse_failures_still_produce_an_auditable_record() {
    // An InControl header with an impossible timestamp yields an error
    // record instead of a panic; the raw line can still be persisted.
    let parsed = parse_record("<1>1 2026-99-99T99:99:99Z host CONN : id=600004");
    assert!(!parsed.parse_status.is_ok());
    assert_eq!(parsed.device, "unknown");
    assert!(parsed.parse_error.is_some());
}
