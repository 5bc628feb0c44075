//! Multi-dialect syslog record parsing.
//!
//! Four wire dialects are recognized, tried in this order:
//! 1. InControl RFC 5424 export with structured data blocks
//! 2. RFC 5424 classic (`1 ISO-TS HOST EFW - - - EVENTTYPE: kv...`)
//! 3. Bracket relay format (`[YYYY-MM-DD HH:MM:SS] EFW: EVENTTYPE: kv...`)
//! 4. BSD (`Mon DD HH:MM:SS host EFW: EVENTTYPE: kv...`, year inferred)

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use tracing::error;

use flowgate_model::NewEvent;

// BSD-style: optional <priority> then "Feb 10 17:37:13 hostname [optional] EFW: EVENTTYPE:"
pub static SYSLOG_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:<\d+>\s*)?(?P<month>[A-Z][a-z]{2})\s+(?P<day>\d{1,2})\s+(?P<time>\d{2}:\d{2}:\d{2})\s+(?P<host>\S+)(?:\s+\[[^\]]+\])?\s+EFW:\s+[A-Z][A-Z0-9_]*:\s+",
    )
    .unwrap()
});

// Device/relay format: "<priority>[YYYY-MM-DD HH:MM:SS] EFW: EVENTTYPE:" (no BSD header)
pub static SYSLOG_PREFIX_ALT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:<\d+>\s*)?\[(?P<year>\d{4})-(?P<month>\d{1,2})-(?P<day>\d{1,2})\s+(?P<time>\d{2}:\d{2}:\d{2})\]\s+EFW:\s+[A-Z][A-Z0-9_]*:\s+",
    )
    .unwrap()
});

// RFC 5424: "<priority>1 ISO-TIMESTAMP HOSTNAME EFW - - - EVENTTYPE: kv..."
pub static SYSLOG_PREFIX_RFC5424_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:<\d+>\s*)?1\s+(?P<timestamp>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2}))\s+(?P<host>\S+)\s+EFW\s+(?:-\s+){3}[A-Z][A-Z0-9_]*:\s+",
    )
    .unwrap()
});

// InControl export: "<PRI>VERSION TIMESTAMP HOST APP-NAME : id=... event=... [structured data]"
// e.g. <1>1 2026-02-09T07:32:47Z 15c8cb06-... CONN : id=600004 event=conn_open_natsat [message=...]
pub static INCONTROL_RFC5424_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)^<\d+>\d\s+(?P<timestamp>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2}))\s+(?P<host>\S+)\s+(?P<app>[A-Z_]+)\s*:\s*(?P<msg>.*)$",
    )
    .unwrap()
});

// key=value where the value is "quoted" (may contain spaces) or an unquoted
// non-space token. Applied to the full rest-of-line string, not per-token.
static KV_PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?P<key>\w+)=(?:"(?P<qval>[^"]*)"|(?P<uval>\S+))"#).unwrap());

static LEADING_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)").unwrap());

/// Keys whose values are coerced to integers by leading-digit extraction.
const INT_FIELDS: &[&str] = &[
    "prio",
    "rev",
    "origsent",
    "termsent",
    "conntime",
    "score",
    "iprep_src_score",
    "iprep_dest_score",
    "connsrcport",
    "conndestport",
    "connnewsrcport",
    "connnewdestport",
    "devicerank",
];

/// Record ids accepted for processing: CONN (0060, 60) and DEVICE (0890, 89).
/// InControl exports drop the zero padding (600004, 890001).
pub const ACCEPTED_ID_PREFIXES: &[&str] = &["0060", "60", "0890", "89"];

const DEVICE_ID_PREFIXES: &[&str] = &["0890", "89"];
const CONN_ID_PREFIXES: &[&str] = &["0060", "60"];

/// Parsed key/value payload entry: text, or an integer for allowlisted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KvValue {
    Int(i64),
    Text(String),
}

impl KvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KvValue::Text(s) => Some(s),
            KvValue::Int(_) => None,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            KvValue::Text(s) => s.clone(),
            KvValue::Int(i) => i.to_string(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KvValue::Int(i) => Some(*i),
            KvValue::Text(s) => s.parse().ok(),
        }
    }
}

pub type KvMap = HashMap<String, KvValue>;

/// One record after dialect discrimination and key/value extraction.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub ts_utc: DateTime<Utc>,
    pub device: String,
    pub kv: KvMap,
    pub extra: Map<String, Value>,
    pub parse_status: flowgate_model::ParseStatus,
    pub parse_error: Option<String>,
}

impl ParsedRecord {
    fn error(message: String) -> Self {
        ParsedRecord {
            ts_utc: Utc::now(),
            device: "unknown".to_string(),
            kv: KvMap::new(),
            extra: Map::new(),
            parse_status: flowgate_model::ParseStatus::Error,
            parse_error: Some(message),
        }
    }

    /// Record id as text; empty when the record carries none.
    pub fn record_id(&self) -> String {
        self.kv.get("id").map(KvValue::to_text).unwrap_or_default()
    }

    /// True when the id passes the CONN/DEVICE family filter.
    pub fn is_accepted_id(&self) -> bool {
        let id = self.record_id();
        id.is_empty() || ACCEPTED_ID_PREFIXES.iter().any(|p| id.starts_with(p))
    }

    pub fn is_device_record(&self) -> bool {
        let id = self.record_id();
        DEVICE_ID_PREFIXES.iter().any(|p| id.starts_with(p))
    }

    pub fn is_conn_record(&self) -> bool {
        let id = self.record_id();
        CONN_ID_PREFIXES.iter().any(|p| id.starts_with(p))
    }
}

/// Normalize a MAC address to uppercase hyphen-separated AA-BB-CC-DD-EE-FF.
///
/// Accepts colon-separated, hyphen-separated, dot-separated, and bare hex.
/// Invalid input falls back to the uppercased original with colons mapped
/// to hyphens. Idempotent.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned: String = mac
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.len() != 12 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        // Not a valid 6-byte MAC; keep the stripped/uppercased form.
        let fallback = mac.trim().to_uppercase().replace(':', "-");
        return (!fallback.is_empty()).then_some(fallback);
    }
    let pairs: Vec<String> = cleaned
        .as_bytes()
        .chunks(2)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect();
    Some(pairs.join("-"))
}

/// Parse an ISO 8601 timestamp (with `Z`, `±HH:MM`, or no offset) to UTC.
fn parse_iso_timestamp(ts_str: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts_str) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Naive ISO without offset: assume UTC.
    NaiveDateTime::parse_from_str(ts_str, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(ts_str, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| format!("invalid timestamp {ts_str:?}: {e}"))
}

fn month_number(name: &str) -> u32 {
    match name {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => 1,
    }
}

fn datetime_from_parts(
    year: i32,
    month: u32,
    day: u32,
    time: &str,
) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| format!("invalid date {year:04}-{month:02}-{day:02}"))?;
    let naive = NaiveDateTime::new(
        date,
        chrono::NaiveTime::parse_from_str(time, "%H:%M:%S")
            .map_err(|e| format!("invalid time {time:?}: {e}"))?,
    );
    Ok(Utc.from_utc_datetime(&naive))
}

/// Parse leading digits as an integer, ignoring trailing junk.
fn coerce_int(value: &str) -> Option<i64> {
    LEADING_DIGITS_RE
        .captures(value)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse key=value pairs from a string; values may be quoted. INT_FIELDS
/// are coerced; a coercion miss keeps the text value.
fn parse_kv_from_str(segment: &str) -> KvMap {
    let mut out = KvMap::new();
    for caps in KV_PAIR_RE.captures_iter(segment) {
        let key = caps.name("key").map(|m| m.as_str()).unwrap_or_default();
        let raw_val = caps
            .name("qval")
            .or_else(|| caps.name("uval"))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let val = if INT_FIELDS.contains(&key) {
            match coerce_int(raw_val) {
                Some(iv) => KvValue::Int(iv),
                None => KvValue::Text(raw_val.to_string()),
            }
        } else {
            KvValue::Text(raw_val.to_string())
        };
        out.insert(key.to_string(), val);
    }
    out
}

/// Extract the interior of every matching `[ ]` pair, including nested ones.
fn extract_bracket_inner_parts(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut depth = 1usize;
            let mut j = i + 1;
            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    b'[' => depth += 1,
                    b']' => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            if depth == 0 {
                let inner = &s[i + 1..j - 1];
                parts.push(inner.to_string());
                parts.extend(extract_bracket_inner_parts(inner));
            }
            i = j;
        } else {
            i += 1;
        }
    }
    parts
}

/// Parse an InControl MSG: the id=/event= prefix plus key=value pairs from
/// every bracket block. Flattened; later writes win (the outermost
/// re-declaration carries the post-NAT state).
fn parse_incontrol_message(msg: &str) -> KvMap {
    let (prefix, rest) = match msg.find('[') {
        Some(pos) => (&msg[..pos], &msg[pos..]),
        None => (msg, ""),
    };
    let mut all_kv = parse_kv_from_str(prefix.trim());
    for part in extract_bracket_inner_parts(rest) {
        for (key, val) in parse_kv_from_str(&part) {
            all_kv.insert(key, val);
        }
    }
    all_kv
}

/// Lowercase enum-like values and alias srcuser -> srcusername.
fn normalize_kv(kv: &mut KvMap) {
    for key in ["conn", "action", "event"] {
        let lowered = match kv.get(key) {
            Some(KvValue::Text(v)) if !v.is_empty() => Some(v.trim().to_lowercase()),
            _ => None,
        };
        if let Some(lowered) = lowered {
            kv.insert(key.to_string(), KvValue::Text(lowered));
        }
    }
    if kv.contains_key("srcuser") && !kv.contains_key("srcusername") {
        if let Some(v) = kv.get("srcuser").cloned() {
            kv.insert("srcusername".to_string(), v);
        }
    }
    // Keep the id textual so leading zeros survive filtering.
    let id_text = kv.get("id").map(KvValue::to_text);
    if let Some(text) = id_text {
        kv.insert("id".to_string(), KvValue::Text(text));
    }
}

/// Parse an InControl RFC 5424 export line; `None` if the line is not this
/// dialect.
fn parse_record_incontrol(raw: &str) -> Option<ParsedRecord> {
    let caps = INCONTROL_RFC5424_RE.captures(raw)?;
    let ts_str = caps.name("timestamp").map(|m| m.as_str()).unwrap_or("");
    let host = caps
        .name("host")
        .map(|m| m.as_str().trim())
        .filter(|h| !h.is_empty())
        .unwrap_or("unknown");
    let app_name = caps.name("app").map(|m| m.as_str().trim()).unwrap_or("");
    let msg = caps.name("msg").map(|m| m.as_str()).unwrap_or("");

    let dt = match parse_iso_timestamp(ts_str) {
        Ok(dt) => dt,
        Err(e) => {
            error!(error = %e, "InControl parse failed");
            return Some(ParsedRecord::error(e));
        }
    };
    let mut kv = parse_incontrol_message(msg);
    normalize_kv(&mut kv);

    let mut extra = Map::new();
    extra.insert("log_type".to_string(), json!(app_name));

    Some(ParsedRecord {
        ts_utc: dt,
        device: host.to_string(),
        kv,
        extra,
        parse_status: flowgate_model::ParseStatus::Ok,
        parse_error: None,
    })
}

/// Parse the syslog header, returning (ts_utc, device, rest-after-header).
///
/// Tries RFC 5424 first, then the bracket format, then BSD. An unmatched
/// header falls back to now(UTC) + "unknown" with the whole record as rest.
fn parse_syslog_header(record: &str) -> Result<(DateTime<Utc>, String, String), String> {
    if let Some(caps) = SYSLOG_PREFIX_RFC5424_RE.captures(record) {
        let ts_str = caps.name("timestamp").map(|m| m.as_str()).unwrap_or("");
        let host = caps
            .name("host")
            .map(|m| m.as_str().trim())
            .filter(|h| !h.is_empty())
            .unwrap_or("unknown");
        let dt = parse_iso_timestamp(ts_str)?;
        let rest = record[caps.get(0).map(|m| m.end()).unwrap_or(0)..].to_string();
        return Ok((dt, host.to_string(), rest));
    }

    if let Some(caps) = SYSLOG_PREFIX_ALT_RE.captures(record) {
        let year: i32 = caps["year"].parse().map_err(|_| "bad year")?;
        let month: u32 = caps["month"].parse().map_err(|_| "bad month")?;
        let day: u32 = caps["day"].parse().map_err(|_| "bad day")?;
        let dt = datetime_from_parts(year, month, day, &caps["time"])?;
        let rest = record[caps.get(0).map(|m| m.end()).unwrap_or(0)..].to_string();
        return Ok((dt, "unknown".to_string(), rest));
    }

    if let Some(caps) = SYSLOG_PREFIX_RE.captures(record) {
        let month = month_number(&caps["month"]);
        let day: u32 = caps["day"].parse().map_err(|_| "bad day")?;
        let host = caps
            .name("host")
            .map(|m| m.as_str().trim())
            .filter(|h| !h.is_empty())
            .unwrap_or("unknown");
        // BSD timestamps carry no year; assume the current UTC year.
        let year = Utc::now().year();
        let dt = datetime_from_parts(year, month, day, &caps["time"])?;
        let rest = record[caps.get(0).map(|m| m.end()).unwrap_or(0)..].to_string();
        return Ok((dt, host.to_string(), rest));
    }

    Ok((Utc::now(), "unknown".to_string(), record.to_string()))
}

/// Parse one reconstructed record. Never panics; failures come back as a
/// record with `parse_status = error` so the raw line still gets audited.
pub fn parse_record(raw: &str) -> ParsedRecord {
    if let Some(parsed) = parse_record_incontrol(raw) {
        return parsed;
    }
    match parse_syslog_header(raw) {
        Ok((ts_utc, device, rest)) => {
            let mut kv = parse_kv_from_str(&rest);
            normalize_kv(&mut kv);
            ParsedRecord {
                ts_utc,
                device,
                kv,
                extra: Map::new(),
                parse_status: flowgate_model::ParseStatus::Ok,
                parse_error: None,
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to parse record");
            ParsedRecord::error(e)
        }
    }
}

fn kv_str(kv: &KvMap, key: &str) -> Option<String> {
    kv.get(key).map(KvValue::to_text)
}

fn kv_str_nonempty(kv: &KvMap, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| kv_str(kv, k))
        .find(|v| !v.trim().is_empty())
}

fn kv_int(kv: &KvMap, key: &str) -> Option<i64> {
    kv.get(key).and_then(KvValue::as_int)
}

fn kv_int_any(kv: &KvMap, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| kv_int(kv, k))
}

/// Keys the event mapping consumes; everything else lands in extra.unmapped.
const MAPPED_KEYS: &[&str] = &[
    "event",
    "action",
    "rule",
    "satsrcrule",
    "satdestrule",
    "srcusername",
    "destusername",
    "connipproto",
    "connrecvif",
    "connrecvzone",
    "connsrcip",
    "connsrcport",
    "connsrcmac",
    "connsrcdevice",
    "conndestif",
    "conndestzone",
    "conndestip",
    "conndestport",
    "conndestmac",
    "conndestdevice",
    "connnewsrcip",
    "connnewsrcport",
    "connnewdestip",
    "connnewdestport",
    "origsent",
    "termsent",
    "conntime",
    "app_name",
    "app_risk",
    "app_family",
    "ip",
    "score",
    "categories",
    "iprep_src",
    "iprep_dest",
    "iprep_src_score",
    "iprep_dest_score",
];

/// Map a successfully parsed CONN record to an event row. Unmapped keys are
/// preserved under `extra.unmapped`; the caller supplies the canonical
/// firewall key and HA member afterwards.
pub fn normalize_to_event(parsed: &ParsedRecord) -> NewEvent {
    let kv = &parsed.kv;

    let mut extra = parsed.extra.clone();
    let unmapped: Map<String, Value> = kv
        .iter()
        .filter(|(k, _)| !MAPPED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| {
            let value = match v {
                KvValue::Int(i) => json!(i),
                KvValue::Text(s) => json!(s),
            };
            (k.clone(), value)
        })
        .collect();
    if !unmapped.is_empty() {
        extra.insert("unmapped".to_string(), Value::Object(unmapped));
    }

    NewEvent {
        ts_utc: Some(parsed.ts_utc),
        device: parsed.device.clone(),
        device_member: None,
        firewall_key: String::new(),
        event_type: kv_str(kv, "event"),
        action: kv_str(kv, "action"),
        rule: kv_str(kv, "rule"),
        satsrcrule: kv_str(kv, "satsrcrule"),
        satdestrule: kv_str(kv, "satdestrule"),
        srcusername: kv_str_nonempty(kv, &["srcusername", "srcuser"]),
        destusername: kv_str(kv, "destusername"),
        proto: kv_str(kv, "connipproto"),
        recv_if: kv_str(kv, "connrecvif"),
        recv_zone: kv_str(kv, "connrecvzone"),
        src_ip: kv_str(kv, "connsrcip"),
        src_port: kv_int(kv, "connsrcport").map(|v| v as i32),
        src_mac: kv_str(kv, "connsrcmac").and_then(|m| normalize_mac(&m)),
        src_device: kv_str(kv, "connsrcdevice"),
        dest_if: kv_str(kv, "conndestif"),
        dest_zone: kv_str(kv, "conndestzone"),
        dest_ip: kv_str(kv, "conndestip"),
        dest_port: kv_int(kv, "conndestport").map(|v| v as i32),
        dest_mac: kv_str(kv, "conndestmac").and_then(|m| normalize_mac(&m)),
        dest_device: kv_str(kv, "conndestdevice"),
        xlat_src_ip: kv_str(kv, "connnewsrcip"),
        xlat_src_port: kv_int(kv, "connnewsrcport").map(|v| v as i32),
        xlat_dest_ip: kv_str(kv, "connnewdestip"),
        xlat_dest_port: kv_int(kv, "connnewdestport").map(|v| v as i32),
        bytes_orig: kv_int(kv, "origsent"),
        bytes_term: kv_int(kv, "termsent"),
        duration_s: kv_int(kv, "conntime"),
        app_name: kv_str(kv, "app_name"),
        app_risk: kv_str(kv, "app_risk"),
        app_family: kv_str(kv, "app_family"),
        iprep_ip: kv_str(kv, "ip"),
        iprep_score: kv_int(kv, "score").map(|v| v as i32),
        iprep_categories: kv_str(kv, "categories"),
        iprep_src: kv_str(kv, "iprep_src"),
        iprep_dest: kv_str(kv, "iprep_dest"),
        iprep_src_score: kv_int(kv, "iprep_src_score").map(|v| v as i32),
        iprep_dest_score: kv_int(kv, "iprep_dest_score").map(|v| v as i32),
        recv_side: None,
        dest_side: None,
        direction_bucket: None,
        extra_json: Value::Object(extra),
    }
}

/// Fingerprint fields carried by a DEVICE record, accepting both the
/// underscore and the squashed key spellings.
pub fn device_fields_from_kv(kv: &KvMap) -> flowgate_model::DeviceFields {
    flowgate_model::DeviceFields {
        hostname: kv_str_nonempty(kv, &["hostname"]),
        if_name: kv_str_nonempty(kv, &["if"]),
        zone: kv_str_nonempty(kv, &["zone"]),
        device_ip4: kv_str_nonempty(kv, &["device_ip4", "deviceip4"]),
        device_ip6: kv_str_nonempty(kv, &["device_ip6", "deviceip6"]),
        device_vendor: kv_str_nonempty(kv, &["device_vendor", "devicevendor"]),
        device_type: kv_str_nonempty(kv, &["device_type", "devicetype"]),
        device_type_name: kv_str_nonempty(kv, &["device_type_name", "devicetypename"]),
        device_type_group_name: kv_str_nonempty(
            kv,
            &["device_type_group_name", "devicetypegroupname"],
        ),
        device_os_name: kv_str_nonempty(kv, &["device_os_name", "deviceosname"]),
        device_brand: kv_str_nonempty(kv, &["device_brand", "devicebrand"]),
        device_model: kv_str_nonempty(kv, &["device_model", "devicemodel"]),
        device_rank: kv_int_any(kv, &["device_rank", "devicerank"]).map(|v| v as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const SAMPLE_CONN_LINE: &str = concat!(
        "<1>1 2026-02-09T07:32:47Z 15c8cb06-465b-48b2-b7f7-b6c206e749dc CONN : ",
        "id=600004 event=conn_open_natsat ",
        "[message=Connection opened connrecvzone=\"\" conndestzone=\"\" ]",
        "[conn [conn connsrcip=10.48.11.55 conndestip=20.242.39.171 connipproto=TCP ",
        "conndestport=443 connrecvif=lan conndestif=wan connnewsrcip=62.111.230.212 ]]",
    );

    #[test]
    fn incontrol_dialect_takes_precedence() {
        let parsed = parse_record(SAMPLE_CONN_LINE);
        assert!(parsed.parse_status.is_ok());
        assert_eq!(parsed.device, "15c8cb06-465b-48b2-b7f7-b6c206e749dc");
        assert_eq!(parsed.extra.get("log_type"), Some(&json!("CONN")));
        assert_eq!(parsed.record_id(), "600004");
        assert_eq!(
            parsed.kv.get("event"),
            Some(&KvValue::Text("conn_open_natsat".into()))
        );
        assert_eq!(
            parsed.kv.get("connsrcip"),
            Some(&KvValue::Text("10.48.11.55".into()))
        );
        assert_eq!(
            parsed.kv.get("connnewsrcip"),
            Some(&KvValue::Text("62.111.230.212".into()))
        );
        assert_eq!(parsed.kv.get("conndestport"), Some(&KvValue::Int(443)));
    }

    #[test]
    fn incontrol_regex_rejects_classic_bsd() {
        let classic = "<134>Feb 10 17:37:13 myfw EFW: CONN: id=00600004 event=conn_open";
        assert!(INCONTROL_RFC5424_RE.captures(classic).is_none());
    }

    #[test]
    fn bsd_dialect_parses_with_current_year() {
        let line = "<134>Feb 10 17:37:13 fw1 EFW: CONN: id=00600004 event=conn_open_natsat connsrcip=10.0.0.1";
        let parsed = parse_record(line);
        assert!(parsed.parse_status.is_ok());
        assert_eq!(parsed.device, "fw1");
        assert_eq!(parsed.ts_utc.year(), Utc::now().year());
        assert_eq!(parsed.ts_utc.month(), 2);
        assert_eq!(parsed.ts_utc.day(), 10);
        assert_eq!(parsed.record_id(), "00600004");
    }

    #[test]
    fn bracket_dialect_has_no_hostname() {
        let line = "<134>[2026-02-10 17:37:13] EFW: CONN: id=00600010 event=conn_close";
        let parsed = parse_record(line);
        assert!(parsed.parse_status.is_ok());
        assert_eq!(parsed.device, "unknown");
        assert_eq!(parsed.ts_utc.year(), 2026);
        assert_eq!(
            parsed.kv.get("event"),
            Some(&KvValue::Text("conn_close".into()))
        );
    }

    #[test]
    fn rfc5424_classic_dialect() {
        let line = "<134>1 2026-02-10T18:57:45.970+01:00 gw-x_Master EFW - - - CONN: id=00600004 event=conn_open origsent=1234abc";
        let parsed = parse_record(line);
        assert!(parsed.parse_status.is_ok());
        assert_eq!(parsed.device, "gw-x_Master");
        // +01:00 offset normalizes to UTC
        assert_eq!(parsed.ts_utc.hour(), 17);
        assert_eq!(parsed.kv.get("origsent"), Some(&KvValue::Int(1234)));
    }

    #[test]
    fn quoted_values_keep_spaces() {
        let kv = parse_kv_from_str(r#"rule="Allow All Out" action=allow"#);
        assert_eq!(
            kv.get("rule"),
            Some(&KvValue::Text("Allow All Out".into()))
        );
        assert_eq!(kv.get("action"), Some(&KvValue::Text("allow".into())));
    }

    #[test]
    fn int_coercion_takes_leading_digits() {
        assert_eq!(coerce_int("1234abc"), Some(1234));
        assert_eq!(coerce_int("abc"), None);
        let kv = parse_kv_from_str("conntime=42s connsrcport=9999");
        assert_eq!(kv.get("conntime"), Some(&KvValue::Int(42)));
        assert_eq!(kv.get("connsrcport"), Some(&KvValue::Int(9999)));
    }

    #[test]
    fn bracket_inner_parts_include_nested() {
        let parts = extract_bracket_inner_parts("a [b [c x=1 ] d=2 ] e");
        assert!(parts.iter().any(|p| p == "b [c x=1 ] d=2 "));
        assert!(parts.iter().any(|p| p == "c x=1 "));
    }

    #[test]
    fn incontrol_nested_redeclaration_last_wins() {
        let msg = "id=600004 event=conn_open [conn connsrcip=10.0.0.1 ][conn connsrcip=62.1.1.1 ]";
        let kv = parse_incontrol_message(msg);
        assert_eq!(
            kv.get("connsrcip"),
            Some(&KvValue::Text("62.1.1.1".into()))
        );
    }

    #[test]
    fn srcuser_aliases_to_srcusername() {
        let line = "<134>Feb 10 17:37:13 fw1 EFW: CONN: id=00600004 srcuser=alice";
        let parsed = parse_record(line);
        assert_eq!(
            parsed.kv.get("srcusername"),
            Some(&KvValue::Text("alice".into()))
        );
    }

    #[test]
    fn enum_values_lowercased() {
        let line = "<134>Feb 10 17:37:13 fw1 EFW: CONN: id=00600004 event=CONN_OPEN action=Allow";
        let parsed = parse_record(line);
        assert_eq!(
            parsed.kv.get("event"),
            Some(&KvValue::Text("conn_open".into()))
        );
        assert_eq!(
            parsed.kv.get("action"),
            Some(&KvValue::Text("allow".into()))
        );
    }

    #[test]
    fn unmatched_header_falls_back_to_unknown() {
        let parsed = parse_record("garbage without any header id=00600004");
        assert!(parsed.parse_status.is_ok());
        assert_eq!(parsed.device, "unknown");
        assert_eq!(parsed.record_id(), "00600004");
    }

    #[test]
    fn normalize_mac_formats() {
        assert_eq!(
            normalize_mac("aa:bb:cc:dd:ee:ff").as_deref(),
            Some("AA-BB-CC-DD-EE-FF")
        );
        assert_eq!(
            normalize_mac("aabb.ccdd.eeff").as_deref(),
            Some("AA-BB-CC-DD-EE-FF")
        );
        assert_eq!(
            normalize_mac("aabbccddeeff").as_deref(),
            Some("AA-BB-CC-DD-EE-FF")
        );
        assert_eq!(normalize_mac(""), None);
        // Invalid MACs keep an uppercased colon-to-hyphen fallback
        assert_eq!(normalize_mac("not:a:mac").as_deref(), Some("NOT-A-MAC"));
    }

    #[test]
    fn normalize_mac_is_idempotent() {
        for input in ["aa:bb:cc:dd:ee:ff", "AABBCCDDEEFF", "not:a:mac", "junk"] {
            let once = normalize_mac(input).unwrap();
            let twice = normalize_mac(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn id_filter_accepts_conn_and_device_families() {
        for id in ["00600004", "600004", "08900001", "890001"] {
            let mut rec = parse_record("garbage");
            rec.kv
                .insert("id".into(), KvValue::Text(id.to_string()));
            assert!(rec.is_accepted_id(), "{id} should be accepted");
        }
        let mut rec = parse_record("garbage");
        rec.kv.insert("id".into(), KvValue::Text("200001".into()));
        assert!(!rec.is_accepted_id());
    }

    #[test]
    fn event_mapping_covers_tuple_and_extra() {
        let parsed = parse_record(SAMPLE_CONN_LINE);
        let event = normalize_to_event(&parsed);
        assert_eq!(event.event_type.as_deref(), Some("conn_open_natsat"));
        assert_eq!(event.src_ip.as_deref(), Some("10.48.11.55"));
        assert_eq!(event.dest_ip.as_deref(), Some("20.242.39.171"));
        assert_eq!(event.dest_port, Some(443));
        assert_eq!(event.proto.as_deref(), Some("TCP"));
        assert_eq!(event.recv_if.as_deref(), Some("lan"));
        assert_eq!(event.xlat_src_ip.as_deref(), Some("62.111.230.212"));
        // id is not a mapped key, so it survives in extra.unmapped
        let unmapped = event
            .extra_json
            .get("unmapped")
            .and_then(|v| v.as_object())
            .expect("unmapped present");
        assert_eq!(unmapped.get("id"), Some(&json!("600004")));
    }

    #[test]
    fn device_fields_accept_both_key_spellings() {
        let kv = parse_kv_from_str(
            "srcmac=aa:bb:cc:dd:ee:ff deviceip4=10.0.0.9 device_vendor=Acme devicerank=7",
        );
        let fields = device_fields_from_kv(&kv);
        assert_eq!(fields.device_ip4.as_deref(), Some("10.0.0.9"));
        assert_eq!(fields.device_vendor.as_deref(), Some("Acme"));
        assert_eq!(fields.device_rank, Some(7));
    }
}
