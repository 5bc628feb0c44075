//! Accumulate wrapped syslog lines into full records.

use tracing::debug;

use super::parser::{
    INCONTROL_RFC5424_RE, SYSLOG_PREFIX_ALT_RE, SYSLOG_PREFIX_RE, SYSLOG_PREFIX_RFC5424_RE,
};

/// Stateful line joiner. Holds at most one pending record; callers must
/// split chunk input on `\n` and `\r` before feeding.
#[derive(Debug, Default)]
pub struct RecordReconstructor {
    current: Option<String>,
}

impl RecordReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_record_start(line: &str) -> bool {
        SYSLOG_PREFIX_RE.is_match(line)
            || SYSLOG_PREFIX_ALT_RE.is_match(line)
            || SYSLOG_PREFIX_RFC5424_RE.is_match(line)
            || INCONTROL_RFC5424_RE.is_match(line)
    }

    /// Feed one line; returns the completed record this line closed off, if
    /// any. Orphaned continuations (no buffered record) are dropped.
    pub fn feed_line(&mut self, line: &str) -> Option<String> {
        if Self::is_record_start(line) {
            let finished = self.current.take();
            self.current = Some(line.trim().to_string());
            finished
        } else {
            match self.current.as_mut() {
                Some(buf) => {
                    buf.push(' ');
                    buf.push_str(line.trim());
                }
                None => {
                    debug!(line = line.trim_end(), "Ignoring continuation without prefix");
                }
            }
            None
        }
    }

    /// Emit the remaining buffered record, if any.
    pub fn flush(&mut self) -> Option<String> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str =
        "<134>Feb 10 17:37:13 fw1 EFW: CONN: id=00600004 event=conn_open_natsat connsrcip=10.0.0.1";

    #[test]
    fn wrapped_record_joins_with_single_space() {
        let mut rec = RecordReconstructor::new();
        assert_eq!(rec.feed_line(START), None);
        assert_eq!(
            rec.feed_line("conndestip=10.0.0.2 connipproto=TCP conndestport=443"),
            None
        );
        let full = rec.flush().expect("one record expected");
        assert_eq!(
            full,
            format!("{START} conndestip=10.0.0.2 connipproto=TCP conndestport=443")
        );
        assert_eq!(rec.flush(), None);
    }

    #[test]
    fn new_start_emits_previous_record() {
        let mut rec = RecordReconstructor::new();
        assert_eq!(rec.feed_line(START), None);
        let emitted = rec.feed_line(START).expect("previous record emitted");
        assert_eq!(emitted, START);
    }

    #[test]
    fn orphaned_continuation_is_dropped() {
        let mut rec = RecordReconstructor::new();
        assert_eq!(rec.feed_line("conndestip=10.0.0.2"), None);
        assert_eq!(rec.flush(), None);
    }

    #[test]
    fn all_four_dialects_start_records() {
        let lines = [
            START,
            "<134>[2026-02-10 17:37:13] EFW: CONN: id=00600004 event=conn_open",
            "<134>1 2026-02-10T18:57:45Z gw1 EFW - - - CONN: id=00600004",
            "<1>1 2026-02-09T07:32:47Z host-uuid CONN : id=600004 event=conn_open",
        ];
        for line in lines {
            assert!(
                RecordReconstructor::is_record_start(line),
                "expected record start: {line}"
            );
        }
    }
}
