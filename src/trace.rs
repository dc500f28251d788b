//! Append-only text trace streams: fec-decision, application frame-event,
//! packet-capture, and a free-form debug stream. Each line is
//! `timestamp_ms label=value ...`. Grounded in the append-only-line idiom
//! of `model/packet-sender.h`'s `m_debugStream` (`OutputStreamWrapper`
//! plumbing), expressed here as a small `std::io::Write`-based helper
//! instead of re-deriving that API.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Appends `timestamp_ms label=value ...` lines to a sink.
pub struct TraceWriter<W> {
    sink: W,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Writes one line: the timestamp followed by each `key=value` field
    /// in order, space-separated.
    pub fn record(&mut self, timestamp_ms: u64, fields: &[(&str, &str)]) -> io::Result<()> {
        write!(self.sink, "{timestamp_ms}")?;
        for (key, value) in fields {
            write!(self.sink, " {key}={value}")?;
        }
        writeln!(self.sink)?;
        Ok(())
    }
}

impl TraceWriter<File> {
    pub fn open_append<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

/// The four named streams bundled together for a single session.
pub struct Traces<W> {
    pub fec_decision: TraceWriter<W>,
    pub frame_event: TraceWriter<W>,
    pub packet_capture: TraceWriter<W>,
    pub debug: TraceWriter<W>,
}

impl Traces<File> {
    /// Opens `{dir}/fec-decision.log`, `{dir}/frame-event.log`,
    /// `{dir}/packet-capture.log`, `{dir}/debug.log` in append mode.
    pub fn open_in_dir<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            fec_decision: TraceWriter::open_append(dir.join("fec-decision.log"))?,
            frame_event: TraceWriter::open_append(dir.join("frame-event.log"))?,
            packet_capture: TraceWriter::open_append(dir.join("packet-capture.log"))?,
            debug: TraceWriter::open_append(dir.join("debug.log"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_writes_labeled_fields_in_order() {
        let mut buf = Vec::new();
        {
            let mut tw = TraceWriter::new(&mut buf);
            tw.record(1234, &[("event", "fec_decision"), ("rate", "0.05")]).unwrap();
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "1234 event=fec_decision rate=0.05\n");
    }

    #[test]
    fn open_in_dir_creates_all_four_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut traces = Traces::open_in_dir(dir.path()).unwrap();
        traces.fec_decision.record(0, &[("a", "1")]).unwrap();
        traces.frame_event.record(0, &[("b", "2")]).unwrap();
        traces.packet_capture.record(0, &[("c", "3")]).unwrap();
        traces.debug.record(0, &[("d", "4")]).unwrap();
        assert!(dir.path().join("fec-decision.log").exists());
        assert!(dir.path().join("frame-event.log").exists());
        assert!(dir.path().join("packet-capture.log").exists());
        assert!(dir.path().join("debug.log").exists());
    }
}
