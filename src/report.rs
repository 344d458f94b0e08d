//! Rendering of results for the operator.

use std::io::Write;

use serde::Serialize;

/// Destination of rendered reports.
pub trait ReportSink {
    fn publish(&mut self, document: &str) -> anyhow::Result<()>;
}

/// Writes each document to stdout followed by a newline.
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn publish(&mut self, document: &str) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", document)?;
        out.flush()?;
        Ok(())
    }
}

/// Render `value` as indented JSON and hand it to `sink`.
pub fn emit<T: Serialize + ?Sized>(sink: &mut dyn ReportSink, value: &T) -> anyhow::Result<()> {
    let document = serde_json::to_string_pretty(value)?;
    sink.publish(&document)
}
