use crate::err::{EvtxError, Result};

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::io::Write;

const INDENT: &[u8] = b"    ";

/// Streams events into a JSON array.
///
/// Indented output uses four spaces per level, and an array without events is written as `[]`.
pub struct JsonArrayWriter<W: Write> {
    writer: W,
    indent: bool,
    written: usize,
}

impl<W: Write> JsonArrayWriter<W> {
    pub fn new(writer: W, indent: bool) -> Self {
        JsonArrayWriter {
            writer,
            indent,
            written: 0,
        }
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<()> {
        let separator: &[u8] = match (self.written, self.indent) {
            (0, true) => b"[\n",
            (0, false) => b"[",
            (_, true) => b",\n",
            (_, false) => b",",
        };
        self.writer.write_all(separator)?;

        if self.indent {
            let mut buf = Vec::new();
            let mut serializer =
                Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(INDENT));
            event.serialize(&mut serializer)?;

            // The event is one level deep inside the array.
            for (i, line) in buf.split(|&b| b == b'\n').enumerate() {
                if i > 0 {
                    self.writer.write_all(b"\n")?;
                }
                self.writer.write_all(INDENT)?;
                self.writer.write_all(line)?;
            }
        } else {
            serde_json::to_writer(&mut self.writer, event)?;
        }

        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Closes the array and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        let end: &[u8] = match (self.written, self.indent) {
            (0, _) => b"[]",
            (_, true) => b"\n]",
            (_, false) => b"]",
        };
        self.writer.write_all(end)?;
        self.writer.flush().map_err(EvtxError::from)?;

        Ok(self.writer)
    }
}

/// Writes `events` as a single JSON array.
pub fn write_events<W, T, I>(writer: W, events: I, indent: bool) -> Result<W>
where
    W: Write,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut array = JsonArrayWriter::new(writer, indent);
    for event in events {
        array.write_event(&event)?;
    }
    array.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render(events: Vec<serde_json::Value>, indent: bool) -> String {
        String::from_utf8(write_events(Vec::new(), events, indent).unwrap()).unwrap()
    }

    #[test]
    fn test_empty_array() {
        assert_eq!(render(vec![], true), "[]");
        assert_eq!(render(vec![], false), "[]");
    }

    #[test]
    fn test_indented_array() {
        let events = vec![
            json!({"Event": {}, "System": {"EventID": "1"}}),
            json!({"Event": {}}),
        ];

        let expected = r#"[
    {
        "Event": {},
        "System": {
            "EventID": "1"
        }
    },
    {
        "Event": {}
    }
]"#;
        assert_eq!(render(events, true), expected);
    }

    #[test]
    fn test_compact_array() {
        let events = vec![json!({"a": null}), json!({"b": "c"})];
        assert_eq!(render(events, false), r#"[{"a":null},{"b":"c"}]"#);
    }
}
