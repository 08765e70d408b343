use crate::notice::{Notice, NOTICE_STREAM};
use crate::record::{MessageRecord, RECORD_STREAM};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for finished message records.
pub trait RecordSink: Send {
    fn write_record(&mut self, record: &MessageRecord) -> Result<(), SinkError>;
}

/// Destination for security notices.
pub trait NoticeSink: Send {
    fn write_notice(&mut self, notice: &Notice) -> Result<(), SinkError>;
}

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    _path: &'a str,
    #[serde(flatten)]
    entry: &'a T,
}

/// Writes one JSON object per line, tagged with the stream it belongs to.
pub struct JsonLinesSink<W: Write + Send> {
    stream: String,
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(stream: impl Into<String>, writer: W) -> Self {
        Self {
            stream: stream.into(),
            writer,
        }
    }

    fn write_entry<T: Serialize>(&mut self, entry: &T) -> Result<(), SinkError> {
        let line = Line {
            _path: &self.stream,
            entry,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Append to `path`, creating parent directories as needed.
    pub fn append(stream: impl Into<String>, path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(stream, BufWriter::new(file)))
    }
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout(stream: impl Into<String>) -> Self {
        Self::new(stream, io::stdout())
    }
}

impl JsonLinesSink<io::Stderr> {
    pub fn stderr(stream: impl Into<String>) -> Self {
        Self::new(stream, io::stderr())
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn write_record(&mut self, record: &MessageRecord) -> Result<(), SinkError> {
        self.write_entry(record)
    }
}

impl<W: Write + Send> NoticeSink for JsonLinesSink<W> {
    fn write_notice(&mut self, notice: &Notice) -> Result<(), SinkError> {
        self.write_entry(notice)
    }
}

/// Open the record sink: a file when a path is configured, stdout otherwise.
pub fn record_sink(path: Option<&str>) -> io::Result<Box<dyn RecordSink>> {
    Ok(match path {
        Some(path) => Box::new(JsonLinesSink::append(RECORD_STREAM, path)?),
        None => Box::new(JsonLinesSink::stdout(RECORD_STREAM)),
    })
}

/// Open the notice sink: a file when a path is configured, stderr otherwise.
pub fn notice_sink(path: Option<&str>) -> io::Result<Box<dyn NoticeSink>> {
    Ok(match path {
        Some(path) => Box::new(JsonLinesSink::append(NOTICE_STREAM, path)?),
        None => Box::new(JsonLinesSink::stderr(NOTICE_STREAM)),
    })
}

/// Keeps everything it receives in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<MessageRecord>>>,
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MessageRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

impl RecordSink for MemorySink {
    fn write_record(&mut self, record: &MessageRecord) -> Result<(), SinkError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

impl NoticeSink for MemorySink {
    fn write_notice(&mut self, notice: &Notice) -> Result<(), SinkError> {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, FiveTuple, Transport};
    use crate::record::SessionState;

    fn record() -> MessageRecord {
        let conn = Connection::new(
            "C1",
            FiveTuple {
                orig_h: "198.51.100.1".parse().unwrap(),
                orig_p: 40000,
                resp_h: "192.0.2.25".parse().unwrap(),
                resp_p: 25,
                proto: Transport::Tcp,
            },
        );
        let mut record = MessageRecord::new(&conn, &SessionState::default());
        record.mailfrom = Some("<a@x.com>".to_string());
        record.add_rcptto("<b@y.com>");
        record
    }

    #[test]
    fn test_json_lines_are_tagged_with_stream() {
        let mut sink = JsonLinesSink::new(RECORD_STREAM, Vec::new());
        sink.write_record(&record()).unwrap();
        sink.write_record(&record()).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["_path"], "smtp");
        assert_eq!(value["uid"], "C1");
        assert_eq!(value["mailfrom"], "<a@x.com>");
        assert_eq!(value["rcptto"][0], "<b@y.com>");
        assert_eq!(value["path"][0], "192.0.2.25");
    }

    #[test]
    fn test_append_sink_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("smtp.log");

        {
            let mut sink = JsonLinesSink::append(RECORD_STREAM, &path).unwrap();
            sink.write_record(&record()).unwrap();
        }
        {
            let mut sink = JsonLinesSink::append(RECORD_STREAM, &path).unwrap();
            sink.write_record(&record()).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_memory_sink_clones_share_storage() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_record(&record()).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert!(sink.notices().is_empty());
    }
}
