use bytes::Bytes;
use parking_lot::Mutex;
use std::io::Write;

/// Destination for one unit's process output and supervisor event lines.
///
/// Writes must not block the caller; buffering sinks hand data to a
/// background task.
pub trait LogSink: Send + Sync {
    fn write(&self, data: Bytes) -> crate::Result<()>;

    fn write_line(&self, line: &str) -> crate::Result<()> {
        let mut data = line.as_bytes().to_vec();
        if !data.ends_with(b"\n") {
            data.push(b'\n');
        }
        self.write(Bytes::from(data))
    }
}

/// Sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn write(&self, data: Bytes) -> crate::Result<()> {
        self.buf.lock().extend_from_slice(&data);
        Ok(())
    }
}

/// Sink relaying to the daemon's own stdout, used in print mode.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, data: Bytes) -> crate::Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(&data)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_write_line_appends_newline() {
        let sink = MemorySink::new();
        sink.write_line("[sys] hello").unwrap();
        sink.write_line("done\n").unwrap();
        sink.write(Bytes::from_static(b"raw")).unwrap();
        assert_eq!(sink.contents(), "[sys] hello\ndone\nraw");
        assert_eq!(sink.len(), 20);
    }
}
