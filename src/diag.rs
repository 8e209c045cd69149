//! Per-application diagnostics relay.
//!
//! Workers and the replay path produce tagged text lines; a single relay
//! task drains them in arrival order into the application's sink, so the
//! sink itself is never written from more than one task.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which source produced a diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagTag {
    /// The manager itself (launch, feedback poll).
    Feedback,
    /// One of the two transport slots.
    Socket(u8),
}

impl fmt::Display for DiagTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagTag::Feedback => write!(f, "feedback"),
            DiagTag::Socket(id) => write!(f, "socket{id}"),
        }
    }
}

/// Destination for ordered diagnostic lines. Only ever driven by the relay
/// task, so implementations need no internal locking of their own.
pub trait DiagSink: Send {
    fn write_line(&mut self, tag: DiagTag, line: &str);
}

/// Opens one sink per application at launch time.
pub trait SinkProvider: Send + Sync {
    fn open(&self, bundle_id: &str) -> io::Result<Box<dyn DiagSink>>;
}

/// Append-mode text file per application, `<dir>/<bundle_id>.txt`.
pub struct FileSink {
    file: std::fs::File,
}

impl DiagSink for FileSink {
    fn write_line(&mut self, tag: DiagTag, line: &str) {
        // A failed diagnostic write must never take the dispatcher down.
        let _ = writeln!(self.file, "{tag}: {line}");
    }
}

pub struct FileSinkProvider {
    dir: PathBuf,
}

impl FileSinkProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SinkProvider for FileSinkProvider {
    fn open(&self, bundle_id: &str) -> io::Result<Box<dyn DiagSink>> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{bundle_id}.txt"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(FileSink { file }))
    }
}

/// In-memory sink for tests and embedding hosts.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<(DiagTag, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(DiagTag, String)> {
        self.lines.lock().clone()
    }
}

impl DiagSink for MemorySink {
    fn write_line(&mut self, tag: DiagTag, line: &str) {
        self.lines.lock().push((tag, line.to_string()));
    }
}

impl SinkProvider for MemorySink {
    fn open(&self, _bundle_id: &str) -> io::Result<Box<dyn DiagSink>> {
        Ok(Box::new(self.clone()))
    }
}

struct DiagEntry {
    tag: DiagTag,
    message: String,
}

/// Producer half of the relay, bound to one source tag.
#[derive(Clone)]
pub struct DiagSender {
    enabled: bool,
    tag: DiagTag,
    tx: mpsc::Sender<DiagEntry>,
}

impl DiagSender {
    /// Relay one line. When logging is disabled the closure is never
    /// invoked, so producers pay no formatting cost. Applies backpressure
    /// when the relay queue is full.
    pub async fn emit(&self, message: impl FnOnce() -> String) {
        if !self.enabled {
            return;
        }
        let entry = DiagEntry {
            tag: self.tag,
            message: message(),
        };
        let _ = self.tx.send(entry).await;
    }
}

/// One relay per connection manager. The relay task exits once every
/// `DiagSender` has been dropped and the queue has drained, which the
/// manager arranges to happen only after both workers have shut down.
pub struct Diagnostics {
    tx: mpsc::Sender<DiagEntry>,
    enabled: bool,
}

impl Diagnostics {
    pub fn spawn(mut sink: Box<dyn DiagSink>, capacity: usize, enabled: bool) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<DiagEntry>(capacity);
        let relay = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                sink.write_line(entry.tag, &entry.message);
            }
        });
        (Self { tx, enabled }, relay)
    }

    pub fn sender(&self, tag: DiagTag) -> DiagSender {
        DiagSender {
            enabled: self.enabled,
            tag,
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relay_preserves_arrival_order_and_drains_on_shutdown() {
        let sink = MemorySink::new();
        let (diag, relay) = Diagnostics::spawn(Box::new(sink.clone()), 16, true);
        let one = diag.sender(DiagTag::Socket(1));
        let two = diag.sender(DiagTag::Socket(2));

        one.emit(|| "first".to_string()).await;
        two.emit(|| "second".to_string()).await;
        one.emit(|| "third".to_string()).await;

        drop(one);
        drop(two);
        drop(diag);
        relay.await.expect("relay exits");

        let lines = sink.lines();
        assert_eq!(
            lines,
            vec![
                (DiagTag::Socket(1), "first".to_string()),
                (DiagTag::Socket(2), "second".to_string()),
                (DiagTag::Socket(1), "third".to_string()),
            ]
        );
    }

    #[test]
    fn file_sink_appends_tagged_lines_per_app() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = FileSinkProvider::new(dir.path());
        let mut sink = provider.open("com.example.app").expect("open sink");
        sink.write_line(DiagTag::Socket(1), "connection established");
        sink.write_line(DiagTag::Feedback, "0 stale tokens");
        drop(sink);

        let contents =
            std::fs::read_to_string(dir.path().join("com.example.app.txt")).expect("read log");
        assert_eq!(
            contents,
            "socket1: connection established\nfeedback: 0 stale tokens\n"
        );
    }

    #[tokio::test]
    async fn disabled_logging_enqueues_nothing() {
        let sink = MemorySink::new();
        let (diag, relay) = Diagnostics::spawn(Box::new(sink.clone()), 16, false);
        let sender = diag.sender(DiagTag::Feedback);

        let mut formatted = false;
        sender
            .emit(|| {
                formatted = true;
                "dropped".to_string()
            })
            .await;
        assert!(!formatted, "formatting must be skipped when disabled");

        drop(sender);
        drop(diag);
        relay.await.expect("relay exits");
        assert!(sink.lines().is_empty());
    }
}
