use bytes::Bytes;
use parking_lot::Mutex;
use procwarden_core::{LogSink, StreamMatcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::debug;

const RELAY_BUFFER: usize = 8192;
const RELAY_DRAIN: Duration = Duration::from_millis(500);

/// Copies a child's output pipe into the unit sink. With a matcher the
/// chunks go through it, and `on_match` runs once when the marker completes.
pub(crate) fn spawn_relay<R, F>(
    mut reader: R,
    sink: Arc<dyn LogSink>,
    matcher: Option<Arc<Mutex<StreamMatcher>>>,
    on_match: F,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; RELAY_BUFFER];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("Output relay ended: {}", e);
                    break;
                }
            };
            let chunk = &buf[..n];
            match &matcher {
                Some(matcher) => {
                    let matched = matcher.lock().write(chunk);
                    if matched {
                        on_match();
                    }
                }
                None => {
                    if let Err(e) = sink.write(Bytes::copy_from_slice(chunk)) {
                        debug!("Dropped output: {}", e);
                    }
                }
            }
        }
    })
}

/// Gives the relays a moment to flush what the child wrote last.
pub(crate) async fn drain(relays: Vec<JoinHandle<()>>) {
    for mut relay in relays {
        if tokio::time::timeout(RELAY_DRAIN, &mut relay).await.is_err() {
            relay.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procwarden_core::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_relay_copies_output() {
        let sink = Arc::new(MemorySink::new());
        let (mut tx, rx) = tokio::io::duplex(64);
        let relay = spawn_relay(rx, sink.clone(), None, || {});

        tx.write_all(b"hello ").await.unwrap();
        tx.write_all(b"world\n").await.unwrap();
        drop(tx);
        drain(vec![relay]).await;

        assert_eq!(sink.contents(), "hello world\n");
    }

    #[tokio::test]
    async fn test_relay_reports_marker_once() {
        let sink = Arc::new(MemorySink::new());
        let matcher = Arc::new(Mutex::new(StreamMatcher::new(
            "ready",
            Some(sink.clone() as Arc<dyn LogSink>),
        )));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let (mut tx, rx) = tokio::io::duplex(64);
        let relay = spawn_relay(rx, sink.clone(), Some(matcher.clone()), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.write_all(b"re").await.unwrap();
        tx.flush().await.unwrap();
        tx.write_all(b"ady ready").await.unwrap();
        drop(tx);
        drain(vec![relay]).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matcher.lock().is_matched());
        assert_eq!(sink.contents(), "ready ready");
    }
}
