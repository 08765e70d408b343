use crate::events::Event;
use crate::tracker::{SmtpTracker, TrackerStats};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

/// Accepts decoder connections on a Unix socket and feeds their events to a
/// single tracker. Any number of decoders may be connected at once; their
/// events are serialized through one channel so the tracker sees them one at
/// a time.
pub struct EventServer {
    tracker: SmtpTracker,
}

impl EventServer {
    pub fn new(tracker: SmtpTracker) -> Self {
        EventServer { tracker }
    }

    /// Serve until `shutdown` resolves, then flush every pending session.
    pub async fn run<F>(self, socket_path: &str, shutdown: F) -> anyhow::Result<TrackerStats>
    where
        F: Future<Output = ()>,
    {
        log::info!("Listening for decoder events on: {}", socket_path);
        // Remove existing socket if it exists
        if std::path::Path::new(socket_path).exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = tokio::spawn(Self::tracker_worker(self.tracker, receiver, stop_rx));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        log::debug!("Decoder connected");
                        let sender = sender.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Self::read_events(stream, sender).await {
                                log::warn!("Decoder connection error: {e}");
                            }
                        });
                    }
                    Err(e) => log::error!("Failed to accept decoder connection: {e}"),
                },
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, flushing pending sessions");
                    break;
                }
            }
        }

        let _ = stop_tx.send(());
        let stats = worker.await?;
        if let Err(e) = std::fs::remove_file(socket_path) {
            log::warn!("Failed to remove socket {socket_path}: {e}");
        }
        Ok(stats)
    }

    async fn tracker_worker(
        mut tracker: SmtpTracker,
        mut receiver: mpsc::UnboundedReceiver<Event>,
        mut stop: oneshot::Receiver<()>,
    ) -> TrackerStats {
        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(event) => tracker.dispatch(event),
                    None => break,
                },
                _ = &mut stop => {
                    // Events already queued still belong to their sessions.
                    while let Ok(event) = receiver.try_recv() {
                        tracker.dispatch(event);
                    }
                    break;
                }
            }
        }

        tracker.shutdown();
        tracker.stats().clone()
    }

    async fn read_events(
        stream: UnixStream,
        sender: mpsc::UnboundedSender<Event>,
    ) -> std::io::Result<()> {
        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match Event::parse(&line) {
                Ok(event) => {
                    if sender.send(event).is_err() {
                        // Tracker has stopped.
                        break;
                    }
                }
                Err(e) => log::warn!("Skipping malformed event: {e}"),
            }
        }
        log::debug!("Decoder disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sink::MemorySink;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const CONN: &str = r#"{"uid":"C1","id":{"orig_h":"198.51.100.1","orig_p":40000,"resp_h":"192.0.2.25","resp_p":25}}"#;

    async fn connect(path: &std::path::Path) -> UnixStream {
        for _ in 0..100 {
            if let Ok(stream) = UnixStream::connect(path).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Server did not start listening");
    }

    #[tokio::test]
    async fn test_server_processes_decoder_stream() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("mailtrail.sock");
        let socket = socket_path.to_str().unwrap().to_string();

        let sink = MemorySink::new();
        let tracker = SmtpTracker::new(
            &Config::default(),
            Box::new(sink.clone()),
            Box::new(sink.clone()),
        )
        .unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            EventServer::new(tracker)
                .run(&socket, async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let mut stream = connect(&socket_path).await;
        let capture = [
            format!(r#"{{"event":"client_command","conn":{CONN},"command":"EHLO","arg":"mail.example.com"}}"#),
            "garbage".to_string(),
            format!(r#"{{"event":"client_command","conn":{CONN},"command":"MAIL","arg":"FROM:<a@x.com>"}}"#),
            format!(r#"{{"event":"server_reply","conn":{CONN},"code":250,"cmd":".","msg":"Ok"}}"#),
            format!(r#"{{"event":"client_command","conn":{CONN},"command":"NOOP"}}"#),
        ]
        .join("\n");
        stream.write_all(capture.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        stream.shutdown().await.unwrap();

        for _ in 0..100 {
            if !sink.records().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(sink.records().len(), 1);

        // Give the NOOP a moment to arrive, then stop: the pending session is flushed.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        let stats = server.await.unwrap().unwrap();

        assert_eq!(sink.records().len(), 2);
        assert_eq!(stats.records_emitted, 2);
        assert!(!socket_path.exists());
    }
}
