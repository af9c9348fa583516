use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Number of formatted lines buffered for slow SSE subscribers.
const LOG_BUFFER: usize = 500;

#[derive(Clone)]
pub(crate) struct SseMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct SseWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Install the global subscriber and return the channel log lines are
/// mirrored into.
///
/// `quiet` keeps log output off stdout, for commands that draw their own
/// progress on the terminal.
pub(crate) fn init(verbose: bool, quiet: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel::<String>(LOG_BUFFER);
    let make_writer = SseMakeWriter {
        sender: log_tx.clone(),
        suppress_stdout: quiet,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    log_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writer_mirrors_lines_to_subscribers() {
        let (tx, mut rx) = broadcast::channel::<String>(8);
        let make_writer = SseMakeWriter {
            sender: tx,
            suppress_stdout: true,
        };
        let mut writer = make_writer.make_writer();
        writer.write_all(b"INFO labdrop: job queued\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "INFO labdrop: job queued\n");
    }

    #[test]
    fn writer_without_subscribers_still_succeeds() {
        let (tx, _) = broadcast::channel::<String>(8);
        let mut writer = SseMakeWriter {
            sender: tx,
            suppress_stdout: true,
        }
        .make_writer();
        assert_eq!(writer.write(b"dropped").unwrap(), 7);
    }
}
