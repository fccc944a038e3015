//! Receiver command injection.

use gnss_relay_core::{CommandStep, StreamState};
use tracing::debug;

use crate::stream::Stream;

/// Send a command block to a stream.
///
/// Nothing is sent unless the stream is active and its kind accepts
/// command text. Returns the number of command lines written.
pub async fn inject(stream: &mut Stream, steps: &[CommandStep]) -> usize {
    if steps.is_empty()
        || stream.state() != StreamState::Active
        || !stream.transport().accepts_commands()
    {
        return 0;
    }

    let mut sent = 0;
    for step in steps {
        match step {
            CommandStep::Send(bytes) => {
                debug!(
                    "{}: command {}",
                    stream.label(),
                    String::from_utf8_lossy(bytes).trim_end()
                );
                if stream.write(bytes).await == 0 && stream.state() == StreamState::Error {
                    break;
                }
                sent += 1;
            }
            CommandStep::Wait(duration) => tokio::time::sleep(*duration).await,
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use gnss_relay_core::{CommandPhase, CommandScript, RelayOptions, StreamKind, StreamRole};
    use std::time::Duration;

    const SCRIPT: &str = "# start\nunlogall\n!WAIT 200\nlog rtcm1004 ontime 1\n@\nunlogall\n";

    #[tokio::test(start_paused = true)]
    async fn test_inject_with_wait() {
        let script = CommandScript::parse(SCRIPT);
        let (transport, handle) = MemoryTransport::sink();
        let mut stream = Stream::new(
            "in",
            StreamRole::Input,
            Box::new(transport.with_kind(StreamKind::Serial)),
            &RelayOptions::default(),
        );
        stream.open().await;

        let started = tokio::time::Instant::now();
        let sent = inject(&mut stream, script.steps(StreamRole::Input, CommandPhase::Start)).await;
        assert_eq!(sent, 2);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(handle.written(), b"unlogall\r\nlog rtcm1004 ontime 1\r\n");
    }

    #[tokio::test]
    async fn test_skips_kinds_without_commands() {
        let script = CommandScript::parse(SCRIPT);
        let (transport, handle) = MemoryTransport::sink();
        let mut stream = Stream::new(
            "out",
            StreamRole::Output,
            Box::new(transport),
            &RelayOptions::default(),
        );
        stream.open().await;

        let sent = inject(&mut stream, script.steps(StreamRole::Input, CommandPhase::Stop)).await;
        assert_eq!(sent, 0);
        assert!(handle.written().is_empty());
    }
}
