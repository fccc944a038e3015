//! Relay engine.
//!
//! The [`RelayServer`] owns one input stream and a fixed set of outputs:
//! - The input is read on the task calling [`RelayServer::run`], once per
//!   relay cycle, and every chunk is published on a broadcast channel
//! - Each output runs in its own task, subscribed to that channel, with its
//!   optional converter; a failing output never blocks the input or the
//!   other outputs
//! - Failed streams are reopened after the reconnect interval, forever
//! - Status is read through a [`StatusHandle`] from any task

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use gnss_relay_core::{
    CommandPhase, CommandScript, GeodeticPosition, RelayConfig, RelayOptions, RelayPlan,
    RelayStatus, StreamKind, StreamMonitor, StreamRole,
};
use gnss_relay_protocol::{CodecRegistry, Converter};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::error::{RelayError, Result};
use crate::nmea;
use crate::stream::Stream;
use crate::transport::{self, Transport};

/// Capacity of the fan-out channel, in input chunks.
const CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// Status
// ============================================================================

/// Read-only view of every stream's monitor.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    input: Arc<StreamMonitor>,
    outputs: Vec<Arc<StreamMonitor>>,
}

impl StatusHandle {
    /// Consistent per-stream snapshot; safe to call while the relay runs.
    pub fn snapshot(&self) -> RelayStatus {
        RelayStatus {
            input: self.input.snapshot(),
            outputs: self.outputs.iter().map(|m| m.snapshot()).collect(),
        }
    }
}

// ============================================================================
// Outputs
// ============================================================================

struct Output {
    stream: Stream,
    converter: Option<Converter>,
}

impl Output {
    async fn deliver(&mut self, data: &[u8]) {
        let Some(converter) = self.converter.as_mut() else {
            self.stream.write(data).await;
            return;
        };
        // The converter is fed even while the stream is down so its decode
        // state follows the input.
        let chunks = converter.feed(data);
        if chunks.is_empty() {
            return;
        }
        self.stream.set_message(converter.status_message());
        for chunk in chunks {
            self.stream.write(&chunk).await;
        }
    }

    async fn finish(&mut self) {
        if let Some(rest) = self.converter.take().and_then(Converter::finish) {
            self.stream.write(&rest).await;
        }
    }
}

/// Sleep until `deadline`, or forever without one.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

/// Output worker: deliver every published chunk until the channel closes.
async fn run_output(mut output: Output, mut rx: broadcast::Receiver<Bytes>) -> Output {
    loop {
        tokio::select! {
            biased;

            _ = sleep_until(output.stream.retry_at()) => {
                debug!("{}: reconnecting", output.stream.label());
                if output.stream.open().await {
                    if let Some(converter) = output.converter.as_mut() {
                        converter.reset();
                    }
                    // Resume from live data.
                    rx = rx.resubscribe();
                }
            }

            chunk = rx.recv() => {
                match chunk {
                    Ok(data) => output.deliver(&data).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{} lagged {} chunks", output.stream.label(), n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    output.finish().await;
    output
}

// ============================================================================
// Server
// ============================================================================

/// One input relayed to a fixed set of outputs.
pub struct RelayServer {
    input: Stream,
    outputs: Vec<Output>,
    commands: CommandScript,
    station_position: Option<GeodeticPosition>,
    options: RelayOptions,
    shutdown: CancellationToken,
    status: StatusHandle,
}

impl RelayServer {
    /// Build a relay from raw configuration. Nothing is opened yet.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::from_plan(config.compile()?)
    }

    /// Build a relay from a validated plan.
    pub fn from_plan(plan: RelayPlan) -> Result<Self> {
        let registry = CodecRegistry::default();
        let input = transport::from_endpoint(&plan.input, StreamRole::Input, &plan.options);
        let outputs = plan
            .outputs
            .iter()
            .map(|endpoint| transport::from_endpoint(endpoint, StreamRole::Output, &plan.options))
            .collect();

        let mut server = Self::new(input, outputs, plan.options.clone()).with_commands(plan.commands);
        if let Some(position) = plan.station.position {
            server = server.with_station_position(position);
        }

        for (index, endpoint) in plan.outputs.iter().enumerate() {
            let Some(output_format) = endpoint.format else {
                continue;
            };
            let input_format = plan.input.format.ok_or_else(|| {
                gnss_relay_core::ConfigError::MissingInputFormat(endpoint.to_string())
            })?;
            let converter = Converter::from_registry(
                &registry,
                input_format,
                output_format,
                &plan.filter,
                &plan.station,
                &plan.options.receiver_options,
            )
            .map_err(|source| RelayError::Converter { index, source })?;
            server = server.with_converter(index, converter)?;
        }
        Ok(server)
    }

    /// Relay between ready-made transports, all outputs raw.
    pub fn new(
        input: Box<dyn Transport>,
        outputs: Vec<Box<dyn Transport>>,
        options: RelayOptions,
    ) -> Self {
        let input = Stream::new("input", StreamRole::Input, input, &options);
        let outputs: Vec<Output> = outputs
            .into_iter()
            .enumerate()
            .map(|(i, transport)| Output {
                stream: Stream::new(format!("output {}", i + 1), StreamRole::Output, transport, &options),
                converter: None,
            })
            .collect();

        let status = StatusHandle {
            input: input.monitor().clone(),
            outputs: outputs.iter().map(|o| o.stream.monitor().clone()).collect(),
        };

        Self {
            input,
            outputs,
            commands: CommandScript::default(),
            station_position: None,
            options,
            shutdown: CancellationToken::new(),
            status,
        }
    }

    /// Convert the data written to output `index`.
    pub fn with_converter(mut self, index: usize, converter: Converter) -> Result<Self> {
        let count = self.outputs.len();
        let output = self
            .outputs
            .get_mut(index)
            .ok_or(RelayError::NoSuchOutput { index, count })?;
        output.converter = Some(converter);
        Ok(self)
    }

    pub fn with_commands(mut self, commands: CommandScript) -> Self {
        self.commands = commands;
        self
    }

    /// Position reported in NMEA GGA requests.
    pub fn with_station_position(mut self, position: GeodeticPosition) -> Self {
        self.station_position = Some(position);
        self
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Returns the status taken once every output has delivered its last
    /// chunk, before the streams are closed.
    pub async fn run(self) -> RelayStatus {
        let RelayServer {
            mut input,
            outputs,
            commands,
            station_position,
            options,
            shutdown,
            status,
        } = self;

        info!("Relay starting: {} -> {} outputs", input.transport().describe(), outputs.len());

        input.open().await;
        let mut opened = Vec::with_capacity(outputs.len());
        for mut output in outputs {
            output.stream.open().await;
            opened.push(output);
        }

        commands::inject(&mut input, commands.steps(StreamRole::Input, CommandPhase::Start)).await;
        for output in opened.iter_mut() {
            commands::inject(
                &mut output.stream,
                commands.steps(StreamRole::Output, CommandPhase::Start),
            )
            .await;
        }

        // Subscribe before spawning so no chunk is published unseen.
        let (tx, _) = broadcast::channel::<Bytes>(CHANNEL_CAPACITY);
        let workers: Vec<JoinHandle<Output>> = opened
            .into_iter()
            .map(|output| tokio::spawn(run_output(output, tx.subscribe())))
            .collect();

        let gga_position = station_position.filter(|_| {
            !options.nmea_cycle.is_zero() && input.transport().kind() != StreamKind::File
        });
        let mut next_gga = Instant::now();
        let mut buf = vec![0u8; options.buffer_size];
        let mut ticker = tokio::time::interval(options.cycle);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            if input.retry_due(now) {
                debug!("input: reconnecting");
                input.open().await;
            }

            let n = input.read(&mut buf).await;
            if n > 0 {
                // No receivers only means every worker has stopped.
                let _ = tx.send(Bytes::copy_from_slice(&buf[..n]));
            }
            input.check_inactivity(now).await;

            if let Some(position) = gga_position.as_ref() {
                if input.is_open() && now >= next_gga {
                    let sentence = nmea::gga_sentence(position, Utc::now());
                    debug!("input: {}", sentence.trim_end());
                    input.write(sentence.as_bytes()).await;
                    next_gga = now + options.nmea_cycle;
                }
            }
        }

        info!("Relay stopping");
        drop(tx);
        let mut finished = Vec::with_capacity(workers.len());
        for (i, worker) in workers.into_iter().enumerate() {
            match worker.await {
                Ok(output) => finished.push(output),
                Err(e) => error!("output {} worker failed: {}", i + 1, e),
            }
        }
        let final_status = status.snapshot();

        for output in finished.iter_mut() {
            commands::inject(
                &mut output.stream,
                commands.steps(StreamRole::Output, CommandPhase::Stop),
            )
            .await;
            output.stream.close().await;
        }
        commands::inject(&mut input, commands.steps(StreamRole::Input, CommandPhase::Stop)).await;
        input.close().await;

        info!("Relay stopped");
        final_status
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("input", &self.input)
            .field("outputs", &self.outputs.len())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use gnss_relay_core::StreamState;
    use std::time::Duration;

    fn options() -> RelayOptions {
        RelayOptions {
            reconnect_interval: Duration::from_millis(200),
            cycle: Duration::from_millis(1),
            ..RelayOptions::default()
        }
    }

    #[test]
    fn test_converter_index_checked() {
        let (input, _) = MemoryTransport::source(b"");
        let (output, _) = MemoryTransport::sink();
        let server = RelayServer::new(Box::new(input), vec![Box::new(output)], options());
        let converter = Converter::new(
            gnss_relay_core::StreamFormat::Rtcm3,
            gnss_relay_core::StreamFormat::Rtcm3,
            &gnss_relay_core::MessageFilter::new(),
            &gnss_relay_core::StationOverrides::default(),
            "",
        )
        .unwrap();
        assert!(matches!(
            server.with_converter(1, converter),
            Err(RelayError::NoSuchOutput { index: 1, count: 1 })
        ));
    }

    #[tokio::test]
    async fn test_commands_and_gga_reach_input() {
        let (input, input_handle) = MemoryTransport::source(b"");
        let (output, _) = MemoryTransport::sink();
        let position = GeodeticPosition {
            latitude: 35.0,
            longitude: 139.0,
            height: 10.0,
        };
        let server = RelayServer::new(
            Box::new(input.with_kind(StreamKind::Serial)),
            vec![Box::new(output)],
            RelayOptions {
                nmea_cycle: Duration::from_secs(60),
                ..options()
            },
        )
        .with_commands(CommandScript::parse("start\n@\nstop\n"))
        .with_station_position(position);

        let token = server.shutdown_token();
        let task = tokio::spawn(server.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        task.await.unwrap();

        let written = String::from_utf8(input_handle.written()).unwrap();
        assert!(written.starts_with("start\r\n$GPGGA,"));
        assert!(written.ends_with("stop\r\n"));
        assert_eq!(written.matches("$GPGGA").count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_output_retries() {
        let (input, input_handle) = MemoryTransport::source(b"");
        let (output, output_handle) = MemoryTransport::sink();
        output_handle.set_fail_open(true);
        let server = RelayServer::new(Box::new(input), vec![Box::new(output)], options());
        let status = server.status();
        let token = server.shutdown_token();
        let task = tokio::spawn(server.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(status.snapshot().outputs[0].state, StreamState::Error);
        output_handle.set_fail_open(false);

        for _ in 0..100 {
            if status.snapshot().outputs[0].state == StreamState::Active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status.snapshot().outputs[0].state, StreamState::Active);

        input_handle.push_input(b"live");
        for _ in 0..100 {
            if output_handle.written() == b"live" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        task.await.unwrap();
        assert_eq!(output_handle.written(), b"live");
    }
}
