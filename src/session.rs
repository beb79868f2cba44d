//! Acquisition session
//!
//! Drives one resistivimeter through its whole lifecycle:
//!
//! ```text
//! Idle -> Configuring -> ConfigFailed
//!                     -> Streaming -> Stopped | Aborted
//! ```
//!
//! The session exclusively owns its [`ByteChannel`] and closes it on every
//! terminal transition. Every wait (acknowledgement, measure frame, manual
//! request) is raced against a [`StopSignal`]. Writes are bounded by the
//! session timeout but never interrupted, so a frame is never half-sent.
//!
//! # Example
//! ```no_run
//! use resistes_daq::hardware::AcquisitionParams;
//! use resistes_daq::measurement::ChannelSink;
//! use resistes_daq::session::{stop_pair, AcquisitionSession};
//! use resistes_daq::trigger::NeverTrigger;
//! use std::time::Duration;
//!
//! # async fn demo() -> resistes_daq::error::AppResult<()> {
//! let params = AcquisitionParams::default();
//! let mut session = AcquisitionSession::connect("mock:", Duration::from_secs(10), params).await?;
//! let (mut sink, mut records) = ChannelSink::pair(64);
//! let (_stop, mut signal) = stop_pair();
//! tokio::spawn(async move {
//!     while let Some(event) = records.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//! let summary = session.run(&mut sink, &mut NeverTrigger, &mut signal).await?;
//! println!("{} records", summary.records);
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapters::{open_channel, ByteChannel, DEFAULT_QUIET_PERIOD};
use crate::config::Settings;
use crate::error::{hex, AppResult, DaqError};
use crate::hardware::frame_codec::{
    build_config_frame, decode_measure_frame, find_frame_start, validate_ack, AckStatus,
    ACK_FRAME_LEN, REQUEST_MEASURE_CMD,
};
use crate::hardware::{AcquisitionParams, DeviceConfig, ValueCodec};
use crate::measurement::{MeasureRecord, RecordSink, StreamControl};
use crate::trigger::TriggerSource;

/// Lifecycle state of an [`AcquisitionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Parameters held, nothing sent yet
    Idle,
    /// Handshake in progress
    Configuring,
    /// Handshake failed (terminal)
    ConfigFailed,
    /// Reading measure frames
    Streaming,
    /// Ended on request (terminal)
    Stopped,
    /// Ended by a fatal error (terminal)
    Aborted,
}

impl SessionState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::ConfigFailed | SessionState::Stopped | SessionState::Aborted
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Configuring => "configuring",
            SessionState::ConfigFailed => "config failed",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Timing options of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Deadline for every channel write, the acknowledgement and each
    /// measure frame
    pub timeout: Duration,
    /// Upper bound for draining stale bytes before configuring
    pub flush_timeout: Duration,
    /// Silence that marks the reception buffer as drained
    pub quiet_period: Duration,
    /// Stop after this many records
    pub max_records: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(30),
            quiet_period: DEFAULT_QUIET_PERIOD,
            max_records: None,
        }
    }
}

impl SessionOptions {
    /// Options from the `[connection]` settings section.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.connection.timeout,
            flush_timeout: settings.connection.flush_timeout,
            ..Default::default()
        }
    }

    /// Stop after `max` records.
    pub fn with_max_records(mut self, max: u64) -> Self {
        self.max_records = Some(max);
        self
    }
}

/// Requests a running session to stop.
#[derive(Debug, Clone)]
pub struct StopHandle(watch::Sender<bool>);

/// Observed by a session, fires once [`StopHandle::stop`] is called.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

/// Create a connected stop handle and signal.
pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(tx), StopSignal(rx))
}

impl StopHandle {
    /// Ask every session watching this handle to stop.
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

impl StopSignal {
    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until a stop is requested. Never completes if the handle is
    /// dropped without stopping.
    pub async fn stopped(&mut self) {
        if self.0.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Outcome of a streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Final state, `Stopped` or `Aborted`
    pub state: SessionState,
    /// Records handed to the sink
    pub records: u64,
    /// Reads that timed out
    pub missed: u64,
    /// Frames discarded as malformed
    pub malformed: u64,
}

enum Wait<T> {
    Stop,
    Done(T),
}

/// One acquisition over one byte channel.
pub struct AcquisitionSession {
    channel: Box<dyn ByteChannel>,
    params: AcquisitionParams,
    codec: ValueCodec,
    options: SessionOptions,
    state: SessionState,
    config: Option<DeviceConfig>,
    ack: Option<AckStatus>,
    carry: Vec<u8>,
}

impl AcquisitionSession {
    /// Open the channel at `url` and hold `params` in the `Idle` state.
    pub async fn connect(
        url: &str,
        timeout: Duration,
        params: AcquisitionParams,
    ) -> AppResult<Self> {
        let channel = open_channel(url, timeout).await?;
        let options = SessionOptions {
            timeout,
            ..Default::default()
        };
        Ok(Self::new(channel, params, options))
    }

    /// Session over an already open channel.
    pub fn new(
        channel: Box<dyn ByteChannel>,
        params: AcquisitionParams,
        options: SessionOptions,
    ) -> Self {
        Self {
            channel,
            params,
            codec: ValueCodec::default(),
            options,
            state: SessionState::Idle,
            config: None,
            ack: None,
            carry: Vec::new(),
        }
    }

    /// Use a codec built from non-default device constants.
    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the parameters of an `Idle` session.
    pub fn set_params(&mut self, params: AcquisitionParams) -> AppResult<()> {
        self.ensure_state(SessionState::Idle)?;
        self.params = params;
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Timing options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Validated configuration, once `configure` got past validation.
    pub fn device_config(&self) -> Option<&DeviceConfig> {
        self.config.as_ref()
    }

    /// Acknowledgement status of the last successful handshake.
    pub fn ack_status(&self) -> Option<AckStatus> {
        self.ack
    }

    /// The owned channel.
    pub fn channel(&self) -> &dyn ByteChannel {
        self.channel.as_ref()
    }

    fn ensure_state(&self, expected: SessionState) -> AppResult<()> {
        if self.state == expected {
            Ok(())
        } else if self.state.is_terminal() {
            Err(DaqError::SessionTerminated(self.state.to_string()))
        } else {
            Err(DaqError::InvalidState(self.state.to_string()))
        }
    }

    async fn terminate(&mut self, state: SessionState) {
        self.state = state;
        self.carry.clear();
        if let Err(e) = self.channel.close().await {
            warn!(error = %e, "Failed to close {}", self.channel.describe());
        }
        info!(state = %state, "Session ended, {} released", self.channel.describe());
    }

    /// Handshake: validate, flush, send the configuration frame and check the
    /// acknowledgement.
    ///
    /// Invalid parameters leave the session `Idle` without any I/O, so the
    /// caller can fix them with [`set_params`](Self::set_params). Any other
    /// failure ends in `ConfigFailed` with the channel closed.
    pub async fn configure(&mut self) -> AppResult<AckStatus> {
        let (_handle, mut never) = stop_pair();
        match self.configure_or_stop(&mut never).await? {
            Wait::Done(status) => Ok(status),
            Wait::Stop => Err(DaqError::SessionTerminated(self.state.to_string())),
        }
    }

    /// Same as [`configure`](Self::configure), but a stop during the flush or
    /// the acknowledgement wait ends the session in `Stopped`.
    async fn configure_or_stop(&mut self, stop: &mut StopSignal) -> AppResult<Wait<AckStatus>> {
        self.ensure_state(SessionState::Idle)?;

        let config = self.params.validate(&self.codec)?;
        let frame = build_config_frame(&config, &self.codec)?;
        self.config = Some(config);
        self.state = SessionState::Configuring;
        info!(
            channel = %self.channel.describe(),
            frame = %frame,
            "Configuring resistivimeter"
        );

        match self.handshake(frame.as_bytes(), stop).await {
            Ok(Wait::Stop) => {
                info!("Stopped during configuration");
                self.terminate(SessionState::Stopped).await;
                Ok(Wait::Stop)
            }
            Ok(Wait::Done(received)) => match validate_ack(&frame, &received) {
                Ok(status) => {
                    info!(
                        board_id = status.board_id,
                        running = status.running,
                        "Configuration acknowledged"
                    );
                    self.ack = Some(status);
                    self.state = SessionState::Streaming;
                    Ok(Wait::Done(status))
                }
                Err(e) => self.fail_config(e).await,
            },
            Err(e) => self.fail_config(e).await,
        }
    }

    /// The frame write is bounded by the timeout but never raced against
    /// `stop`, so the device sees either nothing or the whole frame.
    async fn handshake(&mut self, frame: &[u8], stop: &mut StopSignal) -> AppResult<Wait<Vec<u8>>> {
        let (quiet, limit, timeout) = (
            self.options.quiet_period,
            self.options.flush_timeout,
            self.options.timeout,
        );
        let drained = tokio::select! {
            biased;
            _ = stop.stopped() => Wait::Stop,
            r = self.channel.drain(quiet, limit) => Wait::Done(r),
        };
        let discarded = match drained {
            Wait::Stop => return Ok(Wait::Stop),
            Wait::Done(r) => r?,
        };
        if discarded > 0 {
            debug!("Flushed {} stale byte(s)", discarded);
        }

        self.channel.write(frame, timeout).await?;
        if stop.is_stopped() {
            return Ok(Wait::Stop);
        }

        let ack = tokio::select! {
            biased;
            _ = stop.stopped() => Wait::Stop,
            r = self.channel.read_exact(ACK_FRAME_LEN, timeout) => Wait::Done(r),
        };
        match ack {
            Wait::Stop => Ok(Wait::Stop),
            Wait::Done(r) => {
                let ack = r?;
                debug!(ack = %hex(&ack), "Acknowledgement received");
                Ok(Wait::Done(ack))
            }
        }
    }

    async fn fail_config<T>(&mut self, e: DaqError) -> AppResult<T> {
        error!(error = %e, "Configuration failed");
        self.terminate(SessionState::ConfigFailed).await;
        Err(e)
    }

    /// Read measure frames into `sink` until stopped.
    ///
    /// In manual mode each event of `trigger` sends one measurement request;
    /// an exhausted trigger stops the session. A timeout or a malformed frame
    /// is reported to the sink, which decides whether to go on. Any other
    /// error, a manual request write that times out included, ends in
    /// `Aborted` and returns the error.
    pub async fn stream(
        &mut self,
        sink: &mut dyn RecordSink,
        trigger: &mut dyn TriggerSource,
        stop: &mut StopSignal,
    ) -> AppResult<StreamSummary> {
        self.ensure_state(SessionState::Streaming)?;
        let config = self
            .config
            .clone()
            .ok_or_else(|| DaqError::InvalidState("streaming without configuration".to_string()))?;

        let mut summary = StreamSummary {
            state: SessionState::Streaming,
            records: 0,
            missed: 0,
            malformed: 0,
        };
        info!(
            channels = config.channels_nb(),
            manual = config.is_manual(),
            "Streaming started"
        );

        let outcome = self
            .stream_loop(&config, sink, trigger, stop, &mut summary)
            .await;
        if let Err(e) = sink.finish().await {
            warn!(error = %e, "Sink failed to finish");
        }

        let state = match &outcome {
            Ok(()) => SessionState::Stopped,
            Err(e) => {
                error!(error = %e, "Streaming aborted");
                SessionState::Aborted
            }
        };
        self.terminate(state).await;
        summary.state = state;
        info!(
            records = summary.records,
            missed = summary.missed,
            malformed = summary.malformed,
            "Streaming finished"
        );
        outcome.map(|()| summary)
    }

    async fn stream_loop(
        &mut self,
        config: &DeviceConfig,
        sink: &mut dyn RecordSink,
        trigger: &mut dyn TriggerSource,
        stop: &mut StopSignal,
        summary: &mut StreamSummary,
    ) -> AppResult<()> {
        let len = config.measure_frame_len();
        let channels = usize::from(config.channels_nb());
        let timeout = self.options.timeout;

        loop {
            if self
                .options
                .max_records
                .is_some_and(|max| summary.records >= max)
            {
                info!("Record limit reached");
                return Ok(());
            }

            let read = if config.is_manual() {
                let waited = tokio::select! {
                    biased;
                    _ = stop.stopped() => Wait::Stop,
                    t = trigger.next_trigger() => Wait::Done(Err(t)),
                    r = self.read_frame(len, Duration::MAX) => Wait::Done(Ok(r)),
                };
                match waited {
                    Wait::Stop => return Ok(()),
                    Wait::Done(Ok(read)) => read,
                    Wait::Done(Err(None)) => {
                        info!("No more measurement requests");
                        return Ok(());
                    }
                    Wait::Done(Err(Some(()))) => {
                        debug!("Requesting one measurement");
                        self.channel.write(&[REQUEST_MEASURE_CMD], timeout).await?;
                        match self.read_or_stop(len, timeout, stop).await {
                            Wait::Stop => return Ok(()),
                            Wait::Done(read) => read,
                        }
                    }
                }
            } else {
                match self.read_or_stop(len, timeout, stop).await {
                    Wait::Stop => return Ok(()),
                    Wait::Done(read) => read,
                }
            };

            let error = match read {
                Ok(raw) => match decode_measure_frame(&raw, channels) {
                    Ok(frame) => {
                        let record = MeasureRecord::from_frame(&frame, &self.codec, Utc::now());
                        debug!(count = record.count, "Measure frame decoded");
                        sink.emit(record).await?;
                        summary.records += 1;
                        continue;
                    }
                    Err(e) => {
                        self.resync(&raw);
                        e
                    }
                },
                Err(e) => e,
            };

            if !error.is_recoverable() {
                return Err(error);
            }
            if matches!(error, DaqError::Timeout(_)) {
                summary.missed += 1;
            } else {
                summary.malformed += 1;
            }
            warn!(error = %error, "Stream error");
            if sink.on_stream_error(&error).await == StreamControl::Abort {
                return Err(error);
            }
        }
    }

    async fn read_or_stop(
        &mut self,
        len: usize,
        timeout: Duration,
        stop: &mut StopSignal,
    ) -> Wait<AppResult<Vec<u8>>> {
        tokio::select! {
            biased;
            _ = stop.stopped() => Wait::Stop,
            r = self.read_frame(len, timeout) => Wait::Done(r),
        }
    }

    /// Next `len` bytes, served from the resync buffer first. Cancel-safe.
    async fn read_frame(&mut self, len: usize, timeout: Duration) -> AppResult<Vec<u8>> {
        if self.carry.len() < len {
            let more = self
                .channel
                .read_exact(len - self.carry.len(), timeout)
                .await?;
            self.carry.extend_from_slice(&more);
        }
        Ok(self.carry.drain(..len).collect())
    }

    /// Keep the bytes of `raw` from the next plausible frame start on.
    fn resync(&mut self, raw: &[u8]) {
        match find_frame_start(raw) {
            Some(start) => {
                debug!("Resynchronising, {} byte(s) dropped", start);
                let mut kept = raw[start..].to_vec();
                kept.append(&mut self.carry);
                self.carry = kept;
            }
            None => debug!("Resynchronising, frame dropped"),
        }
    }

    /// Configure, then stream until stopped. A stop during the handshake ends
    /// the session in `Stopped` without streaming.
    pub async fn run(
        &mut self,
        sink: &mut dyn RecordSink,
        trigger: &mut dyn TriggerSource,
        stop: &mut StopSignal,
    ) -> AppResult<StreamSummary> {
        match self.configure_or_stop(stop).await? {
            Wait::Done(_) => self.stream(sink, trigger, stop).await,
            Wait::Stop => Ok(StreamSummary {
                state: SessionState::Stopped,
                records: 0,
                missed: 0,
                malformed: 0,
            }),
        }
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            debug!(
                state = %self.state,
                "Session dropped before a terminal state, {} released with it",
                self.channel.describe()
            );
        }
    }
}
