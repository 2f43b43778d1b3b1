use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use weii_core::protocol::{
    BoardEvent, CALIBRATION_ADDRESS, CALIBRATION_BLOCK_SIZE, Command, EXTENSION_INIT,
    FrameDecoder, ProtocolError, ReportId, ReportingMode,
};
use weii_core::{
    CalibrationAssembler, CalibrationError, CalibrationTable, Calibrator, Measurement, SessionId,
};

use crate::collector::{CollectorConfig, CollectorState, Feed, InvalidTransition, SampleCollector};
use crate::config::{ConfigError, SessionConfig};
use crate::link::{LinkChannel, LinkError};
use crate::trigger::StartSignal;

/// Why a session stopped before producing a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LinkClosed,
    DecodeFailure,
    Cancelled,
    TriggerDropped,
    BoardDeactivated,
    ButtonPressed,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            AbortReason::LinkClosed => "link closed",
            AbortReason::DecodeFailure => "too many malformed frames",
            AbortReason::Cancelled => "cancelled",
            AbortReason::TriggerDropped => "start trigger dropped",
            AbortReason::BoardDeactivated => "board deactivated",
            AbortReason::ButtonPressed => "board button pressed",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session aborted: {reason}")]
    Aborted { reason: AbortReason },

    #[error("board did not deliver its calibration data")]
    CalibrationMissing,

    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to encode command: {0}")]
    Command(#[from] ProtocolError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl SessionError {
    fn aborted(reason: AbortReason) -> Self {
        SessionError::Aborted { reason }
    }
}

/// One weighing session over an exclusively owned link.
pub struct Session<L> {
    id: SessionId,
    link: L,
    config: SessionConfig,
    calibrator: Calibrator,
    decoder: FrameDecoder,
    collector: SampleCollector,
    state_tx: watch::Sender<CollectorState>,
    decode_errors: u32,
}

impl<L: LinkChannel> Session<L> {
    pub fn new(link: L, config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;

        let id = SessionId::new();
        let collector = SampleCollector::new(id, CollectorConfig::from(&config));
        let (state_tx, _) = watch::channel(CollectorState::Idle);

        Ok(Self {
            id,
            link,
            config,
            calibrator: Calibrator::new(),
            decoder: FrameDecoder::new(),
            collector,
            state_tx,
            decode_errors: 0,
        })
    }

    /// Use a known calibration instead of reading it from the board.
    pub fn with_calibration(mut self, table: Arc<CalibrationTable>) -> Self {
        self.calibrator.load(table);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Follow the collector's progress.
    pub fn subscribe(&self) -> watch::Receiver<CollectorState> {
        self.state_tx.subscribe()
    }

    /// Run the session to completion.
    ///
    /// The link is closed on every exit path.
    #[instrument(name = "session", skip_all, fields(session_id = %self.id))]
    pub async fn run(
        mut self,
        mut start: StartSignal,
        cancel: CancellationToken,
    ) -> Result<Measurement, SessionError> {
        let result = self.drive(&mut start, &cancel).await;

        if let Err(e) = &result {
            self.collector.abort();
            self.publish();
            warn!(error = %e, "Session ended without a measurement");
        }

        if let Err(e) = self.link.close().await {
            warn!(error = %e, "Failed to close link");
        }

        result
    }

    async fn drive(
        &mut self,
        start: &mut StartSignal,
        cancel: &CancellationToken,
    ) -> Result<Measurement, SessionError> {
        self.initialise(cancel).await?;
        self.ensure_calibrated(cancel).await?;
        self.send(
            Command::SetReportMode {
                mode: ReportingMode::Continuous,
                report_id: ReportId::ButtonsExt8 as u8,
            },
            cancel,
        )
        .await?;

        self.collector.arm()?;
        self.publish();
        info!("Waiting for start signal");
        self.wait_for_start(start, cancel).await?;

        self.collector.start()?;
        self.publish();
        self.collect(cancel).await
    }

    async fn initialise(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        self.send(Command::RequestStatus, cancel).await?;
        for (address, value) in EXTENSION_INIT {
            self.send(
                Command::WriteRegister {
                    address,
                    data: vec![value],
                },
                cancel,
            )
            .await?;
        }
        Ok(())
    }

    async fn ensure_calibrated(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        if self.calibrator.is_loaded() {
            debug!("Using preloaded calibration");
            return Ok(());
        }

        self.send(
            Command::ReadMemory {
                address: CALIBRATION_ADDRESS,
                size: CALIBRATION_BLOCK_SIZE as u16,
            },
            cancel,
        )
        .await?;

        let deadline = tokio::time::sleep(self.config.calibration_timeout());
        tokio::pin!(deadline);
        let mut assembler = CalibrationAssembler::new();

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::aborted(AbortReason::Cancelled)),
                _ = &mut deadline => {
                    warn!(timeout = ?self.config.calibration_timeout(), "Calibration read timed out");
                    return Err(SessionError::CalibrationMissing);
                }
                read = self.link.read_frame() => read?,
            };
            self.push(read)?;

            while let Some(event) = self.next_event()? {
                match event {
                    BoardEvent::Calibration(chunk) => {
                        if let Some(table) = assembler.insert(&chunk) {
                            self.calibrator.load(Arc::new(table?));
                            info!("Calibration loaded");
                            return Ok(());
                        }
                    }
                    BoardEvent::Activation { battery } => {
                        info!(battery, "Board extension active");
                    }
                    other => debug!(?other, "Ignoring frame while calibrating"),
                }
            }
        }
    }

    async fn wait_for_start(
        &mut self,
        start: &mut StartSignal,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::aborted(AbortReason::Cancelled)),
                fired = start.fired() => {
                    if fired {
                        info!("Start signal received");
                        return Ok(());
                    }
                    return Err(SessionError::aborted(AbortReason::TriggerDropped));
                }
                read = self.link.read_frame() => read?,
            };
            self.push(read)?;

            // reports from before the start never reach the collector
            while let Some(event) = self.next_event()? {
                if event == BoardEvent::Deactivation {
                    return Err(SessionError::aborted(AbortReason::BoardDeactivated));
                }
            }
        }
    }

    async fn collect(&mut self, cancel: &CancellationToken) -> Result<Measurement, SessionError> {
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::aborted(AbortReason::Cancelled)),
                read = self.link.read_frame() => read?,
            };
            self.push(read)?;

            while let Some(event) = self.next_event()? {
                let report = match event {
                    BoardEvent::Raw(report) => report,
                    BoardEvent::Deactivation => {
                        return Err(SessionError::aborted(AbortReason::BoardDeactivated));
                    }
                    other => {
                        debug!(?other, "Ignoring frame while collecting");
                        continue;
                    }
                };

                if report.button_pressed {
                    info!("Board button pressed, stopping");
                    return Err(SessionError::aborted(AbortReason::ButtonPressed));
                }

                let calibrated = self.calibrator.calibrate_report(&report)?;
                let feed = self.collector.feed(&calibrated);
                self.publish();

                if let Feed::Complete(measurement) = feed {
                    return Ok(measurement);
                }
            }
        }
    }

    fn push(&mut self, read: Option<Vec<u8>>) -> Result<(), SessionError> {
        let Some(bytes) = read else {
            info!("Board link closed");
            return Err(SessionError::aborted(AbortReason::LinkClosed));
        };
        self.decoder.push(&bytes);
        Ok(())
    }

    /// Next decoded event, skipping malformed frames until too many arrive in a row.
    fn next_event(&mut self) -> Result<Option<BoardEvent>, SessionError> {
        loop {
            let received_at = tokio::time::Instant::now().into_std();
            match self.decoder.next_event(received_at) {
                None => return Ok(None),
                Some(Ok(event)) => {
                    self.decode_errors = 0;
                    return Ok(Some(event));
                }
                Some(Err(e)) => {
                    self.decode_errors += 1;
                    warn!(error = %e, consecutive = self.decode_errors, "Skipping malformed frame");
                    if self.decode_errors > self.config.max_decode_errors {
                        return Err(SessionError::aborted(AbortReason::DecodeFailure));
                    }
                }
            }
        }
    }

    async fn send(
        &mut self,
        command: Command,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let bytes = command.to_bytes()?;
        debug!(?command, "Sending command");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::aborted(AbortReason::Cancelled)),
            written = self.link.write_frame(&bytes) => Ok(written?),
        }
    }

    fn publish(&self) {
        let state = self.collector.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}
