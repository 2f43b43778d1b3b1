use std::time::Duration;

use ordered_float::NotNan;
use tracing::{debug, info, warn};
use weii_core::{CalibratedReport, Measurement, Quad, SessionId};

use crate::config::SessionConfig;

/// Capture progress of a [`SampleCollector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectorState {
    #[default]
    Idle,
    ArmedWaitingForStart,
    WaitingForLoad,
    Collecting,
    Aggregating,
    Done,
    Aborted,
}

impl CollectorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CollectorState::Done | CollectorState::Aborted)
    }
}

impl std::fmt::Display for CollectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CollectorState::Idle => "idle",
            CollectorState::ArmedWaitingForStart => "armed",
            CollectorState::WaitingForLoad => "waiting for load",
            CollectorState::Collecting => "collecting",
            CollectorState::Aggregating => "aggregating",
            CollectorState::Done => "done",
            CollectorState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorConfig {
    pub sample_count: usize,
    pub min_limit_kg: f64,
    pub debounce: Duration,
    pub tolerance: f64,
    pub grace_rejections: u32,
}

impl From<&SessionConfig> for CollectorConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            sample_count: config.sample_count,
            min_limit_kg: config.min_limit_kg,
            debounce: config.debounce(),
            tolerance: config.tolerance,
            grace_rejections: config.grace_rejections,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("cannot {action} a collector that is {from}")]
pub struct InvalidTransition {
    pub from: CollectorState,
    pub action: &'static str,
}

/// What the collector did with one calibrated report.
#[derive(Debug, Clone, PartialEq)]
pub enum Feed {
    /// Not capturing; the report was dropped.
    Ignored,
    /// Waiting for the load to settle above the threshold.
    Waiting,
    /// The report joined the sample window.
    Accepted { count: usize },
    /// The report deviated too far from the window's median.
    Rejected { consecutive: u32 },
    /// Too many consecutive rejections; the window was discarded.
    LoadLost,
    /// The window is full.
    Complete(Measurement),
}

/// The capture state machine.
///
/// Pure and synchronous: the caller feeds it calibrated reports and drives the
/// start trigger. Debounce timing comes only from report timestamps.
#[derive(Debug)]
pub struct SampleCollector {
    session_id: SessionId,
    config: CollectorConfig,
    state: CollectorState,
    load_since: Option<std::time::Instant>,
    samples: Vec<Quad<f64>>,
    /// Accepted totals, kept sorted.
    totals: Vec<NotNan<f64>>,
    consecutive_rejections: u32,
}

impl SampleCollector {
    pub fn new(session_id: SessionId, config: CollectorConfig) -> Self {
        Self {
            session_id,
            config,
            state: CollectorState::Idle,
            load_since: None,
            samples: Vec::with_capacity(config.sample_count),
            totals: Vec::with_capacity(config.sample_count),
            consecutive_rejections: 0,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Number of samples currently in the window.
    pub fn accepted(&self) -> usize {
        self.samples.len()
    }

    pub fn arm(&mut self) -> Result<(), InvalidTransition> {
        self.transition(CollectorState::Idle, CollectorState::ArmedWaitingForStart, "arm")
    }

    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(
            CollectorState::ArmedWaitingForStart,
            CollectorState::WaitingForLoad,
            "start",
        )
    }

    /// Abort from any non-terminal state. Returns whether the state changed.
    pub fn abort(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        debug!(session_id = %self.session_id, from = %self.state, "Collector aborted");
        self.state = CollectorState::Aborted;
        self.clear_window();
        true
    }

    pub fn feed(&mut self, report: &CalibratedReport) -> Feed {
        match self.state {
            CollectorState::WaitingForLoad => self.wait_for_load(report),
            CollectorState::Collecting => self.collect(report),
            _ => Feed::Ignored,
        }
    }

    fn transition(
        &mut self,
        from: CollectorState,
        to: CollectorState,
        action: &'static str,
    ) -> Result<(), InvalidTransition> {
        if self.state != from {
            return Err(InvalidTransition {
                from: self.state,
                action,
            });
        }
        debug!(session_id = %self.session_id, %from, %to, "Collector transition");
        self.state = to;
        Ok(())
    }

    fn wait_for_load(&mut self, report: &CalibratedReport) -> Feed {
        let total = report.total_kg();

        if total.is_nan() || total <= self.config.min_limit_kg {
            if self.load_since.take().is_some() {
                debug!(total_kg = total, "Load dropped below threshold, debounce reset");
            }
            return Feed::Waiting;
        }

        let since = *self.load_since.get_or_insert(report.received_at);
        if report.received_at.saturating_duration_since(since) < self.config.debounce {
            return Feed::Waiting;
        }

        info!(
            session_id = %self.session_id,
            total_kg = total,
            "Load settled, collecting samples"
        );
        self.state = CollectorState::Collecting;
        self.load_since = None;

        // the report that completed the debounce is the first candidate
        self.collect(report)
    }

    fn collect(&mut self, report: &CalibratedReport) -> Feed {
        let Ok(total) = NotNan::new(report.total_kg()) else {
            return self.reject(report.total_kg());
        };

        if let Some(median) = self.median() {
            if (total.into_inner() - median).abs() > self.config.tolerance * median.abs() {
                return self.reject(total.into_inner());
            }
        }

        self.consecutive_rejections = 0;
        let pos = self.totals.partition_point(|t| *t <= total);
        self.totals.insert(pos, total);
        self.samples.push(report.weights_kg);

        let count = self.samples.len();
        if count < self.config.sample_count {
            return Feed::Accepted { count };
        }

        self.state = CollectorState::Aggregating;
        let measurement = self.aggregate();
        self.state = CollectorState::Done;

        info!(
            session_id = %self.session_id,
            total_kg = measurement.total_kg(),
            samples = measurement.sample_count,
            "Measurement complete"
        );
        Feed::Complete(measurement)
    }

    fn reject(&mut self, total: f64) -> Feed {
        self.consecutive_rejections += 1;
        let consecutive = self.consecutive_rejections;

        debug!(total_kg = total, consecutive, "Sample rejected");

        if consecutive < self.config.grace_rejections {
            return Feed::Rejected { consecutive };
        }

        warn!(
            session_id = %self.session_id,
            discarded = self.samples.len(),
            "Load lost during capture, waiting for load again"
        );
        self.clear_window();
        self.state = CollectorState::WaitingForLoad;
        Feed::LoadLost
    }

    fn median(&self) -> Option<f64> {
        let n = self.totals.len();
        if n == 0 {
            return None;
        }
        let mid = n / 2;
        let median = if n % 2 == 1 {
            self.totals[mid].into_inner()
        } else {
            (self.totals[mid - 1].into_inner() + self.totals[mid].into_inner()) / 2.0
        };
        Some(median)
    }

    fn aggregate(&self) -> Measurement {
        let n = self.samples.len() as f64;
        let sum = self.samples.iter().fold(Quad::<f64>::default(), |acc, s| Quad {
            tl: acc.tl + s.tl,
            tr: acc.tr + s.tr,
            bl: acc.bl + s.bl,
            br: acc.br + s.br,
        });

        Measurement {
            session_id: self.session_id,
            mean_kg: Quad::new(sum.tl / n, sum.tr / n, sum.bl / n, sum.br / n),
            median_total_kg: self.median().unwrap_or_default(),
            sample_count: self.samples.len(),
            taken_at: jiff::Timestamp::now(),
        }
    }

    fn clear_window(&mut self) {
        self.samples.clear();
        self.totals.clear();
        self.consecutive_rejections = 0;
        self.load_since = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn config(sample_count: usize) -> CollectorConfig {
        CollectorConfig {
            sample_count,
            min_limit_kg: 20.0,
            debounce: Duration::from_millis(100),
            tolerance: 0.05,
            grace_rejections: 3,
        }
    }

    fn started(config: CollectorConfig) -> SampleCollector {
        let mut collector = SampleCollector::new(SessionId::new(), config);
        collector.arm().unwrap();
        collector.start().unwrap();
        collector
    }

    fn report(base: Instant, at_ms: u64, total: f64) -> CalibratedReport {
        let quarter = total / 4.0;
        CalibratedReport {
            weights_kg: Quad::new(quarter, quarter, quarter, quarter),
            received_at: base + Duration::from_millis(at_ms),
        }
    }

    #[test]
    fn transitions_follow_the_capture_order() {
        let mut collector = SampleCollector::new(SessionId::new(), config(1));
        assert_eq!(collector.state(), CollectorState::Idle);

        assert_eq!(
            collector.start(),
            Err(InvalidTransition {
                from: CollectorState::Idle,
                action: "start",
            })
        );

        collector.arm().unwrap();
        assert_eq!(collector.state(), CollectorState::ArmedWaitingForStart);
        collector.start().unwrap();
        assert_eq!(collector.state(), CollectorState::WaitingForLoad);
    }

    #[test]
    fn reports_are_ignored_until_started() {
        let base = Instant::now();
        let mut collector = SampleCollector::new(SessionId::new(), config(1));
        collector.arm().unwrap();

        assert_eq!(collector.feed(&report(base, 0, 80.0)), Feed::Ignored);
        assert_eq!(collector.feed(&report(base, 500, 80.0)), Feed::Ignored);
        assert_eq!(collector.accepted(), 0);
    }

    #[test]
    fn debounce_resets_when_load_drops() {
        let base = Instant::now();
        let mut collector = started(config(10));

        assert_eq!(collector.feed(&report(base, 0, 80.0)), Feed::Waiting);
        assert_eq!(collector.feed(&report(base, 60, 80.0)), Feed::Waiting);
        assert_eq!(collector.feed(&report(base, 80, 20.0)), Feed::Waiting);
        // the window restarts here
        assert_eq!(collector.feed(&report(base, 120, 80.0)), Feed::Waiting);
        assert_eq!(collector.feed(&report(base, 200, 80.0)), Feed::Waiting);
        assert_eq!(collector.state(), CollectorState::WaitingForLoad);

        assert_eq!(
            collector.feed(&report(base, 220, 80.0)),
            Feed::Accepted { count: 1 }
        );
        assert_eq!(collector.state(), CollectorState::Collecting);
    }

    #[test]
    fn load_at_or_below_the_limit_never_collects() {
        let base = Instant::now();
        let mut collector = started(config(1));

        // 10 s of reports against a 100 ms debounce
        for at_ms in (0..10_000).step_by(10) {
            let total = if at_ms % 20 == 0 { 20.0 } else { 19.9 };
            assert_eq!(collector.feed(&report(base, at_ms, total)), Feed::Waiting);
        }
        assert_eq!(collector.state(), CollectorState::WaitingForLoad);
        assert_eq!(collector.accepted(), 0);
    }

    #[test]
    fn completes_with_per_sensor_means() {
        let base = Instant::now();
        let mut collector = started(CollectorConfig {
            debounce: Duration::ZERO,
            ..config(3)
        });

        let weights = [
            Quad::new(20.0, 22.0, 18.0, 20.0),
            Quad::new(21.0, 22.0, 18.0, 20.0),
            Quad::new(19.0, 22.0, 18.0, 20.0),
        ];
        let mut feeds = weights.iter().enumerate().map(|(i, w)| {
            collector.feed(&CalibratedReport {
                weights_kg: *w,
                received_at: base + Duration::from_millis(i as u64 * 10),
            })
        });

        assert_eq!(feeds.next(), Some(Feed::Accepted { count: 1 }));
        assert_eq!(feeds.next(), Some(Feed::Accepted { count: 2 }));
        let Some(Feed::Complete(measurement)) = feeds.next() else {
            panic!("expected a measurement");
        };
        drop(feeds);

        assert_eq!(measurement.sample_count, 3);
        assert!((measurement.mean_kg.tl - 20.0).abs() < 1e-9);
        assert!((measurement.total_kg() - 80.0).abs() < 1e-9);
        assert!((measurement.median_total_kg - 80.0).abs() < 1e-9);
        assert_eq!(collector.state(), CollectorState::Done);
        assert_eq!(collector.feed(&report(base, 100, 80.0)), Feed::Ignored);
    }

    #[test]
    fn glitches_are_rejected_without_counting() {
        let base = Instant::now();
        let mut collector = started(CollectorConfig {
            debounce: Duration::ZERO,
            ..config(3)
        });

        assert_eq!(
            collector.feed(&report(base, 0, 80.0)),
            Feed::Accepted { count: 1 }
        );
        assert_eq!(
            collector.feed(&report(base, 10, 95.0)),
            Feed::Rejected { consecutive: 1 }
        );
        assert_eq!(
            collector.feed(&report(base, 20, 81.0)),
            Feed::Accepted { count: 2 }
        );
        // the streak restarts after an accepted sample
        assert_eq!(
            collector.feed(&report(base, 30, 60.0)),
            Feed::Rejected { consecutive: 1 }
        );

        let Feed::Complete(measurement) = collector.feed(&report(base, 40, 79.0)) else {
            panic!("expected a measurement");
        };
        assert!((measurement.total_kg() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn persistent_deviation_returns_to_waiting_for_load() {
        let base = Instant::now();
        let mut collector = started(CollectorConfig {
            debounce: Duration::ZERO,
            ..config(10)
        });

        collector.feed(&report(base, 0, 80.0));
        collector.feed(&report(base, 10, 80.0));
        assert_eq!(collector.accepted(), 2);

        assert_eq!(
            collector.feed(&report(base, 20, 2.0)),
            Feed::Rejected { consecutive: 1 }
        );
        assert_eq!(
            collector.feed(&report(base, 30, 2.0)),
            Feed::Rejected { consecutive: 2 }
        );
        assert_eq!(collector.feed(&report(base, 40, 2.0)), Feed::LoadLost);

        assert_eq!(collector.state(), CollectorState::WaitingForLoad);
        assert_eq!(collector.accepted(), 0);

        // stepping back on with a different weight starts a fresh window
        assert_eq!(
            collector.feed(&report(base, 50, 60.0)),
            Feed::Accepted { count: 1 }
        );
    }

    #[test]
    fn median_tracks_even_windows() {
        let base = Instant::now();
        let mut collector = started(CollectorConfig {
            debounce: Duration::ZERO,
            tolerance: 0.1,
            ..config(10)
        });

        collector.feed(&report(base, 0, 80.0));
        collector.feed(&report(base, 10, 84.0));
        assert_eq!(collector.median(), Some(82.0));
        collector.feed(&report(base, 20, 81.0));
        assert_eq!(collector.median(), Some(81.0));
    }

    #[test]
    fn non_finite_totals_are_rejected() {
        let base = Instant::now();
        let mut collector = started(CollectorConfig {
            debounce: Duration::ZERO,
            ..config(10)
        });

        collector.feed(&report(base, 0, 80.0));
        assert_eq!(
            collector.feed(&report(base, 10, f64::NAN)),
            Feed::Rejected { consecutive: 1 }
        );
    }

    #[test]
    fn abort_only_from_non_terminal_states() {
        let base = Instant::now();
        let mut collector = started(CollectorConfig {
            debounce: Duration::ZERO,
            ..config(5)
        });
        collector.feed(&report(base, 0, 80.0));

        assert!(collector.abort());
        assert_eq!(collector.state(), CollectorState::Aborted);
        assert_eq!(collector.accepted(), 0);
        assert!(!collector.abort());
        assert_eq!(collector.feed(&report(base, 10, 80.0)), Feed::Ignored);
    }
}
