use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::warn;

use crate::analytics::detector::AnomalyDetector;
use crate::analytics::expirer::VerdictExpirer;
use crate::analytics::reporter::ReportGenerator;
use crate::config::settings::Settings;

/// Periodic driver for the background analytics jobs: anomaly detection,
/// verdict expiry, and report generation, each on its own cadence.
pub struct AnalyticsScheduler {
    detector: Arc<AnomalyDetector>,
    expirer: Arc<VerdictExpirer>,
    reporter: Arc<ReportGenerator>,
    detect_every: Duration,
    expire_every: Duration,
    report_every: Duration,
}

impl AnalyticsScheduler {
    pub fn new(
        detector: Arc<AnomalyDetector>,
        expirer: Arc<VerdictExpirer>,
        reporter: Arc<ReportGenerator>,
        settings: &Settings,
    ) -> Self {
        Self {
            detector,
            expirer,
            reporter,
            detect_every: Duration::from_secs(settings.detection.interval_secs),
            expire_every: Duration::from_secs(settings.retention.expire_interval_secs),
            report_every: Duration::from_secs(settings.report.interval_secs),
        }
    }

    /// Run the scheduler loop forever. Job failures are logged and the loop
    /// keeps going.
    pub async fn run(&self) {
        let mut detect_interval = interval(self.detect_every);
        detect_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut expire_interval = interval(self.expire_every);
        expire_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report_interval = interval(self.report_every);
        report_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Intervals all fire immediately on the first tick; drain those so
        // the jobs only start after one full period of traffic exists.
        detect_interval.tick().await;
        expire_interval.tick().await;
        report_interval.tick().await;

        loop {
            tokio::select! {
                _ = detect_interval.tick() => {
                    if let Err(e) = self.detector.run_once() {
                        warn!("Anomaly detection pass failed: {}", e);
                    }
                }

                _ = expire_interval.tick() => {
                    if let Err(e) = self.expirer.run_once() {
                        warn!("Verdict expiry pass failed: {}", e);
                    }
                }

                _ = report_interval.tick() => {
                    if let Err(e) = self.reporter.generate() {
                        warn!("Report generation failed: {}", e);
                    }
                }
            }
        }
    }
}
