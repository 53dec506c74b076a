//! Prometheus metrics for the faucet

use crate::error::{FaucetError, FaucetResult};
use crate::watcher::ConfirmationStatus;
use prometheus::{opts, Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

/// Faucet metrics, registered on a private registry.
#[derive(Debug)]
pub struct FaucetMetrics {
    registry: Registry,

    pub drip_requests_total: IntCounter,
    pub drip_denials_total: IntCounterVec,
    pub submissions_total: IntCounterVec,
    pub confirmations_total: IntCounterVec,
    pub watchers_in_flight: IntGauge,
}

impl FaucetMetrics {
    pub fn new() -> FaucetResult<Self> {
        Self::build().map_err(|e| FaucetError::InternalError(format!("Metrics setup failed: {}", e)))
    }

    fn build() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let drip_requests_total = IntCounter::with_opts(opts!(
            "faucet_drip_requests_total",
            "Drip requests received"
        ))?;

        let drip_denials_total = IntCounterVec::new(
            opts!("faucet_drip_denials_total", "Drip requests denied at admission"),
            &["reason"],
        )?;

        let submissions_total = IntCounterVec::new(
            opts!("faucet_submissions_total", "Transfer submissions by result"),
            &["result"],
        )?;

        let confirmations_total = IntCounterVec::new(
            opts!("faucet_confirmations_total", "Confirmation watcher outcomes"),
            &["outcome"],
        )?;

        let watchers_in_flight = IntGauge::with_opts(opts!(
            "faucet_watchers_in_flight",
            "Confirmation watchers currently polling"
        ))?;

        registry.register(Box::new(drip_requests_total.clone()))?;
        registry.register(Box::new(drip_denials_total.clone()))?;
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(confirmations_total.clone()))?;
        registry.register(Box::new(watchers_in_flight.clone()))?;

        Ok(Self {
            registry,
            drip_requests_total,
            drip_denials_total,
            submissions_total,
            confirmations_total,
            watchers_in_flight,
        })
    }

    pub fn record_denial(&self, reason: &str) {
        self.drip_denials_total.with_label_values(&[reason]).inc();
    }

    pub fn record_submission(&self, ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        self.submissions_total.with_label_values(&[result]).inc();
    }

    pub fn record_confirmation(&self, status: ConfirmationStatus) {
        self.confirmations_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    /// Render all metrics in the Prometheus text format.
    pub fn gather(&self) -> FaucetResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| FaucetError::InternalError(format!("Metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| FaucetError::InternalError(e.to_string()))
    }
}
