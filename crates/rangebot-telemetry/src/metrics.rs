//! Prometheus metrics for the range trading bot.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error that should crash
//! at first use rather than silently drop data.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, Histogram, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

const STREAM_STATES: [&str; 4] = ["disconnected", "connecting", "open", "reconnecting"];

/// Stream channel state (1 = active state).
/// Labels: channel, state
pub static STREAM_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "rangebot_stream_state",
        "Stream channel state (1=active, 0=inactive)",
        &["channel", "state"]
    )
    .unwrap()
});

pub static STREAM_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rangebot_stream_reconnect_total",
        "Scheduled stream reconnects",
        &["channel"]
    )
    .unwrap()
});

pub static STREAM_FRAMES_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rangebot_stream_frames_dropped_total",
        "Malformed inbound frames dropped",
        &["channel"]
    )
    .unwrap()
});

pub static BOT_RUNNING: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("rangebot_running", "Decision engine running (1=running)").unwrap()
});

/// Labels: outcome (completed/skipped)
pub static CYCLES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rangebot_cycles_total",
        "Decision cycles by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static CYCLE_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "rangebot_cycle_duration_ms",
        "Decision cycle duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Labels: reason (prefix before the first ':')
pub static CYCLE_BLOCKED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rangebot_cycle_blocked_total",
        "Blocking reasons recorded by decision cycles",
        &["reason"]
    )
    .unwrap()
});

/// Labels: mode, leg, result (placed/failed)
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rangebot_orders_total",
        "Order legs submitted to an execution backend",
        &["mode", "leg", "result"]
    )
    .unwrap()
});

pub static UNIVERSE_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("rangebot_universe_size", "Symbols in the current universe").unwrap()
});

pub static RPC_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("rangebot_rpc_connections", "Open RPC WebSocket connections").unwrap()
});

pub static RPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rangebot_rpc_requests_total",
        "RPC requests by method",
        &["method"]
    )
    .unwrap()
});

pub static RPC_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rangebot_rpc_errors_total",
        "RPC failures by error code",
        &["code"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Mark `state` as the active state of a stream channel.
    pub fn stream_state(channel: &str, state: &str) {
        for s in STREAM_STATES {
            STREAM_STATE.with_label_values(&[channel, s]).set(0.0);
        }
        STREAM_STATE.with_label_values(&[channel, state]).set(1.0);
    }

    pub fn stream_reconnect(channel: &str) {
        STREAM_RECONNECT_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn stream_frame_dropped(channel: &str) {
        STREAM_FRAMES_DROPPED_TOTAL
            .with_label_values(&[channel])
            .inc();
    }

    pub fn bot_running(running: bool) {
        BOT_RUNNING.set(if running { 1.0 } else { 0.0 });
    }

    pub fn cycle_completed(duration_ms: f64) {
        CYCLES_TOTAL.with_label_values(&["completed"]).inc();
        CYCLE_DURATION_MS.observe(duration_ms);
    }

    /// A tick arrived while the previous cycle was still running.
    pub fn cycle_skipped() {
        CYCLES_TOTAL.with_label_values(&["skipped"]).inc();
    }

    /// Record a blocking reason. Symbol and message suffixes are stripped
    /// to keep label cardinality bounded.
    pub fn cycle_blocked(reason: &str) {
        let key = reason.split(':').next().unwrap_or(reason);
        let key = key.split('=').next().unwrap_or(key);
        CYCLE_BLOCKED_TOTAL.with_label_values(&[key]).inc();
    }

    pub fn order_placed(mode: &str, leg: &str) {
        ORDERS_TOTAL.with_label_values(&[mode, leg, "placed"]).inc();
    }

    pub fn order_failed(mode: &str, leg: &str) {
        ORDERS_TOTAL.with_label_values(&[mode, leg, "failed"]).inc();
    }

    pub fn universe_size(size: usize) {
        UNIVERSE_SIZE.set(size as i64);
    }

    pub fn rpc_connection_opened() {
        RPC_CONNECTIONS.inc();
    }

    pub fn rpc_connection_closed() {
        RPC_CONNECTIONS.dec();
    }

    pub fn rpc_request(method: &str) {
        RPC_REQUESTS_TOTAL.with_label_values(&[method]).inc();
    }

    pub fn rpc_error(code: &str) {
        RPC_ERRORS_TOTAL.with_label_values(&[code]).inc();
    }
}

/// Render the default registry in the Prometheus text format.
pub fn encode_text() -> TelemetryResult<String> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_state_is_exclusive() {
        Metrics::stream_state("unit", "connecting");
        Metrics::stream_state("unit", "open");

        assert_eq!(STREAM_STATE.with_label_values(&["unit", "open"]).get(), 1.0);
        assert_eq!(
            STREAM_STATE.with_label_values(&["unit", "connecting"]).get(),
            0.0
        );
    }

    #[test]
    fn test_cycle_blocked_strips_suffix() {
        let before = CYCLE_BLOCKED_TOTAL
            .with_label_values(&["noMarketData"])
            .get();
        Metrics::cycle_blocked("noMarketData:BTCUSDT");
        Metrics::cycle_blocked("noMarketData:ETHUSDT");
        let after = CYCLE_BLOCKED_TOTAL
            .with_label_values(&["noMarketData"])
            .get();
        assert_eq!(after - before, 2.0);

        Metrics::cycle_blocked("regime=trend");
        assert!(CYCLE_BLOCKED_TOTAL.with_label_values(&["regime"]).get() >= 1.0);
    }

    #[test]
    fn test_encode_text_contains_registered_metrics() {
        Metrics::rpc_request("ping");
        let text = encode_text().unwrap();
        assert!(text.contains("rangebot_rpc_requests_total"));
    }
}
