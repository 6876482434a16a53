//! Client metrics definitions
//!
//! OpenTelemetry instruments describing one shard's link to the aggregator.
//! They are only created when observability is enabled on the builder; a
//! client without metrics records nothing.
//!
//! # Metrics Collected
//!
//! - **connection_state**: current [`ConnectionState`](crate::ConnectionState) as an integer (gauge)
//! - **frames_sent** / **frames_received**: frames by opcode name (counters)
//! - **errors_total**: errors by kind (counter)
//! - **reconnection_attempts**: scheduled reconnects (counter)
//! - **handshakes**: completed HELLO → READY_ACK handshakes (counter)
//! - **remote_eval_duration**: outbound remote-eval round trips in seconds (histogram)
//!
//! # Examples
//!
//! ```rust,no_run
//! use clusterlink_client::ClientMetrics;
//!
//! let metrics = ClientMetrics::new("shard-3");
//! metrics.record_frame_sent("STATS");
//! ```

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    InstrumentationScope, KeyValue,
};

/// Client metrics for monitoring
pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub frames_sent: Counter<u64>,
    pub frames_received: Counter<u64>,
    pub errors_total: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub handshakes: Counter<u64>,
    pub remote_eval_duration: Histogram<f64>,
}

impl ClientMetrics {
    /// Create metrics on the global meter provider
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    /// Create metrics on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("clusterlink.client.connection.state")
                .with_description(
                    "Connection state (0=idle, 1=connecting, 2=awaiting_hello, 3=identifying, \
                     4=ready, 5=closing, 6=reconnecting, 7=failed)",
                )
                .build(),
            frames_sent: meter
                .u64_counter("clusterlink.client.frames.sent")
                .with_description("Frames sent to the aggregator")
                .build(),
            frames_received: meter
                .u64_counter("clusterlink.client.frames.received")
                .with_description("Frames received from the aggregator")
                .build(),
            errors_total: meter
                .u64_counter("clusterlink.client.errors.total")
                .with_description("Errors encountered")
                .build(),
            reconnection_attempts: meter
                .u64_counter("clusterlink.client.reconnection.attempts")
                .with_description("Reconnections scheduled after a disconnect")
                .build(),
            handshakes: meter
                .u64_counter("clusterlink.client.handshakes")
                .with_description("Completed handshakes")
                .build(),
            remote_eval_duration: meter
                .f64_histogram("clusterlink.client.remote_eval.duration")
                .with_description("Remote eval round trip in seconds")
                .with_unit("s")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: i64) {
        self.connection_state.record(state, &[]);
    }

    pub fn record_frame_sent(&self, op: &'static str) {
        self.frames_sent.add(1, &[KeyValue::new("op", op)]);
    }

    pub fn record_frame_received(&self, op: &'static str) {
        self.frames_received.add(1, &[KeyValue::new("op", op)]);
    }

    pub fn record_error(&self, kind: &'static str) {
        self.errors_total.add(1, &[KeyValue::new("error_type", kind)]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_handshake(&self) {
        self.handshakes.add(1, &[]);
    }

    /// Record a remote eval round trip with its outcome
    pub fn record_remote_eval(&self, status: &'static str, duration_secs: f64) {
        self.remote_eval_duration
            .record(duration_secs, &[KeyValue::new("status", status)]);
    }
}
