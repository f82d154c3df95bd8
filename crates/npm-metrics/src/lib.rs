use anyhow::Result;
use axum::{Router, routing::get};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

/// Metrics sink for the iptables manager.
///
/// Cheap to share: every handle is internally synchronized, so callers hold it
/// behind an `Arc` and emit from any task.
pub struct IptmMetrics {
    registry: Arc<Registry>,

    // Rules installed by this process (not a kernel count)
    num_iptables_rules: IntGauge,

    // Wall time of a successful rule add, in milliseconds
    add_iptables_rule_exec_time: Histogram,

    // Errors keyed by subsystem identifier
    errors: IntCounterVec,
}

impl IptmMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let num_iptables_rules = IntGauge::with_opts(Opts::new(
            "npm_num_iptables_rules",
            "Number of iptables rules installed by the policy manager",
        ))?;
        registry.register(Box::new(num_iptables_rules.clone()))?;

        let add_iptables_rule_exec_time = Histogram::with_opts(
            HistogramOpts::new(
                "npm_add_iptables_rule_exec_time",
                "Execution time in milliseconds for adding an iptables rule",
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 14)?),
        )?;
        registry.register(Box::new(add_iptables_rule_exec_time.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new("npm_error_total", "Errors reported through the error log sink"),
            &["subsystem"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            registry,
            num_iptables_rules,
            add_iptables_rule_exec_time,
            errors,
        })
    }

    pub fn inc_rule_count(&self) {
        self.num_iptables_rules.inc();
    }

    pub fn dec_rule_count(&self) {
        self.num_iptables_rules.dec();
    }

    pub fn rule_count(&self) -> i64 {
        self.num_iptables_rules.get()
    }

    /// Record the latency of a rule add started with [`Timer::start`]
    pub fn record_add_rule_latency(&self, timer: Timer) {
        self.add_iptables_rule_exec_time.observe(timer.elapsed_millis());
    }

    pub fn add_rule_samples(&self) -> u64 {
        self.add_iptables_rule_exec_time.get_sample_count()
    }

    /// Log `msg` at error level and count it against `subsystem`.
    pub fn send_error_log_and_metric(&self, subsystem: &str, msg: impl Display) {
        tracing::error!(subsystem, "{}", msg);
        self.errors.with_label_values(&[subsystem]).inc();
    }

    pub fn error_count(&self, subsystem: &str) -> u64 {
        self.errors.with_label_values(&[subsystem]).get()
    }

    /// Render metrics in Prometheus text format
    pub fn render_metrics(&self) -> Result<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Stopwatch for latency histograms.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_millis(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

/// HTTP server for Prometheus metrics endpoint
pub struct MetricsServer {
    metrics: Arc<IptmMetrics>,
    addr: std::net::SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<IptmMetrics>, port: u16) -> Self {
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
        Self { metrics, addr }
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    fn router(&self) -> Router {
        let metrics = self.metrics.clone();

        Router::new().route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move {
                    match metrics.render_metrics() {
                        Ok(rendered) => rendered,
                        Err(e) => format!("# Error rendering metrics: {}", e),
                    }
                }
            }),
        )
    }

    /// Start the metrics HTTP server
    pub async fn serve(self) -> Result<()> {
        let app = self.router();

        tracing::info!(addr = %self.addr, "metrics server listening");

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
