use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_rounds_total: IntCounterVec,
    pub offers_pushed_total: IntCounter,
    pub accepts_total: IntCounterVec,
    pub accept_latency_seconds: HistogramVec,
    pub events_in_queue: IntGauge,
    pub live_connections: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_rounds_total = IntCounterVec::new(
            Opts::new("dispatch_rounds_total", "Dispatch rounds by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_rounds_total metric");

        let offers_pushed_total = IntCounter::new(
            "offers_pushed_total",
            "Offer messages handed to courier channels",
        )
        .expect("valid offers_pushed_total metric");

        let accepts_total = IntCounterVec::new(
            Opts::new("accepts_total", "Accept calls by outcome"),
            &["outcome"],
        )
        .expect("valid accepts_total metric");

        let accept_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "accept_latency_seconds",
                "Latency of the assignment transaction in seconds",
            ),
            &["outcome"],
        )
        .expect("valid accept_latency_seconds metric");

        let events_in_queue = IntGauge::new(
            "events_in_queue",
            "Request-created events waiting for a dispatch round",
        )
        .expect("valid events_in_queue metric");

        let live_connections =
            IntGauge::new("live_connections", "Courier channels currently registered")
                .expect("valid live_connections metric");

        registry
            .register(Box::new(dispatch_rounds_total.clone()))
            .expect("register dispatch_rounds_total");
        registry
            .register(Box::new(offers_pushed_total.clone()))
            .expect("register offers_pushed_total");
        registry
            .register(Box::new(accepts_total.clone()))
            .expect("register accepts_total");
        registry
            .register(Box::new(accept_latency_seconds.clone()))
            .expect("register accept_latency_seconds");
        registry
            .register(Box::new(events_in_queue.clone()))
            .expect("register events_in_queue");
        registry
            .register(Box::new(live_connections.clone()))
            .expect("register live_connections");

        Self {
            registry,
            dispatch_rounds_total,
            offers_pushed_total,
            accepts_total,
            accept_latency_seconds,
            events_in_queue,
            live_connections,
        }
    }

    pub fn record_accept(&self, outcome: &str, elapsed_secs: f64) {
        self.accepts_total.with_label_values(&[outcome]).inc();
        self.accept_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
