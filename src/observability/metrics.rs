use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub claims_total: IntCounterVec,
    pub requests_created_total: IntCounter,
    pub open_requests: IntGauge,
    pub carriers_online: IntGauge,
    pub feed_subscribers: IntGauge,
    pub claim_latency_seconds: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Assignment claims by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let requests_created_total =
            IntCounter::new("requests_created_total", "Delivery requests created")
                .expect("valid requests_created_total metric");

        let open_requests = IntGauge::new(
            "open_requests",
            "Delivery requests currently pending and unassigned",
        )
        .expect("valid open_requests metric");

        let carriers_online = IntGauge::new("carriers_online", "Carriers currently online")
            .expect("valid carriers_online metric");

        let feed_subscribers =
            IntGauge::new("feed_subscribers", "Live change feed subscriptions")
                .expect("valid feed_subscribers metric");

        let claim_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "claim_latency_seconds",
                "Latency of the conditioned claim update in seconds",
            ),
            &["outcome"],
        )
        .expect("valid claim_latency_seconds metric");

        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(requests_created_total.clone()))
            .expect("register requests_created_total");
        registry
            .register(Box::new(open_requests.clone()))
            .expect("register open_requests");
        registry
            .register(Box::new(carriers_online.clone()))
            .expect("register carriers_online");
        registry
            .register(Box::new(feed_subscribers.clone()))
            .expect("register feed_subscribers");
        registry
            .register(Box::new(claim_latency_seconds.clone()))
            .expect("register claim_latency_seconds");

        Self {
            registry,
            claims_total,
            requests_created_total,
            open_requests,
            carriers_online,
            feed_subscribers,
            claim_latency_seconds,
        }
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
