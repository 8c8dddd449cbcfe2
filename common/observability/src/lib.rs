use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus instruments for the authorization gate.
#[derive(Clone)]
pub struct GateMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    jwks_fetches: IntCounterVec,
    jwks_fetch_duration_seconds: Histogram,
}

impl GateMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new(
                "authz_decisions_total",
                "Authorization decisions grouped by outcome and error code",
            ),
            &["outcome", "code"],
        )?;
        registry.register(Box::new(decisions.clone()))?;

        let jwks_fetches = IntCounterVec::new(
            Opts::new(
                "authz_jwks_fetch_total",
                "Key set fetches against the identity provider grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(jwks_fetches.clone()))?;

        let jwks_fetch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "authz_jwks_fetch_duration_seconds",
                "Latency of key set fetches",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        )?;
        registry.register(Box::new(jwks_fetch_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            decisions,
            jwks_fetches,
            jwks_fetch_duration_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn allowed(&self) {
        self.decisions.with_label_values(&["allowed", "none"]).inc();
    }

    pub fn rejected(&self, code: &str) {
        self.decisions.with_label_values(&["rejected", code]).inc();
    }

    pub fn decision_count(&self, outcome: &str, code: &str) -> u64 {
        self.decisions.with_label_values(&[outcome, code]).get()
    }

    pub fn jwks_fetch(&self, ok: bool, elapsed_seconds: f64) {
        let outcome = if ok { "ok" } else { "error" };
        self.jwks_fetches.with_label_values(&[outcome]).inc();
        self.jwks_fetch_duration_seconds.observe(elapsed_seconds);
    }

    pub fn jwks_fetch_count(&self, outcome: &str) -> u64 {
        self.jwks_fetches.with_label_values(&[outcome]).get()
    }

    /// Text exposition of every registered instrument.
    pub fn render(&self) -> Result<Response, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        let mut response = Response::new(Body::from(buffer));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_are_counted_per_code() {
        let metrics = GateMetrics::new().expect("metrics");
        metrics.allowed();
        metrics.rejected("token_expired");
        metrics.rejected("token_expired");

        assert_eq!(metrics.decision_count("allowed", "none"), 1);
        assert_eq!(metrics.decision_count("rejected", "token_expired"), 2);
        assert_eq!(metrics.decision_count("rejected", "invalid_claims"), 0);
    }

    #[test]
    fn render_exposes_registered_families() {
        let metrics = GateMetrics::new().expect("metrics");
        metrics.jwks_fetch(true, 0.02);

        let families = metrics.registry().gather();
        let names: Vec<_> = families.iter().map(|family| family.get_name()).collect();
        assert!(names.contains(&"authz_jwks_fetch_total"));
        assert!(names.contains(&"authz_jwks_fetch_duration_seconds"));

        let response = metrics.render().expect("render");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
    }
}
