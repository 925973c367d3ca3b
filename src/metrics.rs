use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge};

lazy_static::lazy_static! {
    pub static ref DOCUMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "docbench_documents_total", "Documents processed by the loader", &["outcome"]
    ).unwrap();
    pub static ref LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "docbench_lookups_total", "Point lookups issued", &["strategy", "status"]
    ).unwrap();
    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "docbench_store_errors_total", "Store operation errors", &["operation"]
    ).unwrap();
    pub static ref ACTIVE_WORKERS: IntGauge = register_int_gauge!(
        "docbench_active_workers", "Number of running loader or query workers"
    ).unwrap();
}

/// RAII guard that decrements an IntGauge on drop.
pub struct GaugeGuard<'a>(pub &'a IntGauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Increment `gauge` and return a guard that undoes it.
pub fn track(gauge: &IntGauge) -> GaugeGuard<'_> {
    gauge.inc();
    GaugeGuard(gauge)
}

pub fn init() {
    lazy_static::initialize(&DOCUMENTS_TOTAL);
    lazy_static::initialize(&LOOKUPS_TOTAL);
    lazy_static::initialize(&STORE_ERRORS_TOTAL);
    lazy_static::initialize(&ACTIVE_WORKERS);
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_metrics() {
        init();
        DOCUMENTS_TOTAL.with_label_values(&["inserted"]).inc();
        let text = render();
        assert!(text.contains("docbench_documents_total"));
    }
}
