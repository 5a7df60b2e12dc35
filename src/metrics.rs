use prometheus::{Encoder, TextEncoder, HistogramVec, IntCounterVec, GaugeVec, Opts, Registry};
use warp::Filter;
use std::net::SocketAddr;
use once_cell::sync::{Lazy, OnceCell};

const PROBE_TYPE: &str = "icmp";

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// Only set when latency history is enabled
static LATENCY_HIST: OnceCell<HistogramVec> = OnceCell::new();

static LATENCY_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new("probe_latency_milliseconds_current", "Current probe latency in milliseconds");
    let gauge = GaugeVec::new(opts, &["target", "probe_type"]).expect("valid gauge definition");
    let _ = REGISTRY.register(Box::new(gauge.clone()));
    gauge
});

static TIMEOUT_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("probe_timeout_total", "Total number of probe timeouts");
    let ctr = IntCounterVec::new(opts, &["target", "probe_type"]).expect("valid counter definition");
    let _ = REGISTRY.register(Box::new(ctr.clone()));
    ctr
});

pub fn initialize_metrics(enable_latency_history: bool) -> anyhow::Result<()> {
    Lazy::force(&LATENCY_GAUGE);
    Lazy::force(&TIMEOUT_COUNTER);

    if enable_latency_history && LATENCY_HIST.get().is_none() {
        let opts = Opts::new("probe_latency_milliseconds", "Probe latency in milliseconds");
        let hist = HistogramVec::new(
            prometheus::HistogramOpts {
                common_opts: opts,
                buckets: vec![
                    0.05, 0.1, 0.2, 0.5, 1.0,
                    2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0
                ],
            },
            &["target", "probe_type"],
        )?;

        REGISTRY.register(Box::new(hist.clone()))?;
        let _ = LATENCY_HIST.set(hist);
    }
    Ok(())
}

pub async fn serve_metrics(addr: SocketAddr) {
    let metrics_route = warp::path!("metrics").map(move || {
        let encoder = TextEncoder::new();
        let mf = REGISTRY.gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&mf, &mut buf) {
            tracing::error!("encoding metrics failed: {}", e);
        }
        warp::reply::with_header(buf, "Content-Type", encoder.format_type().to_string())
    });

    warp::serve(metrics_route).run(addr).await;
}

pub fn observe_latency(target: &str, latency_ms: f64) {
    // Always observe current latency in gauge
    LATENCY_GAUGE
        .with_label_values(&[target, PROBE_TYPE])
        .set(latency_ms);

    if let Some(hist) = LATENCY_HIST.get() {
        hist.with_label_values(&[target, PROBE_TYPE])
            .observe(latency_ms);
    }
}

pub fn inc_timeout(target: &str) {
    TIMEOUT_COUNTER
        .with_label_values(&[target, PROBE_TYPE])
        .inc();
}
