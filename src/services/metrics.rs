use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, register_int_gauge};
use prometheus::{IntCounter, IntCounterVec, IntGauge};

use crate::models::ChannelSource;

lazy_static! {
    static ref PROBES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reettv_probes_total",
        "Channel probes by verdict",
        &["result"]
    )
    .unwrap();

    static ref PLAYLIST_LOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reettv_playlist_loads_total",
        "Channel list loads by source",
        &["source"]
    )
    .unwrap();

    static ref HEALTH_RUNS_TOTAL: IntCounter = register_int_counter!(
        "reettv_health_runs_total",
        "Health check runs started"
    )
    .unwrap();

    static ref HEALTHY_CHANNELS: IntGauge = register_int_gauge!(
        "reettv_healthy_channels",
        "Healthy channel ids after the latest batch"
    )
    .unwrap();
}

pub fn record_probe(healthy: bool) {
    let result = if healthy { "healthy" } else { "unhealthy" };
    PROBES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_playlist_load(source: ChannelSource) {
    PLAYLIST_LOADS_TOTAL
        .with_label_values(&[&source.to_string()])
        .inc();
}

pub fn record_health_run() {
    HEALTH_RUNS_TOTAL.inc();
}

pub fn set_healthy_channels(count: usize) {
    HEALTHY_CHANNELS.set(count as i64);
}
