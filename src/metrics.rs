use marstek_cloud_rs::derived;
use marstek_cloud_rs::model::DeviceRecord;
use marstek_cloud_rs::CoordinatorState;
use prometheus::{Encoder, Gauge, GaugeVec, TextEncoder};
use std::time::UNIX_EPOCH;

lazy_static! {
    static ref DEVICE_INFO: GaugeVec = register_gauge_vec!(
        opts!("marstek_device_info", "static device details, value is always 1"),
        &["devid", "name", "type", "version", "sn"],
    )
    .unwrap();
    static ref DEVICE_SOC: GaugeVec = register_gauge_vec!(
        opts!("marstek_soc_percent", "state of charge reported by battery"),
        &["devid", "name"],
    )
    .unwrap();
    static ref DEVICE_CHARGE_POWER: GaugeVec = register_gauge_vec!(
        opts!("marstek_charge_power_watts", "charge power reported by battery"),
        &["devid", "name"],
    )
    .unwrap();
    static ref DEVICE_DISCHARGE_POWER: GaugeVec = register_gauge_vec!(
        opts!("marstek_discharge_power_watts", "discharge power reported by battery"),
        &["devid", "name"],
    )
    .unwrap();
    static ref DEVICE_LOAD: GaugeVec = register_gauge_vec!(
        opts!("marstek_load_watts", "load reported by battery"),
        &["devid", "name"],
    )
    .unwrap();
    static ref DEVICE_PROFIT: GaugeVec = register_gauge_vec!(
        opts!("marstek_profit", "profit reported by battery (EUR)"),
        &["devid", "name"],
    )
    .unwrap();
    static ref DEVICE_REPORT_TIME: GaugeVec = register_gauge_vec!(
        opts!("marstek_report_time", "time of last report from battery to cloud"),
        &["devid", "name"],
    )
    .unwrap();
    static ref DEVICE_CHARGE_KWH: GaugeVec = register_gauge_vec!(
        opts!("marstek_charge_kwh", "energy stored, derived from soc and capacity"),
        &["devid", "name"],
    )
    .unwrap();
    static ref TOTAL_CHARGE_KWH: Gauge = register_gauge!(opts!(
        "marstek_total_charge_kwh",
        "energy stored over all batteries"
    ))
    .unwrap();
    static ref TOTAL_POWER: Gauge = register_gauge!(opts!(
        "marstek_total_power_watts",
        "charge minus discharge power over all batteries"
    ))
    .unwrap();
    static ref API_LATENCY: Gauge = register_gauge!(opts!(
        "marstek_api_latency_ms",
        "duration of last successful device fetch"
    ))
    .unwrap();
    static ref CONNECTION_STATUS: Gauge = register_gauge!(opts!(
        "marstek_connection_status",
        "1 if the last update succeeded, 0 otherwise"
    ))
    .unwrap();
    static ref LAST_UPDATE: Gauge = register_gauge!(opts!(
        "marstek_last_update_timestamp_seconds",
        "unix time of last successful device fetch"
    ))
    .unwrap();
    static ref REAUTH_REQUIRED: Gauge = register_gauge!(opts!(
        "marstek_reauth_required",
        "1 if the cloud rejected the configured credentials"
    ))
    .unwrap();
}

fn set_optional(gauge: &GaugeVec, labels: &[&str], value: Option<f64>) {
    if let Some(value) = value {
        gauge.with_label_values(labels).set(value);
    }
}

fn process_device(device: &DeviceRecord) {
    let labels = [device.devid.as_str(), device.name.as_str()];

    DEVICE_INFO
        .with_label_values(&[
            device.devid.as_str(),
            device.name.as_str(),
            device.device_type.as_deref().unwrap_or("Unknown"),
            device.version.as_deref().unwrap_or(""),
            device.sn.as_deref().unwrap_or(""),
        ])
        .set(1.0);

    set_optional(&DEVICE_SOC, &labels, device.soc);
    set_optional(&DEVICE_CHARGE_POWER, &labels, device.charge);
    set_optional(&DEVICE_DISCHARGE_POWER, &labels, device.discharge);
    set_optional(&DEVICE_LOAD, &labels, device.load);
    set_optional(&DEVICE_PROFIT, &labels, device.profit);
    set_optional(&DEVICE_REPORT_TIME, &labels, device.report_time);
    DEVICE_CHARGE_KWH
        .with_label_values(&labels)
        .set(derived::charge_kwh(device));
}

/// Feed the coordinator state to Prometheus gauges. Devices missing from the latest
/// snapshot are dropped so no stale series survive a device removal.
pub fn update(state: &CoordinatorState) {
    CONNECTION_STATUS.set(if state.last_update_success { 1.0 } else { 0.0 });
    REAUTH_REQUIRED.set(if state.reauth_required { 1.0 } else { 0.0 });
    if let Some(latency) = state.last_latency_ms {
        API_LATENCY.set(latency);
    }

    let snapshot = match &state.snapshot {
        Some(snapshot) => snapshot,
        None => return,
    };

    for gauge in [
        &*DEVICE_INFO,
        &*DEVICE_SOC,
        &*DEVICE_CHARGE_POWER,
        &*DEVICE_DISCHARGE_POWER,
        &*DEVICE_LOAD,
        &*DEVICE_PROFIT,
        &*DEVICE_REPORT_TIME,
        &*DEVICE_CHARGE_KWH,
    ] {
        gauge.reset();
    }

    for device in &snapshot.devices {
        process_device(device);
    }

    TOTAL_CHARGE_KWH.set(derived::total_charge_kwh(&snapshot.devices));
    TOTAL_POWER.set(derived::total_power_w(&snapshot.devices));

    if let Ok(since_epoch) = snapshot.fetched_at.duration_since(UNIX_EPOCH) {
        LAST_UPDATE.set(since_epoch.as_secs() as f64);
    }
}

/// Read metrics from Prometheus exporter registry.
pub fn read() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        log::error!("Unable to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
