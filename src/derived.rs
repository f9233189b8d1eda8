//! Values derived from a snapshot for display: stored energy and net battery power.

use crate::model::DeviceRecord;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Energy currently stored in `device` (kWh), from its state of charge and capacity.
pub fn charge_kwh(device: &DeviceRecord) -> f64 {
    round2(device.soc.unwrap_or(0.0) / 100.0 * device.capacity())
}

/// Stored energy over all devices (kWh).
pub fn total_charge_kwh(devices: &[DeviceRecord]) -> f64 {
    round2(
        devices
            .iter()
            .map(|device| device.soc.unwrap_or(0.0) / 100.0 * device.capacity())
            .sum(),
    )
}

/// Charging minus discharging power over all devices (W). Negative while discharging.
pub fn total_power_w(devices: &[DeviceRecord]) -> f64 {
    let charge: f64 = devices.iter().filter_map(|device| device.charge).sum();
    let discharge: f64 = devices.iter().filter_map(|device| device.discharge).sum();
    round2(charge - discharge)
}
