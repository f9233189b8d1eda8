//! Checks user-supplied settings before anything is started.
//!
//! Credentials are only accepted after one real login and device fetch against the
//! vendor API. Ranges mirror what the setup and options forms allow.

use crate::api::{Client, Error};
use crate::coordinator::{
    DEFAULT_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS, MIN_SCAN_INTERVAL_SECS,
};
use crate::model::{
    Credentials, DeviceRecord, DEFAULT_CAPACITY_KWH, MAX_CAPACITY_KWH, MIN_CAPACITY_KWH,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeError {
    InvalidAuth,
    CannotConnect,
    Unknown(String),
    ScanIntervalOutOfRange(i64),
    CapacityOutOfRange(f64),
    MissingField(&'static str),
}

impl IntakeError {
    /// Short key identifying the problem, as used by form error messages.
    pub fn key(&self) -> &'static str {
        match self {
            IntakeError::InvalidAuth => "invalid_auth",
            IntakeError::CannotConnect => "cannot_connect",
            IntakeError::Unknown(_) => "unknown",
            IntakeError::ScanIntervalOutOfRange(_) => "invalid_scan_interval",
            IntakeError::CapacityOutOfRange(_) => "invalid_capacity",
            IntakeError::MissingField(_) => "missing_field",
        }
    }
}

impl fmt::Display for IntakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeError::InvalidAuth => write!(f, "Invalid email or password"),
            IntakeError::CannotConnect => write!(f, "Cannot connect to the Marstek cloud"),
            IntakeError::Unknown(s) => write!(f, "Unexpected error: {}", s),
            IntakeError::ScanIntervalOutOfRange(v) => write!(
                f,
                "Scan interval must be between {} and {} seconds, got {}",
                MIN_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS, v
            ),
            IntakeError::CapacityOutOfRange(v) => write!(
                f,
                "Capacity must be between {} and {} kWh, got {}",
                MIN_CAPACITY_KWH, MAX_CAPACITY_KWH, v
            ),
            IntakeError::MissingField(name) => write!(f, "Missing required field: {}", name),
        }
    }
}

impl std::error::Error for IntakeError {}

impl From<Error> for IntakeError {
    fn from(error: Error) -> Self {
        match error {
            Error::AuthError(_) => IntakeError::InvalidAuth,
            Error::ApiError(_) => IntakeError::CannotConnect,
        }
    }
}

pub fn validate_scan_interval(secs: i64) -> Result<u64, IntakeError> {
    if secs >= MIN_SCAN_INTERVAL_SECS as i64 && secs <= MAX_SCAN_INTERVAL_SECS as i64 {
        Ok(secs as u64)
    } else {
        Err(IntakeError::ScanIntervalOutOfRange(secs))
    }
}

pub fn validate_capacity(kwh: f64) -> Result<f64, IntakeError> {
    if (MIN_CAPACITY_KWH..=MAX_CAPACITY_KWH).contains(&kwh) {
        Ok(kwh)
    } else {
        Err(IntakeError::CapacityOutOfRange(kwh))
    }
}

/// Log in and list devices once with a throwaway client.
pub async fn validate_credentials(
    api_url: &str,
    credentials: &Credentials,
) -> Result<Vec<DeviceRecord>, IntakeError> {
    let client = Client::new(api_url.to_owned(), credentials.clone())
        .map_err(|e| IntakeError::Unknown(e.to_string()))?;

    client.login().await?;
    let devices = client.fetch_devices().await?;

    log::info!(
        "credentials for {} accepted, {} device(s) found",
        credentials.email,
        devices.len()
    );
    Ok(devices)
}

/// Initial setup form.
#[derive(Debug, Clone)]
pub struct SetupInput {
    pub email: String,
    pub password: String,
    pub scan_interval: i64,
    pub default_capacity: f64,
}

impl SetupInput {
    pub fn new(email: String, password: String) -> SetupInput {
        SetupInput {
            email,
            password,
            scan_interval: DEFAULT_SCAN_INTERVAL_SECS as i64,
            default_capacity: DEFAULT_CAPACITY_KWH,
        }
    }

    /// Range checks only; see `validate_credentials` for the online check.
    pub fn validate(&self) -> Result<(Credentials, u64, f64), IntakeError> {
        if self.email.trim().is_empty() {
            return Err(IntakeError::MissingField("email"));
        }
        if self.password.is_empty() {
            return Err(IntakeError::MissingField("password"));
        }
        let scan_interval = validate_scan_interval(self.scan_interval)?;
        let default_capacity = validate_capacity(self.default_capacity)?;

        Ok((
            Credentials::new(self.email.trim().to_owned(), self.password.to_owned()),
            scan_interval,
            default_capacity,
        ))
    }
}

/// Post-setup options: scan interval and a capacity per known device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Options {
    pub scan_interval: u64,
    pub capacities: BTreeMap<String, f64>,
}

impl Options {
    /// Options covering every device in `devices`, keeping overrides already in `current`.
    pub fn for_devices(
        devices: &[DeviceRecord],
        current: &BTreeMap<String, f64>,
        scan_interval: u64,
        default_capacity: f64,
    ) -> Options {
        let capacities = devices
            .iter()
            .map(|device| {
                let capacity = current
                    .get(&device.devid)
                    .copied()
                    .unwrap_or(default_capacity);
                (device.devid.to_owned(), capacity)
            })
            .collect();

        Options {
            scan_interval,
            capacities,
        }
    }

    pub fn validate(&self) -> Result<(), IntakeError> {
        validate_scan_interval(self.scan_interval as i64)?;
        for capacity in self.capacities.values() {
            validate_capacity(*capacity)?;
        }
        Ok(())
    }
}
