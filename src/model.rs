use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

type KWh = f64;
type Watt = f64;

/// Capacity assumed for a device without a configured override.
pub const DEFAULT_CAPACITY_KWH: KWh = 5.12;
pub const MIN_CAPACITY_KWH: KWh = 0.1;
pub const MAX_CAPACITY_KWH: KWh = 100.0;

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: String, password: String) -> Self {
        Credentials { email, password }
    }

    /// Lowercase hex MD5 of the password, as expected by the login endpoint.
    pub fn password_hash(&self) -> String {
        format!("{:x}", md5::compute(self.password.as_bytes()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"********")
            .finish()
    }
}

/// Single battery as reported by `getDeviceList`. Field names follow the vendor payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub devid: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub device_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub sn: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub soc: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub charge: Option<Watt>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub discharge: Option<Watt>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub load: Option<Watt>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub profit: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub report_time: Option<f64>,
    /* Not part of the vendor payload; filled in from configured overrides */
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub capacity_kwh: Option<KWh>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl DeviceRecord {
    pub fn capacity(&self) -> KWh {
        self.capacity_kwh.unwrap_or(DEFAULT_CAPACITY_KWH)
    }
}

/// Devices returned by one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub devices: Vec<DeviceRecord>,
    /// Duration of the fetch in milliseconds, one decimal.
    pub latency_ms: f64,
    #[serde(skip)]
    pub fetched_at: SystemTime,
}

impl Snapshot {
    pub fn device(&self, devid: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|device| device.devid == devid)
    }
}

/// The vendor is inconsistent about quoting: numbers arrive as `12`, `12.5` or `"12"`.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(n.as_f64()),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("not a number: {}", s))),
            other => Err(serde::de::Error::custom(format!(
                "unexpected value: {}",
                other
            ))),
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        string(d).map(Option::unwrap_or_default)
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "unexpected value: {}",
                other
            ))),
        }
    }
}
