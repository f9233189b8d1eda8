use crate::model::DeviceRecord;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct GetDeviceList {
    pub data: Vec<DeviceRecord>,
}
