pub type Endpoint = str;

pub const LOGIN: &Endpoint = "/app/Solar/v2_get_device.php";
pub const DEVICES: &Endpoint = "/ems/api/v1/getDeviceList";
