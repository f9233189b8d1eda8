pub mod error_code;
mod get_device_list;
mod login;

use crate::model::DeviceRecord;
pub use error_code::ErrorCode;
use get_device_list::GetDeviceList;
pub use login::Login;
use serde_json::Value;

/// What a `getDeviceList` payload means for the caller.
#[derive(Debug)]
pub enum DeviceList {
    Devices(Vec<DeviceRecord>),
    /* Stale or invalid session token; a fresh login may fix it */
    TokenExpired(String),
    /* Account lost access; the token must be dropped */
    AccessDenied(String),
    /* Anything else without usable `data` */
    Failed(String),
}

/// Vendor-supplied `msg`, or the whole payload when there is none.
pub fn vendor_message(value: &Value) -> String {
    value
        .get("msg")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| value.to_string())
}

/// Known codes are checked first. Only payloads without `data` fall back to looking for
/// the word "token" anywhere in the body, since the vendor does not always set `code`.
/// That heuristic can misfire on an unrelated message mentioning a token.
fn signals_expired_token(value: &Value, code: Option<ErrorCode>) -> bool {
    match code {
        Some(code) => code.is_token_expiry(),
        None => value.get("data").is_none() && value.to_string().to_lowercase().contains("token"),
    }
}

pub fn device_list(value: Value) -> DeviceList {
    let code = ErrorCode::from_response(&value);

    if signals_expired_token(&value, code) {
        return DeviceList::TokenExpired(vendor_message(&value));
    }

    if code == Some(ErrorCode::NoAccessPermission) {
        return DeviceList::AccessDenied(vendor_message(&value));
    }

    if value.get("data").is_none() {
        return DeviceList::Failed(format!("Device fetch failed: {}", vendor_message(&value)));
    }

    match serde_json::from_value::<GetDeviceList>(value) {
        Ok(response) => DeviceList::Devices(response.data),
        Err(e) => DeviceList::Failed(format!("Malformed device list: {}", e)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn read_resource(filename: &str) -> Value {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        let text = fs::read_to_string(d.as_path()).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn get_device_list() {
        match device_list(read_resource("getDeviceList.json")) {
            DeviceList::Devices(devices) => {
                assert_eq!(2, devices.len());
                assert_eq!("0123456789ab", devices[0].devid);
                assert_eq!("Venus E", devices[0].name);
                assert_eq!(Some(56.0), devices[0].soc);
                assert_eq!(Some(800.0), devices[1].discharge);
                assert_eq!(Some("HMG-50".to_string()), devices[1].device_type);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn login() {
        let output: Login = serde_json::from_value(read_resource("login.json")).unwrap();
        assert_eq!(Some("3f9c2b7a1e5d4c8b".to_string()), output.token);
    }

    #[test]
    fn login_rejected() {
        let output: Login = serde_json::from_value(read_resource("login_Rejected.json")).unwrap();
        assert_eq!(None, output.token);
        assert_eq!(Some("wrong password".to_string()), output.msg);
    }

    #[test]
    fn get_device_list_token_expired() {
        match device_list(read_resource("getDeviceList_TokenExpired.json")) {
            DeviceList::TokenExpired(msg) => assert_eq!("token is invalid", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn get_device_list_no_access() {
        match device_list(read_resource("getDeviceList_NoAccess.json")) {
            DeviceList::AccessDenied(msg) => assert_eq!("No access permission", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn numeric_and_quoted_codes_are_equivalent() {
        let quoted = serde_json::json!({"code": "401", "msg": "expired"});
        let numeric = serde_json::json!({"code": 401, "msg": "expired"});
        assert_eq!(Some(ErrorCode::Unauthorized), ErrorCode::from_response(&quoted));
        assert_eq!(Some(ErrorCode::Unauthorized), ErrorCode::from_response(&numeric));
    }

    #[test]
    fn token_word_without_code_counts_as_expiry() {
        let value = serde_json::json!({"msg": "Token missing"});
        assert!(matches!(device_list(value), DeviceList::TokenExpired(_)));
    }

    #[test]
    fn token_word_inside_data_is_not_expiry() {
        let value = serde_json::json!({"data": [{"devid": "x", "name": "token tester"}]});
        assert!(matches!(device_list(value), DeviceList::Devices(_)));
    }

    #[test]
    fn missing_data_is_failure_with_vendor_message() {
        match device_list(serde_json::json!({"code": 5, "msg": "server busy"})) {
            DeviceList::Failed(msg) => assert!(msg.contains("server busy")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn record_without_devid_is_failure() {
        let value = serde_json::json!({"data": [{"name": "nameless"}]});
        assert!(matches!(device_list(value), DeviceList::Failed(_)));
    }
}
