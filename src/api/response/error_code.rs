use num_derive::FromPrimitive;
use serde_json::Value;

/// Vendor `code` values that change how a device-list response is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ErrorCode {
    TokenInvalid = -1,
    NoAccessPermission = 8,
    Unauthorized = 401,
    Forbidden = 403,
}

impl ErrorCode {
    /// Codes after which a fresh login is worth one more attempt.
    pub fn is_token_expiry(self) -> bool {
        matches!(
            self,
            ErrorCode::TokenInvalid | ErrorCode::Unauthorized | ErrorCode::Forbidden
        )
    }

    /// Reads `code`, which the vendor sends either as a number or as a quoted number.
    pub fn from_response(value: &Value) -> Option<ErrorCode> {
        let code = value.get("code")?;
        let code = match code {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }?;
        num::FromPrimitive::from_i64(code)
    }
}
