use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::fmt;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Credentials rejected or access revoked. Needs re-authentication by the user.
    AuthError(String),
    /// Transport failure, timeout, non-200 status or malformed payload. Transient.
    ApiError(String),
}

impl Error {
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::AuthError(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AuthError(s) => write!(f, "authentication failed: {}", s),
            Error::ApiError(s) => write!(f, "API error: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error) = match self {
            Error::AuthError(s) => (
                Status::Forbidden,
                format!("<html><body><h3>403 Forbidden</h3>Error while authenticating to Marstek cloud: <code>{}</code></body></html>", s),
            ),
            Error::ApiError(s) => (
                Status::ServiceUnavailable,
                format!("<html><body><h3>503 Service Unavailable</h3>Downstream API response: <code>{}</code></body></html>", s),
            ),
        };

        Response::build()
            .status(status)
            .sized_body(error.len(), Cursor::new(error))
            .header(ContentType::new("text", "html"))
            .ok()
    }
}
