pub mod endpoint;
pub mod error;
pub mod response;

use crate::model;
pub use error::Error;
use response::DeviceList;
use serde_json::Value;

use std::sync::RwLock;
use std::time::Duration;

pub const API_URL: &str = "https://eu.hamedata.com";

/// Upper bound for every single request made to the vendor API.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated Marstek cloud client.
///
/// The session token is obtained lazily and kept in memory. It is read once when a
/// request is built and replaced in a single write when a login completes, so a
/// request never sees a half-updated token.
#[derive(Debug)]
pub struct Client {
    api_url: String,
    credentials: model::Credentials,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

/// Map transport-level failures (connect, timeout, body read) to `Error::ApiError`
fn map_api_err(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::ApiError(format!("Request timed out: {}", error))
    } else {
        Error::ApiError(error.to_string())
    }
}

/// Reject non-200 responses, then read the body as JSON.
async fn read_json(response: reqwest::Response) -> Result<Value, Error> {
    let status = response.status();
    if status != http::StatusCode::OK {
        return Err(Error::ApiError(format!("Server responded {}", status)));
    }

    let text = response
        .text()
        .await
        .map_err(|e| Error::ApiError(format!("Error reading API response: {}", e)))?;

    serde_json::from_str::<Value>(&text)
        .map_err(|e| Error::ApiError(format!("Invalid JSON in API response ({}): {}", e, text)))
}

impl Client {
    pub fn new(api_url: String, credentials: model::Credentials) -> Result<Client, Error> {
        Client::with_timeout(api_url, credentials, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        api_url: String,
        credentials: model::Credentials,
        timeout: Duration,
    ) -> Result<Client, Error> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ApiError(format!("Unable to build HTTP client: {}", e)))?;

        Ok(Client {
            api_url: api_url.trim_end_matches('/').to_owned(),
            credentials,
            client,
            token: RwLock::new(None),
        })
    }

    pub fn has_token(&self) -> bool {
        self.current_token().is_some()
    }

    /// Forget the session token; the next fetch logs in again.
    pub fn clear_token(&self) {
        if let Ok(mut token) = self.token.write() {
            *token = None;
        }
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|token| token.clone())
    }

    fn store_token(&self, new_token: String) {
        if let Ok(mut token) = self.token.write() {
            *token = Some(new_token);
        }
    }

    /// Exchange the credentials for a fresh session token.
    pub async fn login(&self) -> Result<(), Error> {
        let url = format!("{}{}", self.api_url, endpoint::LOGIN);
        let params = [
            ("pwd", self.credentials.password_hash()),
            ("mailbox", self.credentials.email.to_owned()),
        ];

        log::debug!("logging in as {}", self.credentials.email);

        let resp = self
            .client
            .post(url)
            .query(&params)
            .send()
            .await
            .map_err(map_api_err)?;
        let value = read_json(resp).await?;

        log::trace!("login response: {}", value);

        let login = serde_json::from_value::<response::Login>(value.clone())
            .map_err(|e| Error::ApiError(format!("Invalid login response ({}): {}", e, value)))?;

        match login.token {
            Some(token) => {
                self.store_token(token);
                log::info!("Obtained new Marstek API token");
                Ok(())
            }
            None => Err(Error::AuthError(format!(
                "Login failed: {}",
                login.msg.unwrap_or_else(|| value.to_string())
            ))),
        }
    }

    async fn get_devices(&self, token: &str) -> Result<DeviceList, Error> {
        let url = format!("{}{}", self.api_url, endpoint::DEVICES);

        let resp = self
            .client
            .get(url)
            .query(&[("token", token)])
            .send()
            .await
            .map_err(map_api_err)?;
        let value = read_json(resp).await?;

        log::trace!("endpoint: {}, response: {}", endpoint::DEVICES, value);

        Ok(response::device_list(value))
    }

    /// List all devices of the account, logging in first when no token is held.
    ///
    /// A response signalling an expired token triggers exactly one re-login and one
    /// retry. An access-denied response drops the token and fails with
    /// `Error::AuthError`.
    pub async fn fetch_devices(&self) -> Result<Vec<model::DeviceRecord>, Error> {
        let token = match self.current_token() {
            Some(token) => token,
            None => {
                self.login().await?;
                self.current_token()
                    .ok_or_else(|| Error::ApiError("No token after login".to_string()))?
            }
        };

        let list = match self.get_devices(&token).await? {
            DeviceList::TokenExpired(msg) => {
                log::warn!("Token expired or invalid ({}), refreshing...", msg);
                /* the rejected token must not survive a failed recovery */
                self.clear_token();
                self.login().await?;
                let token = self
                    .current_token()
                    .ok_or_else(|| Error::ApiError("No token after login".to_string()))?;

                match self.get_devices(&token).await? {
                    DeviceList::TokenExpired(msg) => {
                        self.clear_token();
                        return Err(Error::ApiError(format!(
                            "Token rejected again after re-login: {}",
                            msg
                        )));
                    }
                    list => list,
                }
            }
            list => list,
        };

        match list {
            DeviceList::Devices(devices) => {
                log::debug!("fetched {} device(s)", devices.len());
                Ok(devices)
            }
            DeviceList::AccessDenied(msg) => {
                self.clear_token();
                Err(Error::AuthError(format!("Access denied: {}", msg)))
            }
            DeviceList::Failed(msg) => Err(Error::ApiError(msg)),
            DeviceList::TokenExpired(msg) => Err(Error::ApiError(msg)),
        }
    }
}
