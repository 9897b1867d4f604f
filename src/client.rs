//! Blocking HTTP client for the controller's session protocol.
//!
//! - Blocking client using `ureq` (no async).
//! - The controller speaks URL-form-encoded POSTs against a single path and
//!   issues a `PHPSESSID` cookie on login; the cookie is echoed on every
//!   subsequent call.
//! - Any failed call drops the stored session so the poll loop knows to
//!   authenticate again before the next data operation.

use crate::metrics::registry::Metrics;
use crate::models::device::{
    ActionResponse, DataPollResponse, GeneralSettings, ThermostatSettings, thermostat_settings_form,
};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session cookie name issued by the controller.
const SESSION_COOKIE: &str = "PHPSESSID";

/// Poll bodies and per-room entries are well under 1 kB each; a misbehaving
/// endpoint must not be able to buffer unbounded data here.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum ClientError {
    InvalidUrl(String),
    /// A data call was attempted without a session.
    NoSession,
    /// Login response carried no session cookie.
    MissingSessionCookie,
    Transport(String),
    Http { status: u16 },
    OversizedBody,
    Decode(String),
    /// The device processed the request and rejected it.
    Action(String),
}

impl core::fmt::Display for ClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClientError::InvalidUrl(url) => write!(f, "invalid device url: {}", url),
            ClientError::NoSession => write!(f, "no active session, login required"),
            ClientError::MissingSessionCookie => write!(f, "no session cookie in login response"),
            ClientError::Transport(s) => write!(f, "transport error: {}", s),
            ClientError::Http { status } => write!(f, "http status {}", status),
            ClientError::OversizedBody => write!(f, "too long response body"),
            ClientError::Decode(s) => write!(f, "decode error: {}", s),
            ClientError::Action(s) => write!(f, "device rejected the request: {}", s),
        }
    }
}

impl std::error::Error for ClientError {}

pub struct DeviceClient {
    agent: ureq::Agent,
    base_url: String,
    sys_id: String,
    password: String,
    session_id: Option<String>,
    metrics: Arc<Metrics>,
    record_latency: bool,
}

impl DeviceClient {
    pub fn new(
        url: &str,
        sys_id: &str,
        password: &str,
        metrics: Arc<Metrics>,
        record_latency: bool,
    ) -> Result<Self, ClientError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(url.to_string()));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build();
        Ok(DeviceClient {
            agent,
            base_url: url.trim_end_matches('/').to_string(),
            sys_id: sys_id.to_string(),
            password: password.to_string(),
            session_id: None,
            metrics,
            record_latency,
        })
    }

    pub fn sys_id(&self) -> &str {
        &self.sys_id
    }

    /// Returns whether a session token is currently held.
    pub fn is_authenticated(&self) -> bool {
        self.session_id.is_some()
    }

    /// Logs in and stores the session cookie.
    pub fn login(&mut self) -> Result<(), ClientError> {
        let started = Instant::now();
        let result = self.agent.post(&self.base_url).send_form(&[
            ("sysid", self.sys_id.as_str()),
            ("password", self.password.as_str()),
            ("lang", "hu"),
            ("tab", "login"),
            ("form", "login"),
        ]);
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.session_id = None;
                self.observe("login", error_status(&err), started);
                return Err(to_client_error(err));
            }
        };
        self.observe("login", response.status(), started);
        let cookie = session_cookie(&response);
        let action: ActionResponse = match read_json(response) {
            Ok(action) => action,
            Err(err) => {
                self.session_id = None;
                return Err(err);
            }
        };
        if !action.is_success() {
            self.session_id = None;
            return Err(ClientError::Action(action.error_message()));
        }
        match cookie {
            Some(value) => {
                self.session_id = Some(value);
                Ok(())
            }
            None => {
                self.session_id = None;
                Err(ClientError::MissingSessionCookie)
            }
        }
    }

    /// Reads the current poll data from the device.
    pub fn read_values(&mut self) -> Result<DataPollResponse, ClientError> {
        let Some(session_id) = self.session_id.clone() else {
            return Err(ClientError::NoSession);
        };
        let started = Instant::now();
        let result = self
            .agent
            .post(&self.data_url())
            .set("Cookie", &cookie_header(&session_id))
            .send_form(&[("tab", "datapoll")]);
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.session_id = None;
                self.observe("read_values", error_status(&err), started);
                return Err(to_client_error(err));
            }
        };
        self.observe("read_values", response.status(), started);
        if let Some(value) = session_cookie(&response) {
            self.session_id = Some(value);
        }
        match read_json(response) {
            Ok(values) => Ok(values),
            Err(err) => {
                self.session_id = None;
                Err(err)
            }
        }
    }

    /// Submits an action form and checks the device's verdict. This is the
    /// shared primitive behind the settings operations.
    pub fn write(&mut self, operation: &str, form: &[(String, String)]) -> Result<(), ClientError> {
        let Some(session_id) = self.session_id.clone() else {
            return Err(ClientError::NoSession);
        };
        let started = Instant::now();
        let pairs: Vec<(&str, &str)> = form.iter().map(|(key, value)| (key.as_str(), value.as_str())).collect();
        let result = self
            .agent
            .post(&self.data_url())
            .set("Cookie", &cookie_header(&session_id))
            .send_form(&pairs);
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.session_id = None;
                self.observe(operation, error_status(&err), started);
                return Err(to_client_error(err));
            }
        };
        self.observe(operation, response.status(), started);
        if let Some(value) = session_cookie(&response) {
            self.session_id = Some(value);
        }
        let action: ActionResponse = match read_json(response) {
            Ok(action) => action,
            Err(err) => {
                self.session_id = None;
                return Err(err);
            }
        };
        if !action.is_success() {
            return Err(ClientError::Action(action.error_message()));
        }
        Ok(())
    }

    /// Experimental: submits per-room thermostat settings for a tab.
    pub fn set_thermostat_settings(&mut self, tab: i32, settings: &ThermostatSettings) -> Result<(), ClientError> {
        self.write("set_thermostat_settings", &thermostat_settings_form(tab, settings))
    }

    /// Experimental: submits controller-level settings for a tab.
    pub fn set_general_settings(&mut self, tab: i32, settings: &GeneralSettings) -> Result<(), ClientError> {
        self.write("set_general_settings", &settings.form_values(tab))
    }

    /// Ends the session on the device. The stored token is dropped before
    /// the request goes out, so a failed logout still leaves the client
    /// unauthenticated.
    pub fn logout(&mut self) -> Result<(), ClientError> {
        let Some(session_id) = self.session_id.take() else {
            return Ok(());
        };
        let started = Instant::now();
        let result = self
            .agent
            .post(&self.data_url())
            .set("Cookie", &cookie_header(&session_id))
            .send_form(&[("logout", "true")]);
        match result {
            Ok(response) => {
                self.observe("logout", response.status(), started);
                Ok(())
            }
            Err(err) => {
                self.observe("logout", error_status(&err), started);
                Err(to_client_error(err))
            }
        }
    }

    /// Best-effort cleanup used at loop teardown.
    pub fn close(&mut self) -> Result<(), ClientError> {
        self.logout()
    }

    fn data_url(&self) -> String {
        format!("{}/index.php", self.base_url)
    }

    fn observe(&self, operation: &str, status: u16, started: Instant) {
        if self.record_latency {
            self.metrics.observe_http(&self.sys_id, operation, status, started.elapsed());
        }
    }
}

fn cookie_header(session_id: &str) -> String {
    format!("{}={}", SESSION_COOKIE, session_id)
}

/// Extracts the session cookie value from a response, if one is present.
fn session_cookie(response: &ureq::Response) -> Option<String> {
    for header in response.all("set-cookie") {
        let Some(rest) = header.strip_prefix(SESSION_COOKIE) else {
            continue;
        };
        let Some(value) = rest.strip_prefix('=') else {
            continue;
        };
        let value = value.split(';').next().unwrap_or("").trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Status label for a request that failed; `0` means no response at all.
fn error_status(err: &ureq::Error) -> u16 {
    match err {
        ureq::Error::Status(status, _) => *status,
        ureq::Error::Transport(_) => 0,
    }
}

fn to_client_error(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(status, _) => ClientError::Http { status },
        ureq::Error::Transport(t) => ClientError::Transport(t.to_string()),
    }
}

/// Reads a bounded response body and decodes it as JSON.
fn read_json<T: DeserializeOwned>(response: ureq::Response) -> Result<T, ClientError> {
    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_BODY_BYTES as u64)
        .read_to_end(&mut body)
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    if body.len() >= MAX_BODY_BYTES {
        return Err(ClientError::OversizedBody);
    }
    let mut deserializer = serde_json::Deserializer::from_slice(&body);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_json_rejects_oversized_bodies() {
        let body = "x".repeat(MAX_BODY_BYTES + 16);
        let response = ureq::Response::new(200, "OK", &body).expect("response");
        let result: Result<ActionResponse, ClientError> = read_json(response);
        assert!(matches!(result, Err(ClientError::OversizedBody)));
    }

    #[test]
    fn read_json_names_the_failing_field() {
        let response = ureq::Response::new(200, "OK", r#"{"result":"success","refresh":"not-a-bool"}"#).expect("response");
        let result: Result<ActionResponse, ClientError> = read_json(response);
        match result {
            Err(ClientError::Decode(message)) => assert!(message.contains("refresh"), "message: {}", message),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn read_json_accepts_a_normal_action_response() {
        let response =
            ureq::Response::new(200, "OK", r#"{"result":"success","refresh":false,"errors":{}}"#).expect("response");
        let action: ActionResponse = read_json(response).expect("decode");
        assert!(action.is_success());
    }

    #[test]
    fn session_cookie_is_extracted_from_set_cookie_headers() {
        let response = "HTTP/1.1 200 OK\r\nSet-Cookie: OTHER=1\r\nSet-Cookie: PHPSESSID=abc123; Path=/; HttpOnly\r\n\r\n{}"
            .parse::<ureq::Response>()
            .expect("response");
        assert_eq!(session_cookie(&response), Some("abc123".to_string()));
    }

    #[test]
    fn response_without_session_cookie_yields_none() {
        let response = "HTTP/1.1 200 OK\r\n\r\n{}".parse::<ureq::Response>().expect("response");
        assert_eq!(session_cookie(&response), None);
    }

    #[test]
    fn constructor_rejects_non_http_urls() {
        let metrics = Arc::new(Metrics::new().expect("registry"));
        let result = DeviceClient::new("ftp://192.168.1.20", "dev", "secret", metrics, true);
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }
}
