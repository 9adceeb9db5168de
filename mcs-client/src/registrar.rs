//! Push-token registration.
//!
//! A token binds a sender (the application server's project number) to this
//! device. Registration and unregistration share one form-encoded endpoint;
//! the reply is plain text, either `token=<value>` or `Error=<code>`.

use crate::config::ClientConfig;
use crate::error::{ClientError, TOO_MANY_REGISTRATIONS};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mcs_protocol::CHROME_VERSION;
use mcs_storage::Credentials;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Attempts per request before giving up.
pub const MAX_ATTEMPTS: u32 = 5;

/// Pause between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Application package the registration is made for.
pub const APP_PACKAGE: &str = "org.chromium.linux";

const ERROR_PREFIX: &str = "Error=";
const TOKEN_PREFIX: &str = "token=";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of a registered app instance.
///
/// Keep it: unregistering needs the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Reuse an existing app instead of minting a new one.
    pub app: Option<AppInfo>,
    /// Token lifetime requested from the server.
    pub ttl: Option<Duration>,
}

impl RegisterOptions {
    pub fn with_app(mut self, app: AppInfo) -> Self {
        self.app = Some(app);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterResult {
    pub token: String,
    pub app: AppInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<SystemTime>,
}

/// Classified registration reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterResponse {
    Token(String),
    Error(String),
    /// Neither a token nor an error, as returned for a successful delete.
    Other(String),
}

/// Classifies a reply body. An error marker anywhere wins over a token.
pub fn parse_response(body: &str) -> RegisterResponse {
    let body = body.trim_end();
    if let Some(idx) = body.find(ERROR_PREFIX) {
        return RegisterResponse::Error(body[idx + ERROR_PREFIX.len()..].to_string());
    }
    if let Some(idx) = body.find(TOKEN_PREFIX) {
        return RegisterResponse::Token(body[idx + TOKEN_PREFIX.len()..].to_string());
    }
    RegisterResponse::Other(body.to_string())
}

/// Mints an instance id: 8 random bytes, top nibble forced to 0x7.
pub fn create_instance_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    bytes[0] = (bytes[0] & 0x0f) | 0x70;
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `Authorization` header value for the device.
pub fn auth_header(credentials: &Credentials) -> String {
    format!(
        "AidLogin {}:{}",
        credentials.android_id, credentials.security_token
    )
}

/// Major component of the emulated Chrome version.
fn chrome_major_version() -> &'static str {
    CHROME_VERSION.split('.').next().unwrap_or(CHROME_VERSION)
}

/// Builds the form fields for one attempt.
pub fn build_form(
    credentials: &Credentials,
    sender: &str,
    app: &AppInfo,
    delete: bool,
    ttl: Option<Duration>,
) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("scope", "GCM".to_string()),
        ("X-scope", "GCM".to_string()),
        ("sender", sender.to_string()),
        ("gmsv", chrome_major_version().to_string()),
        ("app", APP_PACKAGE.to_string()),
        ("X-subtype", app.app_id.clone()),
        ("device", credentials.android_id.to_string()),
        ("appid", app.instance_id.clone()),
    ];
    if delete {
        form.push(("delete", "true".to_string()));
    }
    if let Some(ttl) = ttl {
        form.push(("ttl", ttl.as_secs().to_string()));
    }
    form
}

/// Registers and unregisters push tokens for one device.
#[derive(Debug, Clone)]
pub struct Registrar {
    http: reqwest::Client,
    url: String,
    credentials: Credentials,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Registrar {
    pub fn new(credentials: Credentials, url: impl Into<String>) -> Result<Self, ClientError> {
        if !credentials.is_valid() {
            return Err(ClientError::NotCheckedIn);
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            credentials,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn from_config(credentials: Credentials, config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(credentials, config.register_url.clone())
    }

    /// Overrides the retry schedule.
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Obtains a token for `sender`.
    pub async fn register(
        &self,
        sender: &str,
        options: RegisterOptions,
    ) -> Result<RegisterResult, ClientError> {
        let app_id = options
            .app
            .as_ref()
            .map(|a| a.app_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let fixed_instance = options.app.map(|a| a.instance_id);

        let (response, instance_id) = self
            .send_with_retry(sender, &app_id, fixed_instance.as_deref(), false, options.ttl)
            .await?;

        let RegisterResponse::Token(token) = response else {
            return Err(ClientError::MissingToken);
        };
        tracing::info!("Registered app {} for sender {}", app_id, sender);
        Ok(RegisterResult {
            token,
            app: AppInfo {
                app_id,
                instance_id,
            },
            expiry: options.ttl.map(|ttl| SystemTime::now() + ttl),
        })
    }

    /// Revokes the token previously issued to `app` for `sender`.
    pub async fn unregister(&self, sender: &str, app: &AppInfo) -> Result<(), ClientError> {
        self.send_with_retry(sender, &app.app_id, Some(&app.instance_id), true, None)
            .await?;
        tracing::info!("Unregistered app {} for sender {}", app.app_id, sender);
        Ok(())
    }

    /// Posts the form until it is accepted, returning the reply and the
    /// instance id of the accepted attempt.
    async fn send_with_retry(
        &self,
        sender: &str,
        app_id: &str,
        instance_id: Option<&str>,
        delete: bool,
        ttl: Option<Duration>,
    ) -> Result<(RegisterResponse, String), ClientError> {
        let op = if delete { "Unregister" } else { "Register" };
        let mut attempt = 1;
        loop {
            let app = AppInfo {
                app_id: app_id.to_string(),
                instance_id: instance_id.map(str::to_string).unwrap_or_else(create_instance_id),
            };

            let err = match self.post(sender, &app, delete, ttl).await {
                Ok(RegisterResponse::Error(code)) => ClientError::Registration(code),
                Ok(response) => return Ok((response, app.instance_id)),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                tracing::warn!("{} request failed after {} attempt(s): {}", op, attempt, err);
                return Err(err);
            }
            tracing::warn!("Retry {}; {} request failed with: {}", attempt, op, err);
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn post(
        &self,
        sender: &str,
        app: &AppInfo,
        delete: bool,
        ttl: Option<Duration>,
    ) -> Result<RegisterResponse, ClientError> {
        let form = build_form(&self.credentials, sender, app, delete, ttl);
        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, auth_header(&self.credentials))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!("Registration reply {}: {}", status, body.trim_end());
        Ok(parse_response(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new(4_242_424_242, 7)
    }

    fn app() -> AppInfo {
        AppInfo {
            app_id: "wp:app".to_string(),
            instance_id: "cA1b2C3d4E8".to_string(),
        }
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(
            parse_response("token=abc:DEF-123\n"),
            RegisterResponse::Token("abc:DEF-123".to_string())
        );
    }

    #[test]
    fn test_parse_error_wins() {
        assert_eq!(
            parse_response("token=x\nError=PHONE_REGISTRATION_ERROR"),
            RegisterResponse::Error("PHONE_REGISTRATION_ERROR".to_string())
        );
        assert_eq!(
            parse_response("Error=TOO_MANY_REGISTRATIONS"),
            RegisterResponse::Error(TOO_MANY_REGISTRATIONS.to_string())
        );
    }

    #[test]
    fn test_parse_other() {
        assert_eq!(
            parse_response("deleted=wp:app"),
            RegisterResponse::Other("deleted=wp:app".to_string())
        );
    }

    #[test]
    fn test_instance_id_shape() {
        for _ in 0..64 {
            let id = create_instance_id();
            assert_eq!(id.len(), 11);
            let bytes = URL_SAFE_NO_PAD.decode(&id).unwrap();
            assert_eq!(bytes.len(), 8);
            assert_eq!(bytes[0] >> 4, 0x7);
            // 0x7_ always encodes to a leading c, d, e or f
            assert!("cdef".contains(&id[..1]));
        }
    }

    #[test]
    fn test_auth_header() {
        assert_eq!(auth_header(&creds()), "AidLogin 4242424242:7");
    }

    #[test]
    fn test_register_form() {
        let form = build_form(&creds(), "123456", &app(), false, None);
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("scope"), Some("GCM"));
        assert_eq!(get("X-scope"), Some("GCM"));
        assert_eq!(get("sender"), Some("123456"));
        assert_eq!(get("gmsv"), Some("101"));
        assert_eq!(get("app"), Some(APP_PACKAGE));
        assert_eq!(get("X-subtype"), Some("wp:app"));
        assert_eq!(get("device"), Some("4242424242"));
        assert_eq!(get("appid"), Some("cA1b2C3d4E8"));
        assert_eq!(get("delete"), None);
        assert_eq!(get("ttl"), None);
    }

    #[test]
    fn test_unregister_form_with_ttl() {
        let form = build_form(&creds(), "1", &app(), true, Some(Duration::from_secs(3600)));
        assert!(form.contains(&("delete", "true".to_string())));
        assert!(form.contains(&("ttl", "3600".to_string())));
    }

    #[test]
    fn test_requires_credentials() {
        let err = Registrar::new(Credentials::new(0, 0), "http://localhost").unwrap_err();
        assert!(matches!(err, ClientError::NotCheckedIn));
    }

    #[test]
    fn test_retry_floor() {
        let registrar = Registrar::new(creds(), "http://localhost")
            .unwrap()
            .with_retry(0, Duration::ZERO);
        assert_eq!(registrar.max_attempts, 1);
    }
}
