//! Device checkin.
//!
//! Checkin issues the long-lived `android_id`/`security_token` pair the MCS
//! login and the registrar authenticate with. A device re-checks in with its
//! previous pair to keep it alive; the server normally echoes the same values.

use crate::config::{ClientConfig, DEFAULT_CHECKIN_INTERVAL_SECS, MIN_CHECKIN_INTERVAL_SECS};
use crate::error::ClientError;
use mcs_protocol::CHROME_VERSION;
use mcs_storage::{CredentialStore, Credentials};
use prost::Message as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Request timeout for a single checkin POST.
const CHECKIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Checkin protocol version sent by desktop Chrome.
const CHECKIN_VERSION: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DeviceType {
    AndroidOs = 1,
    IosOs = 2,
    ChromeBrowser = 3,
    ChromeOs = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Platform {
    Win = 1,
    Mac = 2,
    Linux = 3,
    Cros = 4,
    Ios = 5,
    Android = 6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Channel {
    Stable = 1,
    Beta = 2,
    Dev = 3,
    Canary = 4,
    Unknown = 5,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChromeBuildProto {
    #[prost(enumeration = "Platform", optional, tag = "1")]
    pub platform: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub chrome_version: Option<String>,
    #[prost(enumeration = "Channel", optional, tag = "3")]
    pub channel: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AndroidCheckinProto {
    #[prost(int64, optional, tag = "2")]
    pub last_checkin_msec: Option<i64>,
    #[prost(string, optional, tag = "6")]
    pub cell_operator: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub sim_operator: Option<String>,
    #[prost(string, optional, tag = "8")]
    pub roaming: Option<String>,
    #[prost(int32, optional, tag = "9")]
    pub user_number: Option<i32>,
    #[prost(enumeration = "DeviceType", optional, tag = "12")]
    pub r#type: Option<i32>,
    #[prost(message, optional, tag = "13")]
    pub chrome_build: Option<ChromeBuildProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AndroidCheckinRequest {
    #[prost(int64, optional, tag = "2")]
    pub id: Option<i64>,
    #[prost(string, optional, tag = "3")]
    pub digest: Option<String>,
    #[prost(message, required, tag = "4")]
    pub checkin: AndroidCheckinProto,
    #[prost(string, optional, tag = "6")]
    pub locale: Option<String>,
    #[prost(int64, optional, tag = "7")]
    pub logging_id: Option<i64>,
    #[prost(string, repeated, tag = "9")]
    pub mac_addr: Vec<String>,
    #[prost(string, repeated, tag = "11")]
    pub account_cookie: Vec<String>,
    #[prost(string, optional, tag = "12")]
    pub time_zone: Option<String>,
    #[prost(fixed64, optional, tag = "13")]
    pub security_token: Option<u64>,
    #[prost(int32, optional, tag = "14")]
    pub version: Option<i32>,
    #[prost(string, repeated, tag = "15")]
    pub ota_cert: Vec<String>,
    #[prost(int32, optional, tag = "22")]
    pub user_serial_number: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GservicesSetting {
    #[prost(bytes = "vec", required, tag = "1")]
    pub name: Vec<u8>,
    #[prost(bytes = "vec", required, tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AndroidCheckinResponse {
    #[prost(bool, required, tag = "1")]
    pub stats_ok: bool,
    #[prost(int64, optional, tag = "3")]
    pub time_msec: Option<i64>,
    #[prost(string, optional, tag = "4")]
    pub digest: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub setting: Vec<GservicesSetting>,
    #[prost(bool, optional, tag = "6")]
    pub market_ok: Option<bool>,
    #[prost(fixed64, optional, tag = "7")]
    pub android_id: Option<u64>,
    #[prost(fixed64, optional, tag = "8")]
    pub security_token: Option<u64>,
    #[prost(bool, optional, tag = "9")]
    pub settings_diff: Option<bool>,
    #[prost(string, repeated, tag = "10")]
    pub delete_setting: Vec<String>,
    #[prost(string, optional, tag = "11")]
    pub version_info: Option<String>,
}

/// HTTP client for the checkin endpoint.
#[derive(Debug, Clone)]
pub struct CheckinClient {
    http: reqwest::Client,
    url: String,
}

impl CheckinClient {
    pub fn new(url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(CHECKIN_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(config.checkin_url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Builds the request for a desktop Chrome on Linux.
    ///
    /// Valid prior credentials are echoed so the server keeps the same device.
    pub fn build_request(prior: Option<Credentials>) -> AndroidCheckinRequest {
        let prior = prior.filter(Credentials::is_valid);
        AndroidCheckinRequest {
            user_serial_number: Some(0),
            checkin: AndroidCheckinProto {
                r#type: Some(DeviceType::ChromeBrowser as i32),
                chrome_build: Some(ChromeBuildProto {
                    platform: Some(Platform::Linux as i32),
                    chrome_version: Some(CHROME_VERSION.to_string()),
                    channel: Some(Channel::Stable as i32),
                }),
                ..Default::default()
            },
            version: Some(CHECKIN_VERSION),
            id: prior.map(|c| c.android_id as i64),
            security_token: prior.map(|c| c.security_token),
            ..Default::default()
        }
    }

    /// Extracts credentials from a checkin response body.
    pub fn parse_response(body: &[u8]) -> Result<Credentials, ClientError> {
        let response = AndroidCheckinResponse::decode(body)?;
        let credentials = Credentials::new(
            response.android_id.unwrap_or_default(),
            response.security_token.unwrap_or_default(),
        );
        if !credentials.is_valid() {
            return Err(ClientError::Checkin(
                "response carried no device credentials".to_string(),
            ));
        }
        Ok(credentials)
    }

    /// Performs one checkin.
    pub async fn check_in(&self, prior: Option<Credentials>) -> Result<Credentials, ClientError> {
        let body = Self::build_request(prior).encode_to_vec();
        tracing::debug!("POST {} ({} bytes)", self.url, body.len());

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-protobuf")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;

        let credentials = Self::parse_response(&bytes)?;
        match prior {
            Some(p) if p.android_id != credentials.android_id => {
                tracing::warn!(
                    "Checkin replaced device {} with {}",
                    p.android_id,
                    credentials.android_id
                );
            }
            _ => tracing::info!("Checked in as device {}", credentials.android_id),
        }
        Ok(credentials)
    }

    /// Checks in with the stored credentials and persists the result.
    pub async fn refresh<C>(&self, store: &C) -> Result<Credentials, ClientError>
    where
        C: CredentialStore + ?Sized,
    {
        let prior = store.credentials()?;
        let credentials = self.check_in(prior).await?;
        if prior != Some(credentials) {
            store.set_credentials(credentials)?;
        }
        Ok(credentials)
    }

    /// Interval between periodic checkins: at least 12 hours, 2 days by default.
    pub fn refresh_interval(configured: Option<Duration>) -> Duration {
        match configured {
            Some(d) => d.max(Duration::from_secs(MIN_CHECKIN_INTERVAL_SECS)),
            None => Duration::from_secs(DEFAULT_CHECKIN_INTERVAL_SECS),
        }
    }

    /// Re-checks in every `interval` until the task is aborted.
    ///
    /// The first refresh happens one interval from now; failures are logged
    /// and retried at the next tick.
    pub fn spawn_periodic<C>(self, store: Arc<C>, interval: Duration) -> JoinHandle<()>
    where
        C: CredentialStore + 'static,
    {
        let interval = Self::refresh_interval(Some(interval));
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.refresh(store.as_ref()).await {
                    Ok(c) => tracing::debug!("Periodic checkin ok for {}", c.android_id),
                    Err(e) => tracing::warn!("Periodic checkin failed: {}", e),
                }
            }
        })
    }
}
