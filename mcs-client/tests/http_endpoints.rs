//! Checkin and registrar against a scripted in-process HTTP/1.1 server.

use mcs_client::checkin::{AndroidCheckinRequest, AndroidCheckinResponse, DeviceType};
use mcs_client::{
    AppInfo, CheckinClient, ClientError, CredentialStore, Credentials, MemoryStore,
    RegisterOptions, Registrar,
};
use prost::Message as _;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Captured {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn form(&self) -> Vec<(String, String)> {
        String::from_utf8(self.body.clone())
            .unwrap()
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn form_value(&self, key: &str) -> Option<String> {
        self.form()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Serves one scripted response per connection and returns what it saw.
async fn serve(responses: Vec<Vec<u8>>) -> (String, JoinHandle<Vec<Captured>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let task = tokio::spawn(async move {
        let mut captured = Vec::new();
        for body in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];

            let header_end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "request truncated");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8(buf[..header_end].to_vec()).unwrap();
            let mut lines = head.split("\r\n");
            let request_line = lines.next().unwrap().to_string();
            let headers: Vec<(String, String)> = lines
                .filter_map(|l| l.split_once(':'))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();
            let content_length: usize = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .map(|(_, v)| v.parse().unwrap())
                .unwrap_or(0);

            while buf.len() < header_end + content_length {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "body truncated");
                buf.extend_from_slice(&chunk[..n]);
            }

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
            stream.shutdown().await.ok();

            captured.push(Captured {
                request_line,
                headers,
                body: buf[header_end..header_end + content_length].to_vec(),
            });
        }
        captured
    });

    (base, task)
}

fn creds() -> Credentials {
    Credentials::new(5_555_000_111, 42)
}

#[tokio::test]
async fn test_checkin_round_trip() {
    let reply = AndroidCheckinResponse {
        stats_ok: true,
        android_id: Some(5_555_000_111),
        security_token: Some(42),
        ..Default::default()
    }
    .encode_to_vec();
    let (base, server) = serve(vec![reply]).await;

    let client = CheckinClient::new(format!("{}/checkin", base)).unwrap();
    let store = MemoryStore::new();
    let got = client.refresh(&store).await.unwrap();
    assert_eq!(got, creds());
    assert_eq!(store.credentials().unwrap(), Some(creds()));

    let captured = server.await.unwrap();
    assert_eq!(captured.len(), 1);
    assert!(captured[0].request_line.starts_with("POST /checkin "));
    assert_eq!(
        captured[0].header("content-type"),
        Some("application/x-protobuf")
    );
    let request = AndroidCheckinRequest::decode(captured[0].body.as_slice()).unwrap();
    assert_eq!(request.version, Some(3));
    assert_eq!(request.id, None);
    assert_eq!(
        request.checkin.r#type,
        Some(DeviceType::ChromeBrowser as i32)
    );
}

#[tokio::test]
async fn test_checkin_rejects_empty_credentials() {
    let reply = AndroidCheckinResponse {
        stats_ok: false,
        ..Default::default()
    }
    .encode_to_vec();
    let (base, server) = serve(vec![reply]).await;

    let client = CheckinClient::new(base).unwrap();
    let store = MemoryStore::new();
    let err = client.refresh(&store).await.unwrap_err();
    assert!(matches!(err, ClientError::Checkin(_)));
    assert_eq!(store.credentials().unwrap(), None);
    server.await.unwrap();
}

#[tokio::test]
async fn test_register_retries_then_succeeds() {
    let (base, server) = serve(vec![
        b"Error=PHONE_REGISTRATION_ERROR".to_vec(),
        b"token=fresh-token:APA91b".to_vec(),
    ])
    .await;

    let registrar = Registrar::new(creds(), format!("{}/c2dm/register3", base))
        .unwrap()
        .with_retry(5, Duration::from_millis(10));
    let result = registrar
        .register("1234567890", RegisterOptions::default().with_ttl(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(result.token, "fresh-token:APA91b");
    assert!(result.expiry.is_some());

    let captured = server.await.unwrap();
    assert_eq!(captured.len(), 2);
    for req in &captured {
        assert!(req.request_line.starts_with("POST /c2dm/register3 "));
        assert_eq!(req.header("authorization"), Some("AidLogin 5555000111:42"));
        assert_eq!(
            req.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(req.form_value("sender").as_deref(), Some("1234567890"));
        assert_eq!(req.form_value("device").as_deref(), Some("5555000111"));
        assert_eq!(req.form_value("ttl").as_deref(), Some("60"));
        assert_eq!(
            req.form_value("X-subtype").as_deref(),
            Some(result.app.app_id.as_str())
        );
    }
    // a fresh instance id is minted per attempt; the accepted one is returned
    assert_eq!(
        captured[1].form_value("appid").as_deref(),
        Some(result.app.instance_id.as_str())
    );
}

#[tokio::test]
async fn test_too_many_registrations_is_final() {
    let (base, server) = serve(vec![b"Error=TOO_MANY_REGISTRATIONS".to_vec()]).await;

    let registrar = Registrar::new(creds(), base)
        .unwrap()
        .with_retry(5, Duration::from_millis(10));
    let err = registrar
        .register("1", RegisterOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Registration(ref code) if code == "TOO_MANY_REGISTRATIONS"));
    assert_eq!(server.await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let (base, server) = serve(vec![b"Error=SERVICE_NOT_AVAILABLE".to_vec(); 3]).await;

    let registrar = Registrar::new(creds(), base)
        .unwrap()
        .with_retry(3, Duration::from_millis(10));
    let err = registrar
        .register("1", RegisterOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Registration(_)));
    assert_eq!(server.await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_register_without_token() {
    let (base, server) = serve(vec![b"something unexpected".to_vec()]).await;

    let registrar = Registrar::new(creds(), base).unwrap();
    let err = registrar
        .register("1", RegisterOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::MissingToken));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unregister_reuses_app() {
    let (base, server) = serve(vec![b"deleted=org.chromium.linux".to_vec()]).await;

    let app = AppInfo {
        app_id: "wp-app".to_string(),
        instance_id: "cXyZ12abCD0".to_string(),
    };
    let registrar = Registrar::new(creds(), base).unwrap();
    registrar.unregister("1234567890", &app).await.unwrap();

    let captured = server.await.unwrap();
    assert_eq!(captured[0].form_value("delete").as_deref(), Some("true"));
    assert_eq!(captured[0].form_value("X-subtype").as_deref(), Some("wp-app"));
    assert_eq!(
        captured[0].form_value("appid").as_deref(),
        Some("cXyZ12abCD0")
    );
}
