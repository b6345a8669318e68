//! Object storage for rehosted article media.
//!
//! | Kind | Writes to | Returned URL |
//! |------|-----------|--------------|
//! | `local` | `storage.dir/<name>` | `public_base_url/<name>` |
//! | `s3` | signed `PUT` to the bucket (SigV4) | `public_base_url/<name>` |
//! | `disabled` | nothing, rehosting is skipped | n/a |
//!
//! S3 credentials are read from `AWS_ACCESS_KEY_ID`,
//! `AWS_SECRET_ACCESS_KEY` and optionally `AWS_SESSION_TOKEN`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

/// Destination for downloaded media.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `name` and return its public URL.
    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Whether `url` already points into this store.
    fn owns(&self, url: &str) -> bool;
}

/// Build the configured store, or `None` when rehosting is disabled.
pub fn from_config(config: &StorageConfig) -> Result<Option<Arc<dyn ObjectStore>>> {
    let base = || {
        config
            .public_base_url
            .clone()
            .context("storage.public_base_url is required")
    };
    match config.kind.as_str() {
        "disabled" => Ok(None),
        "local" => {
            let dir = config.dir.clone().context("storage.dir is required")?;
            Ok(Some(Arc::new(LocalObjectStore::new(dir, base()?))))
        }
        "s3" => {
            let bucket = config.bucket.clone().context("storage.bucket is required")?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs.max(1)))
                .build()
                .context("building storage client")?;
            Ok(Some(Arc::new(S3ObjectStore {
                bucket,
                region: config.region.clone(),
                endpoint_url: config.endpoint_url.clone(),
                public_base_url: base()?,
                client,
            })))
        }
        other => bail!("Unknown storage kind: '{}'", other),
    }
}

fn public_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

pub struct LocalObjectStore {
    dir: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(dir: PathBuf, public_base_url: String) -> Self {
        Self {
            dir,
            public_base_url,
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, name: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        if name.contains('/') || name.contains("..") {
            bail!("invalid object name: {}", name);
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(public_url(&self.public_base_url, name))
    }

    fn owns(&self, url: &str) -> bool {
        url.starts_with(self.public_base_url.trim_end_matches('/'))
    }
}

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3ObjectStore {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    public_base_url: String,
    client: reqwest::Client,
}

impl S3ObjectStore {
    /// Host and canonical URI for `name`. Custom endpoints use path-style
    /// addressing.
    fn target(&self, name: &str) -> (String, String, String) {
        let key = uri_encode(name);
        match self.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") { "http" } else { "https" };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (scheme.to_string(), host, format!("/{}/{}", self.bucket, key))
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{}", key),
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let creds = AwsCredentials::from_env()?;
        self.put_signed(&creds, name, bytes, content_type).await
    }

    fn owns(&self, url: &str) -> bool {
        url.starts_with(self.public_base_url.trim_end_matches('/'))
    }
}

impl S3ObjectStore {
    async fn put_signed(
        &self,
        creds: &AwsCredentials,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let (scheme, host, canonical_uri) = self.target(name);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(&bytes);

        let authorization = sign_put(
            creds,
            &self.region,
            &SignInput {
                host: &host,
                canonical_uri: &canonical_uri,
                content_type,
                payload_hash: &payload_hash,
                amz_date: &amz_date,
                date_stamp: &date_stamp,
            },
        )?;

        let url = format!("{}://{}{}", scheme, host, canonical_uri);
        let mut req = self
            .client
            .put(&url)
            .header("Authorization", &authorization)
            .header("Content-Type", content_type)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req
            .body(bytes)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to put s3://{}/{}: {}", self.bucket, name, e))?;
        if !resp.status().is_success() {
            bail!("S3 PutObject failed (HTTP {}) for key '{}'", resp.status(), name);
        }
        Ok(public_url(&self.public_base_url, name))
    }
}

struct SignInput<'a> {
    host: &'a str,
    canonical_uri: &'a str,
    content_type: &'a str,
    payload_hash: &'a str,
    amz_date: &'a str,
    date_stamp: &'a str,
}

/// Authorization header value for a SigV4-signed `PUT`.
fn sign_put(creds: &AwsCredentials, region: &str, input: &SignInput) -> Result<String> {
    let mut headers = vec![
        ("content-type".to_string(), input.content_type.to_string()),
        ("host".to_string(), input.host.to_string()),
        ("x-amz-content-sha256".to_string(), input.payload_hash.to_string()),
        ("x-amz-date".to_string(), input.amz_date.to_string()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "PUT\n{}\n\n{}\n{}\n{}",
        input.canonical_uri, canonical_headers, signed_headers, input.payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", input.date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        input.amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, input.date_stamp, region, "s3")?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    ))
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| anyhow::anyhow!("hmac key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding, unreserved characters kept.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_store_writes_and_returns_public_url() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path().join("media"), "https://cdn.test/m/".into());

        let url = store.put("1700-a.png", vec![1, 2, 3], "image/png").await.unwrap();
        assert_eq!(url, "https://cdn.test/m/1700-a.png");
        assert_eq!(std::fs::read(tmp.path().join("media/1700-a.png")).unwrap(), vec![1, 2, 3]);
        assert!(store.owns(&url));
        assert!(!store.owns("https://elsewhere.test/a.png"));
    }

    #[tokio::test]
    async fn test_local_store_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path().to_path_buf(), "https://cdn.test".into());
        assert!(store.put("../x.png", vec![0], "image/png").await.is_err());
    }

    #[test]
    fn test_signing_key_matches_aws_reference() {
        // From the AWS SigV4 documentation example.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_path_style_target_for_custom_endpoint() {
        let store = S3ObjectStore {
            bucket: "media".into(),
            region: "us-east-1".into(),
            endpoint_url: Some("http://localhost:9000/".into()),
            public_base_url: "http://localhost:9000/media".into(),
            client: reqwest::Client::new(),
        };
        let (scheme, host, uri) = store.target("a b.png");
        assert_eq!(scheme, "http");
        assert_eq!(host, "localhost:9000");
        assert_eq!(uri, "/media/a%20b.png");
    }

    #[tokio::test]
    async fn test_s3_upload_gives_up_on_stalled_endpoint() {
        // Accepts the connection, never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let config = StorageConfig {
            kind: "s3".into(),
            bucket: Some("media".into()),
            endpoint_url: Some(format!("http://{}", addr)),
            public_base_url: Some("http://cdn.test/media".into()),
            timeout_secs: 1,
            ..Default::default()
        };
        let Some(store) = from_config(&config).unwrap() else {
            panic!("s3 store expected");
        };
        assert!(!store.owns("http://elsewhere.test/a.png"));

        let s3 = S3ObjectStore {
            bucket: "media".into(),
            region: "us-east-1".into(),
            endpoint_url: Some(format!("http://{}", addr)),
            public_base_url: "http://cdn.test/media".into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap(),
        };
        let creds = AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        };
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            s3.put_signed(&creds, "a.png", vec![1, 2, 3], "image/png"),
        )
        .await
        .expect("upload must time out on its own");
        assert!(result.is_err());
    }
}
