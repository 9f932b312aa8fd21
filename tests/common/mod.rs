//! Shared test infrastructure for integration tests
//!
//! Provides TestServer (memory and filesystem backends, open or signed),
//! raw HTTP helpers, and data generators.

#![allow(dead_code)]

use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region, RequestChecksumCalculation};
use aws_sdk_s3::Client;
use rand::{Rng, SeedableRng};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// Port counter to avoid conflicts between tests.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19400);

/// Credentials configured on signed test servers
pub const ACCESS_KEY: &str = "test";
pub const SECRET_KEY: &str = "test";

/// Test server wrapper that spawns a real s3_gateway binary
pub struct TestServer {
    process: Child,
    port: u16,
    _data_dir: TempDir,
    bucket: String,
}

impl TestServer {
    // ── Factory methods ──

    /// Open gateway over a filesystem backend
    pub async fn filesystem() -> Self {
        Self::filesystem_with("").await
    }

    /// Filesystem backend; every request must carry a valid signature
    pub async fn filesystem_with_auth() -> Self {
        Self::filesystem_with(&format!(
            "access_key_id = \"{}\"\nsecret_access_key = \"{}\"\n",
            ACCESS_KEY, SECRET_KEY
        ))
        .await
    }

    /// Filesystem backend with a custom max object size
    pub async fn filesystem_with_max_object_size(max_size: u64) -> Self {
        Self::filesystem_with(&format!("max_object_size = {}\n", max_size)).await
    }

    /// Filesystem backend with a small minimum multipart part size
    pub async fn filesystem_with_min_part_size(min_part_size: u64) -> Self {
        let data_dir = TempDir::new().expect("Failed to create temp dir");
        let config = format!(
            "[backend]\ntype = \"filesystem\"\npath = \"{}\"\nmin_part_size = {}\n",
            data_dir.path().join("data").display(),
            min_part_size
        );
        Self::spawn_with_config(&config, "bucket", data_dir).await
    }

    /// Open gateway over the in-memory backend
    pub async fn memory() -> Self {
        let data_dir = TempDir::new().expect("Failed to create temp dir");
        Self::spawn_with_config("[backend]\ntype = \"memory\"\n", "bucket", data_dir).await
    }

    /// `settings` are top-level TOML keys placed before the backend table.
    async fn filesystem_with(settings: &str) -> Self {
        let data_dir = TempDir::new().expect("Failed to create temp dir");
        let config = format!(
            "{}\n[backend]\ntype = \"filesystem\"\npath = \"{}\"\n",
            settings,
            data_dir.path().join("data").display()
        );
        Self::spawn_with_config(&config, "bucket", data_dir).await
    }

    // ── Shared spawn logic ──

    /// Allocate a port, write a TOML config, spawn the gateway, wait for
    /// readiness, and create the test bucket.
    async fn spawn_with_config(config_body: &str, bucket: &str, data_dir: TempDir) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);

        let full_config = format!("listen_addr = \"127.0.0.1:{}\"\n{}", port, config_body);
        let config_path = data_dir.path().join("test.toml");
        std::fs::write(&config_path, &full_config).expect("Failed to write test config");

        let process = Command::new(env!("CARGO_BIN_EXE_s3_gateway"))
            .env("S3GW_CONFIG", &config_path)
            .env("RUST_LOG", "s3_gateway=warn")
            .spawn()
            .expect("Failed to start server");

        let mut server = Self {
            process,
            port,
            _data_dir: data_dir,
            bucket: bucket.to_string(),
        };
        server.wait_ready().await;
        server.ensure_bucket().await;
        server
    }

    // ── Instance methods ──

    async fn wait_ready(&mut self) {
        let addr = format!("127.0.0.1:{}", self.port);
        for _ in 0..150 {
            if std::net::TcpStream::connect(&addr).is_ok() {
                sleep(Duration::from_millis(100)).await;
                return;
            }

            if let Ok(Some(status)) = self.process.try_wait() {
                panic!("Server exited before becoming ready: {}", status);
            }

            sleep(Duration::from_millis(100)).await;
        }

        let _ = self.process.kill();
        panic!("Timed out waiting for server on {}", addr);
    }

    async fn ensure_bucket(&self) {
        let client = self.s3_client().await;
        let _ = client.create_bucket().bucket(&self.bucket).send().await;
    }

    /// S3 client signing with the test credentials
    pub async fn s3_client(&self) -> Client {
        self.s3_client_with(ACCESS_KEY, SECRET_KEY).await
    }

    /// S3 client signing with arbitrary credentials
    pub async fn s3_client_with(&self, access_key: &str, secret_key: &str) -> Client {
        let credentials = Credentials::new(access_key, secret_key, None, None, "test");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(self.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();

        Client::from_conf(config)
    }

    /// Get the HTTP endpoint URL
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// URL of an object in the test bucket
    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint(), self.bucket, key)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

// === Shared HTTP helpers (reqwest, unsigned) ===

/// PUT an object via reqwest and return the response.
pub async fn put_object(
    client: &reqwest::Client,
    endpoint: &str,
    bucket: &str,
    key: &str,
    data: Vec<u8>,
    content_type: &str,
) -> reqwest::Response {
    let url = format!("{}/{}/{}", endpoint, bucket, key);
    let resp = client
        .put(&url)
        .header("content-type", content_type)
        .body(data)
        .send()
        .await
        .expect("PUT failed");
    assert!(
        resp.status().is_success(),
        "PUT {} failed: {}",
        key,
        resp.status()
    );
    resp
}

/// GET an object and return the body bytes.
pub async fn get_bytes(
    client: &reqwest::Client,
    endpoint: &str,
    bucket: &str,
    key: &str,
) -> Vec<u8> {
    let url = format!("{}/{}/{}", endpoint, bucket, key);
    let resp = client.get(&url).send().await.expect("GET failed");
    assert!(
        resp.status().is_success(),
        "GET {} failed: {}",
        key,
        resp.status()
    );
    resp.bytes().await.unwrap().to_vec()
}

/// Make a raw ListObjectsV2 request and return the XML body.
pub async fn list_objects_raw(
    client: &reqwest::Client,
    endpoint: &str,
    bucket: &str,
    params: &str,
) -> String {
    let url = format!("{}/{}?list-type=2&{}", endpoint, bucket, params);
    let resp = client.get(&url).send().await.unwrap();
    assert!(
        resp.status().is_success(),
        "ListObjects failed: {}",
        resp.status()
    );
    resp.text().await.unwrap()
}

/// Text of the first `<tag>` element in an XML body.
pub fn xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

// === Data generators ===

/// Generate deterministic binary data
pub fn generate_binary(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    data
}
