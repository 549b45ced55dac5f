#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use growcery_scan::classify::{BoundaryResponse, ClassificationTransport, MultipartRequest};
use growcery_scan::config::Config;
use growcery_scan::error::{ClassifyError, StoreError};
use growcery_scan::models::{Crop, NewCrop, NewProduce, PersistableRecord, Produce, Profile, UserRole};
use growcery_scan::persistence::{MemoryRecordStore, RecordStore};
use growcery_scan::still_camera::StillImageBackend;

/// Frame whose left and right halves differ, so reflections are detectable.
pub fn asymmetric_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, if x < width / 3 { 255 } else { 0 }, 255])
    })
}

pub fn mocked_camera() -> Arc<StillImageBackend> {
    Arc::new(StillImageBackend::new(asymmetric_frame(640, 480), "Back Camera"))
}

pub fn profile(role: UserRole) -> Profile {
    Profile {
        user_id: "owner-1".to_string(),
        first_name: "Riley".to_string(),
        last_name: None,
        email: "riley@example.com".to_string(),
        user_type: role,
        location: Some("Orlando, Florida".to_string()),
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.camera.metadata_timeout_ms = 200;
    config
}

/// Transport that replays canned responses and records every request.
pub struct ScriptedTransport {
    responses: Mutex<Vec<Result<BoundaryResponse, ClassifyError>>>,
    pub requests: Mutex<Vec<MultipartRequest>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<BoundaryResponse, ClassifyError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Holds every response until `gate` is notified.
    pub fn gated(responses: Vec<Result<BoundaryResponse, ClassifyError>>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl ClassificationTransport for ScriptedTransport {
    async fn post_multipart(&self, request: MultipartRequest) -> Result<BoundaryResponse, ClassifyError> {
        self.requests.lock().await.push(request);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            return Err(ClassifyError::Transport("no scripted response left".to_string()));
        }
        responses.remove(0)
    }
}

pub fn json_response(status: u16, body: serde_json::Value) -> Result<BoundaryResponse, ClassifyError> {
    Ok(BoundaryResponse { status, body: body.to_string() })
}

/// Store that records what it was asked to create.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryRecordStore,
    pub created: Mutex<Vec<PersistableRecord>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn created(&self) -> Vec<PersistableRecord> {
        self.created.lock().await.clone()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn create_produce(&self, owner_id: &str, record: &NewProduce) -> Result<Produce, StoreError> {
        self.created.lock().await.push(PersistableRecord::Produce(record.clone()));
        self.inner.create_produce(owner_id, record).await
    }

    async fn list_produce(&self, owner_id: &str) -> Result<Vec<Produce>, StoreError> {
        self.inner.list_produce(owner_id).await
    }

    async fn delete_produce(&self, owner_id: &str, produce_id: &str) -> Result<(), StoreError> {
        self.inner.delete_produce(owner_id, produce_id).await
    }

    async fn create_crop(&self, owner_id: &str, record: &NewCrop) -> Result<Crop, StoreError> {
        self.created.lock().await.push(PersistableRecord::Crop(record.clone()));
        self.inner.create_crop(owner_id, record).await
    }

    async fn list_crops(&self, owner_id: &str) -> Result<Vec<Crop>, StoreError> {
        self.inner.list_crops(owner_id).await
    }

    async fn delete_crop(&self, owner_id: &str, crop_id: &str) -> Result<(), StoreError> {
        self.inner.delete_crop(owner_id, crop_id).await
    }

    async fn create_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        self.inner.create_profile(profile).await
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        self.inner.get_profile(user_id).await
    }

    async fn update_role(&self, user_id: &str, role: UserRole) -> Result<(), StoreError> {
        self.inner.update_role(user_id, role).await
    }

    async fn update_location(&self, user_id: &str, location: &str) -> Result<(), StoreError> {
        self.inner.update_location(user_id, location).await
    }
}

/// Reads one HTTP request (headers and body) off the socket.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok());
    let chunked = headers.contains("transfer-encoding: chunked");

    loop {
        let body = &raw[header_end..];
        let complete = match content_length {
            Some(len) => body.len() >= len,
            None if chunked => body.ends_with(b"0\r\n\r\n"),
            None => true,
        };
        if complete {
            break;
        }
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }

    String::from_utf8_lossy(&raw).into_owned()
}

/// Serves canned responses in order, one connection each, and hands back
/// the raw requests it saw. Returns the base URL (`http://127.0.0.1:<port>`).
pub async fn serve_sequence(responses: Vec<(&'static str, String)>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        requests
    });

    (base_url, handle)
}

pub async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<Vec<String>>) {
    serve_sequence(vec![(status, body)]).await
}
