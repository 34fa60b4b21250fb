use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use repurposer::transcribe::{MediaDownloader, TranscriptionError};

/// Smallest byte prefix recognised as an MP4 container
pub const MP4_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00";

#[derive(Clone)]
pub struct MockDownloader {
    pub body: Vec<u8>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockDownloader {
    fn default() -> Self {
        Self {
            body: MP4_BYTES.to_vec(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MediaDownloader for MockDownloader {
    async fn download(&self, url: &str, _max_bytes: u64) -> Result<Vec<u8>, TranscriptionError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(self.body.clone())
    }
}
