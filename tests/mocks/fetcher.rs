use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use repurposer::extractors::{FetchError, SourceFetcher};
use repurposer::{MediaType, Platform, SourceContent};

/// Instagram fetcher that returns a fixed reel with downloadable video
#[derive(Clone)]
pub struct MockInstagramFetcher {
    pub caption: String,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockInstagramFetcher {
    pub fn new(caption: &str) -> Self {
        Self {
            caption: caption.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl SourceFetcher for MockInstagramFetcher {
    async fn fetch(&self, url: &str) -> Result<SourceContent, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(SourceContent {
            text: self.caption.clone(),
            source_type: Platform::Instagram,
            media_type: MediaType::Video,
            media_ref: Some("https://cdn.example.com/reel.mp4".to_string()),
            author: Some("creator".to_string()),
            published_at: None,
            video_id: None,
            thumbnail: None,
            title: None,
            description: None,
            transcript: None,
        })
    }

    fn platform(&self) -> Platform {
        Platform::Instagram
    }
}
