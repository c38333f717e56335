use std::sync::Arc;

use crate::gallery::{
    self, ChatRequest, ChatResponse, FilterOptions, GalleryError, Item, VideosRequest,
};

pub trait GalleryService: Send + Sync {
    fn filter_options(&self) -> Result<FilterOptions, GalleryError>;
    fn videos(&self, request: &VideosRequest) -> Result<Vec<Item>, GalleryError>;
}

pub trait ChatService: Send + Sync {
    fn ask(&self, request: &ChatRequest) -> Result<ChatResponse, GalleryError>;
}

pub struct HttpGalleryService {
    client: Arc<gallery::Client>,
}

impl HttpGalleryService {
    pub fn new(client: Arc<gallery::Client>) -> Self {
        Self { client }
    }
}

impl GalleryService for HttpGalleryService {
    fn filter_options(&self) -> Result<FilterOptions, GalleryError> {
        self.client.filter_options()
    }

    fn videos(&self, request: &VideosRequest) -> Result<Vec<Item>, GalleryError> {
        self.client.videos(request)
    }
}

pub struct HttpChatService {
    client: Arc<gallery::Client>,
}

impl HttpChatService {
    pub fn new(client: Arc<gallery::Client>) -> Self {
        Self { client }
    }
}

impl ChatService for HttpChatService {
    fn ask(&self, request: &ChatRequest) -> Result<ChatResponse, GalleryError> {
        self.client.chat(request)
    }
}

/// Offline gallery with a fixed number of generated items, paged the same
/// way the backend pages.
pub struct MockGalleryService {
    total: usize,
}

impl MockGalleryService {
    pub fn new(total: usize) -> Self {
        Self { total }
    }
}

impl Default for MockGalleryService {
    fn default() -> Self {
        Self::new(120)
    }
}

impl GalleryService for MockGalleryService {
    fn filter_options(&self) -> Result<FilterOptions, GalleryError> {
        Ok(FilterOptions {
            platform: vec!["Instagram".into(), "TikTok".into(), "YouTube".into()],
            category: vec!["Cooking".into(), "Fitness".into()],
            types: vec!["video".into(), "image".into()],
            tags: vec!["beginner".into(), "quick".into()],
        })
    }

    fn videos(&self, request: &VideosRequest) -> Result<Vec<Item>, GalleryError> {
        let limit = request.limit.max(1) as usize;
        let offset = (request.page.max(1) as usize - 1) * limit;
        let end = (offset + limit).min(self.total);
        Ok((offset..end).map(mock_item).collect())
    }
}

#[derive(Default)]
pub struct MockChatService;

impl ChatService for MockChatService {
    fn ask(&self, request: &ChatRequest) -> Result<ChatResponse, GalleryError> {
        let mut noted = mock_item(0);
        noted.note = Some(format!("Closest match for \"{}\".", request.query));
        Ok(ChatResponse {
            answer_text: Some("Here is what the gallery has on that.".into()),
            recommendations_with_notes: Some(vec![noted]),
            other_recommendations: Some(vec![mock_item(1), mock_item(2)]),
            error: None,
        })
    }
}

fn mock_item(index: usize) -> Item {
    let ext = match index % 3 {
        0 => "mp4",
        1 => "jpg",
        _ => "mov",
    };
    Item {
        id: Some(index as i64),
        platform: Some(["TikTok", "Instagram", "YouTube"][index % 3].to_string()),
        title: Some(format!("Sample entry #{}", index + 1)),
        summary: Some("Sample content provided for offline browsing.".into()),
        note: None,
        tags: Some("sample, offline".into()),
        category: Some("Demo".into()),
        file_path: Some(format!("/library/All Files/sample-{index}.{ext}")),
    }
}
