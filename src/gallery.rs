use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::filters::FilterSet;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5001";
pub const FILTERS_PATH: &str = "/api/gallery/filters";
pub const VIDEOS_PATH: &str = "/api/gallery/videos";
pub const CHAT_PATH: &str = "/api/chat";

#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    #[error("gallery: transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gallery: request failed with {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("gallery: decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("gallery: invalid url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// One gallery entry as the backend returns it.
///
/// Every field is optional and fields of the wrong JSON type are treated as
/// absent, so a single odd row never fails a whole page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub platform: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub note: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(
        default,
        rename = "file_path",
        alias = "filePath",
        deserialize_with = "lenient_string"
    )]
    pub file_path: Option<String>,
}

impl Item {
    /// Comma-separated tags, trimmed, empties dropped.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Summary text for the feed; chat recommendations only carry a note.
    pub fn summary_text(&self) -> &str {
        non_empty(self.summary.as_deref())
            .or_else(|| non_empty(self.note.as_deref()))
            .unwrap_or("")
    }

    pub fn title_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        non_empty(self.title.as_deref()).unwrap_or(fallback)
    }

    pub fn platform_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        non_empty(self.platform.as_deref()).unwrap_or(fallback)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Available values per filter category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(default)]
    pub platform: Vec<String>,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideosRequest {
    pub filters: FilterSet,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub recommendations_with_notes: Option<Vec<Item>>,
    #[serde(default)]
    pub other_recommendations: Option<Vec<Item>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    /// Noted recommendations first, then the rest.
    pub fn recommendations(&self) -> Vec<Item> {
        self.recommendations_with_notes
            .iter()
            .flatten()
            .chain(self.other_recommendations.iter().flatten())
            .cloned()
            .collect()
    }
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, GalleryError> {
        let base = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL
        } else {
            config.base_url.trim()
        };
        let base_url = Url::parse(base)?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        let user_agent = if config.user_agent.trim().is_empty() {
            format!("gallery-tui/{}", crate::VERSION)
        } else {
            config.user_agent
        };

        Ok(Client {
            http,
            user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn filter_options(&self) -> Result<FilterOptions, GalleryError> {
        let url = self.base_url.join(FILTERS_PATH)?;
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()?;
        decode(response)
    }

    pub fn videos(&self, request: &VideosRequest) -> Result<Vec<Item>, GalleryError> {
        let url = self.base_url.join(VIDEOS_PATH)?;
        let response = self
            .http
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .json(request)
            .send()?;
        decode(response)
    }

    pub fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GalleryError> {
        let url = self.base_url.join(CHAT_PATH)?;
        let response = self
            .http
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .json(request)
            .send()?;

        // The chat endpoint reports its own failures as `{ "error": .. }`
        // with a 4xx/5xx status; hand those back as a regular reply.
        let status = response.status();
        let body = response.text()?;
        match serde_json::from_str::<ChatResponse>(&body) {
            Ok(reply) if status.is_success() || reply.error.is_some() => Ok(reply),
            Ok(_) => Err(GalleryError::Status { status, body }),
            Err(err) if status.is_success() => Err(GalleryError::Decode(err)),
            Err(_) => Err(GalleryError::Status { status, body }),
        }
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GalleryError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(GalleryError::Status { status, body });
    }
    let body = response.text()?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    use crate::filters::FilterCategory;

    fn serve_once(status: u16, body: &'static str) -> (String, thread::JoinHandle<(String, String)>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = thread::spawn(move || {
            let mut request = server.recv().unwrap();
            let mut received = String::new();
            request.as_reader().read_to_string(&mut received).unwrap();
            let path = request.url().to_string();
            let header =
                tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                    .unwrap();
            let response = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(header);
            request.respond(response).unwrap();
            (path, received)
        });
        (format!("http://{addr}"), handle)
    }

    fn client(base_url: String) -> Client {
        Client::new(ClientConfig {
            base_url,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn videos_posts_filters_page_and_limit() {
        let (base, handle) = serve_once(
            200,
            r#"[{"title":"One","file_path":"/x/All Files/a.mp4"},{"title":"Two"}]"#,
        );
        let mut filters = FilterSet::default();
        filters.toggle(FilterCategory::Platform, "TikTok");
        let items = client(base)
            .videos(&VideosRequest {
                filters,
                page: 2,
                limit: 50,
            })
            .unwrap();
        let (path, body) = handle.join().unwrap();

        assert_eq!(path, VIDEOS_PATH);
        let sent: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(sent["page"], 2);
        assert_eq!(sent["limit"], 50);
        assert_eq!(sent["filters"]["platform"][0], "TikTok");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].file_path.as_deref(), Some("/x/All Files/a.mp4"));
    }

    #[test]
    fn non_success_status_is_reported() {
        let (base, handle) = serve_once(500, r#"{"error":"boom"}"#);
        let err = client(base).filter_options().unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, GalleryError::Status { .. }));
    }

    #[test]
    fn chat_error_body_is_returned_as_reply() {
        let (base, handle) = serve_once(413, r#"{"error":"too large"}"#);
        let reply = client(base)
            .chat(&ChatRequest {
                query: "q".into(),
                session_id: "abc".into(),
            })
            .unwrap();
        handle.join().unwrap();
        assert_eq!(reply.error.as_deref(), Some("too large"));
    }

    #[test]
    fn malformed_fields_degrade_to_absent() {
        let item: Item = serde_json::from_str(
            r#"{"title":"ok","tags":["not","a","string"],"file_path":null,"id":"7"}"#,
        )
        .unwrap();
        assert_eq!(item.title.as_deref(), Some("ok"));
        assert!(item.tags.is_none());
        assert!(item.file_path.is_none());
        assert_eq!(item.id, Some(7));
    }

    #[test]
    fn accepts_camel_case_file_path() {
        let item: Item = serde_json::from_str(r#"{"filePath":"a/All Files/b.jpg"}"#).unwrap();
        assert_eq!(item.file_path.as_deref(), Some("a/All Files/b.jpg"));
    }

    #[test]
    fn tags_split_and_trimmed() {
        let item = Item {
            tags: Some(" rust, ,tui ,".into()),
            ..Item::default()
        };
        assert_eq!(item.tag_list(), vec!["rust", "tui"]);
    }

    #[test]
    fn summary_falls_back_to_note() {
        let item = Item {
            note: Some("from chat".into()),
            ..Item::default()
        };
        assert_eq!(item.summary_text(), "from chat");
    }

    #[test]
    fn recommendations_keep_noted_first() {
        let reply = ChatResponse {
            recommendations_with_notes: Some(vec![Item {
                title: Some("noted".into()),
                ..Item::default()
            }]),
            other_recommendations: Some(vec![Item {
                title: Some("other".into()),
                ..Item::default()
            }]),
            ..ChatResponse::default()
        };
        let titles: Vec<_> = reply
            .recommendations()
            .into_iter()
            .map(|item| item.title.unwrap_or_default())
            .collect();
        assert_eq!(titles, vec!["noted", "other"]);
    }
}
