use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::gallery::Item;

/// Path segment that separates the server's storage root from the served
/// relative path.
pub const MEDIA_ROOT_SEGMENT: &str = "All Files/";
pub const MEDIA_ROUTE: &str = "/media/";

const VIDEO_EXTENSIONS: [&str; 2] = ["mp4", "mov"];

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}

/// Served location of an item's media.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaRef {
    relative: String,
    kind: MediaKind,
}

impl MediaRef {
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// `/media/<relative>` exactly as the backend routes it.
    pub fn route(&self) -> String {
        format!("{MEDIA_ROUTE}{}", self.relative)
    }

    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn absolute_url(&self, base: &Url) -> Result<Url, url::ParseError> {
        let encoded = self
            .relative
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        base.join(&format!("{MEDIA_ROUTE}{encoded}"))
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.label(), self.route())
    }
}

/// Derives the served media for a stored file path.
///
/// The relative path is whatever follows the first `All Files/` segment (up
/// to a second one, if any). Paths without the segment have no media and
/// render text-only.
pub fn media_ref(file_path: &str) -> Option<MediaRef> {
    let mut parts = file_path.split(MEDIA_ROOT_SEGMENT);
    parts.next();
    let relative = parts.next()?;
    Some(MediaRef {
        relative: relative.to_string(),
        kind: kind_for(file_path),
    })
}

pub fn item_media(item: &Item) -> Option<MediaRef> {
    item.file_path.as_deref().and_then(media_ref)
}

fn kind_for(file_path: &str) -> MediaKind {
    let ext = file_path.rsplit('.').next().unwrap_or_default().to_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Video
    } else {
        MediaKind::Image
    }
}
