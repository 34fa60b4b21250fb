//! The four-field content schema and its repair rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::GenerationError;

/// Number of slides every carousel ends up with
pub const CAROUSEL_LEN: usize = 5;

/// Soft length limit for Threads posts
pub const THREADS_SOFT_LIMIT: usize = 500;

/// A slide in its structured form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichSlide {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// One carousel slide: a bare string from older prompts, or a structured record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CarouselSlide {
    Legacy(String),
    Rich(RichSlide),
}

impl CarouselSlide {
    pub fn rich(heading: impl Into<String>, body: impl Into<String>) -> Self {
        CarouselSlide::Rich(RichSlide {
            heading: Some(heading.into()),
            body: Some(body.into()),
            ..Default::default()
        })
    }

    pub fn heading(&self) -> Option<&str> {
        match self {
            CarouselSlide::Legacy(_) => None,
            CarouselSlide::Rich(slide) => slide.heading.as_deref(),
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            CarouselSlide::Legacy(text) => Some(text),
            CarouselSlide::Rich(slide) => slide.body.as_deref(),
        }
    }

    pub fn image_prompt(&self) -> Option<&str> {
        match self {
            CarouselSlide::Legacy(_) => None,
            CarouselSlide::Rich(slide) => slide.image_prompt.as_deref(),
        }
    }

    pub fn image_url(&self) -> Option<&str> {
        match self {
            CarouselSlide::Legacy(_) => None,
            CarouselSlide::Rich(slide) => slide.image_url.as_deref(),
        }
    }

    /// Heading and body as one line of text
    pub fn text(&self) -> String {
        match (self.heading(), self.body()) {
            (Some(h), Some(b)) => format!("{h}: {b}"),
            (Some(h), None) => h.to_string(),
            (None, Some(b)) => b.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Convert a legacy slide into a record; `index` is zero based
    pub fn upgrade(self, index: usize) -> RichSlide {
        match self {
            CarouselSlide::Legacy(text) => RichSlide {
                heading: Some(format!("Slide {}", index + 1)),
                body: Some(text),
                ..Default::default()
            },
            CarouselSlide::Rich(slide) => slide,
        }
    }

    /// Attach an image prompt, upgrading a legacy slide first
    pub fn with_image_prompt(self, index: usize, prompt: impl Into<String>) -> Self {
        let mut rich = self.upgrade(index);
        rich.image_prompt = Some(prompt.into());
        CarouselSlide::Rich(rich)
    }

    /// Attach an image URL, upgrading a legacy slide first
    pub fn with_image_url(self, index: usize, url: impl Into<String>) -> Self {
        let mut rich = self.upgrade(index);
        rich.image_url = Some(url.into());
        CarouselSlide::Rich(rich)
    }
}

/// Copy for every target channel, produced once per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub linkedin: String,
    pub carousel: Vec<CarouselSlide>,
    pub threads: String,
    pub video_script: String,
}

/// Placeholder used when the model returned fewer slides than needed
pub fn placeholder_slide(index: usize) -> CarouselSlide {
    CarouselSlide::rich(
        format!("Slide {} Title", index + 1),
        "Continue the space-tech story...",
    )
}

/// Force the carousel to exactly [`CAROUSEL_LEN`] entries
pub fn normalize_carousel(mut slides: Vec<CarouselSlide>) -> Vec<CarouselSlide> {
    if slides.len() != CAROUSEL_LEN {
        tracing::warn!(
            count = slides.len(),
            "Carousel has {} slides, normalizing to {}",
            slides.len(),
            CAROUSEL_LEN
        );
    }
    slides.truncate(CAROUSEL_LEN);
    while slides.len() < CAROUSEL_LEN {
        slides.push(placeholder_slide(slides.len()));
    }
    slides
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_string(object: &serde_json::Map<String, Value>, field: &'static str) -> Result<String, GenerationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(GenerationError::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(GenerationError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(GenerationError::WrongType(field)),
    }
}

fn parse_slide(index: usize, value: &Value) -> Result<CarouselSlide, GenerationError> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Ok(CarouselSlide::Legacy(text.clone())),
        Value::Object(fields) => {
            let heading = non_empty(fields.get("heading"));
            let body = non_empty(fields.get("body"));
            if heading.is_none() && body.is_none() {
                return Err(GenerationError::InvalidSlide { index });
            }
            Ok(CarouselSlide::Rich(RichSlide {
                heading,
                body,
                image_prompt: non_empty(fields.get("imagePrompt")),
                image_url: non_empty(fields.get("imageUrl")),
            }))
        }
        _ => Err(GenerationError::InvalidSlide { index }),
    }
}

/// Validate a raw model reply and repair it into [`GeneratedContent`]
pub fn parse_generated(raw: &str) -> Result<GeneratedContent, GenerationError> {
    if raw.trim().is_empty() {
        return Err(GenerationError::Empty);
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|e| GenerationError::MalformedJson(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| GenerationError::MalformedJson("reply is not a JSON object".into()))?;

    let linkedin = required_string(object, "linkedin")?;
    let slides = match object.get("carousel") {
        None | Some(Value::Null) => return Err(GenerationError::MissingField("carousel")),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| parse_slide(index, item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(GenerationError::WrongType("carousel")),
    };
    let threads = required_string(object, "threads")?;
    let video_script = required_string(object, "video_script")?;

    let threads_len = threads.chars().count();
    if threads_len > THREADS_SOFT_LIMIT {
        tracing::warn!(
            length = threads_len,
            "Threads post is longer than {} characters",
            THREADS_SOFT_LIMIT
        );
    }

    Ok(GeneratedContent {
        linkedin,
        carousel: normalize_carousel(slides),
        threads,
        video_script,
    })
}
