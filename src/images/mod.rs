use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::backends::{CompletionRequest, ImageGenerator, TextGenerator, UpstreamError};
use crate::config::ImagesConfig;
use crate::generate::CarouselSlide;

const MOCK_IMAGE_PROMPT: &str =
    "A futuristic space technology visualization with glowing blue elements";

const PROMPT_INSTRUCTION: &str = "You are an expert at creating image prompts for carousel slides about technology and innovation.
Create a detailed, vivid prompt for an image model that produces a beautiful, engaging image for one carousel slide. The prompt should:
- Be descriptive and visual (colors, lighting, style, composition)
- Match the content and emotion of the slide
- Have a consistent futuristic, space-tech aesthetic
- Be appropriate for a professional audience
- Be 1-2 sentences (50-100 words max)
- NOT include text overlays (no words in the image)
- Focus on abstract, conceptual visualizations of the ideas, not literal text";

/// Where a generated image is kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// Write PNG files to `dir` and link them under `public_path`
    Filesystem { dir: PathBuf, public_path: String },
    /// Keep the image inline as a `data:` URL
    DataUrl,
}

/// Settings for one image pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOptions {
    pub storage: StorageMode,
    /// Slides processed at the same time
    pub concurrency: usize,
    /// Budget for the whole pass
    pub timeout: Duration,
    pub size: String,
}

impl ImageOptions {
    pub fn from_config(config: &ImagesConfig) -> Self {
        Self {
            storage: config.storage_mode(),
            concurrency: config.concurrency,
            timeout: Duration::from_secs(config.timeout_secs),
            size: config.size.clone(),
        }
    }
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self::from_config(&ImagesConfig::default())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("Image backend failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Image data is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to store image: {0}")]
    Io(#[from] std::io::Error),
}

/// Position word used in the prompt request
pub fn slide_position(index: usize) -> String {
    const POSITIONS: [&str; 10] = [
        "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
        "tenth",
    ];
    POSITIONS
        .get(index)
        .map(|p| p.to_string())
        .unwrap_or_else(|| format!("{}th", index + 1))
}

/// Prompt derived from the slide heading, used in mock mode and when the model fails
pub fn templated_prompt(slide: &CarouselSlide) -> String {
    match slide.heading() {
        Some(heading) => format!(
            "A futuristic visualization of {} with glowing elements",
            heading.to_lowercase()
        ),
        None => MOCK_IMAGE_PROMPT.to_string(),
    }
}

fn placeholder_url(index: usize) -> String {
    format!("/placeholder-{}.jpg", (index % 5) + 1)
}

/// Run `work` over every slide with at most `concurrency` in flight.
///
/// Slides still pending when `budget` runs out are returned unmodified.
async fn run_bounded<F, Fut>(
    slides: Vec<CarouselSlide>,
    concurrency: usize,
    budget: Duration,
    work: F,
) -> Vec<CarouselSlide>
where
    F: Fn(usize, CarouselSlide) -> Fut,
    Fut: Future<Output = CarouselSlide>,
{
    let mut results = slides.clone();
    let deadline = Instant::now() + budget;

    let mut pending = futures_util::stream::iter(slides.into_iter().enumerate().map(|(index, slide)| {
        let fut = work(index, slide);
        async move { (index, fut.await) }
    }))
    .buffer_unordered(concurrency.max(1));

    let mut done = 0usize;
    loop {
        match tokio::time::timeout_at(deadline, pending.next()).await {
            Ok(Some((index, slide))) => {
                results[index] = slide;
                done += 1;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(
                    completed = done,
                    total = results.len(),
                    "Slide budget of {:?} expired, returning pending slides unmodified",
                    budget
                );
                break;
            }
        }
    }

    results
}

/// Adds image prompts and images to carousel slides
pub struct ImageAugmenter {
    text: Option<Arc<dyn TextGenerator>>,
    image: Option<Arc<dyn ImageGenerator>>,
}

impl ImageAugmenter {
    pub fn new(
        text: Option<Arc<dyn TextGenerator>>,
        image: Option<Arc<dyn ImageGenerator>>,
    ) -> Self {
        Self { text, image }
    }

    /// Attach an `imagePrompt` to every slide that lacks one
    #[tracing::instrument(skip_all, fields(slides = slides.len()))]
    pub async fn synthesize_prompts(
        &self,
        slides: Vec<CarouselSlide>,
        options: &ImageOptions,
    ) -> Vec<CarouselSlide> {
        run_bounded(slides, options.concurrency, options.timeout, |index, slide| {
            self.prompt_for(index, slide)
        })
        .await
    }

    /// Attach an `imageUrl` to every slide that lacks one
    #[tracing::instrument(skip_all, fields(slides = slides.len()))]
    pub async fn synthesize_images(
        &self,
        slides: Vec<CarouselSlide>,
        options: &ImageOptions,
    ) -> Vec<CarouselSlide> {
        if let StorageMode::Filesystem { dir, .. } = &options.storage {
            if self.image.is_some() {
                if let Err(e) = tokio::fs::create_dir_all(dir).await {
                    tracing::error!(error = %e, dir = %dir.display(), "Cannot create image directory");
                }
            }
        }

        run_bounded(slides, options.concurrency, options.timeout, |index, slide| {
            self.image_for(index, slide, options)
        })
        .await
    }

    async fn prompt_for(&self, index: usize, slide: CarouselSlide) -> CarouselSlide {
        if slide.image_prompt().is_some() {
            return slide;
        }

        let prompt = match &self.text {
            None => templated_prompt(&slide),
            Some(text) => {
                let request = CompletionRequest {
                    system: PROMPT_INSTRUCTION.to_string(),
                    user: format!(
                        "Create an image prompt for this {} carousel slide:\n\nHeading: {}\nBody: {}\n\nReturn ONLY the prompt text, nothing else.",
                        slide_position(index),
                        slide.heading().unwrap_or_default(),
                        slide.body().unwrap_or_default()
                    ),
                    temperature: 0.7,
                    max_tokens: 150,
                    json_mode: false,
                };
                match text.complete(&request).await {
                    Ok(prompt) if !prompt.trim().is_empty() => prompt.trim().to_string(),
                    Ok(_) => templated_prompt(&slide),
                    Err(e) => {
                        tracing::warn!(slide = index + 1, error = %e, "Prompt synthesis failed, using template");
                        templated_prompt(&slide)
                    }
                }
            }
        };

        slide.with_image_prompt(index, prompt)
    }

    async fn image_for(
        &self,
        index: usize,
        slide: CarouselSlide,
        options: &ImageOptions,
    ) -> CarouselSlide {
        if slide.image_url().is_some() {
            return slide;
        }

        let Some(image) = &self.image else {
            return slide.with_image_url(index, placeholder_url(index));
        };

        let prompt = slide
            .image_prompt()
            .map(str::to_string)
            .unwrap_or_else(|| templated_prompt(&slide));

        let stored = match image.generate_image(&prompt, &options.size).await {
            Ok(b64) => store_image(&b64, index, &options.storage).await,
            Err(e) => Err(ImageError::from(e)),
        };

        match stored {
            Ok(url) => slide.with_image_url(index, url),
            Err(e) => {
                tracing::warn!(slide = index + 1, error = %e, "Image generation failed, slide left without image");
                slide
            }
        }
    }
}

/// Persist base64 PNG data and return the URL the slide should point at
pub async fn store_image(
    b64: &str,
    index: usize,
    storage: &StorageMode,
) -> Result<String, ImageError> {
    let bytes = STANDARD.decode(b64.trim())?;

    match storage {
        StorageMode::DataUrl => Ok(format!("data:image/png;base64,{}", STANDARD.encode(&bytes))),
        StorageMode::Filesystem { dir, public_path } => {
            let file_name = format!(
                "slide-{}-{}.png",
                index + 1,
                chrono::Utc::now().timestamp_millis()
            );
            tokio::fs::write(dir.join(&file_name), &bytes).await?;
            Ok(format!("{}/{}", public_path.trim_end_matches('/'), file_name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockImageGenerator, MockTextGenerator};
    use crate::generate::RichSlide;

    fn slides() -> Vec<CarouselSlide> {
        vec![
            CarouselSlide::rich("Key Idea", "one"),
            CarouselSlide::Legacy("two".into()),
            CarouselSlide::rich("Call To Action", "three"),
        ]
    }

    fn data_options() -> ImageOptions {
        ImageOptions {
            storage: StorageMode::DataUrl,
            ..ImageOptions::default()
        }
    }

    #[test]
    fn test_slide_position() {
        assert_eq!(slide_position(0), "first");
        assert_eq!(slide_position(9), "tenth");
        assert_eq!(slide_position(11), "12th");
    }

    #[tokio::test]
    async fn test_mock_prompts_and_placeholders() {
        let augmenter = ImageAugmenter::new(None, None);
        let options = data_options();

        let with_prompts = augmenter.synthesize_prompts(slides(), &options).await;
        assert_eq!(
            with_prompts[0].image_prompt(),
            Some("A futuristic visualization of key idea with glowing elements")
        );
        assert_eq!(with_prompts[1].image_prompt(), Some(MOCK_IMAGE_PROMPT));
        assert_eq!(with_prompts[1].heading(), Some("Slide 2"));

        let with_images = augmenter.synthesize_images(with_prompts, &options).await;
        assert_eq!(with_images[2].image_url(), Some("/placeholder-3.jpg"));
        assert_eq!(with_images[0].body(), Some("one"));
    }

    #[tokio::test]
    async fn test_prompt_failure_falls_back_per_slide() {
        let mut text = MockTextGenerator::new();
        text.expect_complete().returning(|req| {
            if req.user.contains("second") {
                Err(UpstreamError::api(500, "boom"))
            } else {
                Ok("  A glowing orbit  ".to_string())
            }
        });

        let augmenter = ImageAugmenter::new(Some(Arc::new(text)), None);
        let result = augmenter.synthesize_prompts(slides(), &data_options()).await;

        assert_eq!(result[0].image_prompt(), Some("A glowing orbit"));
        assert_eq!(result[1].image_prompt(), Some(MOCK_IMAGE_PROMPT));
        assert_eq!(result[2].image_prompt(), Some("A glowing orbit"));
    }

    #[tokio::test]
    async fn test_images_are_not_regenerated() {
        let mut image = MockImageGenerator::new();
        image
            .expect_generate_image()
            .times(3)
            .returning(|_, _| Ok(STANDARD.encode(b"png")));

        let augmenter = ImageAugmenter::new(None, Some(Arc::new(image)));
        let options = data_options();

        let first = augmenter.synthesize_images(slides(), &options).await;
        assert!(first.iter().all(|s| s.image_url().is_some()));

        let second = augmenter.synthesize_images(first.clone(), &options).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_per_slide_image_failure_is_absorbed() {
        let mut image = MockImageGenerator::new();
        image.expect_generate_image().returning(|prompt, _| {
            if prompt.contains("key idea") {
                Err(UpstreamError::api(400, "content policy"))
            } else {
                Ok(STANDARD.encode(b"png"))
            }
        });

        let augmenter = ImageAugmenter::new(None, Some(Arc::new(image)));
        let result = augmenter.synthesize_images(slides(), &data_options()).await;

        assert!(result[0].image_url().is_none());
        assert_eq!(
            result[1].image_url(),
            Some(format!("data:image/png;base64,{}", STANDARD.encode(b"png")).as_str())
        );
    }

    #[tokio::test]
    async fn test_filesystem_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageMode::Filesystem {
            dir: dir.path().to_path_buf(),
            public_path: "/generated-images/".into(),
        };

        let url = store_image(&STANDARD.encode(b"\x89PNG"), 1, &storage)
            .await
            .unwrap();
        assert!(url.starts_with("/generated-images/slide-2-"));
        assert!(url.ends_with(".png"));

        let file_name = url.rsplit('/').next().unwrap();
        assert_eq!(std::fs::read(dir.path().join(file_name)).unwrap(), b"\x89PNG");

        assert!(matches!(
            store_image("***", 0, &storage).await,
            Err(ImageError::Decode(_))
        ));
    }

    struct SlowImages;

    #[async_trait::async_trait]
    impl ImageGenerator for SlowImages {
        async fn generate_image(&self, prompt: &str, _size: &str) -> Result<String, UpstreamError> {
            if prompt.contains("key idea") {
                Ok(STANDARD.encode(b"fast"))
            } else {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(STANDARD.encode(b"slow"))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_expiry_returns_pending_slides_unmodified() {
        let augmenter = ImageAugmenter::new(None, Some(Arc::new(SlowImages)));
        let options = ImageOptions {
            concurrency: 3,
            timeout: Duration::from_secs(45),
            ..data_options()
        };

        let input = slides();
        let result = augmenter.synthesize_images(input.clone(), &options).await;

        assert!(result[0].image_url().is_some());
        assert_eq!(result[1], input[1]);
        assert_eq!(result[2], input[2]);
        assert!(matches!(result[2], CarouselSlide::Rich(RichSlide { image_url: None, .. })));
    }
}
