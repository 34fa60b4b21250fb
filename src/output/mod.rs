use anyhow::Result;
use console::style;
use std::fmt::Write as _;
use std::path::Path;

use crate::cli::OutputFormat;
use crate::generate::{CarouselSlide, THREADS_SOFT_LIMIT};
use crate::pipeline::{PreviewData, ProcessOutcome};
use crate::utils::truncate_chars;

fn heading(title: &str, styled: bool) -> String {
    let line = format!("=== {title} ===");
    if styled {
        style(line).bold().cyan().to_string()
    } else {
        line
    }
}

fn describe_image_url(url: &str) -> String {
    if url.starts_with("data:") {
        format!("{}... (inline)", truncate_chars(url, 40))
    } else {
        url.to_string()
    }
}

fn write_slide(out: &mut String, index: usize, slide: &CarouselSlide) {
    let title = slide
        .heading()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Slide {}", index + 1));
    let _ = writeln!(out, "{}. {}", index + 1, title);
    if let Some(body) = slide.body() {
        let _ = writeln!(out, "   {body}");
    }
    if let Some(prompt) = slide.image_prompt() {
        let _ = writeln!(out, "   Image prompt: {prompt}");
    }
    if let Some(url) = slide.image_url() {
        let _ = writeln!(out, "   Image: {}", describe_image_url(url));
    }
}

/// Render generated content as readable sections
pub fn format_as_text(outcome: &ProcessOutcome, styled: bool) -> String {
    let content = &outcome.content;
    let meta = &outcome.metadata;
    let mut out = String::new();

    let _ = writeln!(out, "{}\n{}\n", heading("LinkedIn", styled), content.linkedin);

    let _ = writeln!(out, "{}", heading("Carousel", styled));
    for (index, slide) in content.carousel.iter().enumerate() {
        write_slide(&mut out, index, slide);
    }
    out.push('\n');

    let threads_len = content.threads.chars().count();
    let threads_title = if threads_len > THREADS_SOFT_LIMIT {
        format!("Threads ({threads_len} chars, over {THREADS_SOFT_LIMIT})")
    } else {
        format!("Threads ({threads_len} chars)")
    };
    let _ = writeln!(out, "{}\n{}\n", heading(&threads_title, styled), content.threads);

    let _ = writeln!(
        out,
        "{}\n{}\n",
        heading("Video Script", styled),
        content.video_script
    );

    let _ = write!(
        out,
        "Source: {} ({}, {})",
        meta.source_url,
        meta.source_type.as_str(),
        match meta.media_type {
            crate::extractors::MediaType::Image => "image",
            crate::extractors::MediaType::Video => "video",
        }
    );
    if let Some(user) = &meta.username {
        let _ = write!(out, " by {user}");
    }
    if meta.has_transcript {
        let _ = write!(out, " | transcript: {} chars", meta.transcript_length);
    }
    out.push('\n');

    out
}

/// Render the full outcome as pretty JSON
pub fn format_as_json(outcome: &ProcessOutcome) -> Result<String> {
    let value = serde_json::json!({
        "success": true,
        "data": outcome.content,
        "metadata": outcome.metadata,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Save generated content to file
pub fn save_to_file(outcome: &ProcessOutcome, path: &Path, format: &OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => format_as_text(outcome, false),
        OutputFormat::Json => format_as_json(outcome)?,
    };

    fs_err::write(path, content)?;
    Ok(())
}

/// Print generated content to console
pub fn print_to_console(outcome: &ProcessOutcome, format: &OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => format_as_text(outcome, console::colors_enabled()),
        OutputFormat::Json => format_as_json(outcome)?,
    };

    println!("{}", content);
    Ok(())
}

/// Print a source preview
pub fn print_preview(preview: &PreviewData) {
    match preview {
        PreviewData::Instagram(post) => {
            println!("{}", style("Instagram post").bold());
            if let Some(user) = &post.username {
                println!("  Username: @{user}");
            }
            println!("  Media: {:?}", post.media_type);
            if let Some(ts) = post.timestamp {
                println!("  Posted: {}", ts.to_rfc3339());
            }
            if let Some(thumb) = &post.thumbnail {
                println!("  Thumbnail: {thumb}");
            }
            println!("\n{}", post.caption);
        }
        PreviewData::Youtube(video) => {
            println!("{}", style("YouTube video").bold());
            println!("  Title: {}", video.title);
            if let Some(channel) = &video.channel_title {
                println!("  Channel: {channel}");
            }
            if let Some(ts) = video.published_at {
                println!("  Published: {}", ts.to_rfc3339());
            }
            if let Some(thumb) = &video.thumbnail {
                println!("  Thumbnail: {thumb}");
            }
            if !video.description.is_empty() {
                println!("\n{}", video.description);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::{MediaType, Platform};
    use crate::generate::{GeneratedContent, RichSlide};
    use crate::pipeline::ProcessMetadata;

    fn outcome() -> ProcessOutcome {
        ProcessOutcome {
            content: GeneratedContent {
                linkedin: "LinkedIn body".into(),
                carousel: vec![
                    CarouselSlide::Legacy("plain".into()),
                    CarouselSlide::Rich(RichSlide {
                        heading: Some("Why".into()),
                        body: Some("Because".into()),
                        image_prompt: Some("a nebula".into()),
                        image_url: Some(format!("data:image/png;base64,{}", "A".repeat(200))),
                    }),
                ],
                threads: "Thread".into(),
                video_script: "Script".into(),
            },
            metadata: ProcessMetadata {
                source_url: "https://www.instagram.com/p/ABC123/".into(),
                source_type: Platform::Instagram,
                media_type: MediaType::Video,
                username: Some("creator".into()),
                has_transcript: true,
                transcript_length: 42,
                timestamp: chrono::Utc::now(),
                video_id: None,
            },
            remaining: 29,
        }
    }

    #[test]
    fn test_text_output_sections() {
        let text = format_as_text(&outcome(), false);
        assert!(text.contains("=== LinkedIn ===\nLinkedIn body"));
        assert!(text.contains("1. Slide 1\n   plain"));
        assert!(text.contains("2. Why\n   Because\n   Image prompt: a nebula"));
        assert!(text.contains("(inline)"));
        assert!(text.contains("=== Threads (6 chars) ==="));
        assert!(text.ends_with("by creator | transcript: 42 chars\n"));
    }

    #[test]
    fn test_json_output() {
        let json: serde_json::Value =
            serde_json::from_str(&format_as_json(&outcome()).unwrap()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["carousel"][0], "plain");
        assert_eq!(json["data"]["carousel"][1]["imagePrompt"], "a nebula");
        assert_eq!(json["metadata"]["source_type"], "instagram");
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        save_to_file(&outcome(), &path, &OutputFormat::Text).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.starts_with("=== LinkedIn ==="));
    }
}
