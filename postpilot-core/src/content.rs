use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "svg", "tiff", "tif",
];
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

const CAPTION_WITH_IMAGE: &str = "分享一些精彩内容 📸";
const CAPTION_FALLBACK: &str = "今天的分享 ✨";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to prepare content root {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to list content root {path}: {source}")]
    Walk {
        source: walkdir::Error,
        path: PathBuf,
    },
}

pub type ContentResult<T> = Result<T, ContentError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub path: PathBuf,
    pub display_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostItem {
    pub title: String,
    pub text_content: String,
    pub images: Vec<ImageRef>,
    pub source_dir: PathBuf,
    pub scanned_at: DateTime<Utc>,
}

impl PostItem {
    pub fn is_publishable(&self) -> bool {
        !self.images.is_empty()
    }

    /// Body text sent to the platform; never empty.
    pub fn caption(&self) -> String {
        let content = self.text_content.trim();
        if !content.is_empty() {
            content.to_string()
        } else if !self.images.is_empty() {
            CAPTION_WITH_IMAGE.to_string()
        } else {
            CAPTION_FALLBACK.to_string()
        }
    }

    pub fn image_paths(&self) -> Vec<PathBuf> {
        self.images.iter().map(|image| image.path.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Image,
    Text,
    Other,
}

fn classify_file(path: &Path) -> FileKind {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return FileKind::Other;
    };
    let ext = ext.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Image
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Text
    } else {
        FileKind::Other
    }
}

#[derive(Debug, Clone)]
pub struct ContentScanner {
    root: PathBuf,
}

impl ContentScanner {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: absolutize(root.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Builds the publish queue from the immediate subdirectories of the root.
    pub fn scan(&self) -> ContentResult<Vec<PostItem>> {
        if !self.root.exists() {
            info!(root = %self.root.display(), "creating content root");
        }
        std::fs::create_dir_all(&self.root).map_err(|source| ContentError::Io {
            source,
            path: self.root.clone(),
        })?;

        let mut items = Vec::new();
        let entries = WalkDir::new(&self.root).min_depth(1).max_depth(1);
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(ContentError::Walk {
                        source: err,
                        path: self.root.clone(),
                    });
                }
                Err(err) => {
                    warn!(error = %err, "skipping unreadable content entry");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Some(item) = self.scan_post_dir(entry.path()) {
                info!(
                    title = %item.title,
                    images = item.images.len(),
                    text_chars = item.text_content.chars().count(),
                    "found post"
                );
                items.push(item);
            }
        }

        if items.is_empty() {
            warn!(root = %self.root.display(), "no publishable content found");
        } else {
            info!(count = items.len(), root = %self.root.display(), "content scan finished");
        }
        Ok(items)
    }

    fn scan_post_dir(&self, dir: &Path) -> Option<PostItem> {
        let title = dir.file_name()?.to_string_lossy().into_owned();
        let mut texts: Vec<String> = Vec::new();
        let mut images: Vec<ImageRef> = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "failed to read post entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            match classify_file(path) {
                FileKind::Image => {
                    let size_bytes = match entry.metadata() {
                        Ok(metadata) => metadata.len(),
                        Err(err) => {
                            warn!(file = %path.display(), error = %err, "failed to stat image");
                            continue;
                        }
                    };
                    images.push(ImageRef {
                        path: path.to_path_buf(),
                        display_name: entry.file_name().to_string_lossy().into_owned(),
                        size_bytes,
                    });
                }
                FileKind::Text => match std::fs::read_to_string(path) {
                    Ok(body) => {
                        let body = body.trim();
                        if !body.is_empty() {
                            texts.push(body.to_string());
                        }
                    }
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "failed to read text file");
                    }
                },
                FileKind::Other => {}
            }
        }

        // Multi-image upload is not supported; the first image stands for the post.
        if images.len() > 1 {
            debug!(title = %title, kept = %images[0].display_name, dropped = images.len() - 1, "keeping first image only");
            images.truncate(1);
        }

        let text_content = texts.join("\n\n").trim().to_string();
        if images.is_empty() && text_content.is_empty() {
            debug!(dir = %dir.display(), "skipping directory without text or images");
            return None;
        }

        Some(PostItem {
            title,
            text_content,
            images,
            source_dir: dir.to_path_buf(),
            scanned_at: Utc::now(),
        })
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
