//! Runtime configuration handed to the validator and the image store.
//!

use std::path::PathBuf;

use crate::cli::{db_path_default, CliOpts, DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_UPLOAD_SIZE};

#[derive(Clone, Debug)]
pub struct ImageConfig {
    pub db_path: PathBuf,
    pub images_path: PathBuf,
    pub static_path: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub max_upload_size: usize,
    pub prune_missing: bool,
}

/// Turns `"jpg, .PNG,,gif,JPG"` into `["jpg", "png", "gif"]`.
///
/// Entries are trimmed, lower-cased and lose one leading dot. Empty entries and repeats are
/// dropped, otherwise the configured order is kept.
pub fn parse_extensions(input: &str) -> Vec<String> {
    let mut extensions: Vec<String> = Vec::new();
    for ext in input.split(',') {
        let ext = ext.trim();
        let ext = ext.strip_prefix('.').unwrap_or(ext).to_lowercase();
        if !ext.is_empty() && !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }
    extensions
}

impl From<&CliOpts> for ImageConfig {
    fn from(cli: &CliOpts) -> Self {
        Self {
            db_path: cli
                .db_path
                .clone()
                .unwrap_or_else(|| db_path_default().into()),
            images_path: cli.images_path.clone(),
            static_path: cli.static_path.clone(),
            allowed_extensions: parse_extensions(&cli.allowed_extensions),
            max_upload_size: cli.max_upload_size,
            prune_missing: cli.prune_missing,
        }
    }
}

impl ImageConfig {
    /// In-memory database, images under `images_path`.
    pub fn for_images_path(images_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: PathBuf::from(":memory:"),
            images_path: images_path.into(),
            static_path: PathBuf::from("./static/"),
            allowed_extensions: parse_extensions(DEFAULT_ALLOWED_EXTENSIONS),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            prune_missing: false,
        }
    }

    /// Upper bound on a whole request body. Leaves room for multipart framing so the
    /// validator, not the body limit, is what rejects oversized files.
    pub fn request_body_limit(&self) -> usize {
        self.max_upload_size
            .saturating_mul(2)
            .saturating_add(1024 * 1024)
    }
}
