//! Cli things
//!

use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_ALLOWED_EXTENSIONS: &str = "jpg,jpeg,png,gif";
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 5 * 1024 * 1024;

pub fn db_path_default() -> String {
    shellexpand::tilde("~/.cache/imagehost.sqlite3").to_string()
}

#[derive(Parser, Debug)]
pub struct CliOpts {
    #[clap(long, help = "Path to the database file", env = "IMAGEHOST_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[clap(
        long,
        help = "Directory uploaded images are written to",
        env = "IMAGEHOST_IMAGES_PATH",
        default_value = "images"
    )]
    pub images_path: PathBuf,

    #[clap(
        long,
        help = "Comma-separated list of accepted file extensions",
        env = "IMAGEHOST_ALLOWED_EXTENSIONS",
        default_value = DEFAULT_ALLOWED_EXTENSIONS
    )]
    pub allowed_extensions: String,

    #[clap(
        long,
        help = "Largest accepted upload, in bytes",
        env = "IMAGEHOST_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE
    )]
    pub max_upload_size: usize,

    #[clap(
        long,
        help = "Directory of static assets served as the fallback route",
        env = "IMAGEHOST_STATIC_PATH",
        default_value = "./static/"
    )]
    pub static_path: PathBuf,

    #[clap(
        long,
        help = "Delete records whose image file is missing when reconciling at startup",
        env = "IMAGEHOST_PRUNE_MISSING"
    )]
    pub prune_missing: bool,

    #[clap(long, help = "Enable debug logging")]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CliOpts::try_parse_from(["imagehost"]).expect("defaults should parse");
        assert_eq!(opts.images_path, PathBuf::from("images"));
        assert_eq!(opts.allowed_extensions, DEFAULT_ALLOWED_EXTENSIONS);
        assert_eq!(opts.max_upload_size, 5 * 1024 * 1024);
        assert!(!opts.prune_missing);
        assert!(!opts.debug);
    }

    #[test]
    fn test_overrides() {
        let opts = CliOpts::try_parse_from([
            "imagehost",
            "--images-path",
            "/srv/images",
            "--allowed-extensions",
            "png,webp",
            "--max-upload-size",
            "1024",
            "--prune-missing",
            "--debug",
        ])
        .expect("arguments should parse");
        assert_eq!(opts.images_path, PathBuf::from("/srv/images"));
        assert_eq!(opts.allowed_extensions, "png,webp");
        assert_eq!(opts.max_upload_size, 1024);
        assert!(opts.prune_missing);
        assert!(opts.debug);
    }
}
