//! Artifact materialization: remote artifact URL to durable local file

use crate::service::BinaryFetcher;
use kiln_core::{ContentHash, KilnError, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest sanitized name kept in a local file name
pub const MAX_NAME_CHARS: usize = 50;

const FALLBACK_NAME: &str = "model";

/// A localized artifact
#[derive(Debug, Clone, PartialEq)]
pub struct LocalArtifact {
    pub path: PathBuf,
    pub content_hash: ContentHash,
    pub size: u64,
}

/// Downloads artifacts into an output directory.
///
/// Holds configuration only; every `localize` call is independent.
pub struct Materializer {
    output_dir: PathBuf,
    default_extension: String,
    fetcher: Box<dyn BinaryFetcher>,
}

impl Materializer {
    pub fn new<P: AsRef<Path>>(output_dir: P, fetcher: Box<dyn BinaryFetcher>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            default_extension: "glb".to_string(),
            fetcher,
        }
    }

    /// Extension used when the URL does not carry a usable one
    pub fn with_default_extension(mut self, extension: &str) -> Self {
        self.default_extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Fetch `remote_url` and store it under a fresh name derived from
    /// `suggested_name`.
    ///
    /// The bytes are written to a hidden temp file first and then linked
    /// into place, so the final name never refers to a partial file and an
    /// existing file is never replaced.
    pub fn localize(&self, remote_url: &str, suggested_name: &str) -> Result<LocalArtifact> {
        let bytes = self.fetcher.fetch(remote_url)?;
        if bytes.is_empty() {
            return Err(KilnError::FetchError {
                status: None,
                message: format!("Empty response body from {}", remote_url),
            });
        }

        fs::create_dir_all(&self.output_dir)?;

        let stem = format!("{}_{}", sanitize_name(suggested_name), creation_suffix());
        let extension = extension_from_url(remote_url).unwrap_or(self.default_extension.as_str());

        let tmp_path = self
            .output_dir
            .join(format!(".{}.{}.part", stem, std::process::id()));
        let written = write_synced(&tmp_path, &bytes);
        if let Err(e) = written {
            fs::remove_file(&tmp_path).ok();
            return Err(e.into());
        }

        let path = match publish(&tmp_path, &self.output_dir, &stem, extension) {
            Ok(path) => path,
            Err(e) => {
                fs::remove_file(&tmp_path).ok();
                return Err(e.into());
            }
        };

        tracing::info!(path = %path.display(), bytes = bytes.len(), "localized artifact");
        Ok(LocalArtifact {
            path,
            content_hash: ContentHash::from_bytes(&bytes),
            size: bytes.len() as u64,
        })
    }
}

/// Keep `[A-Za-z0-9_-]`, cap at `MAX_NAME_CHARS`
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_NAME_CHARS)
        .collect();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

fn creation_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// File extension of the URL path, ignoring query and fragment
fn extension_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let last_segment = path.rsplit('/').next()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    let usable = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    usable.then_some(ext)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Move the temp file to the first free `<stem>[-n].<ext>` name
fn publish(tmp: &Path, dir: &Path, stem: &str, extension: &str) -> std::io::Result<PathBuf> {
    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(format!("{}.{}", stem, extension))
        } else {
            dir.join(format!("{}-{}.{}", stem, n, extension))
        };
        n += 1;

        match fs::hard_link(tmp, &candidate) {
            Ok(()) => {
                fs::remove_file(tmp)?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(_) => {
                // No hard links on this filesystem
                if candidate.exists() {
                    continue;
                }
                fs::rename(tmp, &candidate)?;
                return Ok(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::{minimal_glb, MockFetcher};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("kiln_materialize_test_{}", uuid::Uuid::new_v4()))
    }

    struct FailingFetcher;

    impl BinaryFetcher for FailingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            Err(KilnError::FetchError {
                status: Some(403),
                message: format!("Forbidden: {}", url),
            })
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("wooden chair!"), "woodenchair");
        assert_eq!(sanitize_name("stone_well-v2"), "stone_well-v2");
        assert_eq!(sanitize_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("???"), "model");
        assert_eq!(sanitize_name(&"a".repeat(80)).len(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(
            extension_from_url("https://assets.meshy.ai/t/model.glb?Expires=123&Sig=x.y"),
            Some("glb")
        );
        assert_eq!(extension_from_url("mock://models/mock-refine-2.fbx"), Some("fbx"));
        assert_eq!(extension_from_url("https://cdn.example.com/download"), None);
        assert_eq!(extension_from_url("https://cdn.example.com/a.b/file"), None);
    }

    #[test]
    fn test_localize_writes_file_and_hash() {
        let dir = temp_dir();
        let materializer = Materializer::new(&dir, Box::new(MockFetcher));

        let artifact = materializer
            .localize("mock://models/t1.glb", "wooden_chair")
            .unwrap();

        assert!(artifact.path.starts_with(&dir));
        let file_name = artifact.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("wooden_chair_"));
        assert!(file_name.ends_with(".glb"));

        let expected = minimal_glb().unwrap();
        assert_eq!(fs::read(&artifact.path).unwrap(), expected);
        assert_eq!(artifact.content_hash, ContentHash::from_bytes(&expected));
        assert_eq!(artifact.size, expected.len() as u64);

        // No temp files left behind
        let leftovers = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_localize_twice_yields_distinct_paths() {
        let dir = temp_dir();
        let materializer = Materializer::new(&dir, Box::new(MockFetcher));

        let first = materializer.localize("mock://models/t1.glb", "barrel").unwrap();
        let first_bytes = fs::read(&first.path).unwrap();
        let second = materializer.localize("mock://models/t1.glb", "barrel").unwrap();

        assert_ne!(first.path, second.path);
        assert!(first.path.exists());
        assert!(second.path.exists());
        assert_eq!(fs::read(&first.path).unwrap(), first_bytes);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_publish_never_overwrites() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("crate_1.glb"), b"original").unwrap();
        fs::write(dir.join(".tmp.part"), b"incoming").unwrap();

        let path = publish(&dir.join(".tmp.part"), &dir, "crate_1", "glb").unwrap();
        assert_eq!(path, dir.join("crate_1-1.glb"));
        assert_eq!(fs::read(dir.join("crate_1.glb")).unwrap(), b"original");
        assert_eq!(fs::read(&path).unwrap(), b"incoming");
        assert!(!dir.join(".tmp.part").exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_localize_fetch_failure_creates_nothing() {
        let dir = temp_dir();
        let materializer = Materializer::new(&dir, Box::new(FailingFetcher));

        let err = materializer
            .localize("https://assets.example.com/model.glb", "chair")
            .unwrap_err();
        assert_eq!(err.remote_status(), Some(403));
        assert!(!dir.exists());
    }

    #[test]
    fn test_default_extension_when_url_has_none() {
        let dir = temp_dir();
        struct BytesFetcher;
        impl BinaryFetcher for BytesFetcher {
            fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
                Ok(b"binary".to_vec())
            }
        }
        let materializer =
            Materializer::new(&dir, Box::new(BytesFetcher)).with_default_extension(".fbx");
        let artifact = materializer
            .localize("https://cdn.example.com/download", "lamp")
            .unwrap();
        assert_eq!(artifact.path.extension().unwrap(), "fbx");

        fs::remove_dir_all(&dir).ok();
    }
}
