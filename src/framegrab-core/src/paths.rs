//! Source path resolution
//!
//! Maps client-supplied references to absolute input files. Upload paths are
//! confined to the upload root (or the temp inputs root for the
//! `/tmp/video_extract_inputs/` prefix); content hashes go through an injected
//! [`ContentResolver`] and are confined to the content store root.

use async_trait::async_trait;
use framegrab_db::SourceType;
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::TEMP_INPUTS_DIR;
use crate::error::PathError;

/// Maps a content hash to a file path relative to the content store root
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(&self, hash: &str) -> Result<String, PathError>;
}

/// Looks up `<root>/<hash[0..2]>/<hash>.<ext>`
#[derive(Debug, Clone)]
pub struct ShardedContentResolver {
    root: PathBuf,
}

impl ShardedContentResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ContentResolver for ShardedContentResolver {
    async fn resolve(&self, hash: &str) -> Result<String, PathError> {
        let hash = hash.trim().to_ascii_lowercase();
        if !is_hex_md5(&hash) {
            return Err(PathError::Illegal(hash));
        }

        let shard = &hash[..2];
        let dir = self.root.join(shard);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Err(PathError::Missing(hash)),
        };

        let mut candidates = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PathError::Resolver(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            if stem.eq_ignore_ascii_case(&hash) {
                candidates.push(name);
            }
        }

        candidates.sort();
        match candidates.into_iter().next() {
            Some(name) => Ok(format!("{}/{}", shard, name)),
            None => Err(PathError::Missing(hash)),
        }
    }
}

/// A resolved task input
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub source_type: SourceType,
    /// Normalized local path or lower-cased hash, as stored on the task
    pub source_ref: String,
    pub input_abs_path: PathBuf,
}

#[derive(Clone)]
pub struct PathResolver {
    upload_root: PathBuf,
    temp_inputs_root: PathBuf,
    content_store_root: PathBuf,
    content: Option<Arc<dyn ContentResolver>>,
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("upload_root", &self.upload_root)
            .field("temp_inputs_root", &self.temp_inputs_root)
            .field("content_store_root", &self.content_store_root)
            .field("content", &self.content.is_some())
            .finish()
    }
}

impl PathResolver {
    pub fn new(
        upload_root: impl Into<PathBuf>,
        temp_inputs_root: impl Into<PathBuf>,
        content_store_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            upload_root: upload_root.into(),
            temp_inputs_root: temp_inputs_root.into(),
            content_store_root: content_store_root.into(),
            content: None,
        }
    }

    pub fn with_content_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.content = Some(resolver);
        self
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// Resolve either kind of source
    pub async fn resolve(
        &self,
        source_type: SourceType,
        local_path: Option<&str>,
        hash: Option<&str>,
    ) -> Result<ResolvedSource, PathError> {
        match source_type {
            SourceType::Upload => self.resolve_upload(local_path.unwrap_or_default()),
            SourceType::ContentHash => self.resolve_content_hash(hash.unwrap_or_default()).await,
        }
    }

    /// Resolve an uploaded file's local path
    pub fn resolve_upload(&self, raw: &str) -> Result<ResolvedSource, PathError> {
        let local = normalize_local_path(raw).ok_or(PathError::Empty)?;

        let temp_prefix = format!("/tmp/{}/", TEMP_INPUTS_DIR);
        let abs = match local.strip_prefix(&temp_prefix) {
            Some(inner) => confine(&self.temp_inputs_root, inner)?,
            None => confine(&self.upload_root, &local)?,
        };
        check_file(&abs)?;

        debug!("resolved upload {} to {:?}", local, abs);
        Ok(ResolvedSource {
            source_type: SourceType::Upload,
            source_ref: local,
            input_abs_path: abs,
        })
    }

    /// Resolve a content hash through the injected resolver
    pub async fn resolve_content_hash(&self, raw: &str) -> Result<ResolvedSource, PathError> {
        let hash = raw.trim();
        if hash.is_empty() {
            return Err(PathError::Empty);
        }
        if !is_hex_md5(hash) {
            return Err(PathError::Illegal(hash.to_string()));
        }
        let hash = hash.to_ascii_lowercase();

        let resolver = self
            .content
            .as_ref()
            .ok_or_else(|| PathError::Resolver("no content resolver configured".to_string()))?;
        let content_path = resolver.resolve(&hash).await?;
        let abs = self.resolve_content_path(&content_path)?;

        debug!("resolved content {} to {:?}", hash, abs);
        Ok(ResolvedSource {
            source_type: SourceType::ContentHash,
            source_ref: hash,
            input_abs_path: abs,
        })
    }

    /// Confine a content-store path (optionally prefixed with `/lsp`) to the content root
    pub fn resolve_content_path(&self, content_path: &str) -> Result<PathBuf, PathError> {
        let path = content_path.trim().replace('\\', "/");
        let rel = match path.strip_prefix("/lsp") {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_string(),
            _ => path,
        };
        let abs = confine(&self.content_store_root, &rel)?;
        check_file(&abs)?;
        Ok(abs)
    }

    /// Absolute location of a local path under the upload root (no existence check)
    pub fn upload_abs_path(&self, local: &str) -> Result<PathBuf, PathError> {
        confine(&self.upload_root, &local.replace('\\', "/"))
    }
}

/// Normalize a client-supplied upload path to `/<relative path>`.
///
/// Accepts full `http(s)://` URLs, query/fragment suffixes, one level of
/// percent-encoding and an optional leading `/upload` segment. Returns None
/// for blank input.
pub fn normalize_local_path(raw: &str) -> Option<String> {
    let mut path = raw.trim().replace('\\', "/");
    if path.is_empty() {
        return None;
    }

    if path.starts_with("http://") || path.starts_with("https://") {
        if let Ok(url) = url::Url::parse(&path) {
            if !url.path().is_empty() {
                path = url.path().to_string();
            }
        }
    } else if let Some(idx) = path.find(|c| c == '?' || c == '#') {
        path.truncate(idx);
    }

    if path.contains('%') {
        if let Ok(decoded) = percent_decode_str(&path).decode_utf8() {
            if !decoded.is_empty() {
                path = decoded.into_owned();
            }
        }
    }

    let path = if let Some(rest) = path.strip_prefix("/upload/") {
        format!("/{}", rest)
    } else if let Some(rest) = path.strip_prefix("upload/") {
        format!("/{}", rest)
    } else {
        path
    };

    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    if path.starts_with('/') {
        Some(path.to_string())
    } else {
        Some(format!("/{}", path))
    }
}

/// 32 hexadecimal characters
pub fn is_hex_md5(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Lexically clean a slash-separated relative path. Leading `..` segments are kept.
fn clean_relative(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Join `path` under `root`, rejecting the root itself and anything escaping it
fn confine(root: &Path, path: &str) -> Result<PathBuf, PathError> {
    let clean = clean_relative(path.trim_start_matches('/'));
    if clean == "." {
        return Err(PathError::Illegal(path.to_string()));
    }
    if clean == ".." || clean.starts_with("../") {
        return Err(PathError::Traversal(path.to_string()));
    }
    Ok(root.join(clean))
}

fn check_file(path: &Path) -> Result<(), PathError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(PathError::NotAFile(path.display().to_string())),
        Err(_) => Err(PathError::Missing(path.display().to_string())),
    }
}
