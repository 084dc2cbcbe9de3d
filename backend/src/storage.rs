use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::fs;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

pub fn is_allowed_mime_type(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    ALLOWED_MIME_TYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(essence))
}

/// Replaces whitespace runs with `_` and drops path separators and control characters.
pub fn sanitize_original_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let mut sanitized = String::with_capacity(base.len());
    let mut in_whitespace = false;
    for ch in base.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                sanitized.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if !ch.is_control() {
            sanitized.push(ch);
        }
    }

    if sanitized.is_empty() || sanitized.chars().all(|ch| ch == '.') {
        "file".to_string()
    } else {
        sanitized
    }
}

/// `<unix millis>-<random>_<sanitized original name>`
pub fn generate_stored_name(original: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{millis}-{suffix}_{}", sanitize_original_name(original))
}

#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    /// Stores `bytes` under `name` and returns the path recorded on the document.
    async fn put_file(&self, name: &str, bytes: Vec<u8>) -> Result<String>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Whether `path` could have been returned by `put_file`.
    fn is_stored_path(&self, path: &str) -> bool;
}

pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create uploads directory {}", root.display()))?;
        let root = fs::canonicalize(&root)
            .await
            .with_context(|| format!("failed to resolve uploads directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Maps a recorded path or bare stored name onto a file directly under the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        let candidate = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let inside = candidate.parent() == Some(self.root.as_path())
            && matches!(candidate.components().last(), Some(Component::Normal(_)));
        if !inside {
            bail!("path {path} is outside the uploads directory");
        }
        Ok(candidate)
    }

    /// Rejects symlinks that lead out of the root.
    async fn resolve_existing(&self, path: &str) -> Result<Option<PathBuf>> {
        let candidate = self.resolve(path)?;
        let resolved = match fs::canonicalize(&candidate).await {
            Ok(resolved) => resolved,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to resolve upload {path}"))
            }
        };
        if !resolved.starts_with(&self.root) {
            bail!("path {path} is outside the uploads directory");
        }
        Ok(Some(resolved))
    }
}

#[async_trait]
impl FileStorage for LocalDiskStorage {
    async fn put_file(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let path = self.resolve(name)?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write upload {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self
            .resolve_existing(path)
            .await?
            .ok_or_else(|| anyhow!("upload {path} does not exist"))?;
        fs::read(&resolved)
            .await
            .with_context(|| format!("failed to read upload {path}"))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let Some(resolved) = self.resolve_existing(path).await? else {
            return Ok(());
        };
        match fs::remove_file(&resolved).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete upload {path}")),
        }
    }

    fn is_stored_path(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }
}
