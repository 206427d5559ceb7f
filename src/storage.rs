//! Flat media directory shared by every uploader.
//!
//! Names are never overwritten: a taken name is reused only when the bytes
//! match, otherwise the stored copy gets a content-hash suffix.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["pdf", "doc", "docx", "xls", "xlsx"];

/// Characters escaped when a stored name becomes a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No file uploaded")]
    Empty,
    #[error("Unsupported file type")]
    UnsupportedType,
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    url_prefix: String,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let mut url_prefix = url_prefix.into();
        if !url_prefix.ends_with('/') {
            url_prefix.push('/');
        }
        Self {
            root: root.into(),
            url_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}{}", self.url_prefix, utf8_percent_encode(name, PATH_SEGMENT))
    }

    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredFile, StorageError> {
        let name = normalize_name(original_name).ok_or(StorageError::Empty)?;
        if !has_allowed_extension(&name) {
            return Err(StorageError::UnsupportedType);
        }

        fs::create_dir_all(&self.root).await?;

        let digest = hex_digest(bytes);
        for candidate in candidate_names(&name, &digest) {
            let path = self.root.join(&candidate);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    write_or_discard(&path, file, bytes).await?;
                    debug!(name = %candidate, size = bytes.len(), "stored upload");
                    return Ok(self.stored(candidate));
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if fs::read(&path).await? == bytes {
                        debug!(name = %candidate, "upload matches existing file");
                        return Ok(self.stored(candidate));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StorageError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free name for {name}"),
        )))
    }

    fn stored(&self, name: String) -> StoredFile {
        StoredFile {
            url: self.url_for(&name),
            name,
        }
    }

    /// Public URLs for every file in the directory, sorted by name. A missing
    /// directory lists as empty.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        Ok(names.iter().map(|name| self.url_for(name)).collect())
    }

    /// Opens a stored file for streaming. `None` for unknown files and for
    /// names that try to leave the directory.
    pub async fn open(&self, filename: &str) -> Result<Option<fs::File>, StorageError> {
        if !is_plain_file_name(filename) {
            return Ok(None);
        }

        let path = self.root.join(filename);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(fs::File::open(&path).await?)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Writes the whole upload or removes the half-written file.
async fn write_or_discard<W>(path: &Path, mut writer: W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = fill(&mut writer, bytes).await;
    drop(writer);

    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(path).await {
            warn!(path = %path.display(), error = %cleanup, "could not remove partial upload");
        }
        return Err(err);
    }
    Ok(())
}

async fn fill<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Drops any client-side directory part and replaces spaces with underscores.
pub fn normalize_name(original: &str) -> Option<String> {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .trim();
    let name = base.replace(' ', "_");
    is_plain_file_name(&name).then_some(name)
}

pub fn has_allowed_extension(name: &str) -> bool {
    extension(name).is_some_and(|ext| {
        ALLOWED_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed))
    })
}

fn extension(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|ext| ext.to_str())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn candidate_names(name: &str, digest: &str) -> [String; 3] {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = extension(name).unwrap_or_default();
    [
        name.to_string(),
        format!("{stem}-{}.{ext}", &digest[..8]),
        format!("{stem}-{digest}.{ext}"),
    ]
}

fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
