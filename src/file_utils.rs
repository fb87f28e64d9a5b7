use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

// @module: File and directory utilities

// @const: Extension used for downloaded audio of unknown format
pub const AUDIO_EXTENSION: &str = "audio";

// @const: Extension used for transcript artifacts
pub const TRANSCRIPT_EXTENSION: &str = "txt";

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    // @generates: Storage path for a session's audio upload
    // @params: storage_dir, user_id, session_id, extension of the upload
    pub fn audio_path<P: AsRef<Path>>(
        storage_dir: P,
        user_id: i64,
        session_id: &str,
        extension: &str,
    ) -> PathBuf {
        let filename = format!(
            "{}_{}_{}.{}",
            user_id,
            session_id,
            Utc::now().timestamp(),
            extension
        );
        storage_dir.as_ref().join(filename)
    }

    // @generates: Transcript path next to an audio file
    pub fn transcript_path_for<P: AsRef<Path>>(audio_path: P) -> PathBuf {
        audio_path.as_ref().with_extension(TRANSCRIPT_EXTENSION)
    }

    /// Replace a file's content atomically: readers see either the old or
    /// the new content, never a torn write
    pub fn write_atomic<P: AsRef<Path>>(path: P, content: &str) -> std::io::Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// [`FileManager::write_atomic`] on the blocking thread pool
    pub async fn write_atomic_async(path: PathBuf, content: String) -> std::io::Result<()> {
        tokio::task::spawn_blocking(move || Self::write_atomic(&path, &content))
            .await
            .map_err(|e| std::io::Error::other(format!("write task failed: {}", e)))?
    }

    /// Append one line to a file, creating it if needed
    pub fn append_line<P: AsRef<Path>>(path: P, line: &str) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{}", line)
    }

    /// Size of a file in bytes, 0 if it cannot be read
    pub fn file_size<P: AsRef<Path>>(path: P) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}
