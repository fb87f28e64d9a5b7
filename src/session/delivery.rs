use log::info;
use std::io;
use std::path::Path;

use crate::file_utils::FileManager;

/// Placeholder sent when a job produced no text at all
pub const EMPTY_TRANSCRIPT: &str = "No transcript found.";

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Splits on character boundaries, never inside a UTF-8 sequence.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for c in text.chars() {
        current.push(c);
        count += 1;
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// The transcript text to deliver.
///
/// Reads the stored artifact when the job left one, otherwise writes
/// `lines` there first.
pub async fn load_or_write_transcript(path: &Path, lines: &[String]) -> io::Result<String> {
    if FileManager::file_exists(path) {
        let text = tokio::fs::read_to_string(path).await?;
        if !text.trim().is_empty() {
            info!("Transcript loaded from: {:?}", path);
            return Ok(text);
        }
    }

    let mut text = lines.join("\n");
    if text.is_empty() {
        text = EMPTY_TRANSCRIPT.to_string();
    }
    FileManager::write_atomic_async(path.to_path_buf(), text.clone()).await?;
    info!("Transcript written to: {:?}", path);
    Ok(text)
}
