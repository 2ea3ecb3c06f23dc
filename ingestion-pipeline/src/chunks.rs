use std::path::PathBuf;

use serde_json::Value;
use tracing::{info, warn};

use common::error::AppError;

/// Chunk files larger than this trigger a warning.
const CHUNK_SIZE_WARN_BYTES: u64 = 50 * 1024 * 1024;

/// Buffers neutral records and writes them to
/// `raw_data/{data_type}/{data_type}_chunk_NNNN.json` files of at most
/// `chunk_size` items.
pub struct ChunkWriter {
    dir: PathBuf,
    data_type: String,
    chunk_size: usize,
    buffer: Vec<Value>,
    counter: u32,
    written: Vec<String>,
}

impl ChunkWriter {
    /// `counter_start` continues numbering from a previous run's chunk list.
    pub fn new(tenant_dir: &std::path::Path, data_type: &str, chunk_size: usize, counter_start: u32) -> Self {
        Self {
            dir: tenant_dir.join("raw_data").join(data_type),
            data_type: data_type.to_string(),
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            counter: counter_start,
            written: Vec::new(),
        }
    }

    pub fn written_chunk_ids(&self) -> &[String] {
        &self.written
    }

    /// Buffers one record; writes a chunk file when the buffer is full.
    pub async fn push(&mut self, record: Value) -> Result<Option<String>, AppError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.chunk_size {
            return self.write_chunk().await.map(Some);
        }
        Ok(None)
    }

    /// Writes any buffered remainder as a final short chunk.
    pub async fn flush(&mut self) -> Result<Option<String>, AppError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.write_chunk().await.map(Some)
    }

    async fn write_chunk(&mut self) -> Result<String, AppError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let chunk_id = format!("{:04}", self.counter);
        let file = self
            .dir
            .join(format!("{}_chunk_{chunk_id}.json", self.data_type));

        let payload = serde_json::to_vec(&self.buffer)?;
        tokio::fs::write(&file, &payload).await?;

        let size = payload.len() as u64;
        if size > CHUNK_SIZE_WARN_BYTES {
            warn!(
                file = %file.display(),
                size_bytes = size,
                "chunk file exceeds 50 MB; consider a smaller chunk size"
            );
        }
        info!(
            file = %file.display(),
            items = self.buffer.len(),
            size_bytes = size,
            "chunk written"
        );

        self.buffer.clear();
        self.counter += 1;
        self.written.push(chunk_id.clone());
        Ok(chunk_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_full_and_remainder_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ChunkWriter::new(dir.path(), "tickets", 2, 0);

        assert!(writer.push(json!({"id": 1})).await.expect("push").is_none());
        let first = writer.push(json!({"id": 2})).await.expect("push");
        assert_eq!(first.as_deref(), Some("0000"));

        writer.push(json!({"id": 3})).await.expect("push");
        let last = writer.flush().await.expect("flush");
        assert_eq!(last.as_deref(), Some("0001"));
        assert!(writer.flush().await.expect("empty flush").is_none());

        let chunk_path = dir
            .path()
            .join("raw_data/tickets/tickets_chunk_0000.json");
        let content: Vec<serde_json::Value> = serde_json::from_slice(
            &std::fs::read(chunk_path).expect("chunk file"),
        )
        .expect("chunk json");
        assert_eq!(content.len(), 2);

        assert_eq!(writer.written_chunk_ids(), ["0000", "0001"]);
    }

    #[tokio::test]
    async fn counter_continues_from_previous_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ChunkWriter::new(dir.path(), "conversations", 1, 3);

        let id = writer.push(json!({"id": 1})).await.expect("push");
        assert_eq!(id.as_deref(), Some("0003"));
        assert!(dir
            .path()
            .join("raw_data/conversations/conversations_chunk_0003.json")
            .exists());
    }
}
