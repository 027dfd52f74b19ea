use crc32fast::Hasher;
use quarry_core::error::{ErrorCode, QuarryError};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::warn;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Data integrity error (CRC mismatch)")]
    CrcMismatch,
    #[error("Corrupt entry")]
    CorruptEntry,
}

impl QuarryError for WalError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::Internal
    }
}

/// Append-only log of storage mutations.
///
/// Frame layout: `[LSN: 8 bytes][CRC: 4 bytes][Len: 4 bytes][Payload]`.
/// Chunk payloads arrive already AEAD-encrypted at the row level, so the log
/// itself stays plaintext framing around opaque bytes.
pub struct Wal {
    file: BufWriter<File>,
    current_lsn: AtomicU64,
}

impl Wal {
    /// Open (creating if needed) a WAL and replay the intact prefix.
    ///
    /// Returns the writer positioned for append plus every payload recovered
    /// before the first torn or corrupt frame; the torn tail is dropped with
    /// a warning, matching at-least-once ingestion semantics.
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<Vec<u8>>), WalError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (payloads, last_lsn, valid_len) = match File::open(&path).await {
            Ok(file) => Self::scan(file).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), 0, 0),
            Err(e) => return Err(e.into()),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .await?;
        // Discard any torn tail so new frames extend the valid prefix.
        file.set_len(valid_len).await?;
        file.seek(std::io::SeekFrom::End(0)).await?;

        Ok((
            Self {
                file: BufWriter::new(file),
                current_lsn: AtomicU64::new(last_lsn),
            },
            payloads,
        ))
    }

    async fn scan(file: File) -> Result<(Vec<Vec<u8>>, u64, u64), WalError> {
        let mut reader = tokio::io::BufReader::new(file);
        let mut payloads = Vec::new();
        let mut last_lsn = 0u64;
        let mut valid_len = 0u64;

        loop {
            let lsn = match reader.read_u64().await {
                Ok(lsn) => lsn,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };

            let (crc, len) = match (reader.read_u32().await, reader.read_u32().await) {
                (Ok(crc), Ok(len)) => (crc, len),
                _ => {
                    warn!(lsn, "torn WAL header, dropping tail");
                    break;
                }
            };

            let mut payload = vec![0u8; len as usize];
            if reader.read_exact(&mut payload).await.is_err() {
                warn!(lsn, "torn WAL payload, dropping tail");
                break;
            }

            let mut hasher = Hasher::new();
            hasher.update(&payload);
            if hasher.finalize() != crc {
                warn!(lsn, "WAL CRC mismatch, dropping tail");
                break;
            }

            last_lsn = lsn;
            valid_len += 16 + payload.len() as u64;
            payloads.push(payload);
        }

        Ok((payloads, last_lsn, valid_len))
    }

    /// Append an entry and flush it. Returns the assigned LSN.
    pub async fn append(&mut self, payload: &[u8]) -> Result<u64, WalError> {
        let lsn = self.current_lsn.fetch_add(1, Ordering::SeqCst) + 1;
        let len = payload.len() as u32;

        let mut hasher = Hasher::new();
        hasher.update(payload);
        let crc = hasher.finalize();

        self.file.write_u64(lsn).await?;
        self.file.write_u32(crc).await?;
        self.file.write_u32(len).await?;
        self.file.write_all(payload).await?;
        self.file.flush().await?;

        Ok(lsn)
    }

    pub fn current_lsn(&self) -> u64 {
        self.current_lsn.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_reopen_replays_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.wal");

        {
            let (mut wal, replayed) = Wal::open(&path).await.unwrap();
            assert!(replayed.is_empty());
            wal.append(b"first").await.unwrap();
            wal.append(b"second").await.unwrap();
        }

        let (wal, replayed) = Wal::open(&path).await.unwrap();
        assert_eq!(replayed, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(wal.current_lsn(), 2);
    }

    #[tokio::test]
    async fn corrupt_tail_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.wal");

        {
            let (mut wal, _) = Wal::open(&path).await.unwrap();
            wal.append(b"intact").await.unwrap();
        }

        // Truncate mid-frame to simulate a crash during append.
        let bytes = tokio::fs::read(&path).await.unwrap();
        tokio::fs::write(&path, &bytes[..bytes.len() - 2]).await.unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
            file.write_u64(99).await.unwrap();
        }

        let (mut wal, replayed) = Wal::open(&path).await.unwrap();
        assert!(replayed.len() <= 1);

        // Appends after recovery extend the valid prefix and survive.
        wal.append(b"after recovery").await.unwrap();
        drop(wal);

        let (_, replayed) = Wal::open(&path).await.unwrap();
        assert!(replayed.contains(&b"after recovery".to_vec()));
    }
}
