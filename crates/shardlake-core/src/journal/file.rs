//! File-backed journal.
//!
//! Frame layout, little-endian:
//! ```text
//! [0..4]   payload length: u32
//! [4..12]  xxhash64 of the payload
//! [12..]   payload: JSON-encoded JournalRecord
//! ```
//! Records are numbered from 1 in file order.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

use crate::config::SyncMode;
use crate::error::JournalError;
use crate::types::JournalId;

use super::lock::JournalLock;
use super::{Journal, JournalRecord};

/// Size of the per-record frame header.
const FRAME_HEADER_SIZE: usize = 12;

/// Seed for frame checksums.
const CHECKSUM_SEED: u64 = 0;

struct JournalWriter {
    file: File,
    /// Length of the valid, framed prefix of the file.
    len: u64,
    last_id: JournalId,
    /// Set when a failed append could not be cut off the file.
    poisoned: bool,
}

impl JournalWriter {
    /// Cut the file back to the last committed frame. If that fails the
    /// tail may hold a record its caller saw fail, so later appends are
    /// refused.
    fn roll_back(&mut self, path: &Path) {
        let result = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to roll back journal append");
            self.poisoned = true;
        }
    }
}

/// An append-only journal file guarded by an exclusive lock file.
pub struct FileJournal {
    writer: Mutex<JournalWriter>,
    sync_mode: SyncMode,
    path: PathBuf,
    _lock: JournalLock,
}

impl FileJournal {
    /// Open (or create) the journal at `path` and return it together with
    /// every record already in it.
    ///
    /// An incomplete frame at the tail (a torn append) is cut off. A
    /// complete frame that fails its checksum is an error.
    pub fn open(
        path: impl AsRef<Path>,
        sync_mode: SyncMode,
    ) -> Result<(Self, Vec<(JournalId, JournalRecord)>), JournalError> {
        let path = path.as_ref();
        let lock = JournalLock::try_exclusive(&path.with_extension("lock"))?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let (records, valid_len) = decode_frames(&data)?;
        if valid_len < data.len() {
            warn!(
                path = %path.display(),
                valid_len,
                file_len = data.len(),
                "truncating incomplete journal tail"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let last_id = records.len() as JournalId;
        debug!(path = %path.display(), records = records.len(), "journal opened");

        Ok((
            Self {
                writer: Mutex::new(JournalWriter {
                    file,
                    len: valid_len as u64,
                    last_id,
                    poisoned: false,
                }),
                sync_mode,
                path: path.to_path_buf(),
                _lock: lock,
            },
            records,
        ))
    }

    /// Read every complete record of the journal at `path` without taking
    /// the lock. An incomplete tail is ignored.
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<(JournalId, JournalRecord)>, JournalError> {
        let data = std::fs::read(path)?;
        Ok(decode_frames(&data)?.0)
    }
}

impl Journal for FileJournal {
    fn append(&self, record: &JournalRecord) -> Result<JournalId, JournalError> {
        let frame = encode_frame(record)?;
        let mut writer = self.writer.lock();
        if writer.poisoned {
            return Err(JournalError::Unavailable(format!(
                "{} has an uncommitted tail",
                self.path.display()
            )));
        }

        // A frame is committed only once it is written and, in full sync
        // mode, synced. Anything short of that is cut off again.
        if let Err(e) = write_frame(&mut writer.file, &frame, self.sync_mode) {
            writer.roll_back(&self.path);
            return Err(e.into());
        }

        writer.len += frame.len() as u64;
        writer.last_id += 1;
        debug!(id = writer.last_id, op = record.op_name(), "journal append");
        Ok(writer.last_id)
    }

    fn last_id(&self) -> JournalId {
        self.writer.lock().last_id
    }
}

fn write_frame(file: &mut File, frame: &[u8], sync_mode: SyncMode) -> std::io::Result<()> {
    file.write_all(frame)?;
    if sync_mode == SyncMode::Full {
        file.sync_data()?;
    }
    Ok(())
}

fn encode_frame(record: &JournalRecord) -> Result<Vec<u8>, JournalError> {
    let payload = serde_json::to_vec(record)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&xxh64(&payload, CHECKSUM_SEED).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode frames from `data`. Returns the records and the length of the
/// prefix made of complete frames.
fn decode_frames(data: &[u8]) -> Result<(Vec<(JournalId, JournalRecord)>, usize), JournalError> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while data.len() - offset >= FRAME_HEADER_SIZE {
        let len = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
        let checksum = u64::from_le_bytes(data[offset + 4..offset + 12].try_into().unwrap());

        let body_start = offset + FRAME_HEADER_SIZE;
        if data.len() - body_start < len {
            break;
        }
        let payload = &data[body_start..body_start + len];

        if xxh64(payload, CHECKSUM_SEED) != checksum {
            return Err(JournalError::Corrupted {
                offset: offset as u64,
                reason: "checksum mismatch".to_string(),
            });
        }
        let record: JournalRecord =
            serde_json::from_slice(payload).map_err(|e| JournalError::Corrupted {
                offset: offset as u64,
                reason: e.to_string(),
            })?;

        records.push((records.len() as JournalId + 1, record));
        offset = body_start + len;
    }

    Ok((records, offset))
}
