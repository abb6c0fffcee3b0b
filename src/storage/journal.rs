//! Append-only journal backing a file collection.
//!
//! Layout: a 5-byte header (magic + version) followed by entries framed as
//! `len (u32 LE) | rmp-serde payload | crc32 (u32 LE)`.
//!
//! On open the journal is replayed in order. A short read at the tail (a
//! write interrupted by a crash) ends replay and the torn bytes are cut off.
//! A complete entry whose checksum does not match is corruption.

use super::StoredDocument;
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for journal files.
const JOURNAL_MAGIC: &[u8; 4] = b"TWJ\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

const HEADER_SIZE: u64 = 5;

/// Per-entry framing overhead (length prefix + checksum).
const FRAME_OVERHEAD: u64 = 8;

/// Upper bound on a single entry, as a sanity check on the length prefix.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// One journaled mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) enum JournalEntry {
    /// Insert or replace a document.
    Put(StoredDocument),
    /// Remove a document.
    Delete { id: String },
}

pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    /// End of the last complete entry. Failed appends are cut back to here.
    end: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
    writes_since_sync: u64,
    /// Sync every N writes (1 = every write).
    sync_interval: u64,
    /// Make the next append write only this many bytes and then fail.
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl Journal {
    /// Open or create a journal, returning it with every entry replayed.
    pub(crate) fn open(
        path: impl AsRef<Path>,
        sync_interval: u64,
    ) -> Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let (entries, end) = if file_len == 0 {
            Self::write_header(&mut file)?;
            (Vec::new(), HEADER_SIZE)
        } else {
            let (entries, good_len) = Self::replay(&file, file_len)?;
            if good_len < file_len {
                tracing::warn!(
                    path = %path.display(),
                    dropped_bytes = file_len - good_len,
                    "truncating torn journal tail"
                );
                file.set_len(good_len)?;
                file.sync_all()?;
            }
            (entries, good_len)
        };

        file.seek(SeekFrom::Start(end))?;

        Ok((
            Self {
                path,
                file,
                end,
                poisoned: false,
                writes_since_sync: 0,
                sync_interval: sync_interval.max(1),
                #[cfg(test)]
                fail_after: None,
            },
            entries,
        ))
    }

    /// Append an entry. The entry reaches the OS before returning and is
    /// fsynced every `sync_interval` writes.
    ///
    /// On failure the file is cut back to the previous entry boundary, so a
    /// later append never lands after a partial frame.
    pub(crate) fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        if self.poisoned {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::Other,
                "journal unusable after a failed rollback",
            )));
        }

        let frame = Self::encode_frame(entry)?;

        let mut written = self.write_frame(&frame);
        if written.is_ok() && self.writes_since_sync + 1 >= self.sync_interval {
            written = self.file.sync_all();
        }
        if let Err(e) = written {
            self.roll_back();
            return Err(e.into());
        }

        self.end += frame.len() as u64;
        self.writes_since_sync += 1;
        if self.writes_since_sync >= self.sync_interval {
            self.writes_since_sync = 0;
        }
        Ok(())
    }

    /// Force sync all pending writes to disk.
    pub(crate) fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Replace the journal with one `Put` per live document.
    ///
    /// The new journal is written beside the old one and renamed over it.
    pub(crate) fn rewrite<'a>(
        &mut self,
        documents: impl IntoIterator<Item = &'a StoredDocument>,
    ) -> Result<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            Self::write_header(&mut tmp)?;

            let mut writer = BufWriter::new(tmp);
            for doc in documents {
                writer.write_all(&Self::encode_frame(&JournalEntry::Put(doc.clone()))?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.end = file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.poisoned = false;
        self.writes_since_sync = 0;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fail_next_append_after(&mut self, bytes: usize) {
        self.fail_after = Some(bytes);
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        if let Some(limit) = self.fail_after.take() {
            self.file.write_all(&frame[..limit.min(frame.len())])?;
            return Err(std::io::Error::new(ErrorKind::Other, "injected write failure"));
        }
        self.file.write_all(frame)
    }

    /// Cut the file back to the last complete entry.
    fn roll_back(&mut self) {
        let end = self.end;
        let restored = self
            .file
            .set_len(end)
            .and_then(|()| self.file.seek(SeekFrom::Start(end)).map(|_| ()));
        match restored {
            Ok(()) => {
                tracing::warn!(path = %self.path.display(), end, "rolled back failed journal append");
            }
            Err(e) => {
                self.poisoned = true;
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "unable to roll back failed journal append"
                );
            }
        }
    }

    fn write_header(file: &mut File) -> Result<()> {
        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    /// Read every complete entry. Returns the entries and the byte length of
    /// the valid prefix.
    fn replay(file: &File, file_len: u64) -> Result<(Vec<JournalEntry>, u64)> {
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(StoreError::Corruption("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(StoreError::Corruption(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }

        let mut entries = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < file_len {
            match Self::read_entry(&mut reader) {
                Ok((entry, size)) => {
                    entries.push(entry);
                    offset += size;
                }
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        Ok((entries, offset))
    }

    /// `len | payload | crc32`, built in memory so a frame is written in
    /// one call.
    fn encode_frame(entry: &JournalEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;
        if encoded.len() > MAX_ENTRY_SIZE {
            return Err(StoreError::Serialization("Journal entry too large".into()));
        }

        let mut frame = Vec::with_capacity(encoded.len() + FRAME_OVERHEAD as usize);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    fn read_entry<R: Read>(reader: &mut R) -> Result<(JournalEntry, u64)> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_SIZE {
            return Err(StoreError::Corruption("Journal entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(StoreError::Corruption("Journal checksum mismatch".into()));
        }

        let entry = rmp_serde::from_slice(&encoded)?;
        Ok((entry, len as u64 + FRAME_OVERHEAD))
    }
}
