//! The append-only log file.
//!
//! Layout: an 8-byte header holding the offset of the last checkpoint record
//! (`-1` if none), followed by records as encoded by [`LogRecord::encode`].
//! Appends are serialized by an internal mutex; [`LogFile::force`] makes
//! everything appended so far durable.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::record::{LogRecord, PageImage, LOG_HEADER_SIZE, NO_CHECKPOINT};
use crate::storage::error::{WalError, WalResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

struct LogInner {
    file: File,
    /// Offset one past the last complete record.
    tail: u64,
}

pub struct LogFile {
    path: PathBuf,
    page_size: usize,
    inner: Mutex<LogInner>,
}

impl LogFile {
    /// Opens the log at `path`, creating it if it does not exist.
    ///
    /// A record cut short by a crash at the end of the log is discarded and
    /// the file truncated to the last complete record.
    pub fn open(path: &Path, page_size: usize) -> WalResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        let tail = if len < LOG_HEADER_SIZE {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_i64::<BigEndian>(NO_CHECKPOINT)?;
            file.sync_all()?;
            info!("created log file {}", path.display());
            LOG_HEADER_SIZE
        } else {
            let tail = Self::scan_tail(&mut file, len, page_size)?;
            if tail < len {
                warn!(
                    "discarding {} bytes of incomplete log tail at offset {} in {}",
                    len - tail,
                    tail,
                    path.display()
                );
                file.set_len(tail)?;
                file.sync_all()?;
            }
            tail
        };

        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            inner: Mutex::new(LogInner { file, tail }),
        })
    }

    /// Returns the end of the last complete record.
    ///
    /// A record that fails to decode only counts as a torn tail when nothing
    /// but it follows: the read ran into end of file, the bad record reaches
    /// end of file, or the rest of the file is zero-filled. Anything else is
    /// mid-log corruption and fails the open.
    fn scan_tail(file: &mut File, len: u64, page_size: usize) -> WalResult<u64> {
        file.seek(SeekFrom::Start(LOG_HEADER_SIZE))?;
        let mut reader = BufReader::new(file);
        let mut offset = LOG_HEADER_SIZE;
        while offset < len {
            match LogRecord::decode(&mut reader, offset, page_size) {
                Ok(record) => offset += record.encoded_len() as u64,
                Err(e) if e.is_truncated() => {
                    debug!("log scan stopped at offset {}: {}", offset, e);
                    break;
                }
                Err(e @ (WalError::Corrupt { .. } | WalError::UnknownRecordType { .. })) => {
                    let reaches_eof = reader.stream_position()? >= len;
                    if reaches_eof || Self::blank_from(reader.get_mut(), offset)? {
                        debug!("log scan stopped at offset {}: {}", offset, e);
                        break;
                    }
                    return Err(WalError::Corrupt {
                        offset,
                        reason: format!("{}, with {} bytes of log after it", e, len - offset),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(offset)
    }

    /// True if every byte from `offset` to the end of the file is zero.
    fn blank_from(file: &mut File, offset: u64) -> WalResult<bool> {
        file.seek(SeekFrom::Start(offset))?;
        let mut rest = Vec::new();
        file.read_to_end(&mut rest)?;
        Ok(rest.iter().all(|b| *b == 0))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Offset at which the next record will be written.
    pub fn tail(&self) -> u64 {
        self.inner.lock().tail
    }

    /// Appends `record` and returns the offset it starts at.
    pub fn append(&self, record: &LogRecord) -> WalResult<u64> {
        let mut inner = self.inner.lock();
        let start = inner.tail;
        let bytes = record.encode(start);
        inner.file.seek(SeekFrom::Start(start))?;
        inner.file.write_all(&bytes)?;
        inner.tail += bytes.len() as u64;
        debug!("log append {} at {}", record, start);
        Ok(start)
    }

    /// Makes every appended record durable.
    pub fn force(&self) -> WalResult<()> {
        self.inner.lock().file.sync_data()?;
        Ok(())
    }

    pub fn log_begin(&self, tid: TransactionId) -> WalResult<u64> {
        self.append(&LogRecord::Begin(tid))
    }

    /// Appends and forces a COMMIT record.
    pub fn log_commit(&self, tid: TransactionId) -> WalResult<u64> {
        let offset = self.append(&LogRecord::Commit(tid))?;
        self.force()?;
        Ok(offset)
    }

    /// Appends and forces an ABORT record.
    pub fn log_abort(&self, tid: TransactionId) -> WalResult<u64> {
        let offset = self.append(&LogRecord::Abort(tid))?;
        self.force()?;
        Ok(offset)
    }

    /// Appends an UPDATE record. The caller forces before writing the page.
    pub fn log_update(
        &self,
        tid: TransactionId,
        pid: PageId,
        before: &[u8],
        after: &[u8],
    ) -> WalResult<u64> {
        self.check_image(before)?;
        self.check_image(after)?;
        self.append(&LogRecord::Update {
            tid,
            before: PageImage::new(pid, before),
            after: PageImage::new(pid, after),
        })
    }

    pub fn log_compensation(&self, tid: TransactionId, image: PageImage) -> WalResult<u64> {
        self.check_image(&image.data)?;
        self.append(&LogRecord::Compensation { tid, after: image })
    }

    /// Appends a CHECKPOINT record, forces it and points the header at it.
    pub fn log_checkpoint(&self, active: &[TransactionId]) -> WalResult<u64> {
        let offset = self.append(&LogRecord::Checkpoint {
            active: active.to_vec(),
        })?;
        let mut inner = self.inner.lock();
        inner.file.sync_data()?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_i64::<BigEndian>(offset as i64)?;
        inner.file.sync_data()?;
        info!("checkpoint at offset {} with {} active", offset, active.len());
        Ok(offset)
    }

    /// Offset of the most recent checkpoint record.
    pub fn last_checkpoint(&self) -> WalResult<Option<u64>> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(0))?;
        let offset = inner.file.read_i64::<BigEndian>()?;
        Ok(u64::try_from(offset).ok())
    }

    /// Reads the record starting at `offset`.
    pub fn read_at(&self, offset: u64) -> WalResult<LogRecord> {
        let mut inner = self.inner.lock();
        if offset < LOG_HEADER_SIZE || offset >= inner.tail {
            return Err(WalError::Corrupt {
                offset,
                reason: format!("offset outside log (tail {})", inner.tail),
            });
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut inner.file);
        LogRecord::decode(&mut reader, offset, self.page_size)
    }

    /// Reads the record that ends at `end`, using its trailing start offset.
    pub fn read_before(&self, end: u64) -> WalResult<Option<(u64, LogRecord)>> {
        if end <= LOG_HEADER_SIZE {
            return Ok(None);
        }
        let start = {
            let mut inner = self.inner.lock();
            inner.file.seek(SeekFrom::Start(end - 8))?;
            inner.file.read_i64::<BigEndian>()?
        };
        let start = u64::try_from(start)
            .ok()
            .filter(|start| (LOG_HEADER_SIZE..end).contains(start))
            .ok_or_else(|| WalError::Corrupt {
                offset: end,
                reason: format!("trailer before offset {} points at {}", end, start),
            })?;
        Ok(Some((start, self.read_at(start)?)))
    }

    /// Iterates records from `offset` to the tail as it is now.
    pub fn iter_from(&self, offset: u64) -> LogIter<'_> {
        LogIter {
            log: self,
            next: offset,
            end: self.tail(),
        }
    }

    /// Iterates records from the current tail back to the header.
    pub fn iter_backward(&self) -> ReverseLogIter<'_> {
        ReverseLogIter {
            log: self,
            cursor: self.tail(),
        }
    }

    /// Writes a human-readable listing of the log to `out`.
    pub fn dump(&self, out: &mut impl Write) -> WalResult<usize> {
        match self.last_checkpoint()? {
            Some(offset) => writeln!(out, "last checkpoint: {}", offset)?,
            None => writeln!(out, "last checkpoint: none")?,
        }
        let mut count = 0;
        for entry in self.iter_from(LOG_HEADER_SIZE) {
            let (offset, record) = entry?;
            writeln!(out, "{:>10} {}", offset, record)?;
            count += 1;
        }
        writeln!(out, "{} records, tail at {}", count, self.tail())?;
        Ok(count)
    }

    fn check_image(&self, data: &[u8]) -> WalResult<()> {
        if data.len() != self.page_size {
            return Err(WalError::PageSizeMismatch {
                expected: self.page_size,
                actual: data.len(),
            });
        }
        Ok(())
    }
}

/// Forward iterator over `(offset, record)` pairs.
pub struct LogIter<'a> {
    log: &'a LogFile,
    next: u64,
    end: u64,
}

impl Iterator for LogIter<'_> {
    type Item = WalResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let offset = self.next;
        match self.log.read_at(offset) {
            Ok(record) => {
                self.next += record.encoded_len() as u64;
                Some(Ok((offset, record)))
            }
            Err(e) => {
                self.next = self.end;
                Some(Err(e))
            }
        }
    }
}

/// Backward iterator over `(offset, record)` pairs, newest first.
pub struct ReverseLogIter<'a> {
    log: &'a LogFile,
    cursor: u64,
}

impl Iterator for ReverseLogIter<'_> {
    type Item = WalResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.log.read_before(self.cursor) {
            Ok(Some((start, record))) => {
                self.cursor = start;
                Some(Ok((start, record)))
            }
            Ok(None) => None,
            Err(e) => {
                self.cursor = LOG_HEADER_SIZE;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::TempDir;

    const PAGE: usize = 32;

    fn open_log(dir: &TempDir) -> Result<LogFile> {
        Ok(LogFile::open(&dir.path().join("wal.log"), PAGE)?)
    }

    fn tid(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    #[test]
    fn test_new_log_has_empty_header() -> Result<()> {
        let dir = TempDir::new()?;
        let log = open_log(&dir)?;
        assert_eq!(log.tail(), LOG_HEADER_SIZE);
        assert_eq!(log.last_checkpoint()?, None);
        assert_eq!(fs::read(log.path())?, (-1i64).to_be_bytes());
        Ok(())
    }

    #[test]
    fn test_append_and_read_back() -> Result<()> {
        let dir = TempDir::new()?;
        let log = open_log(&dir)?;
        let pid = PageId::new(1, 2);

        let begin = log.log_begin(tid(1))?;
        let update = log.log_update(tid(1), pid, &[0u8; PAGE], &[1u8; PAGE])?;
        let commit = log.log_commit(tid(1))?;

        assert_eq!(begin, LOG_HEADER_SIZE);
        assert_eq!(log.read_at(begin)?, LogRecord::Begin(tid(1)));
        assert_eq!(log.read_at(commit)?, LogRecord::Commit(tid(1)));
        match log.read_at(update)? {
            LogRecord::Update { tid: t, before, after } => {
                assert_eq!(t, tid(1));
                assert_eq!(before, PageImage::new(pid, vec![0u8; PAGE]));
                assert_eq!(after, PageImage::new(pid, vec![1u8; PAGE]));
            }
            other => panic!("unexpected record {other}"),
        }
        Ok(())
    }

    #[test]
    fn test_backward_traversal() -> Result<()> {
        let dir = TempDir::new()?;
        let log = open_log(&dir)?;
        let pid = PageId::new(0, 0);
        let mut written = vec![
            LogRecord::Begin(tid(1)),
            LogRecord::Update {
                tid: tid(1),
                before: PageImage::new(pid, vec![0u8; PAGE]),
                after: PageImage::new(pid, vec![5u8; PAGE]),
            },
            LogRecord::Checkpoint {
                active: vec![tid(1)],
            },
            LogRecord::Abort(tid(1)),
        ];
        let mut offsets = Vec::new();
        for record in &written {
            offsets.push(log.append(record)?);
        }

        let backward: Vec<(u64, LogRecord)> = log.iter_backward().collect::<WalResult<_>>()?;
        written.reverse();
        offsets.reverse();
        assert_eq!(backward.iter().map(|(o, _)| *o).collect::<Vec<_>>(), offsets);
        assert_eq!(backward.into_iter().map(|(_, r)| r).collect::<Vec<_>>(), written);
        Ok(())
    }

    #[test]
    fn test_forward_iteration_from_offset() -> Result<()> {
        let dir = TempDir::new()?;
        let log = open_log(&dir)?;
        log.log_begin(tid(1))?;
        let second = log.log_begin(tid(2))?;
        log.log_commit(tid(2))?;

        let records: Vec<LogRecord> = log
            .iter_from(second)
            .map(|entry| entry.map(|(_, r)| r))
            .collect::<WalResult<_>>()?;
        assert_eq!(records, vec![LogRecord::Begin(tid(2)), LogRecord::Commit(tid(2))]);
        Ok(())
    }

    #[test]
    fn test_checkpoint_updates_header() -> Result<()> {
        let dir = TempDir::new()?;
        let log = open_log(&dir)?;
        log.log_begin(tid(4))?;
        let offset = log.log_checkpoint(&[tid(4)])?;

        assert_eq!(log.last_checkpoint()?, Some(offset));
        assert_eq!(
            log.read_at(offset)?,
            LogRecord::Checkpoint {
                active: vec![tid(4)]
            }
        );
        // The header rewrite must not disturb appends.
        let next = log.log_commit(tid(4))?;
        assert_eq!(log.read_at(next)?, LogRecord::Commit(tid(4)));
        Ok(())
    }

    #[test]
    fn test_reopen_preserves_records() -> Result<()> {
        let dir = TempDir::new()?;
        let tail = {
            let log = open_log(&dir)?;
            log.log_begin(tid(1))?;
            log.log_checkpoint(&[tid(1)])?;
            log.log_commit(tid(1))?;
            log.tail()
        };

        let log = open_log(&dir)?;
        assert_eq!(log.tail(), tail);
        assert!(log.last_checkpoint()?.is_some());
        assert_eq!(log.iter_from(LOG_HEADER_SIZE).count(), 3);
        Ok(())
    }

    #[test]
    fn test_torn_tail_is_truncated() -> Result<()> {
        let dir = TempDir::new()?;
        let good_tail = {
            let log = open_log(&dir)?;
            log.log_begin(tid(1))?;
            log.log_commit(tid(1))?;
            log.tail()
        };
        let partial = LogRecord::Update {
            tid: tid(2),
            before: PageImage::new(PageId::new(0, 0), vec![0u8; PAGE]),
            after: PageImage::new(PageId::new(0, 0), vec![1u8; PAGE]),
        }
        .encode(good_tail);
        {
            let mut file = OpenOptions::new().append(true).open(dir.path().join("wal.log"))?;
            file.write_all(&partial[..partial.len() / 2])?;
        }

        let log = open_log(&dir)?;
        assert_eq!(log.tail(), good_tail);
        assert_eq!(fs::metadata(log.path())?.len(), good_tail);
        let next = log.log_begin(tid(3))?;
        assert_eq!(next, good_tail);
        assert_eq!(log.iter_backward().count(), 3);
        Ok(())
    }

    #[test]
    fn test_zero_filled_tail_is_truncated() -> Result<()> {
        let dir = TempDir::new()?;
        let good_tail = {
            let log = open_log(&dir)?;
            log.log_begin(tid(1))?;
            log.tail()
        };
        {
            let mut file = OpenOptions::new().append(true).open(dir.path().join("wal.log"))?;
            file.write_all(&[0u8; 40])?;
        }

        let log = open_log(&dir)?;
        assert_eq!(log.tail(), good_tail);
        assert_eq!(fs::metadata(log.path())?.len(), good_tail);
        Ok(())
    }

    #[test]
    fn test_corrupt_record_mid_log_fails_open() -> Result<()> {
        let dir = TempDir::new()?;
        let second = {
            let log = open_log(&dir)?;
            log.log_begin(tid(1))?;
            log.log_commit(tid(1))?;
            let second = log.log_begin(tid(2))?;
            log.log_commit(tid(2))?;
            log.log_begin(tid(3))?;
            log.log_commit(tid(3))?;
            second
        };
        let path = dir.path().join("wal.log");
        let mut bytes = fs::read(&path)?;
        let len = bytes.len() as u64;
        bytes[second as usize + 3] = 0x7f;
        fs::write(&path, &bytes)?;

        let result = LogFile::open(&path, PAGE);
        assert!(matches!(result, Err(WalError::Corrupt { offset, .. }) if offset == second));
        // Nothing after the bad record was thrown away.
        assert_eq!(fs::metadata(&path)?.len(), len);
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_image_size() -> Result<()> {
        let dir = TempDir::new()?;
        let log = open_log(&dir)?;
        let result = log.log_update(tid(1), PageId::new(0, 0), &[0u8; 4], &[0u8; PAGE]);
        assert!(matches!(result, Err(WalError::PageSizeMismatch { .. })));
        assert_eq!(log.tail(), LOG_HEADER_SIZE);
        Ok(())
    }

    #[test]
    fn test_read_outside_log() -> Result<()> {
        let dir = TempDir::new()?;
        let log = open_log(&dir)?;
        assert!(log.read_at(0).is_err());
        assert!(log.read_at(LOG_HEADER_SIZE).is_err());
        assert!(log.read_before(LOG_HEADER_SIZE)?.is_none());
        Ok(())
    }

    #[test]
    fn test_dump() -> Result<()> {
        let dir = TempDir::new()?;
        let log = open_log(&dir)?;
        log.log_begin(tid(1))?;
        log.log_abort(tid(1))?;

        let mut out = Vec::new();
        assert_eq!(log.dump(&mut out)?, 2);
        let text = String::from_utf8(out)?;
        assert!(text.starts_with("last checkpoint: none"));
        assert!(text.contains("<T_1 BEGIN>"));
        assert!(text.contains("<T_1 ABORT>"));
        Ok(())
    }
}
