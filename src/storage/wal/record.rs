//! Log record types and their on-disk encoding.
//!
//! Every record is laid out big-endian as
//!
//! ```text
//! i32 type tag | i64 transaction id | payload | i64 start offset
//! ```
//!
//! The trailing start offset lets a reader walk the log backwards from any
//! record boundary without an index. Page images are encoded as
//! `u32 table id | u32 page number | u32 length | bytes`.

use std::fmt;
use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};

use crate::storage::error::{WalError, WalResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Size of the log file header holding the last checkpoint offset.
pub const LOG_HEADER_SIZE: u64 = 8;

/// Header value meaning "no checkpoint written yet".
pub const NO_CHECKPOINT: i64 = -1;

/// Transaction id field written for records that carry none.
const NO_TRANSACTION: i64 = -1;

const TAG_SIZE: usize = 4;
const TID_SIZE: usize = 8;
const TRAILER_SIZE: usize = 8;
const IMAGE_HEADER_SIZE: usize = 12;

/// Upper bound on the number of transactions a checkpoint can list.
const MAX_CHECKPOINT_ACTIVE: i32 = 1 << 20;

/// Type tags as stored in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Abort = 1,
    Commit = 2,
    Update = 3,
    Begin = 4,
    Checkpoint = 5,
    Compensation = 6,
}

impl RecordType {
    pub fn tag(self) -> i32 {
        self as i32
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(RecordType::Abort),
            2 => Some(RecordType::Commit),
            3 => Some(RecordType::Update),
            4 => Some(RecordType::Begin),
            5 => Some(RecordType::Checkpoint),
            6 => Some(RecordType::Compensation),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordType::Abort => "ABORT",
            RecordType::Commit => "COMMIT",
            RecordType::Update => "UPDATE",
            RecordType::Begin => "BEGIN",
            RecordType::Checkpoint => "CHECKPOINT",
            RecordType::Compensation => "CLR",
        };
        f.write_str(name)
    }
}

/// Full image of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub pid: PageId,
    pub data: Vec<u8>,
}

impl PageImage {
    pub fn new(pid: PageId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            pid,
            data: data.into(),
        }
    }

    fn encoded_len(&self) -> usize {
        IMAGE_HEADER_SIZE + self.data.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.pid.table_id);
        buf.put_u32(self.pid.page_no);
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    fn decode<R: Read>(reader: &mut R, page_size: usize) -> WalResult<Self> {
        let table_id = reader.read_u32::<BigEndian>()?;
        let page_no = reader.read_u32::<BigEndian>()?;
        let len = reader.read_u32::<BigEndian>()? as usize;
        if len != page_size {
            return Err(WalError::PageSizeMismatch {
                expected: page_size,
                actual: len,
            });
        }
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        Ok(Self::new(PageId::new(table_id, page_no), data))
    }
}

/// A single write-ahead log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Begin(TransactionId),
    Commit(TransactionId),
    Abort(TransactionId),
    Update {
        tid: TransactionId,
        before: PageImage,
        after: PageImage,
    },
    /// Written while undoing an update; `after` is the restored image.
    Compensation {
        tid: TransactionId,
        after: PageImage,
    },
    Checkpoint {
        active: Vec<TransactionId>,
    },
}

impl LogRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            LogRecord::Begin(_) => RecordType::Begin,
            LogRecord::Commit(_) => RecordType::Commit,
            LogRecord::Abort(_) => RecordType::Abort,
            LogRecord::Update { .. } => RecordType::Update,
            LogRecord::Compensation { .. } => RecordType::Compensation,
            LogRecord::Checkpoint { .. } => RecordType::Checkpoint,
        }
    }

    /// Owning transaction; checkpoints have none.
    pub fn tid(&self) -> Option<TransactionId> {
        match self {
            LogRecord::Begin(tid) | LogRecord::Commit(tid) | LogRecord::Abort(tid) => Some(*tid),
            LogRecord::Update { tid, .. } | LogRecord::Compensation { tid, .. } => Some(*tid),
            LogRecord::Checkpoint { .. } => None,
        }
    }

    /// Page the record redoes, for updates and compensations.
    pub fn redo_image(&self) -> Option<&PageImage> {
        match self {
            LogRecord::Update { after, .. } | LogRecord::Compensation { after, .. } => Some(after),
            _ => None,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            LogRecord::Begin(_) | LogRecord::Commit(_) | LogRecord::Abort(_) => 0,
            LogRecord::Update { before, after, .. } => before.encoded_len() + after.encoded_len(),
            LogRecord::Compensation { after, .. } => after.encoded_len(),
            LogRecord::Checkpoint { active } => 4 + active.len() * 8,
        }
    }

    /// Total bytes the record occupies in the log, trailer included.
    pub fn encoded_len(&self) -> usize {
        TAG_SIZE + TID_SIZE + self.payload_len() + TRAILER_SIZE
    }

    /// Encodes the record as it will sit at offset `start`.
    pub fn encode(&self, start: u64) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_i32(self.record_type().tag());
        buf.put_i64(self.tid().map_or(NO_TRANSACTION, TransactionId::to_log));
        match self {
            LogRecord::Begin(_) | LogRecord::Commit(_) | LogRecord::Abort(_) => {}
            LogRecord::Update { before, after, .. } => {
                before.encode(&mut buf);
                after.encode(&mut buf);
            }
            LogRecord::Compensation { after, .. } => after.encode(&mut buf),
            LogRecord::Checkpoint { active } => {
                buf.put_i32(active.len() as i32);
                for tid in active {
                    buf.put_i64(tid.to_log());
                }
            }
        }
        buf.put_i64(start as i64);
        buf
    }

    /// Decodes the record that begins at offset `start`.
    ///
    /// Fails with an `UnexpectedEof` I/O error when the record is cut short,
    /// and with [`WalError::Corrupt`] when its trailer does not point back at
    /// `start`.
    pub fn decode<R: Read>(reader: &mut R, start: u64, page_size: usize) -> WalResult<Self> {
        let tag = reader.read_i32::<BigEndian>()?;
        let record_type = RecordType::from_tag(tag).ok_or(WalError::UnknownRecordType {
            tag,
            offset: start,
        })?;
        let raw_tid = reader.read_i64::<BigEndian>()?;
        let owned = |raw: i64| -> WalResult<TransactionId> {
            TransactionId::from_log(raw).ok_or_else(|| WalError::Corrupt {
                offset: start,
                reason: format!("negative transaction id {}", raw),
            })
        };
        let tid = || owned(raw_tid);

        let record = match record_type {
            RecordType::Begin => LogRecord::Begin(tid()?),
            RecordType::Commit => LogRecord::Commit(tid()?),
            RecordType::Abort => LogRecord::Abort(tid()?),
            RecordType::Update => {
                let tid = tid()?;
                let before = PageImage::decode(reader, page_size)?;
                let after = PageImage::decode(reader, page_size)?;
                LogRecord::Update { tid, before, after }
            }
            RecordType::Compensation => {
                let tid = tid()?;
                let after = PageImage::decode(reader, page_size)?;
                LogRecord::Compensation { tid, after }
            }
            RecordType::Checkpoint => {
                let count = reader.read_i32::<BigEndian>()?;
                if !(0..=MAX_CHECKPOINT_ACTIVE).contains(&count) {
                    return Err(WalError::Corrupt {
                        offset: start,
                        reason: format!("checkpoint lists {} transactions", count),
                    });
                }
                let mut active = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    active.push(owned(reader.read_i64::<BigEndian>()?)?);
                }
                LogRecord::Checkpoint { active }
            }
        };

        let trailer = reader.read_i64::<BigEndian>()?;
        if trailer != start as i64 {
            return Err(WalError::Corrupt {
                offset: start,
                reason: format!("trailer points at {}", trailer),
            });
        }
        Ok(record)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Begin(tid) | LogRecord::Commit(tid) | LogRecord::Abort(tid) => {
                write!(f, "<{} {}>", tid, self.record_type())
            }
            LogRecord::Update { tid, after, .. } | LogRecord::Compensation { tid, after } => {
                write!(f, "<{} {} pid={}>", tid, self.record_type(), after.pid)
            }
            LogRecord::Checkpoint { active } => {
                let ids: Vec<String> = active.iter().map(|tid| tid.to_string()).collect();
                write!(f, "<CHECKPOINT active=[{}]>", ids.join(", "))
            }
        }
    }
}
