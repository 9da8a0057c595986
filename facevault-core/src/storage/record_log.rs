//! Append-only, checksummed log of identity records.
//!
//! Every upsert or removal is written as one self-describing frame. The last
//! frame for an identity is its current state; older frames are garbage until
//! the log is compacted.
//!
//! # Format
//!
//! Each frame has the format:
//! ```text
//! [checksum:u32][length:u32][kind:u8][id:u64][enrolled_at_ms:u64][dim:u32][vector:f32*dim]
//! ```
//!
//! The checksum is CRC32 over everything after the length field. The vector is
//! one opaque little-endian blob. A log holds vectors of one dimension, so the
//! length field can only take two values: one for removals, one for upserts.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vector::IdentityId;

const HEADER_LEN: u64 = 8;
const BODY_FIXED_LEN: usize = 1 + 8 + 8 + 4;

/// Durability of appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// `fsync` after every append.
    #[default]
    Immediate,
    /// Hand the frame to the OS without syncing. Survives process crashes,
    /// not power loss.
    NoSync,
}

/// The kind of change a frame records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Full replacement of an identity's embedding.
    Upsert = 1,
    /// Removal of an identity.
    Remove = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Upsert),
            2 => Ok(Self::Remove),
            _ => Err(Error::Corrupted(format!("invalid frame kind: {}", value))),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub kind: FrameKind,
    pub id: IdentityId,
    pub enrolled_at_ms: u64,
    pub vector: Vec<f32>,
}

impl LogRecord {
    /// Creates an upsert record.
    pub fn upsert(id: IdentityId, enrolled_at_ms: u64, vector: Vec<f32>) -> Self {
        Self {
            kind: FrameKind::Upsert,
            id,
            enrolled_at_ms,
            vector,
        }
    }

    /// Creates a removal record.
    pub fn remove(id: IdentityId) -> Self {
        Self {
            kind: FrameKind::Remove,
            id,
            enrolled_at_ms: 0,
            vector: Vec::new(),
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(BODY_FIXED_LEN + self.vector.len() * 4);
        body.push(self.kind as u8);
        body.extend_from_slice(&self.id.to_le_bytes());
        body.extend_from_slice(&self.enrolled_at_ms.to_le_bytes());
        body.extend_from_slice(&(self.vector.len() as u32).to_le_bytes());
        for &val in &self.vector {
            body.extend_from_slice(&val.to_le_bytes());
        }
        body
    }

    /// Serializes the record to a complete frame.
    fn to_frame(&self) -> Vec<u8> {
        let body = self.encode_body();
        let checksum = crc32fast::hash(&body);
        let mut frame = Vec::with_capacity(HEADER_LEN as usize + body.len());
        frame.extend_from_slice(&checksum.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < BODY_FIXED_LEN {
            return Err(Error::Corrupted(format!(
                "frame body too short: {} bytes",
                body.len()
            )));
        }
        let kind = FrameKind::try_from(body[0])?;
        let id = u64::from_le_bytes(le_array(&body[1..9]));
        let enrolled_at_ms = u64::from_le_bytes(le_array(&body[9..17]));
        let dim = u32::from_le_bytes(le_array(&body[17..21])) as usize;

        let blob = &body[BODY_FIXED_LEN..];
        if blob.len() != dim * 4 {
            return Err(Error::Corrupted(format!(
                "vector blob has {} bytes, expected {}",
                blob.len(),
                dim * 4
            )));
        }
        let vector = blob
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(le_array(c)))
            .collect();

        Ok(Self {
            kind,
            id,
            enrolled_at_ms,
            vector,
        })
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Result of replaying a log from the start.
#[derive(Debug, Default)]
pub struct Replay {
    /// Every intact frame with its byte offset, in file order.
    pub records: Vec<(u64, LogRecord)>,
    /// Length of the intact prefix of the file.
    pub valid_len: u64,
    /// Bytes after `valid_len` belonging to a torn final frame.
    pub torn_bytes: u64,
}

/// Append handle on a record log file.
pub struct RecordLog {
    /// Path to the log file.
    path: PathBuf,
    /// File handle opened in append mode.
    file: File,
    /// Current end of the intact log.
    write_pos: u64,
    /// Sync mode.
    sync_mode: SyncMode,
    /// Set when a failed append could not be rolled back.
    broken: Option<String>,
}

impl RecordLog {
    /// Opens or creates a log file for appending.
    pub fn open<P: AsRef<Path>>(path: P, sync_mode: SyncMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io("failed to open record log", e))?;

        let write_pos = file
            .metadata()
            .map_err(|e| Error::io("metadata failed", e))?
            .len();

        Ok(Self {
            path,
            file,
            write_pos,
            sync_mode,
            broken: None,
        })
    }

    /// Appends a record as a single frame. Returns the frame's offset.
    ///
    /// On failure the file is cut back to its previous length so a torn frame
    /// never precedes later appends. If that cut fails too, the log refuses
    /// all further appends.
    pub fn append(&mut self, record: &LogRecord) -> Result<u64> {
        if let Some(reason) = &self.broken {
            return Err(Error::IoError(format!(
                "record log {} unusable: {}",
                self.path.display(),
                reason
            )));
        }

        let offset = self.write_pos;
        let frame = record.to_frame();

        let written = self
            .file
            .write_all(&frame)
            .and_then(|_| match self.sync_mode {
                SyncMode::Immediate => self.file.sync_data(),
                SyncMode::NoSync => Ok(()),
            });

        if let Err(e) = written {
            if let Err(rollback) = self.file.set_len(offset) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial frame, refusing further appends"
                );
                self.broken = Some(format!("rollback after failed append: {}", rollback));
            }
            return Err(Error::io("append failed", e));
        }

        self.write_pos += frame.len() as u64;
        Ok(offset)
    }

    /// Forces a sync to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| Error::io("sync failed", e))
    }

    /// Returns the current end of the log.
    pub fn write_position(&self) -> u64 {
        self.write_pos
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once a failed rollback has made the log refuse appends.
    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    /// Renames the log file to `to`, keeping the open handle.
    ///
    /// Either the rename happens and the handle follows it, or nothing changes.
    pub fn rename_to<P: AsRef<Path>>(&mut self, to: P) -> Result<()> {
        let to = to.as_ref().to_path_buf();
        fs::rename(&self.path, &to).map_err(|e| Error::io("rename failed", e))?;
        self.path = to;
        Ok(())
    }

    /// Reads the frame at `offset`, verifying its length and checksum.
    pub fn read_at<P: AsRef<Path>>(path: P, offset: u64, dimension: usize) -> Result<LogRecord> {
        let file =
            File::open(path.as_ref()).map_err(|e| Error::io("open for read failed", e))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("seek failed", e))?;

        match read_frame(&mut reader, dimension)? {
            Frame::Intact(record, _) => Ok(record),
            Frame::Eof | Frame::Torn => Err(Error::Corrupted(format!(
                "truncated frame at offset {}",
                offset
            ))),
            Frame::BadChecksum { expected, actual } => Err(Error::Corrupted(format!(
                "checksum mismatch at offset {}: expected {}, got {}",
                offset, expected, actual
            ))),
            Frame::BadLength(length) => Err(bad_length(offset, length, dimension)),
        }
    }

    /// Reads every intact frame from the start of the log.
    ///
    /// A frame of legal length cut short by the end of the file, or a checksum
    /// failure in the final frame, is reported as torn rather than as an
    /// error; that is what a crash during append leaves behind. A bad frame
    /// followed by more data, or a length no frame of `dimension` can have,
    /// is corruption.
    pub fn replay<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Replay> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Replay::default());
        }

        let file = File::open(path).map_err(|e| Error::io("open for replay failed", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| Error::io("metadata failed", e))?
            .len();

        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        let mut offset = 0u64;

        loop {
            match read_frame(&mut reader, dimension)? {
                Frame::Eof => break,
                Frame::Intact(record, frame_len) => {
                    replay.records.push((offset, record));
                    offset += frame_len;
                }
                Frame::Torn => {
                    replay.torn_bytes = file_len - offset;
                    break;
                }
                Frame::BadChecksum { expected, actual } => {
                    let frame_end = position(&mut reader)?;
                    if frame_end == file_len {
                        replay.torn_bytes = file_len - offset;
                        break;
                    }
                    return Err(Error::Corrupted(format!(
                        "checksum mismatch at offset {}: expected {}, got {}",
                        offset, expected, actual
                    )));
                }
                Frame::BadLength(length) => return Err(bad_length(offset, length, dimension)),
            }
        }

        replay.valid_len = offset;
        Ok(replay)
    }

    /// Cuts the log file back to `len` bytes.
    pub fn truncate<P: AsRef<Path>>(path: P, len: u64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(path.as_ref())
            .map_err(|e| Error::io("open for truncate failed", e))?;
        file.set_len(len)
            .map_err(|e| Error::io("truncate failed", e))?;
        file.sync_all().map_err(|e| Error::io("sync failed", e))
    }
}

enum Frame {
    Eof,
    Intact(LogRecord, u64),
    Torn,
    BadChecksum { expected: u32, actual: u32 },
    BadLength(usize),
}

fn bad_length(offset: u64, length: usize, dimension: usize) -> Error {
    Error::Corrupted(format!(
        "frame at offset {} has length {}, expected {} or {}",
        offset,
        length,
        BODY_FIXED_LEN,
        upsert_body_len(dimension)
    ))
}

fn upsert_body_len(dimension: usize) -> usize {
    BODY_FIXED_LEN + 4 * dimension
}

fn position<R: Seek>(reader: &mut R) -> Result<u64> {
    reader
        .stream_position()
        .map_err(|e| Error::io("position failed", e))
}

/// Reads one frame. Distinguishes a clean end of file from a frame cut short.
///
/// The length field is checked before anything is allocated or read past the
/// header.
fn read_frame<R: Read>(reader: &mut R, dimension: usize) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN as usize];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(Frame::Eof);
    }
    if got < header.len() {
        return Ok(Frame::Torn);
    }

    let expected = u32::from_le_bytes(le_array(&header[0..4]));
    let length = u32::from_le_bytes(le_array(&header[4..8])) as usize;
    if length != BODY_FIXED_LEN && length != upsert_body_len(dimension) {
        return Ok(Frame::BadLength(length));
    }

    let mut body = vec![0u8; length];
    let got = read_full(reader, &mut body)?;
    if got < length {
        return Ok(Frame::Torn);
    }

    let actual = crc32fast::hash(&body);
    if actual != expected {
        return Ok(Frame::BadChecksum { expected, actual });
    }

    let record = LogRecord::decode_body(&body)?;
    Ok(Frame::Intact(record, HEADER_LEN + length as u64))
}

/// Fills `buf` as far as the reader allows; returns the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::io("read failed", e)),
        }
    }
    Ok(filled)
}
