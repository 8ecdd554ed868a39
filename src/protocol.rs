//! Wire protocol between the pose producer and the receiver.
//!
//! A payload is UTF-8 text with one record per line:
//! `<landmark>|<x>|<y>|<z>`. Extra fields are ignored. Floats always use a
//! decimal point; Rust's float parser is locale independent.
//!
//! The legacy stream transport wraps each payload in a frame with a 4-byte
//! little-endian length prefix.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::landmark::{Landmark, Vec3};

pub const DEFAULT_DATA_PORT: u16 = 52733;
pub const DEFAULT_CONTROL_PORT: u16 = 54321;

/// Sent once to the producer's control port to ask it to exit.
pub const QUIT_SENTINEL: &str = "__QUIT__";
/// Sent by the producer while it waits for the receiver to come up.
pub const PING: &str = "__ping__";

pub const FIELD_DELIMITER: char = '|';
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// One decoded record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub landmark: Landmark,
    pub position: Vec3,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("expected at least 4 fields, got {0}")]
    TooFewFields(usize),
    #[error("landmark index {0:?} is not an integer")]
    BadIndex(String),
    #[error("landmark index {0} out of range")]
    IndexOutOfRange(i64),
    #[error("coordinate {0:?} is not a finite number")]
    BadCoordinate(String),
}

/// Counts from decoding one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub accepted: usize,
    pub rejected: usize,
}

impl std::ops::AddAssign for DecodeStats {
    fn add_assign(&mut self, rhs: Self) {
        self.accepted += rhs.accepted;
        self.rejected += rhs.rejected;
    }
}

pub fn decode_record(line: &str) -> Result<Observation, RecordError> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
    if fields.len() < 4 {
        return Err(RecordError::TooFewFields(fields.len()));
    }

    let index: i64 = fields[0]
        .parse()
        .map_err(|_| RecordError::BadIndex(fields[0].to_string()))?;
    let landmark = usize::try_from(index)
        .ok()
        .and_then(Landmark::from_index)
        .ok_or(RecordError::IndexOutOfRange(index))?;

    let x = parse_coordinate(fields[1])?;
    let y = parse_coordinate(fields[2])?;
    let z = parse_coordinate(fields[3])?;

    Ok(Observation {
        landmark,
        position: Vec3::new(x, y, z),
    })
}

fn parse_coordinate(field: &str) -> Result<f32, RecordError> {
    match field.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(RecordError::BadCoordinate(field.to_string())),
    }
}

/// Decoded records of a payload in order, skipping blank lines.
pub fn records(payload: &str) -> impl Iterator<Item = Result<Observation, RecordError>> + '_ {
    payload
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(decode_record)
}

/// Decode `payload`, handing each valid record to `sink` in order.
/// Malformed lines are skipped without affecting the rest.
pub fn decode_payload(payload: &str, mut sink: impl FnMut(Observation)) -> DecodeStats {
    let mut stats = DecodeStats::default();
    for record in records(payload) {
        match record {
            Ok(obs) => {
                sink(obs);
                stats.accepted += 1;
            }
            Err(e) => {
                tracing::trace!(error = %e, "skipping record");
                stats.rejected += 1;
            }
        }
    }
    stats
}

pub fn encode_record(landmark: Landmark, position: &Vec3) -> String {
    format!(
        "{}{d}{}{d}{}{d}{}",
        landmark.index(),
        position.x,
        position.y,
        position.z,
        d = FIELD_DELIMITER
    )
}

/// Encode a full pose frame, one line per observation.
pub fn encode_payload<'a>(observations: impl IntoIterator<Item = &'a Observation>) -> String {
    let mut out = String::new();
    for obs in observations {
        out.push_str(&encode_record(obs.landmark, &obs.position));
        out.push('\n');
    }
    out
}

// --- Legacy stream framing ---

const LENGTH_PREFIX: usize = 4;

/// 4-byte little-endian length prefix followed by UTF-8 payload bytes.
///
/// A prefix that reads as zero or negative (as a signed 32-bit value) carries
/// no payload and is skipped.
#[derive(Debug, Clone)]
pub struct LegacyFrameCodec {
    max_frame_length: usize,
}

impl LegacyFrameCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Default for LegacyFrameCodec {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl Decoder for LegacyFrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            if src.len() < LENGTH_PREFIX {
                return Ok(None);
            }

            let raw = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            let signed = raw as i32;
            if signed <= 0 {
                src.advance(LENGTH_PREFIX);
                continue;
            }

            let len = signed as usize;
            if len > self.max_frame_length {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame of {} bytes exceeds limit {}", len, self.max_frame_length),
                ));
            }

            if src.len() < LENGTH_PREFIX + len {
                src.reserve(LENGTH_PREFIX + len - src.len());
                return Ok(None);
            }

            src.advance(LENGTH_PREFIX);
            let body = src.split_to(len);
            return Ok(Some(String::from_utf8_lossy(&body).into_owned()));
        }
    }
}

impl Encoder<&str> for LegacyFrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.len();
        if len > self.max_frame_length || len > i32::MAX as usize {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds limit {}", len, self.max_frame_length),
            ));
        }
        dst.reserve(LENGTH_PREFIX + len);
        dst.put_u32_le(len as u32);
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}
