//! Line protocol spoken by the wearable
//!
//! Newline-delimited ASCII text. Decoding is total: every complete line maps
//! to exactly one [`Frame`], falling back to [`Frame::Unknown`] for anything
//! unrecognized or malformed.

use std::sync::LazyLock;

use regex::Regex;

use guardian_core::prelude::*;
use guardian_core::{Coordinates, Frame};

/// Longest line we buffer before giving up on seeing a newline.
pub const MAX_LINE_LEN: usize = 1024;

const CHECK_IN_ACK: &str = "CHECK_IN_ACK";
const HEARTBEAT: &str = "HEARTBEAT";

static FALL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^FALL:\s*([^,\s]+)\s*,\s*([^,\s]+)$").expect("FALL pattern is valid")
});

/// Decode one line (without its terminator) into a frame.
///
/// Surrounding whitespace, including a trailing `\r`, is ignored for matching.
/// Malformed `FALL` payloads (non-numeric, non-finite or out-of-range
/// coordinates) decode to `Unknown` with the raw line preserved.
pub fn decode_line(line: &str) -> Frame {
    let trimmed = line.trim();

    match trimmed {
        CHECK_IN_ACK => return Frame::CheckInAck,
        HEARTBEAT => return Frame::Heartbeat,
        _ => {}
    }

    if let Some(frame) = parse_fall(trimmed) {
        return frame;
    }

    Frame::Unknown(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_fall(line: &str) -> Option<Frame> {
    let captures = FALL_LINE.captures(line)?;
    let lat = captures.get(1)?.as_str().parse::<f64>().ok()?;
    let lng = captures.get(2)?.as_str().parse::<f64>().ok()?;
    let coords = Coordinates::new(lat, lng)?;
    Some(Frame::Fall {
        lat: coords.lat,
        lng: coords.lng,
    })
}

/// Encode a command line for the device, appending the terminator.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    bytes
}

/// Splits a raw byte stream into lines and decodes each one.
///
/// Bytes after the last newline stay buffered until more data arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every frame completed by them, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.buffer);
                self.push_line(&raw, &mut frames);
                continue;
            }

            self.buffer.push(byte);
            if self.buffer.len() > MAX_LINE_LEN {
                let raw = std::mem::take(&mut self.buffer);
                warn!("Line exceeded {} bytes without a newline", MAX_LINE_LEN);
                frames.push(Frame::Unknown(String::from_utf8_lossy(&raw).into_owned()));
            }
        }

        frames
    }

    /// Number of bytes waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn push_line(&self, raw: &[u8], frames: &mut Vec<Frame>) {
        let line = String::from_utf8_lossy(raw);
        if line.trim().is_empty() {
            trace!("Skipping blank line");
            return;
        }

        let frame = decode_line(&line);
        if let Frame::Unknown(raw) = &frame {
            debug!("Unrecognized line from device: {:?}", raw);
        }
        frames.push(frame);
    }
}
