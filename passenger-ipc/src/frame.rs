// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The CGI-style framed request protocol.
//!
//! One request per connection. The metadata block is a 32-bit big-endian
//! length prefix followed by that many bytes of NUL-separated name/value
//! pairs; the request body, if any, follows on the same stream and is read
//! directly by the application:
//!
//! ```text
//! request  := u32be length || metadata || body
//! metadata := (name NUL value NUL)*
//! ```
//!
//! The decoder never buffers the body, so the stream handed onwards is
//! forward-only by construction.

use std::collections::HashMap;
use std::io::{self, Read, Write};

/// Upper bound on the metadata block of a single request.
pub const MAX_HEADER_SIZE: u32 = 131_072;

pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
pub const HTTP_CONTENT_LENGTH: &str = "HTTP_CONTENT_LENGTH";

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("request metadata of {0} bytes exceeds the {MAX_HEADER_SIZE} byte limit")]
    HeaderTooLarge(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decoded request metadata: header names (ASCII) mapped to raw values.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestHeaders {
    entries: HashMap<String, Vec<u8>>,
}

impl RequestHeaders {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| std::str::from_utf8(value).ok())
    }

    pub fn insert(&mut self, name: String, value: Vec<u8>) {
        self.entries.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }
}

/// Reads one request's metadata from `stream`, leaving the stream positioned
/// at the first body byte.
///
/// A connection closed before the first prefix byte is a clean end of the
/// conversation and decodes to `Ok(None)`; a close anywhere later is an I/O
/// error for this request.
pub fn read_request<R: Read>(stream: &mut R) -> Result<Option<RequestHeaders>, FrameError> {
    let len = match read_frame_len(stream)? {
        Some(len) => len,
        None => return Ok(None),
    };
    if len > MAX_HEADER_SIZE {
        return Err(FrameError::HeaderTooLarge(len));
    }
    let mut metadata = vec![0u8; len as usize];
    stream.read_exact(&mut metadata)?;
    Ok(Some(parse_metadata(&metadata)))
}

fn read_frame_len<R: Read>(stream: &mut R) -> Result<Option<u32>, FrameError> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = match stream.read(&mut prefix[filled..]) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(Some(u32::from_be_bytes(prefix)))
}

fn parse_metadata(metadata: &[u8]) -> RequestHeaders {
    let mut headers = RequestHeaders::default();
    // A well-formed block ends with a separator, so the final split element
    // is an empty leftover; pairing consecutive elements drops it along with
    // any odd trailing element.
    let mut fields = metadata.split(|&b| b == 0);
    while let (Some(name), Some(value)) = (fields.next(), fields.next()) {
        headers.insert(
            String::from_utf8_lossy(name).into_owned(),
            value.to_vec(),
        );
    }

    match headers.get(HTTP_CONTENT_LENGTH).map(<[u8]>::to_vec) {
        Some(value) => headers.insert(CONTENT_LENGTH.to_string(), value),
        None => {
            headers.remove(CONTENT_LENGTH);
        }
    }
    headers
}

/// Serializes one request's metadata onto `stream`. The body, if any, is
/// written by the caller afterwards.
pub fn write_request<W: Write>(stream: &mut W, pairs: &[(&str, &[u8])]) -> Result<(), FrameError> {
    let mut metadata = Vec::new();
    for (name, value) in pairs {
        metadata.extend_from_slice(name.as_bytes());
        metadata.push(0);
        metadata.extend_from_slice(value);
        metadata.push(0);
    }
    if metadata.len() > MAX_HEADER_SIZE as usize {
        return Err(FrameError::HeaderTooLarge(metadata.len() as u32));
    }
    stream.write_all(&(metadata.len() as u32).to_be_bytes())?;
    stream.write_all(&metadata)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode(bytes: &[u8]) -> Result<Option<RequestHeaders>, FrameError> {
        read_request(&mut Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn round_trips_metadata_and_leaves_the_body_on_the_stream() {
        let mut wire = Vec::new();
        write_request(
            &mut wire,
            &[
                ("REQUEST_METHOD", b"POST".as_ref()),
                ("PATH_INFO", b"/submit".as_ref()),
                ("HTTP_CONTENT_LENGTH", b"5".as_ref()),
            ],
        )
        .unwrap();
        wire.extend_from_slice(b"hello");

        let mut stream = Cursor::new(wire);
        let headers = read_request(&mut stream).unwrap().unwrap();
        assert_eq!(Some(b"POST".as_ref()), headers.get("REQUEST_METHOD"));
        assert_eq!(Some("/submit"), headers.get_str("PATH_INFO"));
        // three sent pairs plus the synthesized CONTENT_LENGTH
        assert_eq!(4, headers.iter().count());

        let mut body = Vec::new();
        stream.read_to_end(&mut body).unwrap();
        assert_eq!(b"hello".as_ref(), body);
    }

    #[test]
    fn content_length_mirrors_the_http_header() {
        let mut wire = Vec::new();
        write_request(
            &mut wire,
            &[
                ("CONTENT_LENGTH", b"999".as_ref()),
                ("HTTP_CONTENT_LENGTH", b"5".as_ref()),
            ],
        )
        .unwrap();
        let headers = decode(&wire).unwrap().unwrap();
        assert_eq!(headers.get(HTTP_CONTENT_LENGTH), headers.get(CONTENT_LENGTH));
        assert_eq!(Some("5"), headers.get_str(CONTENT_LENGTH));
    }

    #[test]
    fn content_length_disappears_when_the_http_header_is_absent() {
        let mut wire = Vec::new();
        write_request(&mut wire, &[("CONTENT_LENGTH", b"999".as_ref())]).unwrap();
        let headers = decode(&wire).unwrap().unwrap();
        assert!(!headers.contains(CONTENT_LENGTH));
    }

    #[test]
    fn an_odd_trailing_element_is_discarded() {
        let metadata = b"A\0B\0dangling";
        let mut wire = (metadata.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(metadata);
        let headers = decode(&wire).unwrap().unwrap();
        assert_eq!(1, headers.len());
        assert_eq!(Some(b"B".as_ref()), headers.get("A"));
    }

    #[test]
    fn empty_metadata_decodes_to_an_empty_map() {
        let headers = decode(&0u32.to_be_bytes()).unwrap().unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn end_of_stream_before_the_prefix_is_no_request() {
        assert!(decode(b"").unwrap().is_none());
    }

    #[test]
    fn a_short_prefix_is_an_io_error() {
        let result = decode(&[0x00, 0x00]);
        assert!(matches!(result, Err(FrameError::Io(_))));
    }

    #[test]
    fn truncated_metadata_is_an_io_error() {
        let mut wire = 64u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"way too short");
        assert!(matches!(decode(&wire), Err(FrameError::Io(_))));
    }

    #[test]
    fn an_oversized_prefix_is_rejected_before_reading_metadata() {
        let wire = (MAX_HEADER_SIZE + 1).to_be_bytes();
        match decode(&wire) {
            Err(FrameError::HeaderTooLarge(len)) => assert_eq!(MAX_HEADER_SIZE + 1, len),
            other => panic!("expected HeaderTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn the_encoder_refuses_oversized_metadata() {
        let huge = vec![b'x'; MAX_HEADER_SIZE as usize];
        let result = write_request(&mut Vec::new(), &[("BIG", huge.as_slice())]);
        assert!(matches!(result, Err(FrameError::HeaderTooLarge(_))));
    }
}
