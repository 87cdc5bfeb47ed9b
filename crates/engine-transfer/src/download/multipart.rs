use super::range::ByteRange;
use bytes::Bytes;
use std::path::Path;

pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-byteranges";

/// Boundary derived from the served path, stable across requests.
pub fn boundary_for(path: &Path) -> String {
    format!("{:x}", md5::compute(path.to_string_lossy().as_bytes()))
}

/// Framing of a multi-range body, laid out before any byte is sent so the
/// total length can go out in the headers.
#[derive(Debug, Clone)]
pub struct MultipartLayout {
    pub boundary: String,
    /// Each range with the part header preceding its payload.
    pub parts: Vec<(Bytes, ByteRange)>,
    pub closing: Bytes,
    pub content_length: u64,
}

impl MultipartLayout {
    pub fn new(boundary: String, part_content_type: &str, ranges: &[ByteRange], size: u64) -> Self {
        let parts: Vec<(Bytes, ByteRange)> = ranges
            .iter()
            .map(|range| {
                let header = format!(
                    "\r\n--{boundary}\r\nContent-Type: {part_content_type}\r\nContent-Range: {}\r\n\r\n",
                    range.content_range(size)
                );
                (Bytes::from(header), *range)
            })
            .collect();
        let closing = Bytes::from(format!("\r\n--{boundary}--\r\n"));

        let content_length = parts
            .iter()
            .map(|(header, range)| header.len() as u64 + range.len())
            .sum::<u64>()
            + closing.len() as u64;

        Self {
            boundary,
            parts,
            closing,
            content_length,
        }
    }

    pub fn content_type(&self) -> String {
        format!("{MULTIPART_CONTENT_TYPE}; boundary={}", self.boundary)
    }
}
