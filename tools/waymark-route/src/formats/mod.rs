//! Persisted graph and hierarchy files
//!
//! Both formats share one layout: a fixed little-endian header, a body of
//! fixed-width records, and a 16-byte footer holding the CRC-64 of the body
//! followed by the CRC-64 of header and body together.

pub mod crc;
pub mod graph_file;
pub mod index_file;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use waymark_common::GraphLoadError;

pub(crate) const FOOTER_LEN: usize = 16;

/// Reads a whole file, checks magic, version and both footer checksums,
/// and returns header and body with the footer stripped.
pub(crate) fn read_verified(
    path: &Path,
    header_len: usize,
    magic: u32,
    version: u16,
) -> Result<Vec<u8>, GraphLoadError> {
    let mut bytes = fs::read(path).map_err(|source| GraphLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.len() < header_len + FOOTER_LEN {
        return Err(GraphLoadError::Truncated {
            path: path.to_path_buf(),
            reason: format!(
                "{} bytes is shorter than header and footer ({} bytes)",
                bytes.len(),
                header_len + FOOTER_LEN
            ),
        });
    }

    let mut header = ByteReader::new(&bytes[..header_len], path);
    let found_magic = header.u32()?;
    if found_magic != magic {
        return Err(GraphLoadError::BadMagic {
            path: path.to_path_buf(),
            expected: magic,
            found: found_magic,
        });
    }
    let found_version = header.u16()?;
    if found_version != version {
        return Err(GraphLoadError::UnsupportedVersion {
            path: path.to_path_buf(),
            expected: version,
            found: found_version,
        });
    }

    let content_len = bytes.len() - FOOTER_LEN;
    let mut footer = ByteReader::new(&bytes[content_len..], path);
    let stored_body = footer.u64()?;
    let stored_file = footer.u64()?;

    let computed_body = crc::checksum(&bytes[header_len..content_len]);
    if computed_body != stored_body {
        return Err(GraphLoadError::ChecksumMismatch {
            path: path.to_path_buf(),
            section: "body",
            stored: stored_body,
            computed: computed_body,
        });
    }
    let computed_file = crc::checksum(&bytes[..content_len]);
    if computed_file != stored_file {
        return Err(GraphLoadError::ChecksumMismatch {
            path: path.to_path_buf(),
            section: "file",
            stored: stored_file,
            computed: computed_file,
        });
    }

    bytes.truncate(content_len);
    Ok(bytes)
}

/// Appends the footer to header and body.
pub(crate) fn seal(header: &[u8], body: &[u8]) -> Vec<u8> {
    let body_crc = crc::checksum(body);
    let mut digest = crc::CRC64.digest();
    digest.update(header);
    digest.update(body);
    let file_crc = digest.finalize();

    let mut out = Vec::with_capacity(header.len() + body.len() + FOOTER_LEN);
    out.extend_from_slice(header);
    out.extend_from_slice(body);
    out.extend_from_slice(&body_crc.to_le_bytes());
    out.extend_from_slice(&file_crc.to_le_bytes());
    out
}

/// Writes to a sibling temporary file and renames it over `path`, so a
/// crash or failed write never leaves a half-written file in place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(contents)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Little-endian cursor over a verified buffer.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8], path: &'a Path) -> Self {
        Self { buf, pos: 0, path }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], GraphLoadError> {
        let end = self.pos + N;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| GraphLoadError::Truncated {
            path: self.path.to_path_buf(),
            reason: format!("needed {N} bytes at offset {}", self.pos),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, GraphLoadError> {
        Ok(self.take::<1>()?[0])
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), GraphLoadError> {
        if self.remaining() < n {
            return Err(GraphLoadError::Truncated {
                path: self.path.to_path_buf(),
                reason: format!("needed {n} bytes at offset {}", self.pos),
            });
        }
        self.pos += n;
        Ok(())
    }

    pub(crate) fn u16(&mut self) -> Result<u16, GraphLoadError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, GraphLoadError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, GraphLoadError> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64, GraphLoadError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub(crate) fn f64(&mut self) -> Result<f64, GraphLoadError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Checks that a declared record count fits in what is left.
    pub(crate) fn expect_records(
        &self,
        count: u64,
        record_len: usize,
        what: &str,
    ) -> Result<usize, GraphLoadError> {
        let count = usize::try_from(count).map_err(|_| self.truncated(what, count))?;
        match count.checked_mul(record_len) {
            Some(len) if len <= self.remaining() => Ok(count),
            _ => Err(self.truncated(what, count as u64)),
        }
    }

    fn truncated(&self, what: &str, count: u64) -> GraphLoadError {
        GraphLoadError::Truncated {
            path: self.path.to_path_buf(),
            reason: format!(
                "header declares {count} {what} but only {} bytes remain",
                self.remaining()
            ),
        }
    }
}
