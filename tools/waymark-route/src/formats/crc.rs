//! CRC-64 checksums for persisted files

use std::io::{self, Write};

use crc::{Crc, CRC_64_GO_ISO};

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Writer adapter that checksums every byte passing through it.
///
/// Wrapping [`io::sink`] gives a checksum without materialising the bytes.
pub struct ChecksumWriter<W> {
    inner: W,
    digest: crc::Digest<'static, u64>,
    written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: CRC64.digest(),
            written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> (W, u64) {
        (self.inner, self.digest.finalize())
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_matches_one_shot_checksum() {
        let data = b"waymark contraction hierarchy";
        let mut w = ChecksumWriter::new(Vec::new());
        w.write_all(&data[..7]).unwrap();
        w.write_all(&data[7..]).unwrap();
        assert_eq!(w.bytes_written(), data.len() as u64);
        let (buf, crc) = w.finish();
        assert_eq!(buf, data);
        assert_eq!(crc, checksum(data));
    }

    #[test]
    fn sink_writer_checksums_without_buffering() {
        let mut w = ChecksumWriter::new(io::sink());
        w.write_all(b"abc").unwrap();
        let (_, crc) = w.finish();
        assert_eq!(crc, checksum(b"abc"));
    }
}
