//! Little-endian byte codec for snapshot payloads.
//!
//! Every multi-byte integer and float is little-endian. Lengths are written
//! as `u64` and checked against the remaining input on read, so a truncated
//! or corrupted payload fails with an error instead of a huge allocation.

use anyhow::{Context, Result, bail};

/// Append-only payload writer.
#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_len(&mut self, len: usize) {
        self.put_u64(len as u64);
    }

    pub(crate) fn put_str(&mut self, s: &str) {
        self.put_len(s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub(crate) fn put_f32_slice(&mut self, values: &[f32]) {
        self.put_len(values.len());
        for v in values {
            self.put_f32(*v);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a payload slice.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).context("payload offset overflow")?;
        let slice = self.bytes.get(self.pos..end).with_context(|| {
            format!("payload truncated: need {n} bytes at offset {}, have {}", self.pos, self.remaining())
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub(crate) fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub(crate) fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Read a length prefix whose elements are at least `min_elem_size` bytes.
    pub(crate) fn get_len(&mut self, min_elem_size: usize) -> Result<usize> {
        let raw = self.get_u64()?;
        let len = usize::try_from(raw).context("length too large for this platform")?;
        if len.saturating_mul(min_elem_size.max(1)) > self.remaining() {
            bail!("length {len} exceeds remaining payload ({} bytes)", self.remaining());
        }
        Ok(len)
    }

    pub(crate) fn get_str(&mut self) -> Result<String> {
        let len = self.get_len(1)?;
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).context("invalid UTF-8 in payload")?;
        Ok(s.to_owned())
    }

    pub(crate) fn get_f32_vec(&mut self) -> Result<Vec<f32>> {
        let len = self.get_len(4)?;
        (0..len).map(|_| self.get_f32()).collect()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    /// Fail if any bytes were left unread.
    pub(crate) fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            bail!("{} trailing bytes after payload", self.remaining());
        }
        Ok(())
    }
}
