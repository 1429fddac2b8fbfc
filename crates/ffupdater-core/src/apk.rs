//! Just enough of the APK container format to pull out the signing certificate.
//!
//! The APK Signing Block sits between the ZIP entries and the central
//! directory:
//!
//! ```text
//! u64 size | (u64 len, u32 id, value)* | u64 size | "APK Sig Block 42"
//! ```
//!
//! Scheme v2 and v3 values share the layout we need: a length-prefixed list of
//! signers, each starting with length-prefixed signed data whose second field
//! is the list of DER certificates.

use crate::error::{Result, UpdaterError};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_MIN_SIZE: usize = 22;
const MAX_COMMENT_SIZE: usize = u16::MAX as usize;
const BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";
const FOOTER_SIZE: usize = 24;

pub(crate) const SCHEME_V2_ID: u32 = 0x7109_871a;
pub(crate) const SCHEME_V3_ID: u32 = 0xf053_68c0;

fn malformed(msg: impl Into<String>) -> UpdaterError {
    UpdaterError::MalformedApk(msg.into())
}

/// Cursor over little-endian, length-prefixed data.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.data.len() {
            return Err(malformed(format!(
                "need {len} bytes, only {} left",
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn length_prefixed(&mut self) -> Result<Reader<'a>> {
        let len = self.u32()? as usize;
        Ok(Reader::new(self.take(len)?))
    }
}

fn read_u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64_at(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

/// Offset of the central directory, read from the End of Central Directory record.
fn central_directory_offset(apk: &[u8]) -> Result<usize> {
    if apk.len() < EOCD_MIN_SIZE {
        return Err(malformed("file too small to be a zip archive"));
    }
    let last = apk.len() - EOCD_MIN_SIZE;
    let first = last.saturating_sub(MAX_COMMENT_SIZE);
    let eocd = (first..=last)
        .rev()
        .find(|&offset| {
            read_u32_at(apk, offset) == Some(EOCD_SIGNATURE)
                // The comment length must reach exactly to the end of the file.
                && apk
                    .get(offset + 20..offset + 22)
                    .map(|len| u16::from_le_bytes([len[0], len[1]]) as usize)
                    == Some(apk.len() - offset - EOCD_MIN_SIZE)
        })
        .ok_or_else(|| malformed("no end of central directory record"))?;

    let offset = read_u32_at(apk, eocd + 16).unwrap_or(u32::MAX) as usize;
    if offset > eocd {
        return Err(malformed("central directory offset points past its end record"));
    }
    Ok(offset)
}

/// The id-value pairs of the APK Signing Block.
fn signing_block_pairs(apk: &[u8]) -> Result<Vec<(u32, &[u8])>> {
    let cd_offset = central_directory_offset(apk)?;
    if cd_offset < FOOTER_SIZE || &apk[cd_offset - 16..cd_offset] != BLOCK_MAGIC {
        return Err(malformed("no APK Signing Block (v1-only signature?)"));
    }

    let size = read_u64_at(apk, cd_offset - FOOTER_SIZE)
        .and_then(|size| usize::try_from(size).ok())
        .ok_or_else(|| malformed("unreadable signing block size"))?;
    if size < FOOTER_SIZE {
        return Err(malformed("signing block smaller than its footer"));
    }
    let start = (cd_offset)
        .checked_sub(size)
        .and_then(|offset| offset.checked_sub(8))
        .ok_or_else(|| malformed("signing block size exceeds file"))?;
    if read_u64_at(apk, start) != Some(size as u64) {
        return Err(malformed("signing block header and footer sizes differ"));
    }

    let mut pairs = Reader::new(&apk[start + 8..cd_offset - FOOTER_SIZE]);
    let mut out = Vec::new();
    while !pairs.is_empty() {
        let len = usize::try_from(pairs.u64()?)
            .map_err(|_| malformed("signing block entry too large"))?;
        if len < 4 {
            return Err(malformed("signing block entry shorter than its id"));
        }
        let mut entry = Reader::new(pairs.take(len)?);
        let id = entry.u32()?;
        out.push((id, entry.data));
    }
    Ok(out)
}

fn first_certificate(scheme_value: &[u8]) -> Result<Vec<u8>> {
    let mut signers = Reader::new(scheme_value).length_prefixed()?;
    let mut signer = signers.length_prefixed()?;
    let mut signed_data = signer.length_prefixed()?;
    let _digests = signed_data.length_prefixed()?;
    let mut certificates = signed_data.length_prefixed()?;
    let certificate = certificates.length_prefixed()?;
    if certificate.is_empty() {
        return Err(malformed("signer has no certificate"));
    }
    Ok(certificate.data.to_vec())
}

/// DER bytes of the first signer's certificate, preferring scheme v2 over v3.
pub fn signing_certificate(apk: &[u8]) -> Result<Vec<u8>> {
    let pairs = signing_block_pairs(apk)?;
    for scheme in [SCHEME_V2_ID, SCHEME_V3_ID] {
        if let Some((_, value)) = pairs.iter().find(|(id, _)| *id == scheme) {
            return first_certificate(value);
        }
    }
    Err(malformed("signing block has neither a v2 nor a v3 signature"))
}
