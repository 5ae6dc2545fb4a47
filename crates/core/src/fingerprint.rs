//! Size-salted content fingerprint used for upload deduplication.
//!
//! Small files are hashed in full. Larger files contribute three fixed
//! windows (head, middle, tail) of [`SAMPLE_SIZE`] bytes each, followed by
//! the exact file size as a little-endian `u64`, so multi-gigabyte inputs
//! never have to be read completely.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;

use sha2::{Digest, Sha256};

/// Bytes taken from each sampled window.
pub const SAMPLE_SIZE: u64 = 2 * 1024 * 1024;

/// Files up to this size are hashed in full.
pub const FULL_HASH_LIMIT: u64 = 3 * SAMPLE_SIZE;

/// A SHA-256 hex fingerprint of a file's digest input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which bytes of a file of a given size make up the digest input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplePlan {
    /// The whole content.
    Full { size: u64 },
    /// Head, middle and tail windows, then the size salt.
    Sampled { windows: [Range<u64>; 3], size: u64 },
}

impl SamplePlan {
    pub fn for_size(size: u64) -> Self {
        if size <= FULL_HASH_LIMIT {
            return Self::Full { size };
        }
        let mid_start = size / 2 - SAMPLE_SIZE / 2;
        let tail_start = size - SAMPLE_SIZE;
        Self::Sampled {
            windows: [
                0..SAMPLE_SIZE,
                mid_start..mid_start + SAMPLE_SIZE,
                tail_start..size,
            ],
            size,
        }
    }

    /// Length of the digest input this plan produces.
    pub fn input_len(&self) -> u64 {
        match self {
            Self::Full { size } => *size,
            Self::Sampled { .. } => 3 * SAMPLE_SIZE + 8,
        }
    }
}

/// Feed the digest input for `plan` into `sink`, chunk by chunk.
fn feed<R, F>(reader: &mut R, plan: &SamplePlan, mut sink: F) -> io::Result<()>
where
    R: Read + Seek,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; 64 * 1024];
    let mut copy_range = |reader: &mut R, range: Range<u64>| -> io::Result<()> {
        reader.seek(SeekFrom::Start(range.start))?;
        let mut remaining = range.end - range.start;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let read = reader.read(&mut buf[..want])?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended {remaining} bytes before the declared size"),
                ));
            }
            sink(&buf[..read]);
            remaining -= read as u64;
        }
        Ok(())
    };

    match plan {
        SamplePlan::Full { size } => copy_range(reader, 0..*size),
        SamplePlan::Sampled { windows, size } => {
            for window in windows.iter().cloned() {
                copy_range(reader, window)?;
            }
            sink(&size.to_le_bytes());
            Ok(())
        }
    }
}

/// Build the raw digest input for a source of `size` bytes.
///
/// Mostly useful for inspection; [`fingerprint_reader`] hashes the same bytes
/// without materialising them.
pub fn digest_input<R: Read + Seek>(reader: &mut R, size: u64) -> io::Result<Vec<u8>> {
    let plan = SamplePlan::for_size(size);
    let mut out = Vec::with_capacity(plan.input_len() as usize);
    feed(reader, &plan, |chunk| out.extend_from_slice(chunk))?;
    Ok(out)
}

/// Fingerprint a seekable source of `size` bytes.
pub fn fingerprint_reader<R: Read + Seek>(reader: &mut R, size: u64) -> io::Result<Fingerprint> {
    let plan = SamplePlan::for_size(size);
    let mut hasher = Sha256::new();
    feed(reader, &plan, |chunk| hasher.update(chunk))?;
    Ok(Fingerprint::from_hasher(hasher))
}

/// Fingerprint an in-memory buffer.
pub fn fingerprint_bytes(data: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    match SamplePlan::for_size(data.len() as u64) {
        SamplePlan::Full { .. } => hasher.update(data),
        SamplePlan::Sampled { windows, size } => {
            for window in windows {
                hasher.update(&data[window.start as usize..window.end as usize]);
            }
            hasher.update(size.to_le_bytes());
        }
    }
    Fingerprint::from_hasher(hasher)
}
