//! File digests used to check that every participant holds the same media file.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Read granularity.
pub const BLOCK_SIZE: usize = 1 << 18;
/// Only the first 2 GiB of a file contribute to its digest.
pub const DIGEST_BYTE_LIMIT: u64 = 1 << 31;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Algorithm {
    #[default]
    Crc32,
    Md5,
    Sha1,
    Sha256,
}

impl FromStr for Algorithm {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to crc32.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Algorithm::Md5,
            "sha1" => Algorithm::Sha1,
            "sha256" => Algorithm::Sha256,
            _ => Algorithm::Crc32,
        })
    }
}

/// Digest a file. crc32 is 8 upper-case hex digits; the others are lower-case hex.
pub fn digest_file(path: &Path, algorithm: Algorithm) -> io::Result<String> {
    let file = File::open(path)?;
    digest_reader(file, algorithm)
}

pub fn digest_reader<R: Read>(reader: R, algorithm: Algorithm) -> io::Result<String> {
    match algorithm {
        Algorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            for_each_block(reader, |b| hasher.update(b))?;
            Ok(format!("{:08X}", hasher.finalize()))
        }
        Algorithm::Md5 => {
            let mut ctx = md5::Context::new();
            for_each_block(reader, |b| ctx.consume(b))?;
            Ok(format!("{:x}", ctx.compute()))
        }
        Algorithm::Sha1 => {
            let mut hasher = Sha1::new();
            for_each_block(reader, |b| hasher.update(b))?;
            Ok(format!("{:x}", hasher.finalize()))
        }
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            for_each_block(reader, |b| hasher.update(b))?;
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

/// Feed the first `DIGEST_BYTE_LIMIT` bytes to `f`, one block at a time.
fn for_each_block<R: Read>(reader: R, mut f: impl FnMut(&[u8])) -> io::Result<()> {
    let mut reader = reader.take(DIGEST_BYTE_LIMIT);
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        f(&buf[..n]);
    }
}
