use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use sha2::{Sha256, Digest};
use anyhow::{Result, Context};

const CHUNK_SIZE: usize = 64 * 1024;

/// Raw bytes of a file plus their SHA-256 digest, read in a single pass.
pub struct LoadedFile {
    pub bytes: Vec<u8>,
    pub sha256: String,
}

/// The bytes are stored in the File row, so they are read into memory once and hashed as they arrive.
pub fn load_and_hash(path: &Path) -> Result<LoadedFile> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let len = file.metadata()?.len();

    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut bytes = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut chunk)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
        bytes.extend_from_slice(&chunk[..read]);
    }

    let sha256 = hex::encode(hasher.finalize());
    Ok(LoadedFile { bytes, sha256 })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
