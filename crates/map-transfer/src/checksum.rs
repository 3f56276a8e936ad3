use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of a whole map file and returns the hex digest and the
/// number of bytes read.
pub fn calculate_file_checksum(path: &Path) -> Result<(String, u64), TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_checksum_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office.stcm");
        let data = vec![7u8; 20_000];
        std::fs::write(&path, &data).unwrap();

        let (digest, size) = calculate_file_checksum(&path).unwrap();
        assert_eq!(digest, checksum_bytes(&data));
        assert_eq!(digest.len(), 64);
        assert_eq!(size, 20_000);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = calculate_file_checksum(&dir.path().join("absent.stcm"));
        assert!(matches!(result, Err(TransferError::Io(_))));
    }
}
