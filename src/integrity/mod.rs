use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// SHA-256 digest type.
pub type Sha256Digest = [u8; 32];

fn finish(hasher: Sha256) -> Sha256Digest {
    let result = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&result);
    digest
}

/// Stream a reader through SHA-256.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<Sha256Digest> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 65536];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(finish(hasher))
}

/// Hex SHA-256 of a local file, used to fingerprint what was uploaded.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    Ok(to_hex(&sha256_reader(File::open(path)?)?))
}

pub fn to_hex(digest: &Sha256Digest) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
