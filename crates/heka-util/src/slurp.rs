//! Whole-file reads, used to load script sources and state files.

use std::fs;
use std::path::Path;

/// Reads an entire file into memory. A thin wrapper so callers get a single
/// error type (`std::io::Error`) regardless of platform quirks, matching the
/// C source's `lsb_read_file` which likewise loads scripts and state files
/// in one shot rather than streaming them.
pub fn slurp<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<u8>> {
    fs::read(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_back_written_bytes() {
        let mut f = tempfile_for_test();
        f.write_all(b"hello sandbox").unwrap();
        let path = f.into_temp_path();
        let bytes = slurp(&path).unwrap();
        assert_eq!(bytes, b"hello sandbox");
    }

    fn tempfile_for_test() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }
}
