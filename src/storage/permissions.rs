//! File permissions
//!
//! Renders metadata as the `rwxr-xr-x` column of a LIST line.

use std::fs::Metadata;

/// Permission bits in `ls -l` notation, without the type character
#[cfg(unix)]
pub fn mode_string(metadata: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode();
    let mut out = String::with_capacity(9);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(not(unix))]
pub fn mode_string(metadata: &Metadata) -> String {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => "rwxr-xr-x".to_string(),
        (false, true) => "r--r--r--".to_string(),
        (false, false) => "rw-r--r--".to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn renders_mode_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(mode_string(&metadata), "rw-r-----");
    }
}
