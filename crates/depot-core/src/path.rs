//! Name sanitization for the flat storage namespace
//!
//! Every name arriving from a client is percent-decoded, reduced to its last
//! path component, and validated before it is joined onto the storage root.
//! Nothing the client sends can address a file outside that directory.

use std::path::{Path, PathBuf};

use crate::error::ProtocolError;
use crate::protocol::try_decode_name;
use crate::{MAX_NAME_LEN, TEMP_SUFFIX};

/// Decode a wire name and reduce it to a safe base name.
///
/// `"a%2Fb%2Freport.pdf"`, `"a/b/report.pdf"` and `"..\\report.pdf"` all
/// become `"report.pdf"`. Escapes that decode to invalid UTF-8 are rejected.
pub fn sanitize_name(wire: &str) -> Result<String, ProtocolError> {
    let decoded = try_decode_name(wire)?;
    let name = base_name(&decoded);
    validate_filename(name)?;
    Ok(name.to_string())
}

/// Last component of `raw`, treating both `/` and `\` as separators
pub fn base_name(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or("")
}

/// Validate a filename (single path component)
pub fn validate_filename(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::InvalidName("empty filename".into()));
    }

    if name.contains('\0') {
        return Err(ProtocolError::InvalidName(
            "filename contains null byte".into(),
        ));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ProtocolError::InvalidName(format!(
            "filename too long: {} bytes (max {})",
            name.len(),
            MAX_NAME_LEN
        )));
    }

    if name == "." || name == ".." {
        return Err(ProtocolError::InvalidName(
            "special directory names not allowed".into(),
        ));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(ProtocolError::InvalidName(
            "filename contains path separator".into(),
        ));
    }

    if is_temp_name(name) {
        return Err(ProtocolError::InvalidName(format!(
            "names ending in {} are reserved",
            TEMP_SUFFIX
        )));
    }

    Ok(())
}

/// True for in-flight upload files, which are never listed or addressable
pub fn is_temp_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

/// Join a validated name onto the storage root.
///
/// The parent check catches anything validation missed.
pub fn resolve(root: &Path, name: &str) -> Result<PathBuf, ProtocolError> {
    validate_filename(name)?;

    let path = root.join(name);
    if path.parent() != Some(root) {
        return Err(ProtocolError::InvalidName(
            "path escapes storage directory".into(),
        ));
    }

    Ok(path)
}

/// Sibling file an upload of `name` is staged in
pub fn temp_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{}{}", name, TEMP_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/shared")
    }

    #[test]
    fn test_sanitize_plain() {
        assert_eq!(sanitize_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_name("my-file_v2.tar.gz").unwrap(), "my-file_v2.tar.gz");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_name("a/b/report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_name("..\\..\\boot.ini").unwrap(), "boot.ini");
        assert_eq!(sanitize_name("/abs/path.txt").unwrap(), "path.txt");
    }

    #[test]
    fn test_sanitize_decodes_before_stripping() {
        assert_eq!(sanitize_name("a%2F..%2Freport.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_name("my%20notes.txt").unwrap(), "my notes.txt");
    }

    #[test]
    fn test_sanitize_rejects_special() {
        assert!(sanitize_name("").is_err());
        assert!(sanitize_name(".").is_err());
        assert!(sanitize_name("..").is_err());
        assert!(sanitize_name("dir/").is_err());
        assert!(sanitize_name("a/..").is_err());
        assert!(sanitize_name("%2E%2E").is_err());
        assert!(sanitize_name("file%00.txt").is_err());
    }

    #[test]
    fn test_temp_suffix_reserved() {
        let name = format!("report.pdf{}", TEMP_SUFFIX);
        assert!(is_temp_name(&name));
        assert!(validate_filename(&name).is_err());
        assert!(!is_temp_name("report.pdf"));
    }

    #[test]
    fn test_length_limit_leaves_room_for_staging_suffix() {
        assert_eq!(MAX_NAME_LEN, 244);
        assert!(validate_filename(&"a".repeat(244)).is_ok());
        assert!(validate_filename(&"a".repeat(245)).is_err());
        assert!(sanitize_name(&"a".repeat(250)).is_err());

        // The longest accepted name still has a staging file within the
        // filesystem limit
        let tmp = temp_path(&root(), &"a".repeat(MAX_NAME_LEN));
        assert_eq!(tmp.file_name().unwrap().len(), crate::MAX_FILENAME_LEN);
    }

    #[test]
    fn test_sanitize_rejects_invalid_utf8_escapes() {
        assert_eq!(
            sanitize_name("bad%FF.txt").unwrap_err(),
            ProtocolError::NotUtf8
        );
        assert_eq!(
            sanitize_name("bad%C3.txt").unwrap_err(),
            ProtocolError::NotUtf8
        );
        assert_eq!(sanitize_name("caf%C3%A9.txt").unwrap(), "café.txt");
    }

    #[test]
    fn test_resolve_stays_in_root() {
        assert_eq!(
            resolve(&root(), "file.txt").unwrap(),
            PathBuf::from("/shared/file.txt")
        );
        assert!(resolve(&root(), "../file.txt").is_err());
        assert!(resolve(&root(), "..").is_err());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path(&root(), "file.txt");
        assert_eq!(tmp.parent(), Some(root().as_path()));
        assert!(is_temp_name(tmp.file_name().unwrap().to_str().unwrap()));
    }
}
