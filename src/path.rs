//! Request-path sanitization: turns an untrusted URL path into a filesystem
//! path guaranteed to stay under the configured web root.
//!
//! Every rule below exists to close one specific traversal or smuggling
//! trick; they're applied in order and the first violation wins, the same
//! way the original server's single-pass validator worked.

use std::path::{Path, PathBuf};

use crate::limits::PathLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathError {
    TooLong,
    InvalidPercentEncoding,
    NullByte,
    DisallowedCharacter,
    Traversal,
    HiddenFile,
    ReservedDeviceName,
    AlternateDataStream,
}

/// Resolves `raw_path` (the request target's path component, already split
/// from any query string) against `web_root`.
///
/// Returns the absolute filesystem path on success. The returned path is
/// guaranteed to be `web_root` or a descendant of it.
pub(crate) fn sanitize(raw_path: &str, web_root: &Path, limits: &PathLimits) -> Result<PathBuf, PathError> {
    if raw_path.len() > limits.max_path {
        return Err(PathError::TooLong);
    }

    let decoded = percent_decode(raw_path)?;

    if decoded.contains('\0') {
        return Err(PathError::NullByte);
    }

    if decoded.contains("..") || decoded.contains("//") || decoded.contains('\\') {
        return Err(PathError::Traversal);
    }

    if decoded.contains(':') {
        return Err(PathError::AlternateDataStream);
    }

    if !decoded
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-' | b' ' | b'/'))
    {
        return Err(PathError::DisallowedCharacter);
    }

    let relative = decoded.trim_start_matches('/');

    let mut resolved = PathBuf::new();
    for component in relative.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(PathError::Traversal),
            name => {
                if name.starts_with('.') {
                    return Err(PathError::HiddenFile);
                }
                if is_reserved_device_name(name) {
                    return Err(PathError::ReservedDeviceName);
                }
                resolved.push(name);
            }
        }
    }

    let full = web_root.join(&resolved);
    if !full.starts_with(web_root) {
        return Err(PathError::Traversal);
    }

    Ok(full)
}

/// Decodes `%XX` escapes and turns `+` into a literal space, matching
/// `application/x-www-form-urlencoded` path-segment conventions. Malformed
/// escapes (truncated or non-hex) are rejected outright rather than passed
/// through, since a half-decoded path is exactly the kind of ambiguity a
/// traversal bypass relies on.
fn percent_decode(input: &str) -> Result<String, PathError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = *bytes.get(i + 1).ok_or(PathError::InvalidPercentEncoding)?;
                let lo = *bytes.get(i + 2).ok_or(PathError::InvalidPercentEncoding)?;
                let hi = (hi as char).to_digit(16).ok_or(PathError::InvalidPercentEncoding)?;
                let lo = (lo as char).to_digit(16).ok_or(PathError::InvalidPercentEncoding)?;
                out.push((hi * 16 + lo) as u8);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| PathError::InvalidPercentEncoding)
}

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn is_reserved_device_name(component: &str) -> bool {
    let stem = component.split('.').next().unwrap_or(component);
    RESERVED_NAMES.iter().any(|name| stem.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PathLimits {
        PathLimits {
            max_path: 2048,
            _priv: (),
        }
    }

    fn root() -> PathBuf {
        PathBuf::from("/srv/www")
    }

    #[test]
    fn plain_path_resolves_under_root() {
        let resolved = sanitize("/index.html", &root(), &limits()).unwrap();
        assert_eq!(resolved, Path::new("/srv/www/index.html"));
    }

    #[test]
    fn nested_path_resolves() {
        let resolved = sanitize("/assets/app.js", &root(), &limits()).unwrap();
        assert_eq!(resolved, Path::new("/srv/www/assets/app.js"));
    }

    #[test]
    fn percent_decodes_spaces() {
        let resolved = sanitize("/my%20file.txt", &root(), &limits()).unwrap();
        assert_eq!(resolved, Path::new("/srv/www/my file.txt"));
    }

    #[test]
    fn plus_decodes_to_space() {
        let resolved = sanitize("/my+file.txt", &root(), &limits()).unwrap();
        assert_eq!(resolved, Path::new("/srv/www/my file.txt"));
    }

    #[test]
    fn rejects_dot_dot_traversal() {
        assert_eq!(
            sanitize("/../etc/passwd", &root(), &limits()),
            Err(PathError::Traversal)
        );
    }

    #[test]
    fn rejects_encoded_dot_dot_traversal() {
        // %2e%2e decodes to "..", caught by the post-decode literal check.
        assert_eq!(
            sanitize("/%2e%2e/etc/passwd", &root(), &limits()),
            Err(PathError::Traversal)
        );
    }

    #[test]
    fn rejects_double_slash() {
        assert_eq!(sanitize("//etc/passwd", &root(), &limits()), Err(PathError::Traversal));
    }

    #[test]
    fn rejects_backslash() {
        assert_eq!(
            sanitize("/foo\\bar", &root(), &limits()),
            Err(PathError::Traversal)
        );
    }

    #[test]
    fn rejects_null_byte() {
        assert_eq!(
            sanitize("/index.html%00.txt", &root(), &limits()),
            Err(PathError::NullByte)
        );
    }

    #[test]
    fn rejects_hidden_files() {
        assert_eq!(sanitize("/.env", &root(), &limits()), Err(PathError::HiddenFile));
        assert_eq!(
            sanitize("/assets/.git/config", &root(), &limits()),
            Err(PathError::HiddenFile)
        );
    }

    #[test]
    fn rejects_reserved_device_names() {
        assert_eq!(sanitize("/CON", &root(), &limits()), Err(PathError::ReservedDeviceName));
        assert_eq!(
            sanitize("/con.txt", &root(), &limits()),
            Err(PathError::ReservedDeviceName)
        );
        assert_eq!(
            sanitize("/lpt1.txt", &root(), &limits()),
            Err(PathError::ReservedDeviceName)
        );
    }

    #[test]
    fn rejects_alternate_data_streams() {
        assert_eq!(
            sanitize("/file.txt:hidden", &root(), &limits()),
            Err(PathError::AlternateDataStream)
        );
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert_eq!(
            sanitize("/foo<script>", &root(), &limits()),
            Err(PathError::DisallowedCharacter)
        );
    }

    #[test]
    fn rejects_invalid_percent_encoding() {
        assert_eq!(
            sanitize("/foo%zz", &root(), &limits()),
            Err(PathError::InvalidPercentEncoding)
        );
        assert_eq!(
            sanitize("/foo%2", &root(), &limits()),
            Err(PathError::InvalidPercentEncoding)
        );
    }

    #[test]
    fn rejects_too_long_paths() {
        let long = format!("/{}", "a".repeat(3000));
        assert_eq!(sanitize(&long, &root(), &limits()), Err(PathError::TooLong));
    }

    #[test]
    fn empty_path_resolves_to_root() {
        let resolved = sanitize("/", &root(), &limits()).unwrap();
        assert_eq!(resolved, Path::new("/srv/www"));
    }

    #[test]
    fn dot_components_are_skipped() {
        let resolved = sanitize("/./assets/./app.js", &root(), &limits()).unwrap();
        assert_eq!(resolved, Path::new("/srv/www/assets/app.js"));
    }
}
