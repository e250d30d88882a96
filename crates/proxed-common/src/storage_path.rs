/// A user-supplied storage path that survived traversal screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    /// Prefix-stripped, slash-joined form of the raw (still encoded) segments.
    pub normalized: String,
    /// Percent-decoded segments, in order.
    pub decoded_segments: Vec<String>,
}

/// Screens a path derived from user input before it addresses backing
/// storage. Rejects encoded and unencoded traversal identically; validating
/// an already-normalized path yields the same result.
pub fn validate_storage_path(path: &str, required_prefix: Option<&str>) -> Option<ValidatedPath> {
    let trimmed = path.trim_start_matches('/');

    let relative = match required_prefix {
        Some(prefix) if !prefix.is_empty() => match trimmed.strip_prefix(prefix) {
            Some(rest) => rest.strip_prefix('/').unwrap_or(rest),
            // Already relative to the prefix; leave unchanged.
            None => trimmed,
        },
        _ => trimmed,
    };

    if relative.contains('\\') || relative.contains('\0') {
        return None;
    }

    let raw_segments: Vec<&str> = relative.split('/').collect();
    let mut decoded_segments = Vec::with_capacity(raw_segments.len());
    for raw in &raw_segments {
        if raw.is_empty() || *raw == "." || *raw == ".." {
            return None;
        }
        let decoded = urlencoding::decode(raw).ok()?.into_owned();
        if decoded == "." || decoded == ".." {
            return None;
        }
        if decoded.contains('/') || decoded.contains('\\') || decoded.contains('\0') {
            return None;
        }
        decoded_segments.push(decoded);
    }

    Some(ValidatedPath {
        normalized: raw_segments.join("/"),
        decoded_segments,
    })
}
