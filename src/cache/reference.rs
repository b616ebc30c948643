//! File references and path normalization
//!
//! Requests name a file either as a `(folder, file)` pair or as one
//! slash-delimited path, which may be a full sharing link. Both shapes map to
//! the same canonical path, which is also the cache key.

use url::Url;

use crate::errors::GatewayError;

/// Request-time description of which file to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileReference {
    Folder { folder: String, file: String },
    Path(String),
}

impl FileReference {
    pub fn folder(folder: impl Into<String>, file: impl Into<String>) -> Self {
        FileReference::Folder {
            folder: folder.into(),
            file: file.into(),
        }
    }

    pub fn path(raw: impl Into<String>) -> Self {
        FileReference::Path(raw.into())
    }

    /// The reference exactly as supplied, joined into one string
    pub fn raw(&self) -> String {
        match self {
            FileReference::Folder { folder, file } => format!("{}/{}", folder, file),
            FileReference::Path(raw) => raw.clone(),
        }
    }

    /// Normalize the reference, rejecting ones that name the root
    ///
    /// # Errors
    /// `GatewayError::InvalidReference` if the normalized path is empty or `/`.
    pub fn canonical_path(&self) -> Result<String, GatewayError> {
        let raw = self.raw();
        let normalized = normalize(&raw);
        if normalized == "/" {
            return Err(GatewayError::invalid_reference(raw));
        }
        Ok(normalized)
    }
}

/// Normalize a raw path or sharing link.
///
/// Rules, in order:
/// 1. a full `http(s)://` link is reduced to its last path segment (query dropped)
/// 2. a leading `/` is added if absent
/// 3. runs of `/` collapse to a single `/`
///
/// Pure and idempotent.
pub fn normalize(reference: &str) -> String {
    let path = match shared_link_segment(reference) {
        Some(segment) => segment,
        None => reference.to_string(),
    };

    let mut normalized = String::with_capacity(path.len() + 1);
    normalized.push('/');
    for ch in path.chars() {
        if ch == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(ch);
    }
    normalized
}

/// Last non-empty path segment of a sharing link, percent-decoded.
///
/// Returns `None` when `reference` is not a link. A link that cannot be parsed
/// or has no path yields an empty segment, which normalizes to the root and is
/// then rejected.
fn shared_link_segment(reference: &str) -> Option<String> {
    let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return None;
    }

    let segment = Url::parse(reference)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(String::from))
        })
        .unwrap_or_default();

    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "/",
        "report.json",
        "/report.json",
        "testing/report.json",
        "//testing///report.json",
        "/testing/report.json/",
        "https://www.dropbox.com/s/abc123/report.json?dl=0",
        "https://www.dropbox.com/scl/fi/xyz/summary%20q1.csv?rlkey=k&dl=1",
        "HTTPS://www.dropbox.com/s/abc123/",
        "https://",
    ];

    #[test]
    fn test_normalize_is_idempotent() {
        for sample in SAMPLES {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_normalize_rules() {
        assert_eq!(normalize("report.json"), "/report.json");
        assert_eq!(normalize("/report.json"), "/report.json");
        assert_eq!(normalize("//testing///report.json"), "/testing/report.json");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn test_sharing_link_uses_last_segment() {
        assert_eq!(
            normalize("https://www.dropbox.com/s/abc123/report.json?dl=0"),
            "/report.json"
        );
        assert_eq!(
            normalize("https://www.dropbox.com/scl/fi/xyz/summary%20q1.csv?rlkey=k&dl=1"),
            "/summary q1.csv"
        );
        assert_eq!(normalize("HTTPS://www.dropbox.com/s/abc123/"), "/abc123");
    }

    #[test]
    fn test_folder_and_path_shapes_agree() {
        let pairs = [
            (FileReference::folder("testing", "report.json"), "testing/report.json"),
            (FileReference::folder("/testing/", "/report.json"), "/testing/report.json"),
            (FileReference::folder("a/b", "c.txt"), "//a//b/c.txt"),
        ];
        for (folder_ref, raw) in pairs {
            assert_eq!(
                folder_ref.canonical_path().unwrap(),
                FileReference::path(raw).canonical_path().unwrap()
            );
        }
        assert_eq!(
            FileReference::folder("testing", "report.json")
                .canonical_path()
                .unwrap(),
            "/testing/report.json"
        );
    }

    #[test]
    fn test_root_references_are_rejected() {
        for reference in [
            FileReference::path(""),
            FileReference::path("///"),
            FileReference::folder("", ""),
            FileReference::path("https://www.dropbox.com"),
            FileReference::path("https://"),
        ] {
            let err = reference.canonical_path().unwrap_err();
            assert!(matches!(err, GatewayError::InvalidReference { .. }), "{:?}", reference);
        }
    }
}
