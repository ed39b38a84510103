//! In-place editing of the `digest:` field in a Helm values document.
//!
//! Only the value token on the single `digest:` line changes. Indentation,
//! quoting style, trailing comments, line endings and every other line are
//! preserved byte for byte.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use thiserror::Error;

use crate::core::Digest;

#[allow(clippy::expect_used)]
static DIGEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^(?P<key>[ \t]*digest:[ \t]*)(?P<value>"[^"\r\n]*"|'[^'\r\n]*'|[^\s#]*)"#)
        .expect("digest line pattern compiles")
});

/// The document did not contain exactly one `digest:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected exactly one digest field, found {0}")]
pub struct DigestFieldError(pub usize);

fn single_match(contents: &str) -> Result<Captures<'_>, DigestFieldError> {
    let mut matches = DIGEST_LINE.captures_iter(contents);
    match (matches.next(), matches.next()) {
        (Some(only), None) => Ok(only),
        (None, _) => Err(DigestFieldError(0)),
        (Some(_), Some(_)) => Err(DigestFieldError(2 + matches.count())),
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

/// Returns the current value of the `digest:` field, `None` if it is empty.
pub fn find_digest(contents: &str) -> Result<Option<String>, DigestFieldError> {
    let caps = single_match(contents)?;
    let raw = caps.name("value").map_or("", |m| m.as_str());
    let value = unquote(raw).trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

/// Returns `contents` with the `digest:` value replaced by `digest`.
pub fn patch_digest(contents: &str, digest: &Digest) -> Result<String, DigestFieldError> {
    let caps = single_match(contents)?;
    let Some(value) = caps.name("value") else {
        return Err(DigestFieldError(0));
    };

    let old = value.as_str();
    let replacement = if old.starts_with('"') {
        format!("\"{digest}\"")
    } else if old.starts_with('\'') {
        format!("'{digest}'")
    } else {
        digest.to_string()
    };

    let mut patched = String::with_capacity(contents.len() + replacement.len());
    patched.push_str(&contents[..value.start()]);
    patched.push_str(&replacement);
    patched.push_str(&contents[value.end()..]);
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const VALUES: &str = "\
replicaCount: 2
image:
  repository: ghcr.io/acme/py-api
  # pinned by promotion; tags are ignored
  digest: sha256:old  # managed
  pullPolicy: IfNotPresent
resources:
  limits:
    cpu: 500m
";

    fn digest(s: &str) -> Digest {
        Digest::parse(s).unwrap()
    }

    #[test]
    fn test_find_digest() {
        assert_eq!(find_digest(VALUES).unwrap(), Some("sha256:old".to_string()));
    }

    #[test]
    fn test_find_empty_digest() {
        assert_eq!(find_digest("image:\n  digest: \"\"\n").unwrap(), None);
        assert_eq!(find_digest("image:\n  digest:\n").unwrap(), None);
    }

    #[test]
    fn test_patch_only_touches_digest_value() {
        let patched = patch_digest(VALUES, &digest("sha256:new")).unwrap();
        assert_eq!(patched, VALUES.replace("sha256:old", "sha256:new"));
    }

    #[test]
    fn test_patch_preserves_quote_style() {
        let patched = patch_digest("image:\n  digest: \"\"\n", &digest("sha256:aaa")).unwrap();
        assert_eq!(patched, "image:\n  digest: \"sha256:aaa\"\n");

        let patched = patch_digest("digest: 'sha256:x'\n", &digest("sha256:bbb")).unwrap();
        assert_eq!(patched, "digest: 'sha256:bbb'\n");
    }

    #[test]
    fn test_patch_preserves_crlf() {
        let patched = patch_digest("a: 1\r\ndigest: sha256:old\r\nb: 2\r\n", &digest("sha256:new")).unwrap();
        assert_eq!(patched, "a: 1\r\ndigest: sha256:new\r\nb: 2\r\n");
    }

    #[test]
    fn test_commented_and_prefixed_keys_ignored() {
        let doc = "# digest: sha256:commented\nimageDigest: sha256:other\ndigest: sha256:real\n";
        assert_eq!(find_digest(doc).unwrap(), Some("sha256:real".to_string()));
    }

    #[test]
    fn test_missing_or_duplicate_field() {
        assert_eq!(find_digest("image:\n  tag: latest\n"), Err(DigestFieldError(0)));

        let doc = "api:\n  digest: sha256:a\nworker:\n  digest: sha256:b\nsidecar:\n  digest: sha256:c\n";
        assert_eq!(patch_digest(doc, &digest("sha256:new")), Err(DigestFieldError(3)));
    }
}
