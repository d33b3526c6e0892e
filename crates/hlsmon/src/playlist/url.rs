use tracing::trace;
use url::Url;

/// Whether `uri` carries its own scheme (`http://...`, `https://...`).
pub fn has_scheme(uri: &str) -> bool {
    match uri.find("://") {
        Some(idx) if idx > 0 => uri[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

/// Resolve a playlist reference against the URL of the playlist containing it.
///
/// Absolute references are returned untouched. Root-relative references keep
/// the base's scheme and authority. Anything else is joined onto the base's
/// directory, each leading `../` popping one path segment.
pub fn resolve_url(base: &str, reference: &str) -> String {
    let reference = reference.trim();
    if has_scheme(reference) {
        return reference.to_owned();
    }

    let resolved = match Url::parse(base).and_then(|b| b.join(reference)) {
        Ok(url) => url.to_string(),
        Err(_) => resolve_fallback(base, reference),
    };
    trace!("Resolved URI: {} + {} -> {}", base, reference, resolved);
    resolved
}

// Plain string splicing for bases the `url` crate refuses to parse.
fn resolve_fallback(base: &str, reference: &str) -> String {
    let base = base.split(['?', '#']).next().unwrap_or(base);
    let (origin, path) = match base.find("://") {
        Some(idx) => {
            let after = &base[idx + 3..];
            let split = after.find('/').map_or(base.len(), |p| idx + 3 + p);
            (&base[..split], &base[split..])
        }
        None => ("", base),
    };

    if reference.starts_with('/') {
        return format!("{origin}{reference}");
    }

    let mut segments: Vec<&str> = path.split('/').collect();
    // Drop the file name of the base.
    segments.pop();

    let mut rest = reference;
    loop {
        if let Some(stripped) = rest.strip_prefix("../") {
            if segments.len() > 1 {
                segments.pop();
            }
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else {
            break;
        }
    }

    let dir = segments.join("/");
    format!("{origin}{dir}/{rest}")
}

/// File name of a URL with any query string or fragment stripped.
pub fn basename(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let trimmed = without_query.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://cdn.example.com/live/hd/index.m3u8?token=abc";

    #[test]
    fn absolute_reference_is_unchanged() {
        let abs = "https://other.example.com/seg-1.ts?x=1";
        assert_eq!(resolve_url(BASE, abs), abs);
        // No normalisation is applied to absolute references.
        assert_eq!(resolve_url(BASE, "http://host"), "http://host");
    }

    #[test]
    fn root_relative_splices_after_host() {
        assert_eq!(
            resolve_url(BASE, "/vod/seg-1.ts"),
            "http://cdn.example.com/vod/seg-1.ts"
        );
    }

    #[test]
    fn relative_joins_base_directory() {
        assert_eq!(
            resolve_url(BASE, "seg-1.ts"),
            "http://cdn.example.com/live/hd/seg-1.ts"
        );
    }

    #[test]
    fn each_parent_reference_pops_one_segment() {
        assert_eq!(
            resolve_url(BASE, "../sd/index.m3u8"),
            "http://cdn.example.com/live/sd/index.m3u8"
        );
        assert_eq!(
            resolve_url(BASE, "../../seg.ts"),
            "http://cdn.example.com/seg.ts"
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        for reference in ["seg-1.ts", "/a/b.ts", "../c.ts", "https://x.y/z.ts"] {
            let once = resolve_url(BASE, reference);
            assert_eq!(resolve_url(BASE, &once), once);
        }
    }

    #[test]
    fn fallback_handles_unparseable_base() {
        assert_eq!(
            resolve_fallback("media/live/index.m3u8", "../seg.ts"),
            "media/seg.ts"
        );
        assert_eq!(
            resolve_fallback("http://h/a/b/index.m3u8?q=1", "../c.ts"),
            "http://h/a/c.ts"
        );
        assert_eq!(resolve_fallback("http://h/a/i.m3u8", "/x.ts"), "http://h/x.ts");
    }

    #[test]
    fn basename_strips_query() {
        assert_eq!(basename("http://h/a/seg-10.ts?sig=1"), "seg-10.ts");
        assert_eq!(basename("seg.ts"), "seg.ts");
        assert_eq!(basename("http://h/live/index.m3u8#frag"), "index.m3u8");
    }
}
