//! `<img src=...>` extraction and in-place rewriting
//!
//! Only the quoted `src` value is ever touched; the rest of the tag and the
//! surrounding markup are copied through byte for byte.

use regex::{Captures, Match, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// An `<img>` tag with a non-empty, quoted `src` attribute. The value is
/// captured by group 1 (double quotes) or group 2 (single quotes).
static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\ssrc\s*=\s*(?:"([^"]+)"|'([^']+)')[^>]*>"#)
        .expect("image tag pattern is valid")
});

fn src_value<'h>(caps: &Captures<'h>) -> Option<Match<'h>> {
    caps.get(1).or_else(|| caps.get(2))
}

/// Every `src` literal in `html`, in document order. Duplicates are kept.
pub fn extract_image_links(html: &str) -> Vec<String> {
    IMG_SRC_RE
        .captures_iter(html)
        .filter_map(|caps| src_value(&caps).map(|m| m.as_str().to_string()))
        .collect()
}

/// Replace each `src` that has an entry in `paths` with its local path.
/// Tags whose reference is unknown are left exactly as they were.
pub fn replace_image_links(html: &str, paths: &HashMap<String, String>) -> String {
    IMG_SRC_RE
        .replace_all(html, |caps: &Captures| {
            let tag = caps.get(0).map_or("", |m| m.as_str());
            let Some(src) = src_value(caps) else {
                return tag.to_string();
            };
            match paths.get(src.as_str()) {
                Some(local) => {
                    let tag_start = caps.get(0).map_or(0, |m| m.start());
                    let (start, end) = (src.start() - tag_start, src.end() - tag_start);
                    format!("{}{}{}", &tag[..start], local, &tag[end..])
                }
                None => tag.to_string(),
            }
        })
        .into_owned()
}
