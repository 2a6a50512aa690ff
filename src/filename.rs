//! Local filenames for downloaded images
//!
//! A filename looks like `{hash}-{dirs}-{stem}.{ext}`: a short SHA-256 prefix
//! of the absolute URL keeps unrelated URLs apart, the two parent directories
//! and the file's own stem keep it readable. Everything is transliterated to
//! lowercase ASCII so the name is safe both on disk and inside HTML.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::AssetError;

/// Hex characters of the URL digest kept in the filename
const HASH_LEN: usize = 8;

const DEFAULT_EXTENSION: &str = "jpg";

/// Ukrainian and Russian Cyrillic to Latin
const CYRILLIC_TO_LATIN: &[(char, &str)] = &[
    ('А', "A"), ('Б', "B"), ('В', "V"), ('Г', "H"), ('Ґ', "G"), ('Д', "D"),
    ('Е', "E"), ('Є', "Ye"), ('Ж', "Zh"), ('З', "Z"), ('И', "Y"), ('І', "I"),
    ('Ї', "Yi"), ('Й', "Y"), ('К', "K"), ('Л', "L"), ('М', "M"), ('Н', "N"),
    ('О', "O"), ('П', "P"), ('Р', "R"), ('С', "S"), ('Т', "T"), ('У', "U"),
    ('Ф', "F"), ('Х', "Kh"), ('Ц', "Ts"), ('Ч', "Ch"), ('Ш', "Sh"), ('Щ', "Shch"),
    ('Ю', "Yu"), ('Я', "Ya"), ('Ь', ""),
    ('а', "a"), ('б', "b"), ('в', "v"), ('г', "h"), ('ґ', "g"), ('д', "d"),
    ('е', "e"), ('є', "ye"), ('ж', "zh"), ('з', "z"), ('и', "y"), ('і', "i"),
    ('ї', "yi"), ('й', "y"), ('к', "k"), ('л', "l"), ('м', "m"), ('н', "n"),
    ('о', "o"), ('п', "p"), ('р', "r"), ('с', "s"), ('т', "t"), ('у', "u"),
    ('ф', "f"), ('х', "kh"), ('ц', "ts"), ('ч', "ch"), ('ш', "sh"), ('щ', "shch"),
    ('ю', "yu"), ('я', "ya"), ('ь', ""),
    // Russian-only letters
    ('Ё', "E"), ('Ы', "Y"), ('Э', "E"), ('ё', "e"), ('ы', "y"), ('э', "e"),
];

fn latin_for(c: char) -> Option<&'static str> {
    CYRILLIC_TO_LATIN
        .iter()
        .find(|(cyr, _)| *cyr == c)
        .map(|(_, latin)| *latin)
}

/// Transliterate Cyrillic, turn spaces into hyphens, drop everything that is
/// not an ASCII letter, digit or hyphen, and lowercase the result.
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if let Some(latin) = latin_for(c) {
            out.push_str(latin);
        } else if c == ' ' {
            out.push('-');
        } else if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        }
    }
    out.to_ascii_lowercase()
}

fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..HASH_LEN].to_string()
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Split `photo.JPG` into (`photo`, `jpg`). Names without a usable
/// extension get the default one.
fn split_extension(basename: &str) -> (&str, String) {
    if let Some((stem, ext)) = basename.rsplit_once('.') {
        let ext: String = ext
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if !ext.is_empty() {
            return (stem, ext);
        }
    }
    (basename, DEFAULT_EXTENSION.to_string())
}

/// Build the local filename for an absolute URL. Deterministic: the same URL
/// always yields the same name.
pub fn local_filename(resolved_url: &str) -> Result<String, AssetError> {
    let parsed = Url::parse(resolved_url)
        .map_err(|e| AssetError::InvalidUrl(format!("{}: {}", resolved_url, e)))?;

    let segments: Vec<String> = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(decode_segment)
        .collect();

    // A trailing slash means there is no basename, only directories
    let (dirs, basename) = if parsed.path().ends_with('/') {
        (&segments[..], "")
    } else {
        match segments.split_last() {
            Some((last, dirs)) => (dirs, last.as_str()),
            None => (&segments[..], ""),
        }
    };

    let (stem, extension) = split_extension(basename);
    let dir_token = dirs[dirs.len().saturating_sub(2)..].join("_");

    let mut parts = vec![url_hash(resolved_url)];
    for part in [transliterate(&dir_token), transliterate(stem)] {
        if !part.is_empty() {
            parts.push(part);
        }
    }

    Ok(format!("{}.{}", parts.join("-"), extension))
}
