use url::Url;

use crate::error::AssetError;

/// Turn an `src` literal into an absolute URL using `hostname` for
/// host-relative references.
///
/// - `//cdn.site/a.jpg` becomes `https://cdn.site/a.jpg`
/// - `/a.jpg` and `a.jpg` are joined onto `hostname` with a single slash
/// - anything starting with `http` is kept as is
///
/// The result is parsed once so malformed text fails here rather than at
/// request time.
pub fn resolve_reference(reference: &str, hostname: &str) -> Result<String, AssetError> {
    let resolved = if reference.starts_with("//") {
        format!("https:{}", reference)
    } else if !reference.starts_with("http") {
        format!(
            "{}/{}",
            hostname.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    } else {
        reference.to_string()
    };

    Url::parse(&resolved).map_err(|e| AssetError::InvalidUrl(format!("{}: {}", resolved, e)))?;
    Ok(resolved)
}
