use std::fs;
use std::path::Path;

/// OSC 8 terminal hyperlink
pub fn osc8_link(url: &str, text: &str) -> String {
    format!("\x1b]8;;{}\x1b\\{}\x1b]8;;\x1b\\", url, text)
}

/// OSC 8 hyperlink to a local file, labelled with its path
pub fn osc8_path(path: &Path) -> String {
    let abs = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    osc8_link(&format!("file://{}", abs.display()), &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_osc8_link() {
        assert_eq!(
            osc8_link("https://site.ua/a.jpg", "a"),
            "\x1b]8;;https://site.ua/a.jpg\x1b\\a\x1b]8;;\x1b\\"
        );
    }

    #[test]
    fn test_osc8_path_missing_file() {
        let link = osc8_path(Path::new("no/such/output.csv"));
        assert!(link.contains("file://no/such/output.csv"));
        assert!(link.contains("\\no/such/output.csv\x1b"));
    }
}
