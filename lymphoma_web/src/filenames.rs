use std::path::Path;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
}

/// Whether an upload name carries one of the accepted image extensions.
pub fn allowed_file(filename: &str) -> bool {
    extension(filename)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Reduces a client supplied name to a flat, ASCII-only file name that is safe
/// to join onto the uploads directory. Returns an empty string when nothing
/// usable is left.
pub fn secure_filename(filename: &str) -> String {
    let flattened: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' => ' ',
            c => c,
        })
        .filter(char::is_ascii)
        .collect();

    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_file_is_case_insensitive() {
        for name in ["X.JPG", "slide.jpeg", "scan.PnG", "tile.webp", "a.b.jpg"] {
            assert!(allowed_file(name), "{}", name);
        }
        for name in ["x.gif", "notes.txt", "jpg", "", "archive.jpg.zip", "slide.tiff"] {
            assert!(!allowed_file(name), "{}", name);
        }
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("..\\slides\\tile 01.PNG"), "slides_tile_01.PNG");
        assert_eq!(secure_filename("größe.jpg"), "gre.jpg");
        assert_eq!(secure_filename("../.."), "");
        assert_eq!(secure_filename("  .hidden.png"), "hidden.png");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.webp")), "image/webp");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }
}
