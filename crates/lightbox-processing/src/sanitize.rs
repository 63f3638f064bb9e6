//! Filename sanitizing for user-supplied and in-archive names.

/// Reduce an untrusted filename to a safe basename.
///
/// Takes the final path component (both separator styles), keeps ASCII
/// alphanumerics, `.`, `-` and `_`, maps whitespace to `_`, drops everything
/// else, and strips leading dots and dashes so the result can never be a
/// dotfile or look like a flag. Returns an empty string when nothing usable
/// remains; callers substitute a generated placeholder in that case.
pub fn sanitize_filename(name: &str) -> String {
    let basename = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");

    let cleaned: String = basename
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .collect();

    cleaned
        .trim_start_matches(['.', '-'])
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_ordinary_names() {
        assert_eq!(sanitize_filename("holiday_photo-1.jpg"), "holiday_photo-1.jpg");
    }

    #[test]
    fn strips_directory_components() {
        assert_eq!(sanitize_filename("a/b/c.png"), "c.png");
        assert_eq!(sanitize_filename("C:\\evil\\c.png"), "c.png");
    }

    #[test]
    fn neutralizes_traversal_attempts() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(".."), "");
    }

    #[test]
    fn maps_whitespace_and_drops_specials() {
        assert_eq!(sanitize_filename("my file (1).mp4"), "my_file_1.mp4");
    }

    #[test]
    fn empty_when_nothing_usable_remains() {
        assert_eq!(sanitize_filename("***"), "");
        assert_eq!(sanitize_filename(""), "");
    }
}
