//! VFAT-valid filename sanitization (§4.4).
//!
//! Deliberately not `url_model::sanitize_filename_for_linux`: destinations
//! here may land on a VFAT-formatted removable volume, which is pickier than
//! Linux's NAME_MAX=255 rule — a narrower ASCII subset, no trailing dot or
//! space, and a 127-byte ceiling instead of 255.

/// VFAT long-filename limit used by this allocator. Real VFAT LFNs allow more,
/// but §4.4 pins this implementation to 127 UTF-8 bytes.
const VFAT_MAX_BYTES: usize = 127;

/// Characters VFAT forbids in a long filename, plus control characters.
fn is_invalid_vfat_char(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Sanitizes a candidate filename for a VFAT-compatible destination.
///
/// - Non-ASCII and VFAT-forbidden characters become `_`
/// - Trailing dots and spaces are trimmed (VFAT LFNs cannot end in either)
/// - Truncated to 127 UTF-8 bytes at a char boundary
pub fn sanitize_filename_for_vfat(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if is_invalid_vfat_char(c) || !c.is_ascii() {
            out.push('_');
        } else {
            out.push(c);
        }
    }

    let trimmed = out.trim_end_matches(|c| c == '.' || c == ' ');
    let trimmed = trimmed.trim_start_matches(' ');

    if trimmed.len() <= VFAT_MAX_BYTES {
        return trimmed.to_string();
    }

    let mut take = VFAT_MAX_BYTES;
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take]
        .trim_end_matches(|c| c == '.' || c == ' ')
        .to_string()
}

/// Names VFAT/DOS reserve regardless of extension, case-insensitive.
const RESERVED_STEMS: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// True if `name`'s stem (before the first `.`) is a reserved DOS device name,
/// or the name is empty, `.`, or `..`.
pub fn is_reserved_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return true;
    }
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED_STEMS.iter().any(|r| r.eq_ignore_ascii_case(stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_forbidden_chars() {
        assert_eq!(sanitize_filename_for_vfat("a/b\\c:d*e?.txt"), "a_b_c_d_e_.txt");
    }

    #[test]
    fn non_ascii_becomes_underscore() {
        assert_eq!(sanitize_filename_for_vfat("caf\u{e9}.txt"), "caf_.txt");
    }

    #[test]
    fn trims_trailing_dots_and_spaces() {
        assert_eq!(sanitize_filename_for_vfat("report.pdf.. "), "report.pdf");
    }

    #[test]
    fn truncates_to_127_bytes_at_char_boundary() {
        let long = "a".repeat(200) + ".txt";
        let sanitized = sanitize_filename_for_vfat(&long);
        assert!(sanitized.len() <= 127);
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved_name("CON"));
        assert!(is_reserved_name("com3.txt"));
        assert!(is_reserved_name(".."));
        assert!(!is_reserved_name("console.txt"));
    }
}
