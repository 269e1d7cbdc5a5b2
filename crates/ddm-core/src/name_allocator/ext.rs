//! MIME type to file extension reconciliation (§4.4). Small and
//! deliberately non-exhaustive — covers the content types a download
//! manager actually sees.

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let base = mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase();
    Some(match base.as_str() {
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" | "application/x-gzip" => "gz",
        "application/x-tar" => "tar",
        "application/x-debian-package" => "deb",
        "application/vnd.android.package-archive" => "apk",
        "application/json" => "json",
        "application/octet-stream" => "bin",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        _ => return None,
    })
}

/// If `name` has no extension, appends one derived from `mime_type` (when
/// known). If `name` already has an extension that disagrees with the one
/// `mime_type` implies, replaces it with the MIME-derived extension (§4.4:
/// "if the filename-derived extension disagrees with the actual mime_type,
/// replace with the MIME-derived one"). Leaves `name` untouched when
/// `mime_type` is absent or unrecognized.
pub fn ensure_extension(name: String, mime_type: Option<&str>) -> String {
    let Some(mime_ext) = mime_type.and_then(extension_for_mime) else {
        return name;
    };

    let existing_ext = name
        .rfind('.')
        .filter(|&i| i > 0 && i < name.len() - 1)
        .map(|i| &name[i + 1..]);

    match existing_ext {
        Some(ext) if ext.eq_ignore_ascii_case(mime_ext) => name,
        Some(_) => {
            let stem_end = name.rfind('.').unwrap();
            format!("{}.{mime_ext}", &name[..stem_end])
        }
        None => format!("{name}.{mime_ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_known_extension() {
        assert_eq!(
            ensure_extension("report".to_string(), Some("application/pdf")),
            "report.pdf"
        );
    }

    #[test]
    fn replaces_a_disagreeing_extension() {
        assert_eq!(
            ensure_extension("archive.zip".to_string(), Some("application/pdf")),
            "archive.pdf"
        );
    }

    #[test]
    fn leaves_an_agreeing_extension_alone() {
        assert_eq!(
            ensure_extension("archive.ZIP".to_string(), Some("application/zip")),
            "archive.ZIP"
        );
    }

    #[test]
    fn unknown_mime_leaves_name_unchanged() {
        assert_eq!(
            ensure_extension("mystery".to_string(), Some("application/x-made-up")),
            "mystery"
        );
    }

    #[test]
    fn charset_suffix_is_ignored() {
        assert_eq!(
            ensure_extension("page".to_string(), Some("text/html; charset=utf-8")),
            "page.html"
        );
    }
}
