/// Normalize a path read from a layer archive to an absolute image path.
///
/// `./usr/x`, `usr/x` and `/usr/x` all become `/usr/x`.
pub fn normalize_entry_path(raw: &str) -> String {
    let trimmed = raw.strip_prefix('.').unwrap_or(raw);
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Join `rel` onto `base` and resolve `.` and `..` segments lexically.
///
/// An absolute `rel` replaces `base`. The result keeps `base`'s leading `/`
/// (or lack of it) and never climbs above the root.
pub fn join_clean(base: &str, rel: &str) -> String {
    let (absolute, joined) = if rel.starts_with('/') {
        (true, rel.to_string())
    } else {
        (base.starts_with('/'), format!("{base}/{rel}"))
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    let body = parts.join("/");
    if absolute { format!("/{body}") } else { body }
}

/// Directory part of a slash-separated path (`""` for a bare name).
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Final segment of a slash-separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_variants() {
        assert_eq!(normalize_entry_path("./usr/share/doc"), "/usr/share/doc");
        assert_eq!(normalize_entry_path("usr/share/doc"), "/usr/share/doc");
        assert_eq!(normalize_entry_path("/usr/share/doc"), "/usr/share/doc");
        assert_eq!(normalize_entry_path(".hidden"), "/hidden");
    }

    #[test]
    fn join_relative_and_absolute() {
        assert_eq!(
            join_clean("/usr/share/common-licenses/", "GPL-3"),
            "/usr/share/common-licenses/GPL-3"
        );
        assert_eq!(
            join_clean("/usr/share/common-licenses/", "./Apache-2.0"),
            "/usr/share/common-licenses/Apache-2.0"
        );
        assert_eq!(
            join_clean("/usr/share/common-licenses/", "../doc/MIT"),
            "/usr/share/doc/MIT"
        );
        assert_eq!(join_clean("/usr/share/common-licenses", "/etc/x"), "/etc/x");
        assert_eq!(join_clean("abc", "../../blobs/sha256/ff"), "blobs/sha256/ff");
        assert_eq!(join_clean("/", "../.."), "/");
    }

    #[test]
    fn parent_and_file_name() {
        assert_eq!(parent("/app/LICENSE"), "/app");
        assert_eq!(parent("layer.tar"), "");
        assert_eq!(file_name("/app/.wh.LICENSE"), ".wh.LICENSE");
        assert_eq!(file_name("LICENSE"), "LICENSE");
    }
}
