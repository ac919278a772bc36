//! Sanitization of user-controlled names.
//!
//! Sheet titles, key column values and upload file names all end up as file
//! names inside a workspace or an archive, or as sheet names inside a
//! workbook. Each use has its own rule set, applied deterministically.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum sheet name length accepted by spreadsheet applications.
pub const SHEET_NAME_LIMIT: usize = 31;

/// Characters Excel refuses in sheet names.
static SHEET_NAME_FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[\]:*?/\\]").expect("Hardcode regex pattern"));

/// Characters that are unsafe in file names on common platforms.
static FILE_STEM_FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("Hardcode regex pattern"));

/// Turns an arbitrary label into a valid sheet name.
///
/// Forbidden characters become `_`, surrounding apostrophes are trimmed,
/// the result is truncated to [`SHEET_NAME_LIMIT`] characters and an empty
/// result falls back to `Sheet{position}` (1-based).
pub fn sanitize_sheet_name(name: &str, position: usize) -> String {
    let replaced = SHEET_NAME_FORBIDDEN.replace_all(name, "_");
    let trimmed = replaced.trim_matches('\'');
    let truncated: String = trimmed.chars().take(SHEET_NAME_LIMIT).collect();
    if truncated.trim().is_empty() {
        format!("Sheet{position}")
    } else {
        truncated
    }
}

/// Turns an arbitrary label into a file stem that is safe inside an archive
/// or a workspace directory.
///
/// Path separators and other reserved characters become `_`, leading dots are
/// replaced so that `.` and `..` can never be produced, and an empty result
/// falls back to `None`, matching the label of the null key.
pub fn sanitize_file_stem(name: &str) -> String {
    let replaced = FILE_STEM_FORBIDDEN.replace_all(name.trim(), "_");
    let mut stem = replaced.into_owned();
    if stem.starts_with('.') {
        let dots = stem.chars().take_while(|c| *c == '.').count();
        stem.replace_range(..dots, &"_".repeat(dots));
    }
    if stem.is_empty() {
        "None".to_owned()
    } else {
        stem
    }
}

/// Base name of an uploaded file, whichever separator the client used.
pub fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

/// Label for an uploaded workbook: its base name up to the first `.`.
pub fn upload_label(file_name: &str) -> &str {
    let base = base_name(file_name);
    base.split('.').next().unwrap_or(base)
}

/// Returns true when a single path component is safe to join onto a directory.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.contains(std::path::MAIN_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_names_are_cleaned_and_truncated() {
        assert_eq!(sanitize_sheet_name("Q1/Q2", 1), "Q1_Q2");
        assert_eq!(sanitize_sheet_name("'quoted'", 1), "quoted");
        assert_eq!(sanitize_sheet_name("", 3), "Sheet3");
        assert_eq!(sanitize_sheet_name("[]", 2), "__");
        let long = "abcdefghijklmnopqrstuvwxyz0123456789";
        assert_eq!(sanitize_sheet_name(long, 1).chars().count(), SHEET_NAME_LIMIT);
        assert_eq!(sanitize_sheet_name(long, 1), &long[..31]);
    }

    #[test]
    fn file_stems_never_traverse() {
        assert_eq!(sanitize_file_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_file_stem(".."), "__");
        assert_eq!(sanitize_file_stem("a\\b"), "a_b");
        assert_eq!(sanitize_file_stem("  "), "None");
        assert_eq!(sanitize_file_stem("fruit"), "fruit");
        assert!(is_safe_component(&sanitize_file_stem("../../x")));
    }

    #[test]
    fn upload_labels_strip_directories_and_extensions() {
        assert_eq!(base_name("C:\\Users\\me\\sales.xlsx"), "sales.xlsx");
        assert_eq!(upload_label("dir/report.2023.xlsx"), "report");
        assert_eq!(upload_label("plain"), "plain");
    }

    #[test]
    fn safe_components() {
        assert!(is_safe_component("upload-0.xlsx"));
        assert!(!is_safe_component(""));
        assert!(!is_safe_component(".."));
        assert!(!is_safe_component("a/b"));
        assert!(!is_safe_component("a\\b"));
    }
}
