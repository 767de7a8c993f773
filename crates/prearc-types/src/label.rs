//! Label validation and sanitizing.
//!
//! Session, subject and scan labels end up as directory names and as natural
//! keys in the record store, so they are restricted to `[A-Za-z0-9_-]`.

use crate::error::TypeError;

/// Maximum label length accepted by the archive.
pub const MAX_LABEL_LEN: usize = 255;

/// Validate a label, returning `Ok(())` if it can be used as-is.
///
/// # Examples
///
/// ```
/// use prearc_types::is_valid_label;
///
/// assert!(is_valid_label("MR_001").is_ok());
/// assert!(is_valid_label("").is_err());
/// assert!(is_valid_label("a/b").is_err());
/// ```
pub fn is_valid_label(label: &str) -> Result<(), TypeError> {
    if label.is_empty() {
        return Err(TypeError::InvalidLabel {
            label: label.to_string(),
            reason: "label must not be empty".into(),
        });
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(TypeError::InvalidLabel {
            label: label.to_string(),
            reason: format!("label longer than {MAX_LABEL_LEN} bytes"),
        });
    }
    if let Some(ch) = label.chars().find(|c| !is_label_char(*c)) {
        return Err(TypeError::InvalidLabel {
            label: label.to_string(),
            reason: format!("contains forbidden character: {ch:?}"),
        });
    }
    Ok(())
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_` and trim the
/// result to [`MAX_LABEL_LEN`]. Returns an empty string only for empty input.
pub fn sanitize_label(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if is_label_char(c) { c } else { '_' })
        .take(MAX_LABEL_LEN)
        .collect()
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_label("John^Doe"), "John_Doe");
        assert_eq!(sanitize_label(" 1.2.840 "), "1_2_840");
        assert_eq!(sanitize_label("../etc"), "___etc");
    }

    #[test]
    fn rejects_dots_and_spaces() {
        assert!(is_valid_label("a.b").is_err());
        assert!(is_valid_label("a b").is_err());
        assert!(is_valid_label("ok-label_1").is_ok());
    }

    proptest! {
        #[test]
        fn sanitized_non_empty_input_is_valid(raw in "[^\\s]{1,300}") {
            let clean = sanitize_label(&raw);
            prop_assert!(is_valid_label(&clean).is_ok());
        }

        #[test]
        fn sanitize_is_idempotent(raw in ".{0,64}") {
            let once = sanitize_label(&raw);
            prop_assert_eq!(sanitize_label(&once), once);
        }
    }
}
