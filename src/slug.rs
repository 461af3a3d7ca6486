//! Session identifier generation.
//!
//! Session ids double as directory names in the checkpoint store, so they
//! are restricted to lowercase ASCII letters, digits and hyphens.

use uuid::Uuid;

/// Maximum length of the readable part of a session id
const MAX_SLUG_LENGTH: usize = 24;

/// Convert text to a lowercase, hyphen-separated ASCII slug.
///
/// Does NOT truncate - use `slugify_truncate` for length-limited slugs.
pub fn slugify(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_dash = true;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            result.push('-');
            prev_dash = true;
        }
    }

    if result.ends_with('-') {
        result.pop();
    }
    result
}

/// Slug cut at a word boundary to stay under `MAX_SLUG_LENGTH`.
pub fn slugify_truncate(text: &str) -> String {
    let mut result = slugify(text);

    if result.len() > MAX_SLUG_LENGTH {
        // Prefer cutting on a word boundary, including one right at the limit
        match result[..=MAX_SLUG_LENGTH].rfind('-') {
            Some(pos) if pos > 0 => result.truncate(pos),
            _ => result.truncate(MAX_SLUG_LENGTH),
        }
    }

    if result.ends_with('-') {
        result.pop();
    }
    result
}

/// New session id: `<prompt-slug>-<8 hex chars>`.
pub fn new_session_id(prompt: &str) -> String {
    let slug = slugify_truncate(prompt);
    let slug = if slug.is_empty() { "session".to_string() } else { slug };
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug, &suffix[..8])
}

/// Whether `id` is safe to use as a store directory name.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('-')
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Exam stress, again!"), "exam-stress-again");
        assert_eq!(slugify("  Multiple   Spaces  "), "multiple-spaces");
        assert_eq!(slugify("Ängste überwinden"), "ngste-berwinden");
    }

    #[test]
    fn test_slugify_truncate_long_input() {
        let long_prompt = "Create a gentle exposure exercise for someone afraid of public speaking at work";
        let slug = slugify_truncate(long_prompt);
        assert!(slug.len() <= MAX_SLUG_LENGTH);
        assert!(!slug.ends_with('-'));
        assert_eq!(slug, "create-a-gentle-exposure");
    }

    #[test]
    fn test_new_session_id_shape() {
        let id = new_session_id("Sleep anxiety");
        assert!(id.starts_with("sleep-anxiety-"));
        assert_eq!(id.len(), "sleep-anxiety-".len() + 8);
        assert!(is_valid_session_id(&id));

        let fallback = new_session_id("???");
        assert!(fallback.starts_with("session-"));
        assert_ne!(new_session_id("same"), new_session_id("same"));
    }

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("low-mood-1a2b3c4d"));
        assert!(!is_valid_session_id("../etc"));
        assert!(!is_valid_session_id("Upper"));
        assert!(!is_valid_session_id(""));
    }
}
