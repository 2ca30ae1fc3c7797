//! Output filename derivation from document identifiers.
//!
//! Identifiers contain path separators and other characters that are unsafe
//! in filenames; the CLI and server both derive their default output names
//! through the same sanitizer.

/// Maps an arbitrary string to a safe single filename component.
///
/// Filesystem-reserved characters, whitespace, and control characters
/// collapse to single underscores; leading/trailing separators are trimmed.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Derives the default output filename for an identifier.
#[must_use]
pub fn default_output_name(identifier: &str) -> String {
    let slug = sanitize_component(identifier);
    if slug.is_empty() {
        "document.pdf".to_string()
    } else {
        format!("{slug}.pdf")
    }
}
