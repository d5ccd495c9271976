/// Derives the per-document storage key from the document name, using Android
/// resource-name rules: lowercase ASCII alphanumerics joined by single underscores.
pub fn to_android_resource_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_separator = false;
    for ch in input.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(lower);
        } else {
            pending_separator = true;
        }
    }
    if out.is_empty() {
        return "untitled".to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
