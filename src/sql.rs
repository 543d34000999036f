//! SQL utilities for PostgreSQL identifier handling.

/// Quote a PostgreSQL identifier unconditionally.
///
/// Always wraps the identifier in double quotes and escapes any embedded
/// double quotes by doubling them. This is the safest approach as it:
/// - Avoids incomplete reserved word lists
/// - Handles all special characters
/// - Preserves case sensitivity
/// - Works with any valid PostgreSQL identifier
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Split a possibly schema-qualified relation name into (schema, table).
///
/// Missing schema defaults to `public`. Surrounding double quotes on either
/// part are stripped so callers get bare identifiers back.
pub fn split_relation(rel: &str) -> (String, String) {
    let rel = rel.trim();
    match rel.split_once('.') {
        Some((schema, table)) => (strip_quotes(schema), strip_quotes(table)),
        None => ("public".to_string(), strip_quotes(rel)),
    }
}

/// Schema-qualified, quoted form: `"schema"."table"`.
pub fn qualify(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Sanitize a string for use inside an index name.
///
/// Dots, quotes, and anything else outside `[A-Za-z0-9_]` become
/// underscores; empty input falls back to `obj`.
pub fn safe_name(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "obj".to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_quotes(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}
