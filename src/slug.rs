use std::sync::OnceLock;

use regex::Regex;

static DISALLOWED: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RUN: OnceLock<Regex> = OnceLock::new();

fn disallowed() -> &'static Regex {
    DISALLOWED.get_or_init(|| Regex::new(r"[^a-zA-Z0-9\s-]").expect("static slug pattern"))
}

fn whitespace_run() -> &'static Regex {
    WHITESPACE_RUN.get_or_init(|| Regex::new(r"\s+").expect("static slug pattern"))
}

/// Derives a lowercase, hyphen-separated token from a display name.
///
/// Characters other than ASCII letters, digits, whitespace and `-` are stripped,
/// whitespace runs collapse to a single hyphen. Returns `None` for an absent or
/// empty name, and for a name with nothing left after stripping.
pub fn slugify(name: Option<&str>) -> Option<String> {
    let name = name.filter(|n| !n.is_empty())?;
    let stripped = disallowed().replace_all(name, "");
    let hyphenated = whitespace_run().replace_all(&stripped, "-");
    let slug = hyphenated.to_lowercase();
    if slug.is_empty() { None } else { Some(slug) }
}
