//! Keyword relevance for free-form chat text.

/// Case-insensitive substring match against any keyword. Keywords are expected
/// to be lowercased already (the persona loader does this).
pub fn is_relevant(text: &str, keywords: &[String]) -> bool {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .filter(|keyword| !keyword.is_empty())
        .any(|keyword| haystack.contains(keyword.as_str()))
}

/// Full addressing decision for one message: explicit mentions and the
/// operator override short-circuit the keyword check.
pub fn classify(text: &str, keywords: &[String], operator_override: bool, is_mention: bool) -> bool {
    operator_override || is_mention || is_relevant(text, keywords)
}
