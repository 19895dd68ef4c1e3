// CJK-aware text input.
// CJK text is sent in one bulk call so the platform IME path handles it;
// everything else is typed one character at a time with the requested interval.

/// Returns true if the text contains CJK (Chinese/Japanese/Korean) characters.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        ('\u{4e00}'..='\u{9fff}').contains(&c)
            || ('\u{3400}'..='\u{4dbf}').contains(&c)
            || ('\u{3040}'..='\u{309f}').contains(&c)
            || ('\u{30a0}'..='\u{30ff}').contains(&c)
            || ('\u{ac00}'..='\u{d7af}').contains(&c)
            || ('\u{3000}'..='\u{303f}').contains(&c)
            || ('\u{ff00}'..='\u{ffef}').contains(&c)
    })
}

/// How a piece of text should be typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingMode {
    Bulk,
    PerChar,
}

pub fn typing_mode(text: &str, interval: std::time::Duration) -> TypingMode {
    if interval.is_zero() || contains_cjk(text) {
        TypingMode::Bulk
    } else {
        TypingMode::PerChar
    }
}

/// Shortened form used in result messages.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}
