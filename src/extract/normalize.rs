//! Text normalization and section-header heuristics
//!
//! Collapses whitespace, strips control characters and typographic
//! ligatures, and detects section headers. Detected headers are hints for
//! the LLM prompt only, never authoritative structure.

/// Normalized text plus detected section headers.
#[derive(Debug, Clone)]
pub struct NormalizedText {
    pub text: String,
    pub sections: Vec<String>,
}

const KNOWN_SECTIONS: &[&str] = &[
    "EXPERIENCE",
    "WORK EXPERIENCE",
    "WORK HISTORY",
    "EMPLOYMENT",
    "EDUCATION",
    "SKILLS",
    "TECHNICAL SKILLS",
    "PROJECTS",
    "CERTIFICATIONS",
    "LANGUAGES",
    "SUMMARY",
    "PROFILE",
    "OBJECTIVE",
    "PUBLICATIONS",
    "AWARDS",
];

pub fn normalize(raw: &str) -> NormalizedText {
    let mut lines: Vec<String> = Vec::new();
    let mut sections = Vec::new();
    let mut blank_run = 0;

    for line in raw.lines() {
        let cleaned = clean_line(line);
        if cleaned.is_empty() {
            blank_run += 1;
            // At most one blank line in a row
            if blank_run == 1 && !lines.is_empty() {
                lines.push(String::new());
            }
            continue;
        }
        blank_run = 0;

        if let Some(header) = detect_section_header(&cleaned) {
            if !sections.contains(&header) {
                sections.push(header);
            }
        }
        lines.push(cleaned);
    }

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    NormalizedText {
        text: lines.join("\n"),
        sections,
    }
}

/// Collapse runs of spaces/tabs, drop control characters, expand ligatures.
fn clean_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last_was_space = true;

    for ch in line.chars() {
        let expanded: &str = match ch {
            'ﬁ' => "fi",
            'ﬂ' => "fl",
            'ﬀ' => "ff",
            'ﬃ' => "ffi",
            'ﬄ' => "ffl",
            '\u{00a0}' | '\t' => " ",
            c if c.is_control() => "",
            _ => {
                if ch == ' ' {
                    if !last_was_space {
                        out.push(' ');
                    }
                    last_was_space = true;
                } else {
                    out.push(ch);
                    last_was_space = false;
                }
                continue;
            }
        };
        for c in expanded.chars() {
            last_was_space = c == ' ';
            if !(last_was_space && out.ends_with(' ')) {
                out.push(c);
            }
        }
    }

    out.trim().to_string()
}

/// A header is a short line that either matches a known section name or is
/// all-caps with at most four words.
fn detect_section_header(line: &str) -> Option<String> {
    let stripped = line.trim_end_matches(':').trim();
    if stripped.is_empty() || stripped.len() > 40 {
        return None;
    }

    let upper = stripped.to_uppercase();
    if KNOWN_SECTIONS.contains(&upper.as_str()) {
        return Some(upper);
    }

    let letters: Vec<char> = stripped.chars().filter(|c| c.is_alphabetic()).collect();
    let word_count = stripped.split_whitespace().count();
    if !letters.is_empty()
        && word_count <= 4
        && letters.iter().all(|c| c.is_uppercase())
        && letters.len() >= 4
    {
        return Some(upper);
    }

    None
}
