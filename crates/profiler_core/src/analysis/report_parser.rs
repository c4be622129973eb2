//! Line-scanning parser for the ten-section comprehensive report.
//!
//! The parser is a small state machine with one cursor: 0 before the first
//! section, N while inside section N. A line opens section K only if K is ahead
//! of the cursor, so the cursor never moves backwards; a heading for an earlier
//! section is kept as content of the current one.
//!
//! Keyword headings only delimit transcripts without numbering. Once a numbered
//! boundary has been seen, only numbers move the cursor.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::ReportSections;

/// Heading keywords per section, index 0 is section 1.
const SECTION_KEYWORDS: [&str; ReportSections::COUNT] = [
    r"intelligence|intellectual (?:ability|capacity)",
    r"abstract(?:ion| thinking| reasoning)?",
    r"originality|original thinking",
    r"reasoning style|style of reasoning|reasoning",
    r"ambiguity(?: handling| tolerance)?|handling (?:of )?ambiguity",
    r"metacognition|metacognitive(?: awareness)?|self-awareness",
    r"thinking type|type of thinking|thinking style|cognitive type",
    r"cognitive complexity|complexity",
    r"thinking quality|quality of thinking|overall quality",
    r"(?:cognitive )?archetype",
];

struct SectionPatterns {
    /// `Heading: body` or `**Heading**: body`.
    labelled: Regex,
    /// Like `labelled`, but tolerates a few extra words before the colon.
    /// Only applied after a section number, where the line is already a boundary.
    loose_label: Regex,
    /// The heading phrase alone on its line.
    bare: Regex,
}

fn numbered_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?\s*(?:(?:question|section)\s+)?(\d{1,2})\s*[.:)](?:\*\*)?(?:\s+(.*))?$",
        )
        .expect("numbered section pattern is valid")
    })
}

fn section_patterns() -> &'static [SectionPatterns] {
    static PATTERNS: OnceLock<Vec<SectionPatterns>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SECTION_KEYWORDS
            .iter()
            .map(|keywords| SectionPatterns {
                labelled: Regex::new(&format!(
                    r"(?i)^\s*(?:#{{1,6}}\s*)?(?:\*\*)?\s*(?:{})\s*(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.*)$",
                    keywords
                ))
                .expect("labelled heading pattern is valid"),
                loose_label: Regex::new(&format!(
                    r"(?i)^\s*(?:\*\*)?\s*(?:{})\b[^:\n]{{0,40}}?(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.*)$",
                    keywords
                ))
                .expect("loose heading pattern is valid"),
                bare: Regex::new(&format!(
                    r"(?i)^\s*(?:#{{1,6}}\s*)?(?:\*\*)?\s*(?:{})\s*(?:\*\*)?\s*$",
                    keywords
                ))
                .expect("bare heading pattern is valid"),
            })
            .collect()
    })
}

/// Strips a heading label for `section` from the start of `rest`, if present.
fn strip_label(section: usize, rest: &str) -> String {
    let patterns = &section_patterns()[section - 1];
    if let Some(caps) = patterns.loose_label.captures(rest) {
        return caps.get(1).map_or("", |m| m.as_str()).to_string();
    }
    if patterns.bare.is_match(rest) {
        return String::new();
    }
    rest.to_string()
}

/// Incremental parser. Feed it lines, then call `finish`.
#[derive(Debug, Clone)]
pub struct ReportParser {
    cursor: usize,
    /// Set by the first numbered boundary.
    numbered: bool,
    buffer: Vec<String>,
    sections: ReportSections,
}

impl Default for ReportParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportParser {
    pub fn new() -> Self {
        Self {
            cursor: 0,
            numbered: false,
            buffer: Vec::new(),
            sections: ReportSections::default(),
        }
    }

    /// Parses a whole transcript in one go.
    pub fn parse(text: &str) -> ReportSections {
        let mut parser = Self::new();
        for line in text.lines() {
            parser.feed_line(line);
        }
        parser.finish()
    }

    /// The section currently open (0 = none yet).
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns the section a line opens, whether it was numbered, and the body
    /// text following its heading.
    fn boundary(&self, line: &str) -> Option<(usize, bool, String)> {
        if let Some(caps) = numbered_pattern().captures(line) {
            let number = caps[1].parse::<usize>().ok()?;
            if number > self.cursor && number <= ReportSections::COUNT {
                let rest = caps.get(2).map_or("", |m| m.as_str());
                return Some((number, true, strip_label(number, rest)));
            }
            // A number that cannot advance the cursor is plain content.
            return None;
        }
        if self.numbered {
            return None;
        }

        for (index, patterns) in section_patterns().iter().enumerate().skip(self.cursor) {
            let section = index + 1;
            if let Some(caps) = patterns.labelled.captures(line) {
                return Some((section, false, caps.get(1).map_or("", |m| m.as_str()).to_string()));
            }
            if patterns.bare.is_match(line) {
                return Some((section, false, String::new()));
            }
        }
        None
    }

    fn commit(&mut self) {
        let body = self.buffer.join("\n");
        let body = body.trim();
        if !body.is_empty() {
            if let Some(field) = self.sections.field_mut(self.cursor) {
                *field = body.to_string();
            }
        }
        self.buffer.clear();
    }

    pub fn feed_line(&mut self, line: &str) {
        match self.boundary(line) {
            Some((section, numbered, first_line)) => {
                self.commit();
                self.cursor = section;
                self.numbered |= numbered;
                if !first_line.trim().is_empty() {
                    self.buffer.push(first_line);
                }
            }
            // Preamble before the first section is dropped.
            None if self.cursor == 0 => {}
            None => self.buffer.push(line.to_string()),
        }
    }

    /// Flushes the open section. Sections never reached keep their defaults.
    pub fn finish(mut self) -> ReportSections {
        self.commit();
        self.sections
    }
}
