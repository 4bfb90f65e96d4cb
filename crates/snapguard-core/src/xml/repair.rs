//! Pre-parse repair of damaged hierarchy dumps.
//!
//! Each step is a pure text transform that is recorded only when it changed
//! the input. The result is not guaranteed to parse; callers re-run
//! [`XmlDocument::parse`](super::XmlDocument::parse) on it.

use std::sync::OnceLock;

use quick_xml::errors::{Error, IllFormedError};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStep {
    /// Dropped a BOM, shell noise or a partial tag around the document.
    TrimSurroundingNoise,
    EscapeBareAmpersands,
    CloseUnclosedElements,
    PrependDeclaration,
}

impl RepairStep {
    pub fn describe(self) -> &'static str {
        match self {
            Self::TrimSurroundingNoise => "removed text outside the document",
            Self::EscapeBareAmpersands => "escaped bare '&' characters",
            Self::CloseUnclosedElements => "closed unterminated elements",
            Self::PrependDeclaration => "added XML declaration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub content: String,
    pub applied: Vec<RepairStep>,
}

impl RepairOutcome {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Run every repair step in order.
pub fn repair(content: &str) -> RepairOutcome {
    let mut applied = Vec::new();
    let mut current = content.to_string();

    let steps: [(RepairStep, fn(&str) -> Option<String>); 4] = [
        (RepairStep::TrimSurroundingNoise, trim_surrounding_noise),
        (RepairStep::EscapeBareAmpersands, escape_bare_ampersands),
        (RepairStep::CloseUnclosedElements, close_unclosed_elements),
        (RepairStep::PrependDeclaration, prepend_declaration),
    ];
    for (step, transform) in steps {
        if let Some(next) = transform(&current) {
            if next != current {
                current = next;
                applied.push(step);
            }
        }
    }

    RepairOutcome {
        content: current,
        applied,
    }
}

/// Keep the span from the first `<` to the last `>`.
///
/// `uiautomator dump /dev/tty` appends a status line after the document, and
/// interrupted captures end in the middle of a tag; both are cut here.
fn trim_surrounding_noise(content: &str) -> Option<String> {
    let start = content.find('<')?;
    let end = content.rfind('>')?;
    if end < start {
        return None;
    }
    Some(content[start..=end].to_string())
}

fn ampersand_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"&(#[0-9]+;|#x[0-9a-fA-F]+;|[A-Za-z][A-Za-z0-9]*;)?")
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

fn escape_bare_ampersands(content: &str) -> Option<String> {
    if !content.contains('&') {
        return None;
    }
    let escaped = ampersand_pattern().replace_all(content, |caps: &Captures<'_>| {
        match caps.get(1) {
            Some(entity) => format!("&{}", entity.as_str()),
            None => "&amp;".to_string(),
        }
    });
    Some(escaped.into_owned())
}

/// Append end tags for elements still open at end of input.
///
/// Gives up (returns `None`) on any other well-formedness error, since
/// appending tags cannot fix those.
fn close_unclosed_elements(content: &str) -> Option<String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().check_end_names = true;
    let mut open: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                open.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                open.pop();
            }
            Ok(Event::Eof) | Err(Error::IllFormed(IllFormedError::MissingEndTag(_))) => break,
            Ok(_) => {}
            Err(_) => return None,
        }
    }

    if open.is_empty() {
        return None;
    }
    let mut repaired = content.to_string();
    for name in open.iter().rev() {
        repaired.push_str("</");
        repaired.push_str(name);
        repaired.push('>');
    }
    Some(repaired)
}

fn prepend_declaration(content: &str) -> Option<String> {
    if content.trim_start().starts_with("<?xml") {
        return None;
    }
    Some(format!("{XML_DECLARATION}\n{content}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlDocument;

    #[test]
    fn well_formed_input_only_gains_declaration() {
        let outcome = repair("<hierarchy><node/></hierarchy>");
        assert_eq!(outcome.applied, vec![RepairStep::PrependDeclaration]);
        assert!(outcome.content.starts_with(XML_DECLARATION));
    }

    #[test]
    fn declared_input_is_untouched() {
        let input = format!("{XML_DECLARATION}<hierarchy/>");
        let outcome = repair(&input);
        assert!(!outcome.changed());
        assert_eq!(outcome.content, input);
    }

    #[test]
    fn dump_status_line_is_trimmed() {
        let input = "\u{feff}<hierarchy rotation=\"0\"/>UI hierchary dumped to: /dev/tty";
        let outcome = repair(input);
        assert!(outcome.applied.contains(&RepairStep::TrimSurroundingNoise));
        assert!(outcome.content.ends_with("<hierarchy rotation=\"0\"/>"));
    }

    #[test]
    fn bare_ampersands_are_escaped_entities_kept() {
        let input = r#"<hierarchy><node text="Tom & Jerry &amp; &#38; &#x26;"/></hierarchy>"#;
        let outcome = repair(input);
        assert!(outcome.applied.contains(&RepairStep::EscapeBareAmpersands));
        let doc = XmlDocument::parse(&outcome.content).unwrap();
        assert_eq!(doc.element(1).attr("text"), Some("Tom & Jerry & & &"));
    }

    #[test]
    fn truncated_capture_is_closed() {
        let input = r#"<hierarchy><node class="a" bounds="[0,0][10,10]"><node text="b"/><node text="c"#;
        let outcome = repair(input);
        assert!(outcome.applied.contains(&RepairStep::TrimSurroundingNoise));
        assert!(outcome.applied.contains(&RepairStep::CloseUnclosedElements));
        let doc = XmlDocument::parse(&outcome.content).unwrap();
        assert_eq!(doc.len(), 3);
    }

    #[test]
    fn mismatched_tags_are_not_guessed() {
        let outcome = repair("<hierarchy><node></other></hierarchy>");
        assert!(!outcome.applied.contains(&RepairStep::CloseUnclosedElements));
        assert!(XmlDocument::parse(&outcome.content).is_err());
    }

    #[test]
    fn text_without_markup_is_left_alone() {
        let outcome = repair("no markup here");
        assert!(!outcome.applied.contains(&RepairStep::TrimSurroundingNoise));
    }
}
