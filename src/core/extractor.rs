//! SF-002: Script section extraction.
//!
//! Finds `## <heading>` and returns the lines strictly between it and the
//! next top-level `## ` heading (or end of document). `###` step headers do
//! not end the section.

/// Default designated section heading.
pub const DEFAULT_SECTION: &str = "Script";

/// Lines of the designated section and their position in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSection<'a> {
    pub lines: Vec<&'a str>,

    /// Zero-based document index of `lines[0]`. Absolute 1-based line
    /// numbers are `offset + local_index + 1`.
    pub offset: usize,
}

impl ScriptSection<'_> {
    /// An empty section means "no script section" and is fatal to callers.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Absolute 1-based line number for a local index.
    pub fn line_number(&self, local: usize) -> usize {
        self.offset + local + 1
    }
}

/// Extract the section titled `heading` (case-insensitive).
pub fn extract_section<'a>(content: &'a str, heading: &str) -> ScriptSection<'a> {
    let lines: Vec<&str> = content.lines().collect();

    let start = match lines.iter().position(|l| is_section_heading(l, heading)) {
        Some(idx) => idx + 1,
        None => {
            return ScriptSection {
                lines: Vec::new(),
                offset: 0,
            }
        }
    };

    let end = lines[start..]
        .iter()
        .position(|l| is_top_level_heading(l))
        .map(|rel| start + rel)
        .unwrap_or(lines.len());

    ScriptSection {
        lines: lines[start..end].to_vec(),
        offset: start,
    }
}

/// `## <heading>` with optional trailing whitespace.
fn is_section_heading(line: &str, heading: &str) -> bool {
    let Some(rest) = line.strip_prefix("##") else {
        return false;
    };
    if !rest.starts_with(char::is_whitespace) {
        return false;
    }
    rest.trim().eq_ignore_ascii_case(heading)
}

/// `## ` followed by anything other than another `#`.
fn is_top_level_heading(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("##") else {
        return false;
    };
    let trimmed = rest.trim_start();
    trimmed.len() < rest.len() && !trimmed.is_empty() && !trimmed.starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DOC: &str = "# Workflow\n\nIntro text.\n\n## Script\n\n### s1\n- do it\n\n## Notes\nafter\n";

    #[test]
    fn test_sf002_extract_between_headings() {
        let section = extract_section(DOC, DEFAULT_SECTION);
        assert_eq!(section.offset, 5);
        assert_eq!(section.lines, vec!["", "### s1", "- do it", ""]);
        assert_eq!(section.line_number(1), 7);
    }

    #[test]
    fn test_sf002_extract_to_eof() {
        let doc = "## Script\n### a\n### b";
        let section = extract_section(doc, DEFAULT_SECTION);
        assert_eq!(section.offset, 1);
        assert_eq!(section.lines, vec!["### a", "### b"]);
    }

    #[test]
    fn test_sf002_missing_heading_is_empty() {
        let section = extract_section("# Title\n## Other\ntext", DEFAULT_SECTION);
        assert!(section.is_empty());
        assert_eq!(section.offset, 0);
    }

    #[test]
    fn test_sf002_heading_case_insensitive_with_trailing_space() {
        let section = extract_section("## script   \n### x\n", DEFAULT_SECTION);
        assert_eq!(section.lines, vec!["### x"]);
    }

    #[test]
    fn test_sf002_heading_requires_exact_name() {
        assert!(extract_section("## Scripts\n### x\n", DEFAULT_SECTION).is_empty());
        assert!(extract_section("##Script\n### x\n", DEFAULT_SECTION).is_empty());
        assert!(extract_section("### Script\n### x\n", DEFAULT_SECTION).is_empty());
    }

    #[test]
    fn test_sf002_custom_heading() {
        let section = extract_section("## Plan\n### a\n## Script\n### b\n", "plan");
        assert_eq!(section.lines, vec!["### a"]);
    }

    #[test]
    fn test_sf002_crlf_lines() {
        let section = extract_section("## Script\r\n### a\r\n## End\r\n", DEFAULT_SECTION);
        assert_eq!(section.lines, vec!["### a"]);
    }

    #[test]
    fn test_sf002_top_level_heading_detection() {
        assert!(is_top_level_heading("## Notes"));
        assert!(!is_top_level_heading("### step"));
        assert!(!is_top_level_heading("##"));
        assert!(!is_top_level_heading("##Notes"));
        assert!(!is_top_level_heading("# Title"));
    }

    proptest! {
        #[test]
        fn prop_sf002_section_never_contains_top_level_heading(
            body in proptest::collection::vec("[a-z #-]{0,12}", 0..20)
        ) {
            let doc = format!("## Script\n{}", body.join("\n"));
            let section = extract_section(&doc, DEFAULT_SECTION);
            prop_assert_eq!(section.offset, 1);
            for line in &section.lines {
                prop_assert!(!is_top_level_heading(line));
            }
        }
    }
}
