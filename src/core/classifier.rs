//! SF-003: Line classification for the script DSL.
//!
//! Each script line maps to exactly one `LineKind`, tested in priority order:
//! step header, inline array, multiline array opener, function-call
//! assignment, for-each header, assignment phrase, output hint. Anything else
//! is `Blank` or `Other`. Matching is case-insensitive where the DSL reads
//! as prose.

use super::types::CallArgs;
use regex::Regex;
use std::sync::LazyLock;

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static DSL pattern compiles")
}

static STEP_HEADER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)^###\s+([a-z0-9-]+)\s*$"));

static ARRAY_INLINE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^\s*`?\$([A-Za-z_][A-Za-z0-9_]*)`?\s*=\s*\[(.+?)\]\s*$")
});

static ARRAY_OPEN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^\s*`?\$([A-Za-z_][A-Za-z0-9_]*)`?\s*=\s*\[\s*$"));

static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)^\s*`?\$([A-Za-z_][A-Za-z0-9_]*)`?\s*=\s*([a-z0-9-]+)\((.*?)\)\s*$")
});

static FOR_EACH: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)^\s*For each\s+`?\$([A-Za-z_][A-Za-z0-9_]*)`?\s+in\s+`?\$([A-Za-z_][A-Za-z0-9_]*)`?")
});

static ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)assign the agent the\s+`?([A-Za-z0-9_$-]+)`?\s+assignment"));

static OUTPUT_HINT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)record output as\s+`?#([A-Za-z0-9-]+)\.\$?([A-Za-z0-9_-]+)`?")
});

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)#([a-z0-9-]+)(?:\.([a-z0-9-]+))?"));

static BULLET: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\s*[-*]\s+"));

/// What a single script line is.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind<'a> {
    /// `### <id>`
    StepHeader { id: &'a str },
    /// `$name = [a, b, c]`
    InlineArray { name: &'a str, items: Vec<String> },
    /// `$name = [` with the items on following lines.
    ArrayOpen { name: &'a str },
    /// `$target = function(args)`
    FunctionCall {
        target: &'a str,
        function: &'a str,
        args: CallArgs,
    },
    /// `For each $iterator in $list`
    ForEach { iterator: &'a str, list: &'a str },
    /// "assign the agent the `<id>` assignment"
    Assign { id: &'a str },
    /// "record output as `#step.$name`" (documentation only)
    OutputHint { step: &'a str, name: &'a str },
    Blank,
    Other,
}

/// Classify one line.
pub fn classify(line: &str) -> LineKind<'_> {
    if let Some(c) = STEP_HEADER.captures(line) {
        return LineKind::StepHeader {
            id: capture(&c, 1, line),
        };
    }
    if let Some(c) = ARRAY_INLINE.captures(line) {
        return LineKind::InlineArray {
            name: capture(&c, 1, line),
            items: split_array_literal(capture(&c, 2, line)),
        };
    }
    if let Some(c) = ARRAY_OPEN.captures(line) {
        return LineKind::ArrayOpen {
            name: capture(&c, 1, line),
        };
    }
    if let Some(c) = FUNCTION_CALL.captures(line) {
        let raw = capture(&c, 3, line);
        return LineKind::FunctionCall {
            target: capture(&c, 1, line),
            function: capture(&c, 2, line),
            args: parse_call_args(raw),
        };
    }
    if let Some(c) = FOR_EACH.captures(line) {
        return LineKind::ForEach {
            iterator: capture(&c, 1, line),
            list: capture(&c, 2, line),
        };
    }
    if let Some(id) = match_assignment(line) {
        return LineKind::Assign { id };
    }
    if let Some(c) = OUTPUT_HINT.captures(line) {
        return LineKind::OutputHint {
            step: capture(&c, 1, line),
            name: capture(&c, 2, line),
        };
    }
    if line.trim().is_empty() {
        return LineKind::Blank;
    }
    LineKind::Other
}

/// True for step header lines (loop bodies and multiline arrays stop here).
pub fn is_step_header(line: &str) -> bool {
    STEP_HEADER.is_match(line)
}

/// True for lines starting with a bullet marker.
pub fn is_bullet(line: &str) -> bool {
    BULLET.is_match(line)
}

/// The `<id>` of an "assign the agent the `<id>` assignment" phrase.
pub fn match_assignment(line: &str) -> Option<&str> {
    ASSIGN
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| &line[m.range()])
}

/// True for "record output as `#step.$name`" bullets.
pub fn is_output_hint(line: &str) -> bool {
    OUTPUT_HINT.is_match(line)
}

/// Extract the first `#step[.action]` token from call arguments.
pub fn parse_call_args(raw: &str) -> CallArgs {
    let reference = REFERENCE.captures(raw).map(|c| {
        let step = c.get(1).map(|m| m.as_str()).unwrap_or_default();
        match c.get(2) {
            Some(action) => format!("#{}.{}", step, action.as_str()),
            None => format!("#{}", step),
        }
    });
    CallArgs {
        reference,
        raw: raw.trim().to_string(),
    }
}

/// Split `a, 'b', `c`` into items, stripping one matching wrapper pair.
pub fn split_array_literal(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(|x| strip_wrapper(x).to_string())
        .collect()
}

fn strip_wrapper(x: &str) -> &str {
    for q in ['`', '\'', '"'] {
        if x.len() >= 2 && x.starts_with(q) && x.ends_with(q) {
            return &x[1..x.len() - 1];
        }
    }
    x
}

fn capture<'a>(caps: &regex::Captures<'_>, idx: usize, line: &'a str) -> &'a str {
    caps.get(idx).map(|m| &line[m.range()]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sf003_static_patterns_compile() {
        for re in [
            &STEP_HEADER,
            &ARRAY_INLINE,
            &ARRAY_OPEN,
            &FUNCTION_CALL,
            &FOR_EACH,
            &ASSIGN,
            &OUTPUT_HINT,
            &REFERENCE,
            &BULLET,
        ] {
            assert!(!LazyLock::force(re).as_str().is_empty());
        }
    }

    #[test]
    fn test_sf003_step_header() {
        assert_eq!(classify("### gather-context"), LineKind::StepHeader { id: "gather-context" });
        assert_eq!(classify("### Step-1  "), LineKind::StepHeader { id: "Step-1" });
        assert_eq!(classify("### two words"), LineKind::Other);
        assert!(is_step_header("###   abc"));
        assert!(!is_step_header("## abc"));
    }

    #[test]
    fn test_sf003_inline_array() {
        match classify("$items = [a, 'b', \"c\", `d`]") {
            LineKind::InlineArray { name, items } => {
                assert_eq!(name, "items");
                assert_eq!(items, vec!["a", "b", "c", "d"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sf003_backticked_variable_name() {
        match classify("`$assignments` = [x,y]") {
            LineKind::InlineArray { name, items } => {
                assert_eq!(name, "assignments");
                assert_eq!(items, vec!["x", "y"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sf003_array_open() {
        assert_eq!(classify("$list = [   "), LineKind::ArrayOpen { name: "list" });
    }

    #[test]
    fn test_sf003_function_call() {
        match classify("$issues = get-sub-issues(#plan.create-app-plan)") {
            LineKind::FunctionCall { target, function, args } => {
                assert_eq!(target, "issues");
                assert_eq!(function, "get-sub-issues");
                assert_eq!(args.reference.as_deref(), Some("#plan.create-app-plan"));
                assert_eq!(args.raw, "#plan.create-app-plan");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sf003_function_call_without_reference() {
        match classify("$x = now()") {
            LineKind::FunctionCall { args, .. } => {
                assert_eq!(args.reference, None);
                assert!(args.raw.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sf003_single_segment_reference() {
        let args = parse_call_args("#setup");
        assert_eq!(args.reference.as_deref(), Some("#setup"));
    }

    #[test]
    fn test_sf003_for_each() {
        assert_eq!(
            classify("For each `$assignment` in `$assignments`:"),
            LineKind::ForEach { iterator: "assignment", list: "assignments" }
        );
        assert_eq!(
            classify("  for EACH $i in $list"),
            LineKind::ForEach { iterator: "i", list: "list" }
        );
    }

    #[test]
    fn test_sf003_assign_phrase() {
        assert_eq!(
            classify("- Assign the agent the `create-app-plan` assignment"),
            LineKind::Assign { id: "create-app-plan" }
        );
        assert_eq!(
            classify("- assign the agent the $assignment assignment."),
            LineKind::Assign { id: "$assignment" }
        );
        assert_eq!(match_assignment("nothing here"), None);
    }

    #[test]
    fn test_sf003_output_hint() {
        let line = "- record output as `#create.$assignment`";
        assert_eq!(
            classify(line),
            LineKind::OutputHint { step: "create", name: "assignment" }
        );
        assert!(is_output_hint(line));
    }

    #[test]
    fn test_sf003_blank_and_other() {
        assert_eq!(classify("   "), LineKind::Blank);
        assert_eq!(classify(""), LineKind::Blank);
        assert_eq!(classify("Some prose."), LineKind::Other);
    }

    #[test]
    fn test_sf003_priority_inline_array_over_function() {
        // `[` form wins even though it also has a `=`.
        assert!(matches!(classify("$a = [f(x)]"), LineKind::InlineArray { .. }));
    }

    #[test]
    fn test_sf003_bullets() {
        assert!(is_bullet("- item"));
        assert!(is_bullet("   * item"));
        assert!(!is_bullet("-item"));
        assert!(!is_bullet("text"));
    }

    #[test]
    fn test_sf003_split_array_literal() {
        assert_eq!(split_array_literal(" a ,, b ,"), vec!["a", "b"]);
        assert_eq!(split_array_literal("'x'"), vec!["x"]);
        assert_eq!(split_array_literal("'"), vec!["'"]);
        assert_eq!(split_array_literal("'mixed\""), vec!["'mixed\""]);
        assert!(split_array_literal("").is_empty());
    }
}
