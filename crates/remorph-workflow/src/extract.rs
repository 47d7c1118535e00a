//! Code extraction from free-form model replies.
//!
//! Replies are expected to wrap code in an explicit marker pair. Models do
//! not always comply, so a line-scan fallback recovers code-looking blocks
//! from prose, and a repair pass restores the original function name when
//! the model renamed it.

use regex::Regex;

/// Opening marker the prompts instruct the model to emit.
pub const OPEN_MARKER: &str = "<REFACTORED_CODE>";
/// Closing marker paired with [`OPEN_MARKER`].
pub const CLOSE_MARKER: &str = "</REFACTORED_CODE>";

/// Case-insensitive substrings that flag a line as prose. Matching lines are
/// never part of a code block and close any block in progress.
const NARRATIVE_MARKERS: [&str; 14] = [
    "here",
    "thinking",
    "explanation",
    "let me",
    "i will",
    "first",
    "then",
    "next",
    "finally",
    "now",
    "we",
    "this code",
    "the code",
    "solution",
];

/// Unindented prefixes that open a new code block in the fallback scan.
const BLOCK_OPENERS: [&str; 4] = ["def ", "class ", "import ", "from "];

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Pull code out of a model reply.
///
/// Text between the first marker pair is authoritative and returned verbatim
/// apart from trimming. Without a complete pair, a heuristic line scan
/// collects code-looking blocks and returns the LAST one, since replies that
/// show several revisions put the refined one at the end. Returns an empty
/// string when nothing in the reply looks like code.
pub fn extract_code(response: &str) -> String {
    if let Some(marked) = between_markers(response) {
        return marked.trim().to_string();
    }
    scan_code_blocks(response)
}

fn between_markers(response: &str) -> Option<&str> {
    let start = response.find(OPEN_MARKER)? + OPEN_MARKER.len();
    let end = response[start..].find(CLOSE_MARKER)? + start;
    Some(&response[start..end])
}

/// The fallback scan. Works line by line after stripping markdown fences:
/// blank lines are skipped, narrative lines close the current block, an
/// unindented `def` / `class` / `import` / `from` opens one, and any other
/// unindented line that is not a decorator or comment closes one. When the
/// strict scan finds nothing, a lenient pass keeps every non-narrative line.
fn scan_code_blocks(response: &str) -> String {
    let cleaned = response.replace("```python", "").replace("```", "");
    let lines: Vec<&str> = cleaned.trim().lines().collect();

    let mut blocks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_code = false;

    for line in &lines {
        if line.trim().is_empty() {
            continue;
        }
        if is_narrative(line) {
            if in_code && !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
            in_code = false;
            continue;
        }
        if opens_block(line) {
            if in_code && !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
            in_code = true;
        }
        if in_code && !line.starts_with(char::is_whitespace) && !continues_block(line) {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
            in_code = false;
            continue;
        }
        if in_code {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }

    if blocks.is_empty() {
        let lenient: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| !l.trim().is_empty() && !is_narrative(l))
            .collect();
        if !lenient.is_empty() {
            blocks.push(lenient.join("\n"));
        }
    }

    blocks.pop().unwrap_or_default()
}

fn is_narrative(line: &str) -> bool {
    let lower = line.to_lowercase();
    NARRATIVE_MARKERS.iter().any(|m| lower.contains(m))
}

fn opens_block(line: &str) -> bool {
    BLOCK_OPENERS.iter().any(|t| line.starts_with(t))
}

/// Unindented lines a block survives: further openers, decorators, comments.
fn continues_block(line: &str) -> bool {
    opens_block(line) || line.starts_with('@') || line.starts_with('#')
}

// ---------------------------------------------------------------------------
// Signature repair
// ---------------------------------------------------------------------------

/// Outcome of [`restore_signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureFix {
    /// The original name is already defined in the extracted text.
    Intact,
    /// The first defined function was renamed back to the original name.
    Renamed { from: String },
    /// The text defines no function at all; it was left unmodified.
    NoDefinition,
}

/// Name of the first function defined in `code`, if any.
pub fn function_name(code: &str) -> Option<String> {
    let re = Regex::new(r"def\s+(\w+)\s*\(").unwrap();
    re.captures(code).map(|caps| caps[1].to_string())
}

/// Ensure `code` still defines a function named `original_name`.
///
/// Models occasionally rename the function they were told to keep. When no
/// definition of the original name survives, every definition site of the
/// first function found is renamed back. Call sites are left alone, which
/// mirrors how loose the model contract is: a renamed recursive call will
/// surface as a test failure and go through the repair loop.
pub fn restore_signature(code: &mut String, original_name: &str) -> SignatureFix {
    let original_def = Regex::new(&format!(r"def\s+{}\s*\(", regex::escape(original_name)))
        .expect("escaped name is a valid pattern");
    if original_def.is_match(code) {
        return SignatureFix::Intact;
    }
    match function_name(code) {
        Some(found) => {
            *code = code.replace(
                &format!("def {found}("),
                &format!("def {original_name}("),
            );
            SignatureFix::Renamed { from: found }
        }
        None => SignatureFix::NoDefinition,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
