//! Heuristic extraction of a named Python function from free-form model output.
//!
//! Precedence, in order:
//! 1. The first fenced code block (```` ``` ````) becomes the candidate text;
//!    without a fence the whole response is the candidate.
//! 2. If the candidate defines the target function, the function block and the
//!    top-level imports that precede it are kept. Trailing prose, examples and
//!    other statements are dropped.
//! 3. If the candidate contains no `def` at all, it is treated as a function body
//!    and wrapped in a stub with the expected signature.
//!
//! Anything else (e.g. only unrelated functions) is not extractable. Whether the
//! result is syntactically valid is decided by the caller.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)```").unwrap());
static ANY_DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*def[ \t]+\w+[ \t]*\(").unwrap());

/// How the code was obtained from the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// The response itself defined the function.
    Direct,
    /// The function was found inside a fenced code block.
    CodeBlock,
    /// The response was wrapped as the body of a stub.
    Wrapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub code: String,
    pub method: ExtractionMethod,
}

/// Extract `function` from `response`, falling back to wrapping the text in
/// `stub_signature` (e.g. `def f(s: str) -> str:`).
pub fn extract_function(
    response: &str,
    function: &str,
    stub_signature: &str,
) -> Option<Extraction> {
    let (candidate, method) = match first_fenced_block(response) {
        Some(block) => (block, ExtractionMethod::CodeBlock),
        None => (response, ExtractionMethod::Direct),
    };
    let candidate = strip_blank_edges(candidate);
    if candidate.is_empty() {
        return None;
    }

    if let Some(code) = isolate_function(candidate, function) {
        return Some(Extraction { code, method });
    }
    if ANY_DEF_RE.is_match(candidate) {
        return None;
    }
    Some(Extraction {
        code: wrap_in_stub(candidate, stub_signature),
        method: ExtractionMethod::Wrapped,
    })
}

/// Contents of the first fenced code block, if any.
pub fn first_fenced_block(text: &str) -> Option<&str> {
    FENCED_BLOCK_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn isolate_function(candidate: &str, function: &str) -> Option<String> {
    let lines: Vec<&str> = candidate.lines().collect();
    let def_index = lines
        .iter()
        .position(|line| defines(line.trim_start(), function))?;
    let indent = indentation(lines[def_index]);

    let mut kept: Vec<&str> = lines[..def_index]
        .iter()
        .copied()
        .filter(|line| indentation(line) == indent && is_import(line.trim_start()))
        .collect();
    if !kept.is_empty() {
        kept.push("");
    }

    kept.push(lines[def_index]);
    let mut in_header = !lines[def_index].trim_end().ends_with(':');
    for line in &lines[def_index + 1..] {
        let trimmed = line.trim_start();
        let continues = in_header
            || trimmed.is_empty()
            || trimmed.starts_with('#')
            || indentation(line) > indent;
        if !continues {
            break;
        }
        if in_header && line.trim_end().ends_with(':') {
            in_header = false;
        }
        kept.push(line);
    }
    while kept.last().is_some_and(|line| line.trim().is_empty()) {
        kept.pop();
    }

    let mut code = kept
        .iter()
        .map(|line| &line[indentation(line).min(indent)..])
        .collect::<Vec<_>>()
        .join("\n");
    code.push('\n');
    Some(code)
}

fn wrap_in_stub(body: &str, stub_signature: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let common = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| indentation(line))
        .min()
        .unwrap_or(0);

    let mut code = String::from(stub_signature);
    code.push('\n');
    for line in lines {
        if line.trim().is_empty() {
            code.push('\n');
        } else {
            code.push_str("    ");
            code.push_str(line[common..].trim_end());
            code.push('\n');
        }
    }
    code
}

fn defines(trimmed: &str, function: &str) -> bool {
    trimmed
        .strip_prefix("def ")
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix(function))
        .is_some_and(|rest| rest.trim_start().starts_with('('))
}

fn is_import(trimmed: &str) -> bool {
    trimmed.starts_with("import ") || (trimmed.starts_with("from ") && trimmed.contains(" import "))
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// Drop leading blank lines and trailing whitespace, keeping the first line's indentation.
fn strip_blank_edges(text: &str) -> &str {
    let Some(first) = text.find(|ch: char| !ch.is_whitespace()) else {
        return "";
    };
    let line_start = text[..first].rfind('\n').map_or(0, |index| index + 1);
    text[line_start..].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNATURE: &str = "def normalize_phone(s: str) -> str:";

    fn extract(response: &str) -> Option<Extraction> {
        extract_function(response, "normalize_phone", SIGNATURE)
    }

    #[test]
    fn single_fenced_block_is_extracted() {
        let response = "Here you go:\n```python\ndef normalize_phone(s):\n    return s\n```\nHope it helps!";
        let extraction = extract(response).expect("extracted");
        assert_eq!(extraction.method, ExtractionMethod::CodeBlock);
        assert_eq!(extraction.code, "def normalize_phone(s):\n    return s\n");
    }

    #[test]
    fn direct_definition_drops_trailing_statements() {
        let response = "def normalize_phone(s):\n    # keep digits\n    return s\n\nprint(normalize_phone('1'))\n";
        let extraction = extract(response).expect("extracted");
        assert_eq!(extraction.method, ExtractionMethod::Direct);
        assert_eq!(
            extraction.code,
            "def normalize_phone(s):\n    # keep digits\n    return s\n"
        );
    }

    #[test]
    fn leading_imports_are_kept() {
        let response = "import re\n\ndef normalize_phone(s):\n    return re.sub(r'\\D', '', s)\n";
        let extraction = extract(response).expect("extracted");
        assert_eq!(
            extraction.code,
            "import re\n\ndef normalize_phone(s):\n    return re.sub(r'\\D', '', s)\n"
        );
    }

    #[test]
    fn multi_line_signature_is_kept_whole() {
        let response = "def normalize_phone(\n    s: str,\n) -> str:\n    return s\n";
        let extraction = extract(response).expect("extracted");
        assert_eq!(extraction.code, response);
    }

    #[test]
    fn bare_body_is_wrapped_in_stub() {
        let response = "    digits = ''.join(c for c in s if c.isdigit())\n    return digits\n";
        let extraction = extract(response).expect("extracted");
        assert_eq!(extraction.method, ExtractionMethod::Wrapped);
        assert_eq!(
            extraction.code,
            "def normalize_phone(s: str) -> str:\n    digits = ''.join(c for c in s if c.isdigit())\n    return digits\n"
        );
    }

    #[test]
    fn unrelated_function_is_not_extractable() {
        assert_eq!(extract("def helper(x):\n    return x\n"), None);
    }

    #[test]
    fn empty_response_is_not_extractable() {
        assert_eq!(extract("   \n\n"), None);
        assert_eq!(extract("```python\n\n```"), None);
    }
}
