//! Content-inspection predicates used for request-mode dispatch.
//!
//! These are best-effort text heuristics, kept as named functions so the
//! patterns can be swapped or tested on their own.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IMAGE_VERBS: Regex =
        Regex::new(r"(?i)create|generate|draw|show me|design|make|visualize").unwrap();
    static ref IMAGE_NOUNS: Regex =
        Regex::new(r"(?i)image|picture|logo|graph|chart|diagram|illustration").unwrap();
    static ref REFUSAL_PHRASES: Regex =
        Regex::new(r"(?i)don't know|not sure|no information|no data|unable to find|I do not have")
            .unwrap();
    static ref CITATION_MARKER: Regex =
        Regex::new(r"【\d+:\d+†[^】]*】|\[\d+:\d+†[^\]]*\]").unwrap();
}

/// True when the message asks for an image: an action verb and an image
/// noun must both be present.
pub fn wants_image(text: &str) -> bool {
    IMAGE_VERBS.is_match(text) && IMAGE_NOUNS.is_match(text)
}

/// Refusal/uncertainty detector behind the retrieval-mode usefulness
/// flag. Matching text is considered a non-answer.
pub fn is_refusal(text: &str) -> bool {
    REFUSAL_PHRASES.is_match(text)
}

/// Detects `N:N†source`-style citation tokens, in ASCII or full-width
/// brackets, left behind by retrieval runs that actually used a source.
pub fn has_citation(text: &str) -> bool {
    CITATION_MARKER.is_match(text)
}

const ATTACHED_PREFIX: &str = "Attached file (";
const ATTACHED_BODY_SEP: &str = "):\n\n";
const ATTACHED_QUERY_SEP: &str = "\n\nUser query: ";

/// A user message carrying an inlined document, as produced by the
/// client when a file is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub name: String,
    pub body: String,
    pub query: String,
}

impl AttachedFile {
    /// Parses the exact `Attached file (<name>):\n\n<body>\n\nUser query:
    /// <query>` contract. Returns None for anything that does not match
    /// it byte for byte.
    pub fn parse(content: &str) -> Option<Self> {
        let rest = content.strip_prefix(ATTACHED_PREFIX)?;
        let name_end = rest.find(ATTACHED_BODY_SEP)?;
        let name = &rest[..name_end];
        let rest = &rest[name_end + ATTACHED_BODY_SEP.len()..];
        // The body may itself contain the separator text; the query is
        // whatever follows the last occurrence.
        let query_start = rest.rfind(ATTACHED_QUERY_SEP)?;
        let body = &rest[..query_start];
        let query = &rest[query_start + ATTACHED_QUERY_SEP.len()..];
        Some(Self {
            name: name.to_string(),
            body: body.to_string(),
            query: query.to_string(),
        })
    }

    /// Inverse of `parse`, used by the client when attaching a file.
    pub fn render(name: &str, body: &str, query: &str) -> String {
        format!(
            "{}{}{}{}{}{}",
            ATTACHED_PREFIX, name, ATTACHED_BODY_SEP, body, ATTACHED_QUERY_SEP, query
        )
    }
}

/// Splits `text` into fixed-size character slices for synthetic delta
/// emission. Slicing is by character so multibyte text never lands on a
/// broken boundary. A zero size would never make progress, so it is
/// treated as one.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|c| c.iter().collect::<String>())
        .collect()
}
