//! Text-level repair heuristics for corrupted JSON payloads.
//!
//! Corruption in a local key/value store is assumed to be syntactic: truncated writes, stray
//! commas, a byte-order mark, hand-edited keys. Each [`RepairStrategy`] turns the raw text into
//! zero or more candidate strings; the caller keeps the first candidate that deserializes.
//!
//! Strategies run in a fixed order, cheapest first:
//!
//! 1. [`RepairStrategy::NormalizeSyntax`]: strip a BOM, drop trailing commas before `}`/`]`
//!    and at end of input; failing that, also quote bare identifier keys.
//! 2. [`RepairStrategy::ExtractFragment`]: take the widest `{...}` region, then the widest
//!    `[...]` region, each as-is and normalized.
//! 3. [`RepairStrategy::RewrapArray`]: when a collection is expected and the text is object-shaped,
//!    wrap it in `[...]`.
//!
//! A repaired value is syntactically valid, not verified correct: a truncated array can come back
//! shorter than it was written.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

const BOM: char = '\u{feff}';

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern"));

static BARE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_$][A-Za-z0-9_$]*)(\s*:)").expect("bare key pattern")
});

static DANGLING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*$").expect("dangling comma pattern"));

/// One repair heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairStrategy {
    NormalizeSyntax,
    ExtractFragment,
    RewrapArray,
}

impl RepairStrategy {
    /// The order strategies are tried in.
    pub const ORDER: [RepairStrategy; 3] =
        [RepairStrategy::NormalizeSyntax, RepairStrategy::ExtractFragment, RepairStrategy::RewrapArray];

    pub fn name(&self) -> &'static str {
        match self {
            RepairStrategy::NormalizeSyntax => "normalize_syntax",
            RepairStrategy::ExtractFragment => "extract_fragment",
            RepairStrategy::RewrapArray => "rewrap_array",
        }
    }

    /// Candidate texts produced from `raw`, in the order they should be tried.
    pub fn candidates(&self, raw: &str, expects_collection: bool) -> Vec<String> {
        match self {
            RepairStrategy::NormalizeSyntax => {
                let mut out = Vec::new();
                push_distinct(&mut out, strip_commas(raw));
                push_distinct(&mut out, normalize_syntax(raw));
                out
            }
            RepairStrategy::ExtractFragment => {
                let mut out = Vec::new();
                for fragment in [widest_region(raw, '{', '}'), widest_region(raw, '[', ']')]
                    .into_iter()
                    .flatten()
                {
                    push_distinct(&mut out, fragment.to_string());
                    push_distinct(&mut out, strip_commas(fragment));
                    push_distinct(&mut out, normalize_syntax(fragment));
                }
                out
            }
            RepairStrategy::RewrapArray => {
                if !expects_collection {
                    return Vec::new();
                }
                let body = normalize_syntax(raw);
                let body = body.trim();
                if body.starts_with('{') {
                    vec![format!("[{}]", body)]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

/// Deserialize `raw` as `T` using the first `budget` strategies, in order.
///
/// Returns the value and the strategy that produced it. Does not try `raw` itself.
pub fn repair_as<T>(
    raw: &str,
    expects_collection: bool,
    budget: usize,
) -> Option<(T, RepairStrategy)>
where
    T: DeserializeOwned,
{
    RepairStrategy::ORDER.iter().take(budget).find_map(|strategy| {
        strategy
            .candidates(raw, expects_collection)
            .into_iter()
            .find_map(|candidate| serde_json::from_str::<T>(&candidate).ok())
            .map(|value| (value, *strategy))
    })
}

/// Apply the cheap syntactic fixes in one pass.
pub fn normalize_syntax(raw: &str) -> String {
    let text = strip_commas(raw);
    let text = BARE_KEY.replace_all(&text, r#"${1}"${2}"${3}"#);
    text.into_owned()
}

/// BOM and comma fixes only. Leaves string contents alone.
fn strip_commas(raw: &str) -> String {
    let text = raw.trim_start_matches(BOM);
    let text = TRAILING_COMMA.replace_all(text, "$1");
    let text = DANGLING_COMMA.replace(&text, "");
    text.into_owned()
}

fn push_distinct(out: &mut Vec<String>, candidate: String) {
    if !out.contains(&candidate) {
        out.push(candidate);
    }
}

/// Greedy `open ... close` region: first `open` through last `close`.
fn widest_region(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}
