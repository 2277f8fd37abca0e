//! Failure signatures: a stable key for "the same failure, seen again".
//!
//! Volatile fragments of an error (ids, numbers, quoted literals, hosts and
//! query strings) are masked before hashing so that two occurrences of the
//! same underlying bug map to the same key, across runs and restarts.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use super::test_spec::FailureEvidence;

const KEY_PREFIX: &str = "sig_";
const KEY_HEX_LEN: usize = 32;
const DESCRIPTION_MAX_CHARS: usize = 160;

/// Normalized identity of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSignature {
    /// Deterministic pattern key used by the knowledge base.
    pub key: String,
    pub error_class: String,
    /// Normalized location of the failure (selector and page path).
    pub context: String,
    /// Human readable summary.
    pub description: String,
}

impl FailureSignature {
    pub fn from_evidence(evidence: &FailureEvidence) -> Self {
        let patterns = Patterns::get();

        let error_class = match evidence.error_class.trim() {
            "" => "UnknownError".to_string(),
            class => class.to_string(),
        };
        let message = patterns.normalize(&evidence.message);

        let mut context_parts = Vec::new();
        if let Some(selector) = evidence.selector.as_deref().filter(|s| !s.trim().is_empty()) {
            context_parts.push(format!("selector={}", patterns.normalize_selector(selector)));
        }
        if let Some(url) = evidence.url.as_deref().filter(|s| !s.trim().is_empty()) {
            context_parts.push(format!("path={}", patterns.url_path(url)));
        }
        let context = context_parts.join(";");

        let key = signature_key(&error_class.to_lowercase(), &message, &context);
        let description = truncate_chars(&format!("{error_class}: {message}"), DESCRIPTION_MAX_CHARS);

        Self {
            key,
            error_class,
            context,
            description,
        }
    }
}

fn signature_key(error_class: &str, message: &str, context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(error_class.as_bytes());
    hasher.update(b"\n");
    hasher.update(message.as_bytes());
    hasher.update(b"\n");
    hasher.update(context.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{KEY_PREFIX}{}", &digest[..KEY_HEX_LEN])
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

struct Patterns {
    url: Regex,
    uuid: Regex,
    hex: Regex,
    quoted: Regex,
    number: Regex,
    whitespace: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

impl Patterns {
    fn get() -> &'static Self {
        PATTERNS.get_or_init(|| Self {
            url: Regex::new(r"[a-z][a-z0-9+.-]*://[^/\s?#]+(/[^\s?#]*)?(\?[^\s#]*)?(#\S*)?")
                .expect("url pattern"),
            uuid: Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
                .expect("uuid pattern"),
            hex: Regex::new(r"\b(0x[0-9a-f]+|[0-9a-f]*[0-9][0-9a-f]*[a-f][0-9a-f]*|[0-9a-f]*[a-f][0-9a-f]*[0-9][0-9a-f]*)\b")
                .expect("hex pattern"),
            quoted: Regex::new(r#""[^"]*"|'[^']*'|`[^`]*`"#).expect("quoted pattern"),
            number: Regex::new(r"\d+(\.\d+)?").expect("number pattern"),
            whitespace: Regex::new(r"\s+").expect("whitespace pattern"),
        })
    }

    /// Normalize an error message.
    fn normalize(&self, raw: &str) -> String {
        let lowered = raw.to_lowercase();
        let s = self
            .url
            .replace_all(&lowered, |caps: &regex::Captures<'_>| {
                caps.get(1).map_or("/", |m| m.as_str()).to_string()
            });
        let s = self.uuid.replace_all(&s, "<id>");
        let s = self.quoted.replace_all(&s, "<str>");
        let s = self.mask_hex(&s);
        let s = self.number.replace_all(&s, "<n>");
        self.whitespace.replace_all(s.trim(), " ").into_owned()
    }

    /// Selectors keep their quoted parts; only ids and counters are masked.
    fn normalize_selector(&self, raw: &str) -> String {
        let lowered = raw.trim().to_lowercase();
        let s = self.uuid.replace_all(&lowered, "<id>");
        let s = self.number.replace_all(&s, "<n>");
        self.whitespace.replace_all(&s, " ").into_owned()
    }

    fn url_path(&self, raw: &str) -> String {
        let lowered = raw.trim().to_lowercase();
        let path = self.url.captures(&lowered).map_or_else(
            || lowered.split(['?', '#']).next().unwrap_or_default().to_string(),
            |caps| caps.get(1).map_or("/", |m| m.as_str()).to_string(),
        );
        let path = self.uuid.replace_all(&path, "<id>");
        self.number.replace_all(&path, "<n>").into_owned()
    }

    /// Mask hex runs of six or more characters that mix digits and letters.
    fn mask_hex(&self, s: &str) -> String {
        self.hex
            .replace_all(s, |caps: &regex::Captures<'_>| {
                let m = &caps[0];
                if m.starts_with("0x") || m.len() >= 6 {
                    "<hex>".to_string()
                } else {
                    m.to_string()
                }
            })
            .into_owned()
    }
}
