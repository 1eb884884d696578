//! Spam filtering
//!
//! One compiled rule set serves both directions. Built-in heuristics come
//! first (cross-post ceiling, spam phrases, excessive capitals, suspicious
//! URLs, suspicious headers), then the user-supplied per-header patterns
//! from configuration. First matching rule wins and short-circuits; the
//! verdict carries the rule name for logging. A malformed user pattern is
//! skipped with a warning at compile time, never fatal to startup.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::SpamSection;

/// Filter decision: not an error, a routing outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Message proceeds to translation
    Allowed,
    /// Message is dropped; the rule name identifies why
    Blocked {
        /// Name of the rule that fired
        rule: String,
    },
}

impl Verdict {
    /// True when the message was blocked
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked { .. })
    }
}

/// Direction-neutral view of the message under evaluation
///
/// Both pipelines adapt their native shapes into this: a packet message
/// contributes its names and single area, an article its full header map.
#[derive(Debug)]
pub struct FilterInput<'a> {
    /// Author display (From header or FidoNet from-name)
    pub from: &'a str,
    /// Subject line
    pub subject: &'a str,
    /// All destination areas/newsgroups the message targets
    pub groups: &'a [String],
    /// Remaining headers, keyed by lowercased name
    pub headers: &'a BTreeMap<String, String>,
}

struct HeaderRule {
    header: String,
    regex: Regex,
    name: String,
}

/// Compiled filter
pub struct SpamFilter {
    enabled: bool,
    max_crosspost: usize,
    user_rules: Vec<HeaderRule>,
}

static SPAM_PHRASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(viagra|cialis|make money fast|work from home|100% free|casino bonus|lottery winner|nigerian prince|cheap meds|penis enlargement)\b",
    )
    .expect("built-in phrase pattern")
});

static SUSPICIOUS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)https?://(bit\.ly|tinyurl\.com|goo\.gl|t\.co|is\.gd)/|https?://\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}[/:]",
    )
    .expect("built-in URL pattern")
});

/// Headers whose mere value marks a message (upstream filters, bulk senders)
const SUSPICIOUS_HEADERS: &[(&str, &str)] = &[
    ("x-spam-flag", "yes"),
    ("x-spam-status", "yes"),
    ("precedence", "bulk"),
    ("precedence", "junk"),
];

impl SpamFilter {
    /// Compile the rule set once at startup
    pub fn compile(config: &SpamSection) -> Self {
        let mut user_rules = Vec::new();
        for rule in &config.patterns {
            // PCRE-style inline (?i) from ported filter files is redundant
            // with our case-insensitive compile; strip it rather than reject
            let cleaned = rule.pattern.replace("(?i)", "");
            match Regex::new(&format!("(?i){}", cleaned)) {
                Ok(regex) => user_rules.push(HeaderRule {
                    header: rule.header.to_ascii_lowercase(),
                    name: format!("{} pattern '{}'", rule.header, rule.pattern),
                    regex,
                }),
                Err(e) => {
                    warn!("skipping invalid {} pattern '{}': {}", rule.header, rule.pattern, e)
                }
            }
        }
        debug!(
            "spam filter compiled: {} user rules, enabled={}",
            user_rules.len(),
            config.enabled
        );
        Self {
            enabled: config.enabled,
            max_crosspost: config.max_crosspost,
            user_rules,
        }
    }

    /// Evaluate a message; first matching rule wins
    pub fn evaluate(&self, input: &FilterInput<'_>, body: &str) -> Verdict {
        if !self.enabled {
            return Verdict::Allowed;
        }

        // Cross-post ceiling blocks regardless of content
        if self.max_crosspost > 0 && input.groups.len() > self.max_crosspost {
            return Verdict::Blocked {
                rule: format!(
                    "cross-post ceiling ({} groups > {})",
                    input.groups.len(),
                    self.max_crosspost
                ),
            };
        }

        if SPAM_PHRASES.is_match(input.subject) || SPAM_PHRASES.is_match(body) {
            return Verdict::Blocked {
                rule: "spam phrase".to_string(),
            };
        }

        if excessive_capitals(input.subject) {
            return Verdict::Blocked {
                rule: "excessive capitals in subject".to_string(),
            };
        }

        if SUSPICIOUS_URL.is_match(body) {
            return Verdict::Blocked {
                rule: "suspicious URL".to_string(),
            };
        }

        for (header, marker) in SUSPICIOUS_HEADERS {
            if let Some(value) = input.headers.get(*header)
                && value.to_ascii_lowercase().contains(marker)
            {
                return Verdict::Blocked {
                    rule: format!("suspicious header {}: {}", header, value),
                };
            }
        }

        for rule in &self.user_rules {
            let matched = match rule.header.as_str() {
                "subject" => rule.regex.is_match(input.subject),
                "from" => rule.regex.is_match(input.from),
                "newsgroups" => input.groups.iter().any(|g| rule.regex.is_match(g)),
                other => input
                    .headers
                    .get(other)
                    .is_some_and(|value| rule.regex.is_match(value)),
            };
            if matched {
                return Verdict::Blocked {
                    rule: rule.name.clone(),
                };
            }
        }

        Verdict::Allowed
    }
}

/// Shouting heuristic: mostly-uppercase subjects with enough letters to mean it
fn excessive_capitals(subject: &str) -> bool {
    let letters: Vec<char> = subject.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 12 {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper * 10 >= letters.len() * 8
}
