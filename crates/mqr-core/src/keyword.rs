//! Keyword triggers.
//!
//! A hook may declare keywords under four strategies. [`match_keyword`]
//! evaluates them in a fixed precedence, **equals → starts-with → ends-with →
//! contains**, comparing case-insensitively, and returns the first keyword of
//! the first strategy that matches. Keywords are kept in sorted sets so the
//! same message always yields the same keyword.

use std::collections::BTreeSet;
use std::fmt;

/// One of the four keyword matching strategies, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchStrategy {
    /// The whole message equals the keyword.
    Equals,
    /// The message starts with the keyword.
    StartsWith,
    /// The message ends with the keyword.
    EndsWith,
    /// The keyword occurs anywhere in the message.
    Contains,
}

impl MatchStrategy {
    /// All strategies, in evaluation order.
    pub const PRECEDENCE: [MatchStrategy; 4] = [
        MatchStrategy::Equals,
        MatchStrategy::StartsWith,
        MatchStrategy::EndsWith,
        MatchStrategy::Contains,
    ];

    /// Tests an already lower-cased message against a lower-cased keyword.
    fn test(self, message: &str, keyword: &str) -> bool {
        match self {
            Self::Equals => message == keyword,
            Self::StartsWith => message.starts_with(keyword),
            Self::EndsWith => message.ends_with(keyword),
            Self::Contains => message.contains(keyword),
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equals => "equals",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Contains => "contains",
        })
    }
}

/// The keyword sets of a hook, partitioned by strategy.
///
/// Empty keywords are dropped on insertion: an empty string would match every
/// message under three of the four strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSets {
    equals: BTreeSet<String>,
    starts: BTreeSet<String>,
    ends: BTreeSet<String>,
    contains: BTreeSet<String>,
}

impl KeywordSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a keyword under `strategy`. Returns `false` if it was empty or
    /// already present.
    pub fn insert(&mut self, strategy: MatchStrategy, keyword: impl Into<String>) -> bool {
        let keyword = keyword.into();
        if keyword.is_empty() {
            return false;
        }
        self.set_mut(strategy).insert(keyword)
    }

    /// Keywords declared under `strategy`, in sorted order.
    pub fn get(&self, strategy: MatchStrategy) -> &BTreeSet<String> {
        match strategy {
            MatchStrategy::Equals => &self.equals,
            MatchStrategy::StartsWith => &self.starts,
            MatchStrategy::EndsWith => &self.ends,
            MatchStrategy::Contains => &self.contains,
        }
    }

    fn set_mut(&mut self, strategy: MatchStrategy) -> &mut BTreeSet<String> {
        match strategy {
            MatchStrategy::Equals => &mut self.equals,
            MatchStrategy::StartsWith => &mut self.starts,
            MatchStrategy::EndsWith => &mut self.ends,
            MatchStrategy::Contains => &mut self.contains,
        }
    }

    /// `true` when no strategy has any keyword.
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
            && self.starts.is_empty()
            && self.ends.is_empty()
            && self.contains.is_empty()
    }

    /// Total number of keywords across strategies.
    pub fn len(&self) -> usize {
        self.equals.len() + self.starts.len() + self.ends.len() + self.contains.len()
    }
}

/// A successful keyword match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordMatch<'a> {
    /// The keyword as it was declared (original casing).
    pub keyword: &'a str,
    /// The strategy that matched.
    pub strategy: MatchStrategy,
}

/// Finds the keyword that triggers on `message`, if any.
pub fn match_keyword<'a>(message: &str, sets: &'a KeywordSets) -> Option<KeywordMatch<'a>> {
    if sets.is_empty() {
        return None;
    }
    let message = message.to_lowercase();

    MatchStrategy::PRECEDENCE.into_iter().find_map(|strategy| {
        sets.get(strategy)
            .iter()
            .find(|keyword| strategy.test(&message, &keyword.to_lowercase()))
            .map(|keyword| KeywordMatch {
                keyword: keyword.as_str(),
                strategy,
            })
    })
}
