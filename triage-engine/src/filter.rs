//! Pure view derivation: which cached mentions the current selection shows.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use triage_core::{bare_subreddit_name, Mention, Sentiment};

use crate::cache::MemberSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum SubredditFilter {
    #[default]
    All,
    /// Bare name; a leading `r/` is stripped on construction.
    Only(String),
}

impl SubredditFilter {
    pub fn only(name: &str) -> Self {
        SubredditFilter::Only(bare_subreddit_name(name).to_string())
    }

    /// `all` (any case) selects everything.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("all") {
            SubredditFilter::All
        } else {
            SubredditFilter::only(value)
        }
    }

    pub fn matches(&self, mention: &Mention) -> bool {
        match self {
            SubredditFilter::All => true,
            // server sends `r/<name>`
            SubredditFilter::Only(name) => match mention.subreddit.get(..2) {
                Some(prefix) if prefix.eq_ignore_ascii_case("r/") => {
                    mention.subreddit[2..].eq_ignore_ascii_case(name)
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for SubredditFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubredditFilter::All => f.write_str("all"),
            SubredditFilter::Only(name) => write!(f, "r/{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentFilter {
    #[default]
    All,
    Positive,
    Negative,
    Neutral,
}

impl SentimentFilter {
    pub fn matches(&self, sentiment: Sentiment) -> bool {
        match self {
            SentimentFilter::All => true,
            SentimentFilter::Positive => sentiment == Sentiment::Positive,
            SentimentFilter::Negative => sentiment == Sentiment::Negative,
            SentimentFilter::Neutral => sentiment == Sentiment::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageToggle {
    Unprocessed,
    Flagged,
    Ignored,
    Engaged,
    Opportunity,
}

/// `unprocessed` is exclusive with every other toggle; the others combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageToggles {
    unprocessed: bool,
    flagged: bool,
    ignored: bool,
    engaged: bool,
    opportunity: bool,
}

impl Default for TriageToggles {
    fn default() -> Self {
        Self {
            unprocessed: true,
            flagged: false,
            ignored: false,
            engaged: false,
            opportunity: false,
        }
    }
}

impl TriageToggles {
    pub fn none() -> Self {
        Self {
            unprocessed: false,
            ..Self::default()
        }
    }

    pub fn is_on(&self, toggle: TriageToggle) -> bool {
        match toggle {
            TriageToggle::Unprocessed => self.unprocessed,
            TriageToggle::Flagged => self.flagged,
            TriageToggle::Ignored => self.ignored,
            TriageToggle::Engaged => self.engaged,
            TriageToggle::Opportunity => self.opportunity,
        }
    }

    pub fn set(&mut self, toggle: TriageToggle, on: bool) {
        if on {
            if toggle == TriageToggle::Unprocessed {
                *self = Self::none();
            } else {
                self.unprocessed = false;
            }
        }
        match toggle {
            TriageToggle::Unprocessed => self.unprocessed = on,
            TriageToggle::Flagged => self.flagged = on,
            TriageToggle::Ignored => self.ignored = on,
            TriageToggle::Engaged => self.engaged = on,
            TriageToggle::Opportunity => self.opportunity = on,
        }
    }

    pub fn with(mut self, toggle: TriageToggle, on: bool) -> Self {
        self.set(toggle, on);
        self
    }

    pub fn any_active(&self) -> bool {
        self.unprocessed || self.flagged || self.ignored || self.engaged || self.opportunity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    pub subreddit: SubredditFilter,
    pub sentiment: SentimentFilter,
    pub toggles: TriageToggles,
}

/// Per-mention triage state as shown next to each row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageFlags {
    pub flagged: bool,
    pub ignored: bool,
    pub engaged: bool,
    pub opportunity: bool,
}

impl TriageFlags {
    pub fn is_unprocessed(&self) -> bool {
        !(self.flagged || self.ignored || self.engaged)
    }
}

/// Borrowed lookup tables over the three triage sets.
#[derive(Debug, Clone, Default)]
pub struct TriageSets<'a> {
    flagged: HashSet<&'a str>,
    ignored: HashSet<&'a str>,
    engaged: HashSet<&'a str>,
}

impl<'a> TriageSets<'a> {
    pub fn new(flagged: &'a MemberSet, ignored: &'a MemberSet, engaged: &'a MemberSet) -> Self {
        Self {
            flagged: flagged.lookup(),
            ignored: ignored.lookup(),
            engaged: engaged.lookup(),
        }
    }

    pub fn flags(&self, mention: &Mention) -> TriageFlags {
        let id = mention.id.as_str();
        TriageFlags {
            flagged: self.flagged.contains(id),
            ignored: self.ignored.contains(id),
            engaged: self.engaged.contains(id),
            opportunity: mention.is_opportunity(),
        }
    }
}

fn triage_matches(toggles: &TriageToggles, flags: TriageFlags) -> bool {
    if toggles.ignored {
        return flags.ignored;
    }
    if toggles.unprocessed {
        return flags.is_unprocessed();
    }
    (toggles.flagged && flags.flagged)
        || (toggles.engaged && flags.engaged)
        || (toggles.opportunity && flags.opportunity)
}

/// Mentions passing `selection`, in input order. Only the union of the
/// flagged, engaged and opportunity toggles collapses repeated ids; the
/// ignored and unprocessed views pass the input through as is.
pub fn apply_filters<'m>(
    mentions: &'m [Mention],
    selection: &FilterSelection,
    sets: &TriageSets<'_>,
) -> Vec<&'m Mention> {
    let toggles = &selection.toggles;
    if !toggles.any_active() {
        return Vec::new();
    }

    let matching = mentions
        .iter()
        .filter(|mention| selection.subreddit.matches(mention))
        .filter(|mention| selection.sentiment.matches(mention.sentiment))
        .filter(|mention| triage_matches(toggles, sets.flags(mention)));

    if toggles.ignored || toggles.unprocessed {
        return matching.collect();
    }
    let mut seen = HashSet::new();
    matching
        .filter(|mention| seen.insert(mention.id.as_str()))
        .collect()
}
