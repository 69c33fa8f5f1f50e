//! Broadcast topics
//!
//! Topics form a closed set declared once when the hub is configured:
//! `dpy_mod_log`, `releases`, ... Each name must match `[a-z0-9_-]+`.
//!
//! Requests naming a topic outside the set are filtered, never created.

use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Moderation log events relayed from member applications
pub const DPY_MOD_LOG: &str = "dpy_mod_log";

fn is_valid_topic_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("topic name cannot be empty")]
    Empty,

    #[error("invalid topic '{0}': must match [a-z0-9_-]+")]
    InvalidName(String),

    #[error("topic '{0}' declared more than once")]
    Duplicate(String),

    #[error("at least one topic must be configured")]
    NoTopics,
}

/// A validated topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn parse(name: &str) -> Result<Self, TopicError> {
        if name.is_empty() {
            return Err(TopicError::Empty);
        }

        if !name.chars().all(is_valid_topic_char) {
            return Err(TopicError::InvalidName(name.to_string()));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed enumeration of topics known to a hub, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    topics: Vec<Topic>,
}

impl TopicSet {
    /// Build the set from configured names. Rejects empty sets and duplicates.
    pub fn new<I, S>(names: I) -> Result<Self, TopicError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut topics: Vec<Topic> = Vec::new();

        for name in names {
            let topic = Topic::parse(name.as_ref().trim())?;
            if topics.contains(&topic) {
                return Err(TopicError::Duplicate(topic.0));
            }
            topics.push(topic);
        }

        if topics.is_empty() {
            return Err(TopicError::NoTopics);
        }

        Ok(Self { topics })
    }

    /// Look up a configured topic by name
    pub fn get(&self, name: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.as_str() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Keep only the requested names that are configured topics.
    ///
    /// Unknown names are dropped and repeats collapse; the result keeps the
    /// order of first appearance in `requested`.
    pub fn filter<'a, I>(&self, requested: I) -> Vec<Topic>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut accepted: Vec<Topic> = Vec::new();

        for name in requested {
            if let Some(topic) = self.get(name) {
                if !accepted.contains(topic) {
                    accepted.push(topic.clone());
                }
            }
        }

        accepted
    }

    /// Parse a comma-separated header value such as `"dpy_mod_log, releases"`
    pub fn filter_header(&self, header: &str) -> Vec<Topic> {
        let names: Vec<String> = header
            .split(',')
            .map(|part| part.chars().filter(|c| !c.is_whitespace()).collect())
            .collect();

        self.filter(names.iter().map(String::as_str))
    }
}

impl Default for TopicSet {
    fn default() -> Self {
        Self {
            topics: vec![Topic(DPY_MOD_LOG.to_string())],
        }
    }
}

impl FromStr for TopicSet {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.split(',').filter(|part| !part.trim().is_empty()))
    }
}
