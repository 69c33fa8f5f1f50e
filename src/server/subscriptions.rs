//! Topic to subscriber index over a closed topic set

use crate::topics::{Topic, TopicSet};
use std::collections::{HashMap, HashSet};

/// Outcome of a subscribe or unsubscribe request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionChange {
    /// Topics actually added or removed by this request
    pub changed: Vec<Topic>,
    /// Everything the principal is subscribed to afterwards
    pub subscribed: Vec<Topic>,
}

#[derive(Debug)]
pub struct SubscriptionIndex {
    topics: TopicSet,
    subscribers: HashMap<Topic, HashSet<i64>>,
}

impl SubscriptionIndex {
    pub fn new(topics: TopicSet) -> Self {
        let subscribers = topics
            .iter()
            .map(|topic| (topic.clone(), HashSet::new()))
            .collect();

        Self {
            topics,
            subscribers,
        }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Add `id` to every requested topic that is configured.
    ///
    /// `changed` lists the accepted topics in request order, including ones
    /// the id already held.
    pub fn subscribe<'a, I>(&mut self, id: i64, requested: I) -> SubscriptionChange
    where
        I: IntoIterator<Item = &'a str>,
    {
        let accepted = self.topics.filter(requested);

        for topic in &accepted {
            if let Some(set) = self.subscribers.get_mut(topic) {
                set.insert(id);
            }
        }

        SubscriptionChange {
            changed: accepted,
            subscribed: self.subscriptions_of(id),
        }
    }

    /// Remove `id` from every requested topic that is configured. Topics the
    /// id never held are ignored.
    pub fn unsubscribe<'a, I>(&mut self, id: i64, requested: I) -> SubscriptionChange
    where
        I: IntoIterator<Item = &'a str>,
    {
        let accepted = self.topics.filter(requested);

        for topic in &accepted {
            if let Some(set) = self.subscribers.get_mut(topic) {
                set.remove(&id);
            }
        }

        SubscriptionChange {
            changed: accepted,
            subscribed: self.subscriptions_of(id),
        }
    }

    /// Drop `id` from every topic
    pub fn remove_everywhere(&mut self, id: i64) {
        for set in self.subscribers.values_mut() {
            set.remove(&id);
        }
    }

    /// Topics `id` is subscribed to, in configured order
    pub fn subscriptions_of(&self, id: i64) -> Vec<Topic> {
        self.topics
            .iter()
            .filter(|topic| self.is_subscribed(id, topic.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_subscribed(&self, id: i64, topic: &str) -> bool {
        self.subscribers
            .get(topic)
            .is_some_and(|set| set.contains(&id))
    }

    /// Copy of a topic's subscriber ids, `None` for unconfigured topics
    pub fn subscribers(&self, topic: &str) -> Option<Vec<i64>> {
        self.subscribers
            .get(topic)
            .map(|set| set.iter().copied().collect())
    }
}
