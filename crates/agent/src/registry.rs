use std::collections::{BTreeMap, HashMap};

use alcoguard_core::domain::message::{AgentId, EventType};

/// `event_type -> subscribers`, each list in subscription order without duplicates.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionRegistry {
    by_type: HashMap<EventType, Vec<AgentId>>,
}

impl SubscriptionRegistry {
    pub fn subscribe<I>(&mut self, agent_id: &AgentId, event_types: I)
    where
        I: IntoIterator<Item = EventType>,
    {
        for event_type in event_types {
            let subscribers = self.by_type.entry(event_type).or_default();
            if !subscribers.contains(agent_id) {
                subscribers.push(agent_id.clone());
            }
        }
    }

    pub fn unregister(&mut self, agent_id: &AgentId) {
        self.by_type.retain(|_, subscribers| {
            subscribers.retain(|subscriber| subscriber != agent_id);
            !subscribers.is_empty()
        });
    }

    pub fn subscribers(&self, event_type: &EventType) -> &[AgentId] {
        self.by_type.get(event_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Event types each agent listens to, in stable order.
    pub fn subscriptions_of(&self, agent_id: &AgentId) -> Vec<EventType> {
        let mut types: Vec<EventType> = self
            .by_type
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(agent_id))
            .map(|(event_type, _)| event_type.clone())
            .collect();
        types.sort();
        types
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.by_type
            .iter()
            .map(|(event_type, subscribers)| {
                (
                    event_type.to_string(),
                    subscribers.iter().map(ToString::to_string).collect(),
                )
            })
            .collect()
    }
}
