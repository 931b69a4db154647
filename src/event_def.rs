//! The `Event` definition kind: a named, typed pub/sub channel.

use std::sync::Arc;

use crate::definition::{DefId, Schema, Tag};

/// A declared event. Carries no behavior of its own — listeners are
/// attached separately via [`crate::event_manager::EventManager`].
pub struct EventDef {
    /// The event's unique id.
    pub id: DefId,
    /// Optional schema the emitted payload must satisfy.
    pub payload_schema: Option<Arc<dyn Schema>>,
    /// Tags attached to this event.
    pub tags: Vec<Arc<Tag>>,
    /// Whether same-order listeners run concurrently (§4.5).
    pub parallel: bool,
}

impl EventDef {
    /// Declare a sequential event with no payload schema.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload_schema: None,
            tags: Vec::new(),
            parallel: false,
        }
    }

    /// Mark this event as parallel (equal-order listeners run concurrently).
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Attach a payload schema.
    #[must_use]
    pub fn with_payload_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.payload_schema = Some(schema);
        self
    }

    /// Attach a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: Arc<Tag>) -> Self {
        self.tags.push(tag);
        self
    }
}

impl std::fmt::Debug for EventDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDef")
            .field("id", &self.id)
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_event_is_sequential() {
        let e = EventDef::new("user.created");
        assert!(!e.parallel);
    }

    #[test]
    fn parallel_builder_sets_flag() {
        let e = EventDef::new("user.created").parallel();
        assert!(e.parallel);
    }
}
