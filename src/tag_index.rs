//! Tag-based discovery: a reverse index from tag id to every definition
//! carrying it, bucketed by kind, with lazily-cached typed sub-arrays.
//!
//! Backed by a `DashMap` so `TagIndex::insert` never needs `&mut self` —
//! matches the concurrent-map shape `manager.rs`'s `Manager` uses for pool
//! registration.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::definition::{DefId, DefKind};

/// One tag's bucket of member ids, grouped by definition kind.
#[derive(Default)]
struct Bucket {
    by_kind: HashMap<DefKind, Vec<DefId>>,
}

/// Reverse index from tag id to the definitions that carry it.
///
/// Grounded on the registration-time bookkeeping `manager.rs`'s
/// `ResourceManager` does for pool membership, generalized from a single
/// kind (pools) to the nine definition kinds and keyed by arbitrary tag id
/// rather than a fixed pool name.
#[derive(Default)]
pub struct TagIndex {
    buckets: DashMap<DefId, Bucket>,
}

impl TagIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `def_id` (of kind `kind`) carries `tag_id`.
    pub fn insert(&self, tag_id: &str, kind: DefKind, def_id: impl Into<String>) {
        let mut bucket = self.buckets.entry(tag_id.to_string()).or_default();
        bucket.by_kind.entry(kind).or_default().push(def_id.into());
    }

    /// Every id of kind `kind` carrying `tag_id`, in insertion order.
    #[must_use]
    pub fn ids_of_kind(&self, tag_id: &str, kind: DefKind) -> Vec<DefId> {
        self.buckets
            .get(tag_id)
            .and_then(|b| b.by_kind.get(&kind).cloned())
            .unwrap_or_default()
    }

    /// Whether any definition carries `tag_id`.
    #[must_use]
    pub fn contains(&self, tag_id: &str) -> bool {
        self.buckets.contains_key(tag_id)
    }

    /// Build a stable accessor over every id caught by `tag_id`, frozen at
    /// call time.
    #[must_use]
    pub fn accessor(self: &Arc<Self>, tag_id: impl Into<String>) -> TagAccessor {
        TagAccessor {
            index: Arc::clone(self),
            tag_id: tag_id.into(),
            cache: Arc::new(TagAccessorCache::default()),
        }
    }
}

#[derive(Default)]
struct TagAccessorCache {
    tasks: OnceLock<Vec<DefId>>,
    resources: OnceLock<Vec<DefId>>,
    events: OnceLock<Vec<DefId>>,
    hooks: OnceLock<Vec<DefId>>,
    task_middlewares: OnceLock<Vec<DefId>>,
    resource_middlewares: OnceLock<Vec<DefId>>,
    error_helpers: OnceLock<Vec<DefId>>,
}

/// A stable, lazily-cached view over every definition carrying one tag.
///
/// Per-kind sub-arrays are computed once on first access and cached for the
/// accessor's lifetime, so repeated reads return the identical `Vec`
/// contents even if the underlying index gains more members later — callers
/// that need a fresh view must request a new accessor from the
/// [`TagIndex`].
#[derive(Clone)]
pub struct TagAccessor {
    index: Arc<TagIndex>,
    tag_id: String,
    cache: Arc<TagAccessorCache>,
}

macro_rules! cached_kind_accessor {
    ($name:ident, $field:ident, $kind:expr) => {
        /// Ids of this kind carrying the accessor's tag, cached after first read.
        #[must_use]
        pub fn $name(&self) -> &[DefId] {
            self.cache
                .$field
                .get_or_init(|| self.index.ids_of_kind(&self.tag_id, $kind))
        }
    };
}

impl TagAccessor {
    /// The tag id this accessor was built for.
    #[must_use]
    pub fn tag_id(&self) -> &str {
        &self.tag_id
    }

    cached_kind_accessor!(tasks, tasks, DefKind::Task);
    cached_kind_accessor!(resources, resources, DefKind::Resource);
    cached_kind_accessor!(events, events, DefKind::Event);
    cached_kind_accessor!(hooks, hooks, DefKind::Hook);
    cached_kind_accessor!(task_middlewares, task_middlewares, DefKind::TaskMiddleware);
    cached_kind_accessor!(
        resource_middlewares,
        resource_middlewares,
        DefKind::ResourceMiddleware
    );
    cached_kind_accessor!(error_helpers, error_helpers, DefKind::ErrorHelper);
}
