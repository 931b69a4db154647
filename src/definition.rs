//! Common pieces of the tagged-union definition model (task / resource /
//! event / hook / middleware / tag / error helper / async context).

use std::sync::Arc;

use crate::error::{Error, Result};

/// Id type used for every definition kind. A plain `String` alias, matching
/// the string-keyed identity scheme the dependency graph and tag index both
/// use.
pub type DefId = String;

/// Discriminator for the nine definition kinds of the registered tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefKind {
    /// An invocable task.
    Task,
    /// A long-lived singleton resource.
    Resource,
    /// A typed pub/sub event.
    Event,
    /// An event listener with its own dependency closure.
    Hook,
    /// Middleware wrapping task execution.
    TaskMiddleware,
    /// Middleware wrapping resource init/dispose.
    ResourceMiddleware,
    /// A cross-cutting discovery/contract tag.
    Tag,
    /// A typed, matchable error helper.
    ErrorHelper,
    /// A scoped async-context channel.
    AsyncContext,
}

impl std::fmt::Display for DefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Resource => "resource",
            Self::Event => "event",
            Self::Hook => "hook",
            Self::TaskMiddleware => "task_middleware",
            Self::ResourceMiddleware => "resource_middleware",
            Self::Tag => "tag",
            Self::ErrorHelper => "error_helper",
            Self::AsyncContext => "async_context",
        };
        f.write_str(s)
    }
}

/// Structural validator attached to a tag, task input/result, or resource
/// config. Kept as a trait object so callers may plug in any schema
/// implementation (hand-written, `jsonschema`-backed, or generated).
pub trait Schema: Send + Sync + std::fmt::Debug {
    /// Validate `value`, returning a human-readable reason on failure.
    fn validate(&self, value: &serde_json::Value) -> std::result::Result<(), String>;
}

/// Drop tag references whose id is empty, warning about each (§4.2
/// "Normalization"). Every other shape is already enforced at compile time
/// by `Tag`'s constructor, so an empty id is the only normalization this
/// runtime can actually observe.
#[must_use]
pub fn normalize_tags(tags: Vec<Arc<Tag>>) -> Vec<Arc<Tag>> {
    tags.into_iter()
        .filter(|tag| {
            let keep = !tag.id.is_empty();
            if !keep {
                #[cfg(feature = "tracing")]
                tracing::warn!("dropping tag with empty id during tag normalization");
            }
            keep
        })
        .collect()
}

/// Structural contracts a tag imposes on any resource that carries it
/// (invariant I7): the config passed to `.with(config)` must satisfy
/// `input`, and the value `init` produces must satisfy `output`. A resource
/// carrying several contract-bearing tags must satisfy all of them — the
/// "intersection of all contracts" SPEC_FULL §3 describes.
#[derive(Clone, Default)]
pub struct TagContracts {
    /// Schema the resource's `.with(config)` value must satisfy.
    pub input: Option<Arc<dyn Schema>>,
    /// Schema the resource's `init`-produced value must satisfy.
    pub output: Option<Arc<dyn Schema>>,
}

/// A cross-cutting tag. Tags back the Tag Index (discovery) and may carry a
/// config schema plus per-attachment config (set via `.with(config)` at
/// registration time in the distilled model; represented here as the
/// `config` field already resolved), plus the I7 input/output contracts.
#[derive(Clone)]
pub struct Tag {
    /// The tag's unique id.
    pub id: DefId,
    /// Optional schema the tag's `config` must satisfy.
    pub config_schema: Option<Arc<dyn Schema>>,
    /// Config value attached at the call site that referenced this tag.
    pub config: Option<serde_json::Value>,
    /// Structural contracts this tag imposes on a carrying resource (I7).
    pub contracts: TagContracts,
}

impl Tag {
    /// Create a bare tag with no config and no contracts.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config_schema: None,
            config: None,
            contracts: TagContracts::default(),
        }
    }

    /// Attach a config value, validating it against `config_schema` if set.
    pub fn with_config(mut self, config: serde_json::Value) -> Result<Self> {
        if let Some(schema) = &self.config_schema
            && let Err(reason) = schema.validate(&config)
        {
            return Err(Error::Validation {
                violations: vec![crate::error::FieldViolation::new(
                    self.id.clone(),
                    reason,
                    config.to_string(),
                )],
            });
        }
        self.config = Some(config);
        Ok(self)
    }

    /// Require a carrying resource's `.with(config)` value to satisfy `schema`.
    #[must_use]
    pub fn with_input_contract(mut self, schema: Arc<dyn Schema>) -> Self {
        self.contracts.input = Some(schema);
        self
    }

    /// Require a carrying resource's `init`-produced value to satisfy `schema`.
    #[must_use]
    pub fn with_output_contract(mut self, schema: Arc<dyn Schema>) -> Self {
        self.contracts.output = Some(schema);
        self
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tag")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A reference to another definition, as named in a dependency map.
#[derive(Debug, Clone)]
pub enum DependencyRef {
    /// Depends on a task by id.
    Task(DefId),
    /// Depends on a resource by id.
    Resource(DefId),
    /// Depends on an event by id.
    Event(DefId),
    /// Depends on every definition carrying the given tag ("startup tag").
    Tag(DefId),
    /// Depends on an error helper by id.
    ErrorHelper(DefId),
    /// Depends on an async context by id.
    AsyncContext(DefId),
}

impl DependencyRef {
    /// The id this reference points at, regardless of kind.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Task(id)
            | Self::Resource(id)
            | Self::Event(id)
            | Self::Tag(id)
            | Self::ErrorHelper(id)
            | Self::AsyncContext(id) => id,
        }
    }
}

/// One entry of a definition's dependency map: the local binding name it is
/// injected under, the reference it resolves to, and whether it is optional.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    /// The key under which this dependency is exposed on the resolved
    /// dependency view (`deps.get("db")`, for instance).
    pub name: String,
    /// What this dependency points at.
    pub reference: DependencyRef,
    /// Whether boot may proceed if this dependency cannot be resolved.
    pub optional: bool,
}

impl DependencySpec {
    /// Declare a required dependency.
    pub fn required(name: impl Into<String>, reference: DependencyRef) -> Self {
        Self {
            name: name.into(),
            reference,
            optional: false,
        }
    }

    /// Declare an optional dependency.
    pub fn optional(name: impl Into<String>, reference: DependencyRef) -> Self {
        Self {
            name: name.into(),
            reference,
            optional: true,
        }
    }
}

/// A definition's dependency map, as declared at construction time (before
/// resolution). An empty map means no dependencies.
pub type DependencyMap = Vec<DependencySpec>;

/// An error helper: a stable id, a display format, optional remediation, and
/// an `is`-style matcher used by task/hook `throws` declarations.
#[derive(Clone)]
pub struct ErrorHelperDef {
    /// The helper's unique id.
    pub id: DefId,
    /// Human-readable message format (already rendered per-instance; callers
    /// construct the final string via [`ErrorHelperDef::format`]).
    pub format: Arc<dyn Fn(&serde_json::Value) -> String + Send + Sync>,
    /// Optional operator-facing remediation text.
    pub remediation: Option<String>,
    /// Optional schema the helper's data payload must satisfy.
    pub data_schema: Option<Arc<dyn Schema>>,
    /// Tags attached to this error helper.
    pub tags: Vec<Arc<Tag>>,
}

impl ErrorHelperDef {
    /// Declare an error helper with no remediation, schema, or tags.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        format: impl Fn(&serde_json::Value) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            format: Arc::new(format),
            remediation: None,
            data_schema: None,
            tags: Vec::new(),
        }
    }

    /// Attach a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: Arc<Tag>) -> Self {
        self.tags.push(tag);
        self
    }

    /// Render the message for a given data payload.
    #[must_use]
    pub fn format(&self, data: &serde_json::Value) -> String {
        (self.format)(data)
    }
}

impl std::fmt::Debug for ErrorHelperDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHelperDef")
            .field("id", &self.id)
            .field("remediation", &self.remediation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_ref_id_accessor() {
        let r = DependencyRef::Resource("db".into());
        assert_eq!(r.id(), "db");
    }

    #[test]
    fn tag_with_config_rejects_invalid_schema() {
        #[derive(Debug)]
        struct AlwaysFails;
        impl Schema for AlwaysFails {
            fn validate(&self, _value: &serde_json::Value) -> std::result::Result<(), String> {
                Err("nope".to_string())
            }
        }
        let tag = Tag {
            id: "startup".into(),
            config_schema: Some(Arc::new(AlwaysFails)),
            config: None,
            contracts: TagContracts::default(),
        };
        let err = tag.with_config(serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn tag_without_schema_accepts_any_config() {
        let tag = Tag::new("startup");
        let tag = tag.with_config(serde_json::json!({"a": 1})).unwrap();
        assert_eq!(tag.config, Some(serde_json::json!({"a": 1})));
    }
}
