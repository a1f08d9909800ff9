//! Backend selection per operation.
//!
//! A global override wins over a per-kind override, which wins over the
//! default backend. Overrides come from the environment
//! (`OP_BACKEND_ALLOPS`, `OP_BACKEND_<NNAPI_NAME>`) or are set directly;
//! the value `none` leaves a key unset.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::backend::BackendRegistry;
use crate::config::DEFAULT_BACKEND;
use crate::error::{ForgeResult, ResolutionError};
use crate::graph::{LowerInfo, Model, OpKind};

const ENV_PREFIX: &str = "OP_BACKEND_";
const ALL_OPS_KEY: &str = "ALLOPS";
const UNSET: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendPolicy {
    pub all_ops: Option<String>,
    pub per_op: HashMap<OpKind, String>,
    pub default_backend: String,
}

impl Default for BackendPolicy {
    fn default() -> Self {
        Self {
            all_ops: None,
            per_op: HashMap::new(),
            default_backend: DEFAULT_BACKEND.to_string(),
        }
    }
}

impl BackendPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides read from `OP_BACKEND_*` variables.
    pub fn from_env() -> Self {
        let keys = std::iter::once(ALL_OPS_KEY).chain(OpKind::ALL.iter().map(|kind| kind.name()));
        let pairs = keys.filter_map(|key| {
            std::env::var(format!("{}{}", ENV_PREFIX, key))
                .ok()
                .map(|value| (key.to_string(), value))
        });
        Self::from_pairs(pairs)
    }

    /// Overrides from `(key, backend)` pairs, where the key is `ALLOPS` or
    /// an NNAPI operation name, optionally prefixed with `OP_BACKEND_`.
    /// Unknown keys are ignored with a warning.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut policy = Self::default();
        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let key = key.strip_prefix(ENV_PREFIX).unwrap_or(key);
            let value = match parse_value(value.as_ref()) {
                Some(value) => value,
                None => continue,
            };
            if key == ALL_OPS_KEY {
                policy.all_ops = Some(value);
            } else if let Some(kind) = OpKind::from_name(key) {
                policy.per_op.insert(kind, value);
            } else {
                tracing::warn!(key, "ignoring backend override for unknown operation");
            }
        }
        policy
    }

    pub fn with_all_ops(mut self, backend: impl Into<String>) -> Self {
        self.all_ops = Some(backend.into());
        self
    }

    pub fn with_op(mut self, kind: OpKind, backend: impl Into<String>) -> Self {
        self.per_op.insert(kind, backend.into());
        self
    }

    pub fn with_default_backend(mut self, backend: impl Into<String>) -> Self {
        self.default_backend = backend.into();
        self
    }

    /// Backend id chosen for `kind`.
    pub fn backend_for(&self, kind: OpKind) -> &str {
        self.all_ops
            .as_deref()
            .or_else(|| self.per_op.get(&kind).map(String::as_str))
            .unwrap_or(&self.default_backend)
    }
}

fn parse_value(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(UNSET) {
        None
    } else {
        Some(value.to_string())
    }
}

pub struct BackendResolver<'r> {
    registry: &'r BackendRegistry,
    policy: BackendPolicy,
}

impl<'r> BackendResolver<'r> {
    pub fn new(registry: &'r BackendRegistry, policy: BackendPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> &BackendPolicy {
        &self.policy
    }

    /// One assignment per operation, in operation index order.
    pub fn resolve(&self, model: &Model) -> ForgeResult<Vec<LowerInfo>> {
        model
            .operations()
            .map(|(index, op)| {
                let kind = op.kind();
                let id = self.policy.backend_for(kind);
                let backend = self.registry.lookup(id)?;
                if !backend.config().supports(kind) {
                    return Err(ResolutionError::UnresolvedOperation { kind }.into());
                }
                tracing::debug!(operation = %index, %kind, backend = id, "resolved backend");
                Ok(LowerInfo::new(id, backend.config().layout()))
            })
            .collect()
    }
}
