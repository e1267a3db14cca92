// `ToolRegistry` (spec.md §4.8): maps `ToolKind` to its adapter. A
// worker builds one at startup and hands it to the pipeline executor;
// unregistered kinds surface as a `validation` outcome rather than a
// panic, since a playbook might name a kind this build doesn't carry.

use std::collections::HashMap;
use std::sync::Arc;

use noetl_contracts::playbook::ToolKind;
use noetl_core::traits::{ToolAdapter, ToolRegistry as ToolRegistryTrait};

use crate::http::HttpAdapter;
use crate::noop::NoopAdapter;
use crate::postgres::PostgresAdapter;
use crate::secrets::SecretsAdapter;

pub struct BuiltinToolRegistry {
    adapters: HashMap<ToolKind, Arc<dyn ToolAdapter>>,
}

impl BuiltinToolRegistry {
    /// Registers the builtin adapters: `noop`, `http`, `postgres`,
    /// `secrets`. Other `ToolKind` variants (duckdb, python, playbook,
    /// ...) are not implemented by this crate; SPEC_FULL.md scopes this
    /// system to the core subset of the grammar.
    pub fn with_builtins() -> Self {
        let mut adapters: HashMap<ToolKind, Arc<dyn ToolAdapter>> = HashMap::new();
        adapters.insert(ToolKind::Noop, Arc::new(NoopAdapter));
        adapters.insert(ToolKind::Http, Arc::new(HttpAdapter::new()));
        adapters.insert(ToolKind::Postgres, Arc::new(PostgresAdapter));
        adapters.insert(ToolKind::Secrets, Arc::new(SecretsAdapter));
        Self { adapters }
    }

    pub fn register(&mut self, kind: ToolKind, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.insert(kind, adapter);
    }
}

impl Default for BuiltinToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ToolRegistryTrait for BuiltinToolRegistry {
    fn resolve(&self, kind: &ToolKind) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_noop_http_postgres_secrets() {
        let registry = BuiltinToolRegistry::with_builtins();
        assert!(registry.resolve(&ToolKind::Noop).is_some());
        assert!(registry.resolve(&ToolKind::Http).is_some());
        assert!(registry.resolve(&ToolKind::Postgres).is_some());
        assert!(registry.resolve(&ToolKind::Secrets).is_some());
        assert!(registry.resolve(&ToolKind::Python).is_none());
    }
}
