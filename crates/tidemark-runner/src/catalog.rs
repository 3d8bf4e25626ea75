use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tidemark_common::{Error, Result};
use tidemark_engine::{DefinitionContext, Migration, define};
use tracing::debug;

use crate::traits::{Catalog, CatalogEntry};

/// Where a set of migrations comes from: its id, authoring time, tags, and
/// the targets it applies to (all targets when empty).
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    pub targets: Vec<String>,
}

impl Source {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            tags: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }
}

struct Registered {
    entry: CatalogEntry,
    targets: Vec<String>,
    migration: Migration,
    seq: usize,
}

/// In-process catalog built from definition functions compiled into the binary.
#[derive(Default)]
pub struct StaticCatalog {
    registered: Vec<Registered>,
    by_id: HashMap<String, usize>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `definition` and register every migration it declares.
    pub fn register<F>(&mut self, source: Source, definition: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut DefinitionContext) -> Result<()>,
    {
        let migrations = define(&source.id, definition)?;
        if migrations.is_empty() {
            return Err(Error::Definition(format!(
                "source {} declares no migrations",
                source.id
            )));
        }
        if let Some(dup) = migrations.iter().find(|m| self.by_id.contains_key(&m.id)) {
            return Err(Error::Validation(format!("duplicate migration id: {}", dup.id)));
        }

        for migration in migrations {
            debug!("registered migration {} from {}", migration.id, source.id);
            let idx = self.registered.len();
            self.by_id.insert(migration.id.clone(), idx);
            self.registered.push(Registered {
                entry: CatalogEntry {
                    id: migration.id.clone(),
                    description: migration.description.clone(),
                    tags: source.tags.clone(),
                    timestamp: source.timestamp,
                },
                targets: source.targets.clone(),
                migration,
                seq: idx,
            });
        }
        Ok(self)
    }

    pub fn migration(&self, id: &str) -> Option<&Migration> {
        self.by_id.get(id).map(|&idx| &self.registered[idx].migration)
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    fn matching(&self, target: &str, tags: &[String]) -> Vec<CatalogEntry> {
        let wanted: BTreeSet<&str> = tags.iter().map(String::as_str).collect();
        let mut hits: Vec<&Registered> = self
            .registered
            .iter()
            .filter(|r| r.targets.is_empty() || r.targets.iter().any(|t| t == target))
            .filter(|r| wanted.iter().all(|tag| r.entry.tags.iter().any(|t| t == tag)))
            .collect();
        hits.sort_by(|a, b| {
            a.entry
                .timestamp
                .cmp(&b.entry.timestamp)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        hits.into_iter().map(|r| r.entry.clone()).collect()
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn find(&self, target: &str, tags: &[String]) -> Result<Vec<CatalogEntry>> {
        Ok(self.matching(target, tags))
    }

    async fn get(&self, id: &str) -> Result<Option<CatalogEntry>> {
        Ok(self.by_id.get(id).map(|&idx| self.registered[idx].entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tidemark_common::EngineKind;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn simple(ctx: &mut DefinitionContext) -> Result<()> {
        ctx.migration("noop", |ctx| ctx.database(EngineKind::Sqlite, |ctx| ctx.up_sql("SELECT 1")))
    }

    #[tokio::test]
    async fn find_orders_by_timestamp_and_filters_tags() {
        let mut catalog = StaticCatalog::new();
        catalog
            .register(Source::new("c", ts(3)).tag("core"), simple)
            .unwrap()
            .register(Source::new("a", ts(1)).tag("core").tag("seed"), simple)
            .unwrap()
            .register(Source::new("b", ts(2)), simple)
            .unwrap();

        let all: Vec<_> = catalog.find("main", &[]).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(all, vec!["a", "b", "c"]);

        let core: Vec<_> = catalog
            .find("main", &["core".to_string()])
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(core, vec!["a", "c"]);

        let both = catalog
            .find("main", &["core".to_string(), "seed".to_string()])
            .await
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, "a");
    }

    #[tokio::test]
    async fn sources_can_be_scoped_to_targets() {
        let mut catalog = StaticCatalog::new();
        catalog
            .register(Source::new("analytics_only", ts(1)).target("analytics"), simple)
            .unwrap()
            .register(Source::new("everywhere", ts(2)), simple)
            .unwrap();

        assert_eq!(catalog.find("main", &[]).await.unwrap().len(), 1);
        assert_eq!(catalog.find("analytics", &[]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn get_returns_entry_and_migration() {
        let mut catalog = StaticCatalog::new();
        catalog.register(Source::new("users", ts(5)), simple).unwrap();

        let entry = catalog.get("users").await.unwrap().unwrap();
        assert_eq!(entry.description, "noop");
        assert_eq!(entry.timestamp, ts(5));
        assert!(catalog.migration("users").is_some());
        assert!(catalog.get("missing").await.unwrap().is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut catalog = StaticCatalog::new();
        catalog.register(Source::new("users", ts(1)), simple).unwrap();
        let err = catalog.register(Source::new("users", ts(2)), simple).err().unwrap();
        assert!(err.to_string().contains("duplicate migration id"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn definition_errors_surface_at_registration() {
        let mut catalog = StaticCatalog::new();
        let err = catalog
            .register(Source::new("broken", ts(1)), |ctx| ctx.up_sql("SELECT 1"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Definition(_)));
        assert!(catalog.is_empty());
    }
}
