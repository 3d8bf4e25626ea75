//! Declarative migration definitions.
//!
//! A definition function receives a [`DefinitionContext`] and describes its
//! migrations with nested `migration` / `database` / `up` / `after` / `down`
//! calls:
//!
//! ```ignore
//! let migrations = define("20240101_users", |ctx| {
//!     ctx.migration("create users", |ctx| {
//!         ctx.database(EngineKind::Sqlite, |ctx| {
//!             ctx.up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY)")?;
//!             ctx.down_sql("DROP TABLE users")
//!         })
//!     })
//! })?;
//! ```
//!
//! All builder state lives in the context, which is created and dropped by
//! [`define`], so repeated or concurrent definitions never observe each other.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tidemark_common::{EngineKind, Error, Result, validate_migration_id};
use tidemark_db::SqlExecutor;

/// A unit of user work run against an open transaction.
pub type Procedure = Arc<dyn Fn(&mut dyn SqlExecutor) -> anyhow::Result<()> + Send + Sync>;

/// Procedures for one engine.
#[derive(Clone, Default)]
pub struct Implementation {
    pub up: Option<Procedure>,
    pub down: Option<Procedure>,
    pub after: Option<Procedure>,
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("up", &self.up.is_some())
            .field("down", &self.down.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// A finished migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: String,
    pub description: String,
    pub implementations: BTreeMap<EngineKind, Implementation>,
}

impl Migration {
    pub fn implementation(&self, engine: EngineKind) -> Option<&Implementation> {
        self.implementations.get(&engine)
    }

    pub fn engines(&self) -> impl Iterator<Item = EngineKind> + '_ {
        self.implementations.keys().copied()
    }
}

struct MigrationFrame {
    description: String,
    implementations: BTreeMap<EngineKind, Implementation>,
}

struct EngineFrame {
    engine: EngineKind,
    implementation: Implementation,
}

/// Builder state for a single definition invocation.
pub struct DefinitionContext {
    source_id: String,
    migrations: Vec<Migration>,
    migration_frame: Option<MigrationFrame>,
    engine_frame: Option<EngineFrame>,
    poisoned: Option<String>,
}

impl DefinitionContext {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            migrations: Vec::new(),
            migration_frame: None,
            engine_frame: None,
            poisoned: None,
        }
    }

    /// Declare a migration. It is added to the result only if `body` succeeds.
    pub fn migration<F>(&mut self, description: impl Into<String>, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let saved_migration = self.migration_frame.replace(MigrationFrame {
            description: description.into(),
            implementations: BTreeMap::new(),
        });
        let saved_engine = self.engine_frame.take();

        let outcome = body(self);

        let frame = std::mem::replace(&mut self.migration_frame, saved_migration);
        self.engine_frame = saved_engine;
        outcome?;

        let frame = frame.ok_or_else(|| Error::Definition("migration frame was lost".into()))?;
        let id = self.next_id();
        if let Err(e) = validate_migration_id(&id) {
            self.poisoned.get_or_insert_with(|| e.to_string());
            return Err(e);
        }
        self.migrations.push(Migration {
            id,
            description: frame.description,
            implementations: frame.implementations,
        });
        Ok(())
    }

    /// Declare the implementation of the enclosing migration for `engine`.
    pub fn database<F>(&mut self, engine: EngineKind, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.migration_frame.is_none() {
            return Err(self.violation("database() must be called inside migration()"));
        }

        let saved_engine = self.engine_frame.replace(EngineFrame {
            engine,
            implementation: Implementation::default(),
        });

        let outcome = body(self);

        let frame = std::mem::replace(&mut self.engine_frame, saved_engine);
        outcome?;

        let frame = frame.ok_or_else(|| Error::Definition("database frame was lost".into()))?;
        let parent = self
            .migration_frame
            .as_mut()
            .ok_or_else(|| Error::Definition("migration frame was lost".into()))?;
        parent
            .implementations
            .insert(frame.engine, frame.implementation);
        Ok(())
    }

    pub fn up<F>(&mut self, procedure: F) -> Result<()>
    where
        F: Fn(&mut dyn SqlExecutor) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.engine_slot("up")?.up = Some(Arc::new(procedure));
        Ok(())
    }

    pub fn after<F>(&mut self, procedure: F) -> Result<()>
    where
        F: Fn(&mut dyn SqlExecutor) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.engine_slot("after")?.after = Some(Arc::new(procedure));
        Ok(())
    }

    pub fn down<F>(&mut self, procedure: F) -> Result<()>
    where
        F: Fn(&mut dyn SqlExecutor) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.engine_slot("down")?.down = Some(Arc::new(procedure));
        Ok(())
    }

    pub fn up_sql(&mut self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        self.up(move |db| Ok(db.execute_batch(&sql)?))
    }

    pub fn after_sql(&mut self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        self.after(move |db| Ok(db.execute_batch(&sql)?))
    }

    pub fn down_sql(&mut self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        self.down(move |db| Ok(db.execute_batch(&sql)?))
    }

    fn engine_slot(&mut self, verb: &str) -> Result<&mut Implementation> {
        if self.engine_frame.is_none() {
            return Err(self.violation(&format!("{verb}() must be called inside database()")));
        }
        self.engine_frame
            .as_mut()
            .map(|frame| &mut frame.implementation)
            .ok_or_else(|| Error::Definition("database frame was lost".into()))
    }

    fn violation(&mut self, message: &str) -> Error {
        if self.poisoned.is_none() {
            self.poisoned = Some(message.to_string());
        }
        Error::Definition(message.to_string())
    }

    fn next_id(&self) -> String {
        match self.migrations.len() {
            0 => self.source_id.clone(),
            n => format!("{}.{n}", self.source_id),
        }
    }
}

/// Run a definition function in a fresh context and collect its migrations
/// in declaration order.
pub fn define<F>(source_id: &str, definition: F) -> Result<Vec<Migration>>
where
    F: FnOnce(&mut DefinitionContext) -> Result<()>,
{
    validate_migration_id(source_id)?;
    let mut ctx = DefinitionContext::new(source_id);

    match catch_unwind(AssertUnwindSafe(|| definition(&mut ctx))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(panic) => {
            return Err(Error::Definition(format!(
                "definition {source_id} panicked: {}",
                panic_message(panic.as_ref())
            )));
        }
    }

    if let Some(message) = ctx.poisoned.take() {
        return Err(Error::Definition(message));
    }
    Ok(ctx.migrations)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
