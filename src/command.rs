//! # Bulk Command
//!
//! Immutable description of one bulk request: which action to run, over which
//! query, with which sizing. Commands are built through [`BulkCommandBuilder`],
//! whose fallible steps return `Result<Self>` so that an invalid intermediate
//! builder can never reach [`BulkCommandBuilder::build`].
//!
//! ```rust
//! use bulk_core::command::BulkCommand;
//! use serde_json::json;
//!
//! # fn main() -> bulk_core::Result<()> {
//! let command = BulkCommand::builder("setProperties", "SELECT * FROM Document WHERE type = 'Folder'")?
//!     .user("alice")
//!     .repository("default")
//!     .bucket(100)?
//!     .batch(25)?
//!     .param("dc:title", json!("archived"))?
//!     .build();
//!
//! assert_eq!(command.bucket_size(), 100);
//! assert_eq!(command.batch_size(), 25);
//! assert_eq!(command.params().len(), 1);
//! # Ok(())
//! # }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{BulkError, Result};

/// Action-specific configuration carried by a command
pub type Params = BTreeMap<String, Value>;

/// Unique command identifier (random 128-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CommandId {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| BulkError::configuration(format!("Invalid command id {s}: {e}")))
    }
}

/// A validated, frozen bulk command.
///
/// `bucket_size` and `batch_size` are `0` when the caller left them unset; the
/// dispatcher fills them from the action defaults at submission through
/// [`BulkCommand::with_defaults`]. Whenever both are non-zero,
/// `bucket_size >= batch_size` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CommandRecord", into = "CommandRecord")]
pub struct BulkCommand {
    id: CommandId,
    action: String,
    query: String,
    query_limit: Option<u64>,
    username: Option<String>,
    repository: Option<String>,
    bucket_size: usize,
    batch_size: usize,
    scroller: Option<String>,
    generic_scroller: bool,
    params: Params,
}

impl BulkCommand {
    /// Start building a command. Fails when `action` or `query` is empty.
    pub fn builder(
        action: impl Into<String>,
        query: impl Into<String>,
    ) -> Result<BulkCommandBuilder> {
        BulkCommandBuilder::new(action, query)
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Query text, or a scroller-specific descriptor when
    /// [`uses_generic_scroller`](Self::uses_generic_scroller) is set
    pub fn query(&self) -> &str {
        &self.query
    }

    /// `None` when unset, `Some(0)` for explicitly unlimited, otherwise the cap
    pub fn query_limit(&self) -> Option<u64> {
        self.query_limit
    }

    /// The cap to enforce while scrolling; `None` means unlimited
    pub fn effective_query_limit(&self) -> Option<u64> {
        self.query_limit.filter(|limit| *limit > 0)
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Both sizes have been set, either by the caller or from defaults
    pub fn is_sized(&self) -> bool {
        self.bucket_size > 0 && self.batch_size > 0
    }

    /// Named scroller; `None` selects the default scroller of the kind
    pub fn scroller(&self) -> Option<&str> {
        self.scroller.as_deref()
    }

    pub fn uses_generic_scroller(&self) -> bool {
        self.generic_scroller
    }

    /// Read-only view of the action parameters
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Typed access to a parameter; `None` when absent or of another shape
    pub fn param_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.params
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Fill unset sizing and query limit from defaults, keeping the id.
    ///
    /// Explicit values win. A defaulted batch size is capped to an explicit
    /// bucket size, and a defaulted bucket size is raised to an explicit batch
    /// size. An unset query limit inherits `default_query_limit`; an explicit
    /// unlimited (`Some(0)`) is kept.
    pub fn with_defaults(
        &self,
        default_bucket_size: usize,
        default_batch_size: usize,
        default_query_limit: Option<u64>,
    ) -> Result<Self> {
        if default_bucket_size == 0 || default_batch_size == 0 {
            return Err(BulkError::configuration(format!(
                "Default sizes must be > 0 (bucket: {default_bucket_size}, batch: {default_batch_size})"
            )));
        }

        let mut resolved = self.clone();
        match (self.bucket_size, self.batch_size) {
            (0, 0) => {
                resolved.bucket_size = default_bucket_size;
                resolved.batch_size = default_batch_size.min(default_bucket_size);
            }
            (bucket, 0) => resolved.batch_size = default_batch_size.min(bucket),
            (0, batch) => resolved.bucket_size = default_bucket_size.max(batch),
            _ => {}
        }
        if resolved.query_limit.is_none() {
            resolved.query_limit = default_query_limit;
        }

        validate_sizes(resolved.bucket_size, resolved.batch_size)?;
        Ok(resolved)
    }

    /// Scope the command to `repository` unless it names one already
    pub fn with_default_repository(mut self, repository: Option<&str>) -> Self {
        if self.repository.is_none() {
            self.repository = repository.map(str::to_string);
        }
        self
    }
}

fn validate_sizes(bucket_size: usize, batch_size: usize) -> Result<()> {
    if bucket_size > 0 && batch_size > bucket_size {
        return Err(BulkError::configuration(format!(
            "Bucket size: {bucket_size} must be greater or equal to batch size: {batch_size}"
        )));
    }
    Ok(())
}

/// Validating builder for [`BulkCommand`]
#[derive(Debug, Clone)]
pub struct BulkCommandBuilder {
    action: String,
    query: String,
    query_limit: Option<u64>,
    username: Option<String>,
    repository: Option<String>,
    bucket_size: usize,
    batch_size: usize,
    scroller: Option<String>,
    generic_scroller: bool,
    params: Params,
}

impl BulkCommandBuilder {
    pub fn new(action: impl Into<String>, query: impl Into<String>) -> Result<Self> {
        let action = action.into();
        if action.trim().is_empty() {
            return Err(BulkError::configuration("Action cannot be empty"));
        }
        let query = query.into();
        if query.trim().is_empty() {
            return Err(BulkError::configuration("Query cannot be empty"));
        }

        Ok(Self {
            action,
            query,
            query_limit: None,
            username: None,
            repository: None,
            bucket_size: 0,
            batch_size: 0,
            scroller: None,
            generic_scroller: false,
            params: Params::new(),
        })
    }

    /// Use a non default repository
    pub fn repository(mut self, name: impl Into<String>) -> Self {
        self.repository = Some(name.into());
        self
    }

    /// User running the bulk action
    pub fn user(mut self, name: impl Into<String>) -> Self {
        self.username = Some(name.into());
        self
    }

    /// Cap the number of matched records. Must be > 0.
    pub fn query_limit(mut self, limit: u64) -> Result<Self> {
        if limit == 0 {
            return Err(BulkError::configuration(
                "Invalid limit: 0, must be > 0 (use query_unlimited)",
            ));
        }
        self.query_limit = Some(limit);
        Ok(self)
    }

    /// No cap on matched records; overrides an action default limit
    pub fn query_unlimited(mut self) -> Self {
        self.query_limit = Some(0);
        self
    }

    /// Number of record identifiers per published bucket
    pub fn bucket(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(BulkError::configuration("Invalid bucket size, must be > 0"));
        }
        validate_sizes(size, self.batch_size)?;
        self.bucket_size = size;
        Ok(self)
    }

    /// Number of record identifiers processed within one transaction
    pub fn batch(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(BulkError::configuration("Invalid batch size, must be > 0"));
        }
        validate_sizes(self.bucket_size, size)?;
        self.batch_size = size;
        Ok(self)
    }

    /// Add an action parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(BulkError::configuration("Param key cannot be empty"));
        }
        self.params.insert(key, value.into());
        Ok(self)
    }

    /// Replace all action parameters. An empty map leaves the current ones.
    pub fn params(mut self, params: Params) -> Result<Self> {
        if params.is_empty() {
            return Ok(self);
        }
        if params.keys().any(|key| key.trim().is_empty()) {
            return Err(BulkError::configuration("Param key cannot be empty"));
        }
        self.params = params;
        Ok(self)
    }

    /// Select a scroller implementation by name
    pub fn scroller(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.scroller = (!name.is_empty()).then_some(name);
        self
    }

    /// The query follows the convention of a generic scroller
    pub fn use_generic_scroller(mut self) -> Self {
        self.generic_scroller = true;
        self
    }

    /// The query is a document query (default)
    pub fn use_document_scroller(mut self) -> Self {
        self.generic_scroller = false;
        self
    }

    /// Freeze the command and assign its id
    pub fn build(self) -> BulkCommand {
        BulkCommand {
            id: CommandId::new(),
            action: self.action,
            query: self.query,
            query_limit: self.query_limit,
            username: self.username,
            repository: self.repository,
            bucket_size: self.bucket_size,
            batch_size: self.batch_size,
            scroller: self.scroller,
            generic_scroller: self.generic_scroller,
            params: self.params,
        }
    }
}

/// Wire form of a command; decoding goes back through validation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandRecord {
    id: CommandId,
    action: String,
    query: String,
    #[serde(default)]
    query_limit: Option<u64>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default)]
    bucket_size: usize,
    #[serde(default)]
    batch_size: usize,
    #[serde(default)]
    scroller: Option<String>,
    #[serde(default)]
    generic_scroller: bool,
    #[serde(default)]
    params: Params,
}

impl From<BulkCommand> for CommandRecord {
    fn from(command: BulkCommand) -> Self {
        Self {
            id: command.id,
            action: command.action,
            query: command.query,
            query_limit: command.query_limit,
            username: command.username,
            repository: command.repository,
            bucket_size: command.bucket_size,
            batch_size: command.batch_size,
            scroller: command.scroller,
            generic_scroller: command.generic_scroller,
            params: command.params,
        }
    }
}

impl TryFrom<CommandRecord> for BulkCommand {
    type Error = BulkError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let mut builder = BulkCommandBuilder::new(record.action, record.query)?.params(record.params)?;
        if record.bucket_size > 0 {
            builder = builder.bucket(record.bucket_size)?;
        }
        if record.batch_size > 0 {
            builder = builder.batch(record.batch_size)?;
        }

        Ok(Self {
            id: record.id,
            action: builder.action,
            query: builder.query,
            query_limit: record.query_limit,
            username: record.username,
            repository: record.repository,
            bucket_size: builder.bucket_size,
            batch_size: builder.batch_size,
            scroller: record.scroller.filter(|name| !name.is_empty()),
            generic_scroller: record.generic_scroller,
            params: builder.params,
        })
    }
}
