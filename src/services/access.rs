//! Access resolution.
//!
//! Which of the two identifiers was presented is the whole permission
//! model: reads match either column, writes match the read-write column
//! only. A read-only key handed to [`resolve_for_write`] simply finds
//! nothing.

use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::state::store::{Record, UnitOfWork};

/// A record reached through either of its identifiers.
#[derive(Debug)]
pub struct ReadAccess(pub Record);

/// A record reached through its read-write identifier.
///
/// Only [`resolve_for_write`] builds one, so holding it proves the caller
/// presented the read-write key.
#[derive(Debug)]
pub struct WriteAccess(Record);

impl WriteAccess {
    pub fn name(&self) -> &str {
        &self.0.name
    }
}

/// Resolve `id` against both columns and refresh the access time in the
/// same unit of work.
pub fn resolve_for_read(
    uow: &UnitOfWork<'_>,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Option<ReadAccess>, StoreError> {
    let Some(mut record) = uow.find_by_any_name(id)? else {
        return Ok(None);
    };

    uow.touch(&record.name, now)?;
    record.last_accessed = record.last_accessed.max(now);
    Ok(Some(ReadAccess(record)))
}

/// Resolve `name` against the read-write column only and refresh the
/// access time in the same unit of work.
pub fn resolve_for_write(
    uow: &UnitOfWork<'_>,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Option<WriteAccess>, StoreError> {
    let Some(mut record) = uow.find_by_name(name)? else {
        return Ok(None);
    };

    uow.touch(&record.name, now)?;
    record.last_accessed = record.last_accessed.max(now);
    Ok(Some(WriteAccess(record)))
}
