use chrono::Utc;

use crate::errors::{KeyError, KeyResult};
use crate::services::access::{resolve_for_read, resolve_for_write};
use crate::services::keygen::{KeyPair, KeyPolicy};
use crate::state::store::RecordStore;

/// Create a record and return its read-write / read-only key pair.
///
/// Both candidates are checked against both columns before inserting. A
/// collision fails the request with `Conflict`; there is no retry.
pub async fn create(
    store: &RecordStore,
    policy: KeyPolicy,
    requested: Option<String>,
) -> KeyResult<KeyPair> {
    let pair = policy.candidate_pair(requested.as_deref());

    let key = pair.clone();
    store
        .unit_of_work(move |uow| -> KeyResult<()> {
            if uow.any_taken(&key.name, &key.roname)? {
                return Err(KeyError::Conflict);
            }
            uow.insert(&key.name, &key.roname, Utc::now())?;
            Ok(())
        })
        .await?;

    tracing::debug!("Created key {}", pair.roname);
    Ok(pair)
}

/// Read a value through either key. `None` if the value was never set.
pub async fn read(store: &RecordStore, id: String) -> KeyResult<Option<String>> {
    store
        .unit_of_work(move |uow| -> KeyResult<Option<String>> {
            match resolve_for_read(uow, &id, Utc::now())? {
                Some(access) => Ok(access.0.value),
                None => Err(KeyError::NotFound),
            }
        })
        .await
}

/// Overwrite the value of a record. Requires the read-write key.
///
/// The length check happens before the store is touched.
pub async fn update(
    store: &RecordStore,
    max_value_length: usize,
    name: String,
    value: String,
) -> KeyResult<()> {
    // UTF-16 code units, so astral characters count twice.
    let len = value.encode_utf16().count();
    if len > max_value_length {
        return Err(KeyError::ValueTooLarge {
            len,
            max: max_value_length,
        });
    }

    store
        .unit_of_work(move |uow| -> KeyResult<()> {
            let access = resolve_for_write(uow, &name, Utc::now())?.ok_or(KeyError::NotFound)?;
            uow.set_value(access.name(), &value, Utc::now())?;
            Ok(())
        })
        .await
}

/// Delete a record. Requires the read-write key; the read-only key dies
/// with it.
pub async fn delete(store: &RecordStore, name: String) -> KeyResult<()> {
    store
        .unit_of_work(move |uow| -> KeyResult<()> {
            let access = resolve_for_write(uow, &name, Utc::now())?.ok_or(KeyError::NotFound)?;
            uow.delete(access.name())?;
            Ok(())
        })
        .await
}
