//! Classification of MySQL error signals into the adapter's taxonomy.

use crate::error::{AdapterError, Result};
use tracing::warn;

/// `ER_NO_SUCH_TABLE`
pub const ER_NO_SUCH_TABLE: u16 = 1146;
/// `ER_DUP_FIELDNAME`
pub const ER_DUP_FIELDNAME: u16 = 1060;
/// `ER_DUP_KEYNAME`
pub const ER_DUP_KEYNAME: u16 = 1061;
/// `ER_DUP_ENTRY`
pub const ER_DUP_ENTRY: u16 = 1062;
/// `ER_BLOB_KEY_WITHOUT_LENGTH`
pub const ER_BLOB_KEY_WITHOUT_LENGTH: u16 = 1170;
/// `WARN_DATA_TRUNCATED`
pub const WARN_DATA_TRUNCATED: u16 = 1265;
/// `ER_TRUNCATED_WRONG_VALUE`
pub const ER_TRUNCATED_WRONG_VALUE: u16 = 1292;

/// Operation whose failure is being classified. The same engine signal
/// means different things depending on what was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    CreateClass,
    AddField,
    CreateObject,
    UpdateObjects,
    /// A missing table deletes nothing.
    DeleteObjects,
    EnsureUniqueness,
    FullTextIndex,
    /// Best-effort reads and drops: find, count, delete-all.
    Read,
    Other,
}

/// Outcome of classifying a failure.
#[derive(Debug)]
pub enum Classified {
    /// Known-benign signal; the operation counts as applied.
    Benign,
    Fail(AdapterError),
}

/// Classify `err` raised while performing `context` on `class_name`.
pub fn classify(context: Context, class_name: &str, err: AdapterError) -> Classified {
    let Some(number) = err.engine_number() else {
        return Classified::Fail(err);
    };

    let benign = match (context, number) {
        (Context::AddField, ER_DUP_FIELDNAME) => true,
        (Context::CreateObject, WARN_DATA_TRUNCATED) => true,
        (Context::EnsureUniqueness | Context::FullTextIndex, ER_DUP_KEYNAME) => true,
        (Context::Read | Context::DeleteObjects, ER_NO_SUCH_TABLE) => true,
        _ => false,
    };
    if benign {
        warn!(class_name, code = number, context = ?context, "ignoring benign engine error: {}", err);
        return Classified::Benign;
    }

    let mapped = match (context, number) {
        (Context::CreateClass, ER_DUP_ENTRY) => AdapterError::DuplicateClass(class_name.to_string()),
        (Context::CreateObject | Context::UpdateObjects, ER_DUP_ENTRY) => AdapterError::DuplicateValue,
        (Context::CreateObject, ER_TRUNCATED_WRONG_VALUE) => AdapterError::InternalError(err.to_string()),
        (Context::EnsureUniqueness, ER_DUP_FIELDNAME | ER_DUP_ENTRY | ER_BLOB_KEY_WITHOUT_LENGTH) => {
            AdapterError::DuplicateValue
        }
        _ => err,
    };
    Classified::Fail(mapped)
}

/// Apply [`classify`] to a result: benign failures become `Ok(None)`.
pub fn resolve<T>(context: Context, class_name: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => match classify(context, class_name, err) {
            Classified::Benign => Ok(None),
            Classified::Fail(err) => Err(err),
        },
    }
}
