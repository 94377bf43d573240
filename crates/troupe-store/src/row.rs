//! Row-mapping helpers shared by the repositories.

use rusqlite::types::Type;

/// Build a conversion failure for a column that holds an unmappable value.
pub(crate) fn bad_column(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}
