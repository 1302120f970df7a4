//! Per-module, per-year sequence codes (`WO-2025-0007`).
//!
//! The next number is derived by scanning the greatest existing code for the
//! module's prefix and year inside the caller's transaction. Two concurrent
//! creations can still read the same last number; the UNIQUE constraint on
//! every `code` column turns that race into a unique violation, which
//! [`RepositoryError::classify`] maps to a retryable `Conflict`.

use sqlx::SqliteConnection;

use ordertrack_core::routing::StageModule;
use ordertrack_core::sequence;

use super::{module_table, RepositoryError};

/// Next `PREFIX-YYYY-NNNN` code for the module, scoped to `year`. Zero-padded
/// suffixes sort lexicographically, so `ORDER BY code DESC` finds the max.
pub(crate) async fn next_code(
    conn: &mut SqliteConnection,
    module: StageModule,
    year: i32,
) -> Result<String, RepositoryError> {
    let prefix = module.code_prefix();
    let sql = format!(
        "SELECT code FROM {} WHERE code LIKE ? ORDER BY code DESC LIMIT 1",
        module_table(module)
    );
    let last: Option<String> = sqlx::query_scalar(&sql)
        .bind(sequence::like_pattern(prefix, year))
        .fetch_optional(&mut *conn)
        .await?;

    Ok(sequence::next_code(prefix, year, last.as_deref()))
}
