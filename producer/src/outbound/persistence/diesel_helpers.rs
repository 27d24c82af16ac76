//! Shared helpers for the Diesel adapters.

use tracing::debug;

use super::pool::PoolError;

/// Readable message of a pool error.
pub fn map_pool_error_message(error: PoolError) -> String {
    error.to_string()
}

/// Readable message of a Diesel error; emits debug context.
pub fn map_diesel_error_message(error: diesel::result::Error, operation: &str) -> String {
    use diesel::result::Error as DieselError;

    if let DieselError::DatabaseError(kind, info) = &error {
        debug!(?kind, message = info.message(), %operation, "diesel operation failed");
    } else {
        debug!(error = %error, %operation, "diesel operation failed");
    }
    format!("{operation}: {error}")
}

/// Whether a Diesel error means the connection is gone.
pub fn is_connection_error(error: &diesel::result::Error) -> bool {
    matches!(
        error,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::ClosedConnection,
            _
        )
    )
}

/// Double-quote a table name taken from the schema registry.
///
/// Table names are interpolated into SQL text, so only lowercase ASCII
/// letters, digits, and underscores are accepted.
pub fn quote_table_name(name: &str) -> Option<String> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_');
    valid.then(|| format!("\"{name}\""))
}

/// Convert a page size into a SQL `LIMIT`.
pub fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("nap_peilmerken", Some("\"nap_peilmerken\""))]
    #[case("rel_gbd_bbk_gbd_brt_ligt_in_buurt", Some("\"rel_gbd_bbk_gbd_brt_ligt_in_buurt\""))]
    #[case("", None)]
    #[case("nap_peilmerken\"; drop table events; --", None)]
    #[case("Nap_Peilmerken", None)]
    fn table_names_are_validated(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(quote_table_name(name).as_deref(), expected);
    }

    #[rstest]
    fn diesel_messages_name_the_operation() {
        let message = map_diesel_error_message(diesel::result::Error::NotFound, "read watermark");
        assert_eq!(message, "read watermark: Record not found");
    }

    #[rstest]
    fn pool_messages_keep_the_pool_name() {
        let message = map_pool_error_message(PoolError::build("checkpoints", "bad url"));
        assert!(message.contains("checkpoints"));
    }
}
