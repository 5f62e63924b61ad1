use counter_domain::storage::StoreError;
use redis::{ErrorKind, RedisError};

/// Splits Redis failures into "store unreachable" and everything else.
pub(crate) fn classify(err: RedisError) -> StoreError {
    if is_connectivity(&err) {
        StoreError::connectivity(err)
    } else {
        StoreError::unexpected(err)
    }
}

fn is_connectivity(err: &RedisError) -> bool {
    err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_io_error()
        || matches!(
            err.kind(),
            ErrorKind::AuthenticationFailed | ErrorKind::BusyLoadingError
        )
}
