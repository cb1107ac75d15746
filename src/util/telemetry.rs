//! Logging bootstrap for binaries and tests embedding the pool.

/// Install a `tracing-subscriber` fmt subscriber filtered by `RUST_LOG`.
///
/// Does nothing if a global subscriber is already set, so it is safe to call
/// from every test.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!(target: "tagged_pool", "tracing initialised");
    }
}
