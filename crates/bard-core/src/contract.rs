use std::fmt::Display;

/// Reports a broken caller contract (use after dispose, double release).
/// Debug builds stop right here; release builds log and carry on.
pub(crate) fn contract_violation(context: &str, err: &dyn Display) {
    tracing::error!(error = %err, "contract violation: {context}");
    if cfg!(debug_assertions) {
        panic!("contract violation: {context}: {err}");
    }
}
