// Error reporting through tracing

use crate::context::ErrorContext;
use crate::types::{Categorized, ErrorCategory};

/// Emit a structured `tracing` event for a categorized error.
///
/// Retryable failures are logged at `warn`, everything else at `error`.
pub fn report<E: Categorized + ?Sized>(error: &E, context: &ErrorContext) {
    let additional = if context.additional.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&context.additional).unwrap_or_default()
    };

    if error.is_retryable() || error.category() == ErrorCategory::Conflict {
        tracing::warn!(
            error_code = error.code(),
            error_category = %error.category(),
            operation = context.operation.as_deref(),
            entity_kind = context.entity_kind.as_deref(),
            entity_id = context.entity_id.as_deref(),
            queue_item_id = context.queue_item_id.as_deref(),
            update_id = context.update_id.as_deref(),
            conflict_id = context.conflict_id.as_deref(),
            additional = %additional,
            "{}",
            error
        );
    } else {
        tracing::error!(
            error_code = error.code(),
            error_category = %error.category(),
            operation = context.operation.as_deref(),
            entity_kind = context.entity_kind.as_deref(),
            entity_id = context.entity_id.as_deref(),
            queue_item_id = context.queue_item_id.as_deref(),
            update_id = context.update_id.as_deref(),
            conflict_id = context.conflict_id.as_deref(),
            additional = %additional,
            "{}",
            error
        );
    }
}
