//! Handler execution.
//!
//! The invoker is opaque to the dispatcher: it runs the method's body with
//! the bound argument vector on its own task, awaits completion, and
//! normalizes every outcome into a result value or a [`ResponseError`].
//! Panics never escape: they are captured off the join handle and wrapped
//! into the reserved unhandled-host-exception error.

use std::sync::Arc;

use serde_json::Value;

use crate::binder::Arguments;
use crate::context::RequestContext;
use crate::contract::{MethodEntry, ReturnKind};
use crate::message::ResponseError;

/// Executes `entry` with a prepared argument vector.
pub async fn invoke(
    entry: &Arc<MethodEntry>,
    args: Arguments,
    ctx: RequestContext,
) -> Result<Value, ResponseError> {
    let handler = entry.handler.clone();
    let outcome = tokio::spawn(async move { handler(args, ctx).await }).await;

    match outcome {
        Ok(result) => match entry.returns {
            // Void methods answer with null regardless of what the body
            // happened to return.
            ReturnKind::Void => result.map(|_| Value::Null),
            ReturnKind::Value(_) => result,
        },
        Err(join_error) if join_error.is_panic() => {
            Err(ResponseError::from_panic(panic_detail(join_error.into_panic())))
        }
        Err(_) => Err(ResponseError::internal("handler task was cancelled")),
    }
}

fn panic_detail(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}
