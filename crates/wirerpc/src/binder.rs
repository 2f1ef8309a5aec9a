//! Method selection and argument marshaling.
//!
//! Given a candidate set (all [`MethodEntry`] values sharing an rpc name) and
//! the request's `params`, the binder first narrows the set by argument
//! shape, then produces the argument vector for the surviving entry:
//!
//! - *parameterless*: `params` absent or null matches any candidate whose
//!   bindable parameters are all optional;
//! - *by-name*: an object must supply every required parameter, every
//!   supplied property must be kind-compatible, and unknown properties are
//!   rejected unless the candidate allows extra params;
//! - *by-position*: an array must not exceed the declared arity (unless
//!   extras are allowed) and each element must be kind-compatible, with
//!   optional parameters allowed to be absent from the tail.
//!
//! Parameters declared [`ParamKind::Cancellation`] never participate in
//! selection; their slots are filled from the request's cancellation token.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::contract::{MethodEntry, ParamKind, ParameterEntry};
use crate::message::ResponseError;

/// One bound argument slot.
#[derive(Clone, Debug)]
pub enum Argument {
    Json(Value),
    Cancellation(CancellationToken),
}

/// The argument vector handed to a handler, aligned with the method's
/// declared parameters.
#[derive(Clone, Debug, Default)]
pub struct Arguments {
    items: Vec<Argument>,
}

impl Arguments {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Converts the slot at `index` into `T`. Conversion failure is the
    /// per-parameter converter failure of the binding pipeline and surfaces
    /// as invalid params.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ResponseError> {
        match self.items.get(index) {
            Some(Argument::Json(value)) => serde_json::from_value(value.clone()).map_err(|err| {
                ResponseError::invalid_params(format!("argument {index}: {err}"))
            }),
            Some(Argument::Cancellation(_)) => Err(ResponseError::invalid_params(format!(
                "argument {index} is a cancellation handle"
            ))),
            None => Err(ResponseError::invalid_params(format!(
                "argument {index} is out of range"
            ))),
        }
    }

    /// The raw JSON token at `index`, if the slot holds one.
    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.items.get(index) {
            Some(Argument::Json(value)) => Some(value),
            _ => None,
        }
    }

    /// The injected cancellation token at `index`, if the slot holds one.
    pub fn cancellation(&self, index: usize) -> Option<CancellationToken> {
        match self.items.get(index) {
            Some(Argument::Cancellation(token)) => Some(token.clone()),
            _ => None,
        }
    }
}

/// Why a request failed to bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// No candidate matched the argument shape.
    NoMatch,
    /// More than one candidate matched; reported as an invalid request.
    Ambiguous { matched: usize },
    /// A required parameter was missing or unusable.
    InvalidParams(String),
}

impl BindError {
    pub fn to_response_error(&self, method: &str) -> ResponseError {
        match self {
            BindError::NoMatch => ResponseError::method_not_found(method),
            BindError::Ambiguous { matched } => ResponseError::invalid_request(format!(
                "request matches {matched} overloads of `{method}`"
            )),
            BindError::InvalidParams(detail) => ResponseError::invalid_params(detail.clone()),
        }
    }
}

/// Selects one entry from `candidates` and marshals its argument vector.
pub fn bind(
    candidates: &[Arc<MethodEntry>],
    params: Option<&Value>,
    cancellation: &CancellationToken,
) -> Result<(Arc<MethodEntry>, Arguments), BindError> {
    let mut matches = candidates
        .iter()
        .filter(|entry| matches_shape(entry, params));

    let Some(selected) = matches.next() else {
        return Err(BindError::NoMatch);
    };
    let extra = matches.count();
    if extra > 0 {
        return Err(BindError::Ambiguous { matched: extra + 1 });
    }

    let args = marshal(selected, params, cancellation)?;
    Ok((selected.clone(), args))
}

/// Shape-level candidate match; does not convert any values.
pub fn matches_shape(entry: &MethodEntry, params: Option<&Value>) -> bool {
    let bindable: Vec<&ParameterEntry> = entry.bindable_params().collect();

    match params {
        None | Some(Value::Null) => bindable.iter().all(|param| param.optional),
        Some(Value::Object(map)) => {
            for param in &bindable {
                match map.get(&param.name) {
                    Some(token) => {
                        if !kind_matches(param, token) {
                            return false;
                        }
                    }
                    None if param.optional => {}
                    None => return false,
                }
            }
            entry.allow_extra_params
                || map
                    .keys()
                    .all(|key| bindable.iter().any(|param| param.name == *key))
        }
        Some(Value::Array(items)) => {
            if items.len() > bindable.len() && !entry.allow_extra_params {
                return false;
            }
            bindable.iter().enumerate().all(|(index, param)| match items.get(index) {
                Some(token) => kind_matches(param, token),
                None => param.optional,
            })
        }
        // Primitive params are rejected before dispatch; treat defensively
        // as no match if one slips through.
        Some(_) => false,
    }
}

/// The (declared-type family, JSON token kind) compatibility table.
fn kind_matches(param: &ParameterEntry, token: &Value) -> bool {
    match token {
        Value::Null => param.nullable || matches!(param.kind, ParamKind::Id | ParamKind::Any),
        Value::Bool(_) => matches!(param.kind, ParamKind::Boolean | ParamKind::Any),
        Value::Number(number) => match param.kind {
            // JSON does not distinguish the numeric families; conversion at
            // the Arguments boundary enforces integrality.
            ParamKind::Integer | ParamKind::Number | ParamKind::Any => true,
            ParamKind::Id => number.is_i64() || number.is_u64(),
            _ => false,
        },
        Value::String(_) => matches!(
            param.kind,
            ParamKind::String | ParamKind::Id | ParamKind::Any
        ),
        Value::Array(_) => matches!(param.kind, ParamKind::Array | ParamKind::Any),
        Value::Object(_) => matches!(param.kind, ParamKind::Object | ParamKind::Any),
    }
}

/// Produces the argument vector for an already-selected entry.
///
/// Cancellation slots are filled from `cancellation`; missing optional
/// parameters take their declared default or a type-appropriate zero.
pub fn marshal(
    entry: &MethodEntry,
    params: Option<&Value>,
    cancellation: &CancellationToken,
) -> Result<Arguments, BindError> {
    let mut items = Vec::with_capacity(entry.params.len());
    let mut position = 0usize;

    for param in &entry.params {
        if param.is_cancellation() {
            items.push(Argument::Cancellation(cancellation.clone()));
            continue;
        }

        let token = match params {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => map.get(&param.name).cloned(),
            Some(Value::Array(elements)) => elements.get(position).cloned(),
            Some(other) => {
                return Err(BindError::InvalidParams(format!(
                    "params must be an object or array, got {other}"
                )))
            }
        };
        position += 1;

        match token {
            Some(value) => items.push(Argument::Json(value)),
            None if param.optional => {
                let substitute = param.default.clone().unwrap_or_else(|| param.zero_value());
                items.push(Argument::Json(substitute));
            }
            None => {
                return Err(BindError::InvalidParams(format!(
                    "missing required parameter `{}`",
                    param.name
                )))
            }
        }
    }

    Ok(Arguments { items })
}
