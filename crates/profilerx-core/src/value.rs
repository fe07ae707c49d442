//! Host value descriptions and shape extraction.
//!
//! The profiler never sees the host's actual tensors. The adapter describes
//! each node input/output as a [`NodeValue`], and [`NodeIo::shapes`] reduces
//! those descriptions to the `inputSizes`/`outputSizes` maps stored in a
//! [`NodeProfile`](crate::profile::NodeProfile):
//!
//! - tensor-like values contribute their shape,
//! - plain sequences contribute `[len]`,
//! - everything else is omitted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::profile::ShapeMap;

/// Shape-relevant description of one host value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NodeValue {
    /// A tensor-like value with a known shape.
    Tensor { shape: Vec<usize> },
    /// A plain list or tuple of values.
    Sequence { items: Vec<NodeValue> },
    /// Anything without a meaningful size (scalars, strings, handles).
    Opaque,
}

impl NodeValue {
    pub fn tensor(shape: &[usize]) -> Self {
        NodeValue::Tensor {
            shape: shape.to_vec(),
        }
    }

    pub fn sequence(items: Vec<NodeValue>) -> Self {
        NodeValue::Sequence { items }
    }

    /// The shape descriptor this value contributes, if any.
    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            NodeValue::Tensor { shape } => Some(shape.clone()),
            NodeValue::Sequence { items } => Some(vec![items.len()]),
            NodeValue::Opaque => None,
        }
    }

    /// Interprets a loosely-typed JSON description, as sent over HTTP.
    ///
    /// - `{"shape": [1, 3, 512, 512]}` is a tensor,
    /// - an array whose elements are all non-negative integers is a tensor
    ///   shape written inline,
    /// - any other array is a sequence,
    /// - everything else is opaque.
    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(map) => match map.get("shape") {
                Some(shape) => Ok(NodeValue::Tensor {
                    shape: parse_shape(shape)?,
                }),
                None => Ok(NodeValue::Opaque),
            },
            Value::Array(items) => {
                if !items.is_empty() && items.iter().all(|v| v.as_u64().is_some()) {
                    Ok(NodeValue::Tensor {
                        shape: parse_shape(value)?,
                    })
                } else {
                    let items = items
                        .iter()
                        .map(NodeValue::from_json)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(NodeValue::Sequence { items })
                }
            }
            _ => Ok(NodeValue::Opaque),
        }
    }
}

fn parse_shape(value: &Value) -> Result<Vec<usize>, CoreError> {
    let dims = value.as_array().ok_or_else(|| CoreError::InvalidNodeValue {
        reason: "shape must be an array".to_string(),
    })?;
    dims.iter()
        .map(|d| {
            d.as_u64()
                .map(|d| d as usize)
                .ok_or_else(|| CoreError::InvalidNodeValue {
                    reason: format!("shape dimension {} is not a non-negative integer", d),
                })
        })
        .collect()
}

/// The full set of inputs or outputs handed to a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodeIo {
    /// No values (or the host could not provide them).
    #[default]
    Empty,
    /// Positional values, keyed `output_{i}` in the shape map.
    Positional(Vec<NodeValue>),
    /// Values keyed by name; the names are kept as shape-map keys.
    Named(Vec<(String, NodeValue)>),
}

impl NodeIo {
    /// Reduces the values to their shape descriptors, preserving order.
    pub fn shapes(&self) -> ShapeMap {
        let mut shapes = ShapeMap::new();
        match self {
            NodeIo::Empty => {}
            NodeIo::Positional(values) => {
                for (i, value) in values.iter().enumerate() {
                    if let Some(shape) = value.shape() {
                        shapes.insert(format!("output_{}", i), shape);
                    }
                }
            }
            NodeIo::Named(values) => {
                for (name, value) in values {
                    if let Some(shape) = value.shape() {
                        shapes.insert(name.clone(), shape);
                    }
                }
            }
        }
        shapes
    }

    /// Interprets a JSON object (named) or array (positional).
    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        match value {
            Value::Null => Ok(NodeIo::Empty),
            Value::Array(items) => Ok(NodeIo::Positional(
                items
                    .iter()
                    .map(NodeValue::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Value::Object(map) => Ok(NodeIo::Named(
                map.iter()
                    .map(|(k, v)| NodeValue::from_json(v).map(|v| (k.clone(), v)))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            other => Err(CoreError::InvalidNodeValue {
                reason: format!("expected object or array, got {}", other),
            }),
        }
    }
}

impl From<Vec<NodeValue>> for NodeIo {
    fn from(values: Vec<NodeValue>) -> Self {
        NodeIo::Positional(values)
    }
}

impl<K: Into<String>> FromIterator<(K, NodeValue)> for NodeIo {
    fn from_iter<I: IntoIterator<Item = (K, NodeValue)>>(iter: I) -> Self {
        NodeIo::Named(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
