//! Typed conversion between component values and generic data nodes.
//!
//! A data node is a [`serde_json::Value`]. Prototypes and save data are both
//! expressed as nodes; these helpers are the only place values cross between
//! the typed and the generic representation.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Generic, self-describing tree value.
pub type DataNode = serde_json::Value;

/// Errors raised while converting between typed values and data nodes.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("cannot read {type_name} from data node: {source}")]
    Read {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot write {type_name} to data node: {source}")]
    Write {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("component is not a {expected}")]
    TypeMismatch { expected: &'static str },
}

/// Read a typed value out of `node`.
pub fn read_value<T: DeserializeOwned>(node: &DataNode) -> Result<T, SerializationError> {
    T::deserialize(node).map_err(|source| SerializationError::Read {
        type_name: std::any::type_name::<T>(),
        source,
    })
}

/// Write a typed value into a fresh node.
pub fn write_value<T: Serialize>(value: &T) -> Result<DataNode, SerializationError> {
    serde_json::to_value(value).map_err(|source| SerializationError::Write {
        type_name: std::any::type_name::<T>(),
        source,
    })
}

/// Deep-copy `source` into `target` through the node representation.
pub fn copy<T: Serialize + DeserializeOwned>(
    source: &T,
    target: &mut T,
) -> Result<(), SerializationError> {
    *target = read_value(&write_value(source)?)?;
    Ok(())
}

/// Overlay `overlay` onto `base`.
///
/// Objects merge key by key, recursively. Any other value (including arrays)
/// replaces whatever `base` held.
pub fn merge_nodes(base: &mut DataNode, overlay: &DataNode) {
    match (base, overlay) {
        (DataNode::Object(base_map), DataNode::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_nodes(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
