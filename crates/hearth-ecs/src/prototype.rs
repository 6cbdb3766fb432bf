//! Named entity templates with single inheritance.
//!
//! Definitions are loaded as JSON:
//!
//! ```json
//! [
//!   { "id": "base_chara", "components": [ { "type": "Stats", "speed": 2 } ] },
//!   { "id": "putit", "parent": "base_chara",
//!     "components": [ { "type": "Stats", "speed": 5 }, { "type": "Ai", "!remove": true } ] }
//! ]
//! ```
//!
//! Every block names its component type with `"type"`; the remaining keys are
//! the component's data. A block with `"!remove": true` is a tombstone that
//! strips an inherited component. [`PrototypeStore::resync`] flattens each
//! chain (parent first, child overlays merged on top) and validates it against
//! the component registry. Instantiation only ever reads the flattened form.

use crate::component::ComponentRegistry;
use crate::serialization::{self, DataNode};
use crate::EcsError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

// ---------------------------------------------------------------------------
// PrototypeId
// ---------------------------------------------------------------------------

/// Name of a prototype definition.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrototypeId(String);

impl PrototypeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PrototypeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PrototypeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Debug for PrototypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrototypeId({:?})", self.0)
    }
}

impl fmt::Display for PrototypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// One component block of a prototype definition, as written by authors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentBlock {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "!remove", default, skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, DataNode>,
}

impl ComponentBlock {
    /// A data block. Non-object `data` contributes no fields.
    pub fn new(type_name: &str, data: DataNode) -> Self {
        let fields = match data {
            DataNode::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            type_name: type_name.to_owned(),
            remove: false,
            fields,
        }
    }

    /// A tombstone that strips `type_name` inherited from an ancestor.
    pub fn tombstone(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            remove: true,
            fields: serde_json::Map::new(),
        }
    }

    fn data(&self) -> DataNode {
        DataNode::Object(self.fields.clone())
    }
}

/// A prototype definition as loaded, before inheritance is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPrototype {
    pub id: PrototypeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<PrototypeId>,
    #[serde(default)]
    pub components: Vec<ComponentBlock>,
}

/// A component name paired with its data node.
///
/// Used for flattened prototype output and for saved entity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentData {
    #[serde(rename = "type")]
    pub type_name: String,
    pub data: DataNode,
}

/// A prototype after inheritance: the full ordered component list.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrototype {
    pub id: PrototypeId,
    pub parent: Option<PrototypeId>,
    pub components: Vec<ComponentData>,
}

impl ResolvedPrototype {
    pub fn has_component(&self, type_name: &str) -> bool {
        self.components.iter().any(|c| c.type_name == type_name)
    }
}

// ---------------------------------------------------------------------------
// PrototypeStore
// ---------------------------------------------------------------------------

/// Holds prototype definitions and their flattened forms.
#[derive(Debug, Default)]
pub struct PrototypeStore {
    definitions: BTreeMap<PrototypeId, EntityPrototype>,
    resolved: HashMap<PrototypeId, ResolvedPrototype>,
    /// Definitions changed since the last successful resync.
    stale: bool,
}

impl PrototypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single definition. Ids must be unique.
    pub fn load(&mut self, prototype: EntityPrototype) -> Result<(), EcsError> {
        if self.definitions.contains_key(&prototype.id) {
            return Err(EcsError::DuplicatePrototype {
                prototype: prototype.id,
            });
        }
        tracing::trace!(prototype = %prototype.id, "loaded prototype definition");
        self.definitions.insert(prototype.id.clone(), prototype);
        self.stale = true;
        Ok(())
    }

    /// Parse a JSON array of definitions and load them all.
    ///
    /// Parsing happens up front, so a malformed document loads nothing. A
    /// duplicate id stops loading at that definition.
    pub fn load_str(&mut self, json: &str) -> Result<usize, EcsError> {
        let prototypes: Vec<EntityPrototype> = serde_json::from_str(json)?;
        let count = prototypes.len();
        for prototype in prototypes {
            self.load(prototype)?;
        }
        Ok(count)
    }

    /// Flatten every inheritance chain and validate component names.
    ///
    /// Either every prototype resolves, or nothing is committed and an error
    /// names the first offending prototype. The store stays unresolved until
    /// a resync succeeds.
    pub fn resync(&mut self, registry: &ComponentRegistry) -> Result<(), EcsError> {
        let mut resolved: HashMap<PrototypeId, ResolvedPrototype> = HashMap::new();

        for id in self.definitions.keys() {
            if resolved.contains_key(id) {
                continue;
            }

            // Walk up to the nearest already-resolved ancestor (or the root).
            let mut chain: Vec<&EntityPrototype> = Vec::new();
            let mut on_chain: HashSet<&PrototypeId> = HashSet::new();
            let mut cursor = Some(id);
            while let Some(current) = cursor {
                if resolved.contains_key(current) {
                    break;
                }
                if !on_chain.insert(current) {
                    return Err(EcsError::CyclicPrototype {
                        prototype: current.clone(),
                    });
                }
                let definition = match self.definitions.get(current) {
                    Some(def) => def,
                    None => {
                        let child = chain.last().map(|def| def.id.clone());
                        return Err(EcsError::MissingParent {
                            prototype: child.unwrap_or_else(|| id.clone()),
                            parent: current.clone(),
                        });
                    }
                };
                chain.push(definition);
                cursor = definition.parent.as_ref();
            }

            // Resolve from the oldest unresolved ancestor down to `id`.
            for definition in chain.into_iter().rev() {
                let mut components = match &definition.parent {
                    Some(parent) => resolved
                        .get(parent)
                        .map(|p| p.components.clone())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                apply_blocks(definition, &mut components, registry)?;
                resolved.insert(
                    definition.id.clone(),
                    ResolvedPrototype {
                        id: definition.id.clone(),
                        parent: definition.parent.clone(),
                        components,
                    },
                );
            }
        }

        tracing::debug!(count = resolved.len(), "resynced prototypes");
        self.resolved = resolved;
        self.stale = false;
        Ok(())
    }

    /// Flattened form of `id`.
    ///
    /// Fails if definitions were loaded after the last resync, or if `id` is
    /// not defined.
    pub fn index(&self, id: &str) -> Result<&ResolvedPrototype, EcsError> {
        if self.stale {
            return Err(EcsError::PrototypesNotResolved);
        }
        self.resolved
            .get(id)
            .ok_or_else(|| EcsError::UnknownPrototype {
                prototype: PrototypeId::from(id),
            })
    }

    /// Component blocks to instantiate for `id`, in order.
    pub fn instantiate(&self, id: &str) -> Result<&[ComponentData], EcsError> {
        self.index(id).map(|p| p.components.as_slice())
    }

    /// Whether the flattened `id` carries a component named `type_name`.
    pub fn has_component(&self, id: &str, type_name: &str) -> bool {
        self.index(id)
            .map(|p| p.has_component(type_name))
            .unwrap_or(false)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    /// Defined ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &PrototypeId> {
        self.definitions.keys()
    }

    pub fn definition(&self, id: &str) -> Option<&EntityPrototype> {
        self.definitions.get(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Apply one definition's blocks on top of its inherited component list.
fn apply_blocks(
    definition: &EntityPrototype,
    components: &mut Vec<ComponentData>,
    registry: &ComponentRegistry,
) -> Result<(), EcsError> {
    for block in &definition.components {
        if registry.lookup_by_name(&block.type_name).is_none() {
            return Err(EcsError::PrototypeComponent {
                prototype: definition.id.clone(),
                source: Box::new(EcsError::UnknownComponent {
                    name: block.type_name.clone(),
                    registered: registry.registered_names().join(", "),
                }),
            });
        }

        let existing = components
            .iter()
            .position(|c| c.type_name == block.type_name);
        match (block.remove, existing) {
            (true, Some(index)) => {
                components.remove(index);
            }
            (true, None) => {
                tracing::debug!(
                    prototype = %definition.id,
                    component = %block.type_name,
                    "tombstone for a component that is not inherited"
                );
            }
            (false, Some(index)) => {
                serialization::merge_nodes(&mut components[index].data, &block.data());
            }
            (false, None) => components.push(ComponentData {
                type_name: block.type_name.clone(),
                data: block.data(),
            }),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
