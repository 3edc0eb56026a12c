use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::authz::errors::AuthzError;
use crate::authz::types::{EntityUid, Value};

/// An entity with attributes and direct parents.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub uid: EntityUid,
    pub attrs: BTreeMap<String, Value>,
    pub parents: Vec<EntityUid>,
}

#[derive(Deserialize)]
struct RawEntity {
    uid: JsonValue,
    #[serde(default)]
    attrs: serde_json::Map<String, JsonValue>,
    #[serde(default)]
    parents: Vec<JsonValue>,
}

/// Entity store consulted for attribute lookups and hierarchy (`in`) checks.
#[derive(Debug, Clone, Default)]
pub struct Entities {
    entities: HashMap<EntityUid, Entity>,
}

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON entities document:
    ///
    /// ```json
    /// [{"uid": {"type": "User", "id": "alice"},
    ///   "attrs": {"dept": "eng"},
    ///   "parents": [{"type": "Group", "id": "admins"}]}]
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, AuthzError> {
        let raw: Vec<RawEntity> =
            serde_json::from_str(json).map_err(|e| AuthzError::InvalidEntities(e.to_string()))?;
        let mut entities = HashMap::with_capacity(raw.len());
        for item in raw {
            let uid = EntityUid::from_json(&item.uid).map_err(AuthzError::InvalidEntities)?;
            let attrs = item
                .attrs
                .iter()
                .map(|(k, v)| {
                    Value::from_json(v)
                        .map(|v| (k.clone(), v))
                        .map_err(|e| AuthzError::InvalidEntities(format!("{uid}.{k}: {e}")))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            let parents = item
                .parents
                .iter()
                .map(EntityUid::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map_err(AuthzError::InvalidEntities)?;
            if entities.contains_key(&uid) {
                return Err(AuthzError::InvalidEntities(format!("duplicate entity {uid}")));
            }
            entities.insert(
                uid.clone(),
                Entity {
                    uid,
                    attrs,
                    parents,
                },
            );
        }
        Ok(Self { entities })
    }

    pub fn get(&self, uid: &EntityUid) -> Option<&Entity> {
        self.entities.get(uid)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// `child in ancestor`: true when equal or when `ancestor` is reachable
    /// through the parent relation. Cycles in the hierarchy are tolerated.
    pub fn is_descendant_of(&self, child: &EntityUid, ancestor: &EntityUid) -> bool {
        if child == ancestor {
            return true;
        }
        let mut visited: HashSet<&EntityUid> = HashSet::new();
        let mut queue: VecDeque<&EntityUid> = VecDeque::new();
        queue.push_back(child);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(entity) = self.entities.get(current) else {
                continue;
            };
            for parent in &entity.parents {
                if parent == ancestor {
                    return true;
                }
                queue.push_back(parent);
            }
        }
        false
    }
}
