//! The dynamic document tree exchanged with a NETCONF server
//!
//! Every request body and every decoded reply is a [`Value`]: a primitive,
//! an ordered mapping, or a list. Two mapping keys are reserved by the XML
//! codec: `"$"` holds the element's attributes as a sub-mapping and `"_"`
//! holds the element text when the element also carries attributes or
//! children. No other component produces those keys.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Reserved mapping key for XML attributes.
pub const ATTRIBUTES: &str = "$";

/// Reserved mapping key for mixed element text.
pub const TEXT: &str = "_";

/// An ordered mapping from element name to value.
pub type Map = IndexMap<String, Value>;

/// A document tree value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Map(Map),
    List(Vec<Value>),
}

impl Value {
    /// An empty mapping.
    pub fn map() -> Value {
        Value::Map(Map::new())
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Map(_) | Value::List(_))
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Coerces this value into a mapping, replacing non-mapping content.
    pub(crate) fn make_map(&mut self) -> &mut Map {
        if !matches!(self, Value::Map(_)) {
            *self = Value::map();
        }
        match self {
            Value::Map(map) => map,
            _ => unreachable!("value was just made a mapping"),
        }
    }

    /// Mapping member by name, `None` for non-mappings.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.as_map_mut().and_then(|m| m.get_mut(key))
    }

    /// Follows a chain of mapping keys from this value.
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    pub fn get_path_mut(&mut self, path: &[String]) -> Option<&mut Value> {
        path.iter().try_fold(self, |node, key| node.get_mut(key))
    }

    /// Renders a primitive as element text. Mappings and lists have no
    /// text form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::Str(s) => Some(s.clone()),
            Value::Map(_) | Value::List(_) => None,
        }
    }
}

/// Recursively merges `src` into `dst`. Mappings merge key-wise; any other
/// pairing overwrites the destination.
pub fn deep_merge(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Map(d), Value::Map(s)) => {
            for (key, value) in s {
                match d.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        d.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (d, s) => *d = s.clone(),
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (key, value) in m {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::List(items) => serializer.collect_seq(items),
        }
    }
}
