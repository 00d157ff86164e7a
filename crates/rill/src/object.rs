use crate::{
    error::{Exception, RunResult},
    heap::{Heap, HeapId},
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceTracker},
    value::{Var, VarData},
};

/// A script value that can be passed to or returned from the interpreter.
///
/// This is the public-facing value type. It owns all its data and can be
/// freely cloned, serialized or stored; unlike the internal heap values it
/// needs no interpreter context for any operation.
///
/// Most variants convert in both directions. `Repr` is output-only: it
/// stands in for values (functions) that have no direct `Object` mapping
/// and is rejected when handed back as an input.
///
/// # JSON
///
/// [`Object::to_json`] / [`Object::from_json`] map naturally: `Null` and
/// `Undefined` to JSON null, `Map` to a JSON object preserving insertion
/// order, `Array` to a JSON array, `Repr` to a `{"$repr": …}` marker. The
/// derived serde impls use the enum's tagged form instead, which
/// round-trips `Undefined` and `Repr` exactly.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    /// The `undefined` value.
    #[serde(alias = "undefined")]
    Undefined,
    /// The `null` value.
    #[serde(alias = "null")]
    Null,
    /// Integer value (64-bit signed).
    #[serde(alias = "int")]
    Int(i64),
    /// Float value (64-bit IEEE 754).
    #[serde(alias = "float", alias = "double")]
    Float(f64),
    /// String value.
    #[serde(alias = "str", alias = "string")]
    Str(String),
    /// Array: elements by index, with `Undefined` holes.
    #[serde(alias = "array")]
    Array(Vec<Object>),
    /// Object: insertion-ordered named fields.
    #[serde(alias = "map", alias = "object")]
    Map(Vec<(String, Object)>),
    /// Output-only: a printable stand-in for values with no `Object` mapping.
    Repr(String),
}

impl Object {
    /// Variant name for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Null => "Null",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Str(_) => "Str",
            Self::Array(_) => "Array",
            Self::Map(_) => "Map",
            Self::Repr(_) => "Repr",
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Natural JSON form of this value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Str(v) => serde_json::Value::from(v.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(pairs) => {
                let mut map = serde_json::Map::new();
                for (name, value) in pairs {
                    map.insert(name.clone(), value.to_json());
                }
                serde_json::Value::Object(map)
            }
            Self::Repr(text) => {
                let mut map = serde_json::Map::new();
                map.insert("$repr".to_owned(), serde_json::Value::from(text.clone()));
                serde_json::Value::Object(map)
            }
        }
    }

    /// Builds a value from its natural JSON form. JSON booleans become
    /// integers 1 and 0 the way script `true`/`false` literals do.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Int(i64::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => Self::Array(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => {
                Self::Map(map.iter().map(|(k, v)| (k.clone(), Self::from_json(v))).collect())
            }
        }
    }

    /// Allocates this value on the heap, returning an id the caller owns one
    /// count of.
    pub(crate) fn to_heap(&self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<HeapId> {
        match self {
            Self::Undefined => Ok(heap.allocate(Var::undefined())?),
            Self::Null => Ok(heap.allocate(Var::null())?),
            Self::Int(v) => Ok(heap.allocate(Var::int(*v))?),
            Self::Float(v) => Ok(heap.allocate(Var::double(*v))?),
            Self::Str(v) => Ok(heap.allocate(Var::str(v.clone()))?),
            Self::Array(items) => {
                let array = heap.allocate(Var::array())?;
                for (index, item) in items.iter().enumerate() {
                    if matches!(item, Self::Undefined) {
                        continue;
                    }
                    let child = item.to_heap(heap)?;
                    heap.add_child(array, &index.to_string(), child);
                }
                Ok(array)
            }
            Self::Map(pairs) => {
                let object = heap.allocate(Var::object())?;
                for (name, value) in pairs {
                    let child = value.to_heap(heap)?;
                    heap.add_child(object, name, child);
                }
                Ok(object)
            }
            Self::Repr(_) => Err(Exception::eval("Repr values are output-only and cannot be passed to scripts")),
        }
    }

    /// Reads a heap value out into an owned `Object`.
    pub(crate) fn from_heap(heap: &Heap<impl ResourceTracker>, id: HeapId) -> Self {
        Self::from_heap_at(heap, id, 0)
    }

    fn from_heap_at(heap: &Heap<impl ResourceTracker>, id: HeapId, depth: usize) -> Self {
        if depth > MAX_DATA_RECURSION_DEPTH {
            // Cyclic prototype chains bottom out as null rather than recursing.
            return Self::Null;
        }
        let var = heap.get(id);
        match var.data() {
            VarData::Undefined => Self::Undefined,
            VarData::Null => Self::Null,
            VarData::Int(v) => Self::Int(*v),
            VarData::Double(v) => Self::Float(*v),
            VarData::Str(s) => Self::Str(s.clone()),
            VarData::Function(_) => {
                let formals: Vec<&str> = var.children().keys().map(String::as_str).collect();
                Self::Repr(format!("function({})", formals.join(", ")))
            }
            VarData::Object => Self::Map(
                var.children()
                    .iter()
                    .map(|(name, &child)| (name.clone(), Self::from_heap_at(heap, child, depth + 1)))
                    .collect(),
            ),
            VarData::Array => {
                let len = heap.array_length(id);
                let mut items = Vec::with_capacity(len.max(0) as usize);
                for index in 0..len {
                    let item = var
                        .children()
                        .get(index.to_string().as_str())
                        .map_or(Self::Undefined, |&child| Self::from_heap_at(heap, child, depth + 1));
                    items.push(item);
                }
                Self::Array(items)
            }
        }
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl TryFrom<&Object> for i64 {
    type Error = Exception;

    fn try_from(value: &Object) -> Result<Self, Exception> {
        value
            .as_int()
            .ok_or_else(|| Exception::eval(format!("Expected Int, got {}", value.type_name())))
    }
}

impl TryFrom<&Object> for f64 {
    type Error = Exception;

    fn try_from(value: &Object) -> Result<Self, Exception> {
        value
            .as_float()
            .ok_or_else(|| Exception::eval(format!("Expected Float, got {}", value.type_name())))
    }
}

impl TryFrom<&Object> for String {
    type Error = Exception;

    fn try_from(value: &Object) -> Result<Self, Exception> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Exception::eval(format!("Expected Str, got {}", value.type_name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn json_round_trip() {
        let value = Object::Map(vec![
            ("a".to_owned(), Object::Int(1)),
            ("b".to_owned(), Object::Array(vec![Object::Str("x".to_owned()), Object::Null])),
        ]);
        let json = value.to_json();
        assert_eq!(json.to_string(), r#"{"a":1,"b":["x",null]}"#);
        let back = Object::from_json(&json);
        assert_eq!(
            back,
            Object::Map(vec![
                ("a".to_owned(), Object::Int(1)),
                ("b".to_owned(), Object::Array(vec![Object::Str("x".to_owned()), Object::Null])),
            ])
        );
    }

    #[test]
    fn heap_round_trip_for_trees() {
        let mut heap = Heap::new(NoLimitTracker);
        let value = Object::Map(vec![
            ("n".to_owned(), Object::Int(3)),
            ("items".to_owned(), Object::Array(vec![Object::Int(1), Object::Int(2)])),
        ]);
        let id = value.to_heap(&mut heap).unwrap();
        assert_eq!(Object::from_heap(&heap, id), value);
        heap.dec_ref(id);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn repr_is_rejected_as_input() {
        let mut heap = Heap::new(NoLimitTracker);
        let err = Object::Repr("function()".to_owned()).to_heap(&mut heap).unwrap_err();
        assert!(err.message().contains("output-only"));
    }
}
