//! The script value model.
//!
//! A [`Var`] is a dynamically typed datum: a type-tagged payload plus an
//! insertion-ordered map of named children. The one structure serves as the
//! value universe, the scope chain and the object heap: globals are
//! children of the root, call frames are transient objects whose children
//! are the arguments, and array elements are children named by their decimal
//! index. The `IndexMap` preserves insertion order for enumeration while
//! still providing by-name lookup, which is what keeps argument positions
//! and array indices meaningful.
//!
//! Operations that touch more than one value (child management, deep copy,
//! arithmetic dispatch, string dumps) are implemented on [`Heap`] since they
//! need to resolve ids.

use std::{mem, rc::Rc};

use indexmap::IndexMap;

use crate::{
    error::{Exception, RunResult},
    heap::{Heap, HeapId},
    reference::VarRef,
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceError, ResourceTracker},
    token::TokenKind,
};

/// Name of the shared-prototype child used for method/field inheritance.
pub(crate) const PROTOTYPE: &str = "prototype";
/// Name of the synthetic read-only child on arrays and strings.
pub(crate) const LENGTH: &str = "length";
/// Name of the result slot every call frame carries.
pub(crate) const RETURN_SLOT: &str = "return";
/// Name of the receiver child added to method call frames.
pub(crate) const THIS: &str = "this";

/// Index into a context's native function registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NativeId(pub(crate) usize);

/// Payload of a function value: the captured body source for script
/// functions, or a registry binding for natives.
#[derive(Debug, Clone, Default)]
pub(crate) struct FunctionData {
    /// Source text of the function body between the matched braces, captured
    /// at definition time and re-lexed on each invocation. Empty for natives.
    pub(crate) body: Rc<str>,
    /// Set when the function is backed by a host callback.
    pub(crate) native: Option<NativeId>,
}

/// Type tag and payload of a value.
#[derive(Debug, Clone)]
pub(crate) enum VarData {
    Undefined,
    Null,
    Int(i64),
    Double(f64),
    Str(String),
    Function(FunctionData),
    Object,
    Array,
}

/// A single script value: payload plus named children.
#[derive(Debug)]
pub(crate) struct Var {
    data: VarData,
    children: IndexMap<String, HeapId>,
    exec_count: u32,
}

impl Var {
    fn with_data(data: VarData) -> Self {
        Self {
            data,
            children: IndexMap::new(),
            exec_count: 0,
        }
    }

    pub(crate) fn undefined() -> Self {
        Self::with_data(VarData::Undefined)
    }

    pub(crate) fn null() -> Self {
        Self::with_data(VarData::Null)
    }

    pub(crate) fn int(value: i64) -> Self {
        Self::with_data(VarData::Int(value))
    }

    pub(crate) fn bool(value: bool) -> Self {
        Self::with_data(VarData::Int(i64::from(value)))
    }

    pub(crate) fn double(value: f64) -> Self {
        Self::with_data(VarData::Double(value))
    }

    pub(crate) fn str(value: String) -> Self {
        Self::with_data(VarData::Str(value))
    }

    pub(crate) fn object() -> Self {
        Self::with_data(VarData::Object)
    }

    pub(crate) fn array() -> Self {
        Self::with_data(VarData::Array)
    }

    pub(crate) fn function(data: FunctionData) -> Self {
        Self::with_data(VarData::Function(data))
    }

    pub(crate) fn data(&self) -> &VarData {
        &self.data
    }

    pub(crate) fn is_undefined(&self) -> bool {
        matches!(self.data, VarData::Undefined)
    }

    pub(crate) fn is_null(&self) -> bool {
        matches!(self.data, VarData::Null)
    }

    pub(crate) fn is_int(&self) -> bool {
        matches!(self.data, VarData::Int(_))
    }

    pub(crate) fn is_double(&self) -> bool {
        matches!(self.data, VarData::Double(_))
    }

    pub(crate) fn is_str(&self) -> bool {
        matches!(self.data, VarData::Str(_))
    }

    pub(crate) fn is_function(&self) -> bool {
        matches!(self.data, VarData::Function(_))
    }

    pub(crate) fn is_object(&self) -> bool {
        matches!(self.data, VarData::Object)
    }

    pub(crate) fn is_array(&self) -> bool {
        matches!(self.data, VarData::Array)
    }

    /// Numeric for arithmetic dispatch: Int, Double, Null and Undefined all
    /// coerce to numbers (the latter two as zero).
    pub(crate) fn is_numeric_like(&self) -> bool {
        matches!(
            self.data,
            VarData::Int(_) | VarData::Double(_) | VarData::Null | VarData::Undefined
        )
    }

    /// A value with no children; such values are passed by copy into calls.
    pub(crate) fn is_basic(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self.data {
            VarData::Undefined => "Undefined",
            VarData::Null => "Null",
            VarData::Int(_) => "Int",
            VarData::Double(_) => "Double",
            VarData::Str(_) => "Str",
            VarData::Function(_) => "Function",
            VarData::Object => "Object",
            VarData::Array => "Array",
        }
    }

    pub(crate) fn as_int(&self) -> i64 {
        match &self.data {
            VarData::Int(v) => *v,
            VarData::Double(v) => *v as i64,
            _ => 0,
        }
    }

    pub(crate) fn as_double(&self) -> f64 {
        match &self.data {
            VarData::Double(v) => *v,
            VarData::Int(v) => *v as f64,
            _ => 0.0,
        }
    }

    pub(crate) fn as_bool(&self) -> bool {
        self.as_int() != 0
    }

    /// String form of a scalar payload. Objects and arrays need the heap to
    /// walk their children; use [`Heap::var_to_string`] for those.
    pub(crate) fn as_string_scalar(&self) -> String {
        match &self.data {
            VarData::Int(v) => v.to_string(),
            VarData::Double(v) => ryu::Buffer::new().format(*v).to_owned(),
            VarData::Null => "null".to_owned(),
            VarData::Undefined => "undefined".to_owned(),
            VarData::Str(s) => s.clone(),
            VarData::Function(f) => f.body.to_string(),
            VarData::Object | VarData::Array => String::new(),
        }
    }

    /// Rebinds the payload to an integer in place. Children are untouched;
    /// this is the shift-operator rebind, not an assignment.
    pub(crate) fn set_int(&mut self, value: i64) {
        self.data = VarData::Int(value);
    }

    pub(crate) fn set_function_body(&mut self, body: Rc<str>) {
        if let VarData::Function(f) = &mut self.data {
            f.body = body;
        }
    }

    pub(crate) fn function_data(&self) -> Option<&FunctionData> {
        match &self.data {
            VarData::Function(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn children(&self) -> &IndexMap<String, HeapId> {
        &self.children
    }

    pub(crate) fn into_children(self) -> indexmap::map::IntoIter<String, HeapId> {
        self.children.into_iter()
    }

    pub(crate) fn bump_exec_count(&mut self) {
        self.exec_count = self.exec_count.wrapping_add(1);
    }

    pub(crate) fn exec_count(&self) -> u32 {
        self.exec_count
    }

    /// Rough per-value memory estimate for resource tracking.
    pub(crate) fn estimate_size(&self) -> usize {
        let payload = match &self.data {
            VarData::Str(s) => s.capacity(),
            VarData::Function(f) => f.body.len(),
            _ => 0,
        };
        mem::size_of::<Self>() + payload + self.children.len() * mem::size_of::<(String, HeapId)>()
    }
}

/// `true` when `name` is the decimal form of an array index.
pub(crate) fn is_numeric_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

impl<T: ResourceTracker> Heap<T> {
    /// Inserts `child` under `parent`, consuming the caller's reference count
    /// on `child`.
    ///
    /// If a child of that name already exists its slot is repointed in place:
    /// the entry keeps its position in the enumeration order and the old
    /// target loses the slot's count. An Undefined parent is promoted to
    /// Object by its first child.
    pub(crate) fn add_child(&mut self, parent: HeapId, name: &str, child: HeapId) {
        let parent_var = self.get_mut(parent);
        if parent_var.is_undefined() {
            parent_var.data = VarData::Object;
        }
        let old = parent_var.children.insert(name.to_owned(), child);
        if let Some(old) = old {
            self.dec_ref(old);
        }
    }

    /// Looks up a named child: the owning slot, or a fresh transient
    /// reference for the synthetic `length` of arrays and strings, else
    /// `None`.
    pub(crate) fn find_child(&mut self, parent: HeapId, name: &str) -> Result<Option<VarRef>, ResourceError> {
        if let Some(&child) = self.get(parent).children.get(name) {
            return Ok(Some(VarRef::slot(self, name, parent, child)));
        }
        if name == LENGTH {
            let parent_var = self.get(parent);
            if parent_var.is_array() {
                let len = self.array_length(parent);
                let id = self.allocate(Var::int(len))?;
                return Ok(Some(VarRef::adopt(id)));
            }
            if let VarData::Str(s) = &parent_var.data {
                let len = s.chars().count() as i64;
                let id = self.allocate(Var::int(len))?;
                return Ok(Some(VarRef::adopt(id)));
            }
        }
        Ok(None)
    }

    /// Looks up a named child, creating an Undefined one on a miss.
    pub(crate) fn find_or_create_child(&mut self, parent: HeapId, name: &str) -> Result<VarRef, ResourceError> {
        if let Some(found) = self.find_child(parent, name)? {
            return Ok(found);
        }
        let child = self.allocate(Var::undefined())?;
        self.add_child(parent, name, child);
        Ok(VarRef::slot(self, name, parent, child))
    }

    /// Walks a dotted path below `parent`, creating intermediate Objects as
    /// needed, and returns a reference to the final segment's slot.
    pub(crate) fn find_or_create_by_path(&mut self, parent: HeapId, path: &str) -> Result<VarRef, ResourceError> {
        match path.split_once('.') {
            None => self.find_or_create_child(parent, path),
            Some((head, rest)) => {
                let head_ref = self.find_or_create_child(parent, head)?;
                // The slot in `parent` keeps the intermediate value alive.
                let next = head_ref.id();
                head_ref.release(self);
                self.find_or_create_by_path(next, rest)
            }
        }
    }

    /// Detaches a named child without releasing it: the slot's count
    /// transfers to the caller. Preserves the order of remaining children.
    pub(crate) fn take_child(&mut self, parent: HeapId, name: &str) -> Option<HeapId> {
        self.get_mut(parent).children.shift_remove(name)
    }

    /// Unlinks a named child, releasing the slot's count on it.
    pub(crate) fn remove_child(&mut self, parent: HeapId, name: &str) -> RunResult<()> {
        match self.take_child(parent, name) {
            Some(old) => {
                self.dec_ref(old);
                Ok(())
            }
            None => Err(Exception::reference(format!("Removing non-existent child '{name}'"))),
        }
    }

    /// Max numeric-index child + 1, or 0 for non-arrays.
    pub(crate) fn array_length(&self, id: HeapId) -> i64 {
        let var = self.get(id);
        if !var.is_array() {
            return 0;
        }
        let mut highest: i64 = -1;
        for name in var.children.keys() {
            if is_numeric_name(name)
                && let Ok(index) = name.parse::<i64>()
                && index > highest
            {
                highest = index;
            }
        }
        highest + 1
    }

    /// Clones payload and children recursively; the `prototype` child is
    /// shared rather than cloned. Depth-capped because assignments can tie
    /// a value into its own child map.
    pub(crate) fn deep_copy(&mut self, id: HeapId) -> RunResult<HeapId> {
        self.deep_copy_at(id, 0)
    }

    fn deep_copy_at(&mut self, id: HeapId, depth: usize) -> RunResult<HeapId> {
        if depth > MAX_DATA_RECURSION_DEPTH {
            return Err(Exception::reference("Deep copy exceeded the maximum value depth"));
        }
        let source = self.get(id);
        let data = source.data.clone();
        let pairs: Vec<(String, HeapId)> = source
            .children
            .iter()
            .map(|(name, &child)| (name.clone(), child))
            .collect();

        let copy = self.allocate(Var::with_data(data))?;
        for (name, child) in pairs {
            if name == PROTOTYPE {
                self.inc_ref(child);
                self.add_child(copy, &name, child);
            } else {
                let child_copy = self.deep_copy_at(child, depth + 1)?;
                self.add_child(copy, &name, child_copy);
            }
        }
        Ok(copy)
    }

    /// String form of any value; objects and arrays render as a JSON-like
    /// dump of the child tree.
    pub(crate) fn var_to_string(&self, id: HeapId) -> String {
        let var = self.get(id);
        match var.data {
            VarData::Object | VarData::Array => self.var_to_json(id, 0).to_string(),
            _ => var.as_string_scalar(),
        }
    }

    /// Walks the value tree into a `serde_json` value. Scalars map directly,
    /// functions and undefined map to null, arrays are enumerated by index
    /// with null holes. Depth-capped against prototype cycles.
    pub(crate) fn var_to_json(&self, id: HeapId, depth: usize) -> serde_json::Value {
        if depth > MAX_DATA_RECURSION_DEPTH {
            return serde_json::Value::Null;
        }
        let var = self.get(id);
        match &var.data {
            VarData::Int(v) => serde_json::Value::from(*v),
            VarData::Double(v) => serde_json::Value::from(*v),
            VarData::Str(s) => serde_json::Value::from(s.clone()),
            VarData::Object => {
                let mut map = serde_json::Map::new();
                for (name, &child) in &var.children {
                    map.insert(name.clone(), self.var_to_json(child, depth + 1));
                }
                serde_json::Value::Object(map)
            }
            VarData::Array => {
                let len = self.array_length(id);
                let mut items = Vec::with_capacity(len.max(0) as usize);
                for index in 0..len {
                    let item = var
                        .children
                        .get(index.to_string().as_str())
                        .map_or(serde_json::Value::Null, |&child| self.var_to_json(child, depth + 1));
                    items.push(item);
                }
                serde_json::Value::Array(items)
            }
            VarData::Undefined | VarData::Null | VarData::Function(_) => serde_json::Value::Null,
        }
    }

    /// Loose equality used by `==`, `===` payload comparison and `!`.
    ///
    /// Dispatches on the first operand like the arithmetic table: undefined
    /// pairs are equal, numeric pairs compare numerically, objects and
    /// arrays compare by identity, everything else by string form. Never
    /// fails.
    pub(crate) fn loose_equals(&self, a: HeapId, b: HeapId) -> bool {
        let first = self.get(a);
        let second = self.get(b);
        if first.is_undefined() && second.is_undefined() {
            return true;
        }
        if first.is_numeric_like() && second.is_numeric_like() {
            if first.is_double() || second.is_double() {
                return first.as_double() == second.as_double();
            }
            return first.as_int() == second.as_int();
        }
        if first.is_array() || first.is_object() {
            return a == b;
        }
        self.var_to_string(a) == self.var_to_string(b)
    }

    /// Applies a binary operator to two values, allocating the result.
    ///
    /// The caller keeps its counts on both operands and owns the returned
    /// id. Dispatch is by the type pair; an operator unsupported for the
    /// pair is an evaluation error.
    pub(crate) fn math_op(&mut self, a: HeapId, b: HeapId, op: TokenKind) -> RunResult<HeapId> {
        use TokenKind::{
            BitAnd, BitOr, BitXor, Equal, Gt, Gte, Lt, Lte, Minus, NotEqual, Percent, Plus, Slash, Star, StrictEqual,
            StrictNotEqual,
        };

        if op == StrictEqual || op == StrictNotEqual {
            let same_tag = mem::discriminant(&self.get(a).data) == mem::discriminant(&self.get(b).data);
            let equal = same_tag && self.loose_equals(a, b);
            let result = if op == StrictEqual { equal } else { !equal };
            return Ok(self.allocate(Var::bool(result))?);
        }

        let first = self.get(a);
        let second = self.get(b);

        if first.is_undefined() && second.is_undefined() {
            let result = match op {
                Equal => Var::bool(true),
                NotEqual => Var::bool(false),
                _ => Var::undefined(),
            };
            return Ok(self.allocate(result)?);
        }

        if first.is_numeric_like() && second.is_numeric_like() {
            if !first.is_double() && !second.is_double() {
                let x = first.as_int();
                let y = second.as_int();
                let result = match op {
                    Plus => Var::int(x.wrapping_add(y)),
                    Minus => Var::int(x.wrapping_sub(y)),
                    Star => Var::int(x.wrapping_mul(y)),
                    Slash => {
                        if y == 0 {
                            return Err(Exception::eval("Division by zero"));
                        }
                        Var::int(x.wrapping_div(y))
                    }
                    Percent => {
                        if y == 0 {
                            return Err(Exception::eval("Division by zero"));
                        }
                        Var::int(x.wrapping_rem(y))
                    }
                    BitAnd => Var::int(x & y),
                    BitOr => Var::int(x | y),
                    BitXor => Var::int(x ^ y),
                    Equal => Var::bool(x == y),
                    NotEqual => Var::bool(x != y),
                    Lt => Var::bool(x < y),
                    Lte => Var::bool(x <= y),
                    Gt => Var::bool(x > y),
                    Gte => Var::bool(x >= y),
                    _ => {
                        return Err(Exception::eval(format!("Operation {op} is not supported on the Int type")));
                    }
                };
                return Ok(self.allocate(result)?);
            }

            let x = first.as_double();
            let y = second.as_double();
            let result = match op {
                Plus => Var::double(x + y),
                Minus => Var::double(x - y),
                Star => Var::double(x * y),
                Slash => Var::double(x / y),
                Equal => Var::bool(x == y),
                NotEqual => Var::bool(x != y),
                Lt => Var::bool(x < y),
                Lte => Var::bool(x <= y),
                Gt => Var::bool(x > y),
                Gte => Var::bool(x >= y),
                _ => {
                    return Err(Exception::eval(format!(
                        "Operation {op} is not supported on the Double type"
                    )));
                }
            };
            return Ok(self.allocate(result)?);
        }

        if first.is_array() || first.is_object() {
            // Reference identity only.
            let type_name = first.kind_name();
            let result = match op {
                Equal => Var::bool(a == b),
                NotEqual => Var::bool(a != b),
                _ => {
                    return Err(Exception::eval(format!(
                        "Operation {op} is not supported on the {type_name} type"
                    )));
                }
            };
            return Ok(self.allocate(result)?);
        }

        let x = self.var_to_string(a);
        let y = self.var_to_string(b);
        let result = match op {
            Plus => Var::str(x + &y),
            Equal => Var::bool(x == y),
            NotEqual => Var::bool(x != y),
            // Relational operators on strings compare by equality, not
            // lexicographically. Kept as-is; see DESIGN.md.
            Lt | Lte | Gt | Gte => Var::bool(x == y),
            _ => {
                return Err(Exception::eval(format!("Operation {op} is not supported on the Str type")));
            }
        };
        Ok(self.allocate(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    fn heap() -> Heap<NoLimitTracker> {
        Heap::new(NoLimitTracker)
    }

    fn op_int(heap: &mut Heap<NoLimitTracker>, a: i64, b: i64, op: TokenKind) -> i64 {
        let x = heap.allocate(Var::int(a)).unwrap();
        let y = heap.allocate(Var::int(b)).unwrap();
        let r = heap.math_op(x, y, op).unwrap();
        let value = heap.get(r).as_int();
        heap.dec_ref(x);
        heap.dec_ref(y);
        heap.dec_ref(r);
        value
    }

    #[test]
    fn integer_arithmetic() {
        let mut heap = heap();
        assert_eq!(op_int(&mut heap, 7, 2, TokenKind::Plus), 9);
        assert_eq!(op_int(&mut heap, 7, 2, TokenKind::Slash), 3, "integer truncation");
        assert_eq!(op_int(&mut heap, 7, 2, TokenKind::Percent), 1);
        assert_eq!(op_int(&mut heap, 6, 3, TokenKind::BitXor), 5);
        assert_eq!(op_int(&mut heap, 3, 5, TokenKind::Lt), 1);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn division_by_zero_fails() {
        let mut heap = heap();
        let x = heap.allocate(Var::int(1)).unwrap();
        let y = heap.allocate(Var::int(0)).unwrap();
        let err = heap.math_op(x, y, TokenKind::Slash).unwrap_err();
        assert!(err.message().contains("Division by zero"));
        heap.dec_ref(x);
        heap.dec_ref(y);
    }

    #[test]
    fn mixed_numeric_compares_as_double() {
        let mut heap = heap();
        let x = heap.allocate(Var::int(2)).unwrap();
        let y = heap.allocate(Var::double(2.0)).unwrap();
        let r = heap.math_op(x, y, TokenKind::Equal).unwrap();
        assert_eq!(heap.get(r).as_int(), 1);
        heap.dec_ref(x);
        heap.dec_ref(y);
        heap.dec_ref(r);
    }

    #[test]
    fn string_concat_wins_over_numbers() {
        let mut heap = heap();
        let x = heap.allocate(Var::str("5".to_owned())).unwrap();
        let y = heap.allocate(Var::int(3)).unwrap();
        let r = heap.math_op(x, y, TokenKind::Plus).unwrap();
        assert_eq!(heap.get(r).as_string_scalar(), "53");
        heap.dec_ref(x);
        heap.dec_ref(y);
        heap.dec_ref(r);
    }

    #[test]
    fn strict_equal_requires_same_tag() {
        let mut heap = heap();
        let x = heap.allocate(Var::int(0)).unwrap();
        let y = heap.allocate(Var::double(0.0)).unwrap();
        let loose = heap.math_op(x, y, TokenKind::Equal).unwrap();
        let strict = heap.math_op(x, y, TokenKind::StrictEqual).unwrap();
        assert_eq!(heap.get(loose).as_int(), 1);
        assert_eq!(heap.get(strict).as_int(), 0);
        for id in [x, y, loose, strict] {
            heap.dec_ref(id);
        }
    }

    #[test]
    fn add_child_promotes_and_repoints() {
        let mut heap = heap();
        let obj = heap.allocate(Var::undefined()).unwrap();
        let one = heap.allocate(Var::int(1)).unwrap();
        heap.add_child(obj, "a", one);
        assert!(heap.get(obj).is_object(), "undefined promotes to object");

        let two = heap.allocate(Var::int(2)).unwrap();
        heap.add_child(obj, "a", two);
        assert_eq!(heap.get(obj).children().len(), 1);
        let slot = heap.get(obj).children()["a"];
        assert_eq!(heap.get(slot).as_int(), 2);
        heap.dec_ref(obj);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut heap = heap();
        let obj = heap.allocate(Var::object()).unwrap();
        for name in ["b", "a", "c"] {
            let child = heap.allocate(Var::int(0)).unwrap();
            heap.add_child(obj, name, child);
        }
        let names: Vec<&str> = heap.get(obj).children().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        heap.dec_ref(obj);
    }

    #[test]
    fn array_length_is_max_index_plus_one() {
        let mut heap = heap();
        let arr = heap.allocate(Var::array()).unwrap();
        assert_eq!(heap.array_length(arr), 0);
        for index in ["0", "4", "2"] {
            let child = heap.allocate(Var::int(1)).unwrap();
            heap.add_child(arr, index, child);
        }
        assert_eq!(heap.array_length(arr), 5);
        heap.dec_ref(arr);
    }

    #[test]
    fn deep_copy_shares_prototype() {
        let mut heap = heap();
        let proto = heap.allocate(Var::object()).unwrap();
        let obj = heap.allocate(Var::object()).unwrap();
        let field = heap.allocate(Var::int(9)).unwrap();
        heap.add_child(obj, "x", field);
        heap.inc_ref(proto);
        heap.add_child(obj, PROTOTYPE, proto);

        let copy = heap.deep_copy(obj).unwrap();
        let copy_children = heap.get(copy).children();
        assert_eq!(copy_children[PROTOTYPE], proto, "prototype child is shared");
        assert_ne!(copy_children["x"], heap.get(obj).children()["x"]);

        heap.dec_ref(copy);
        heap.dec_ref(obj);
        heap.dec_ref(proto);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn json_dump_of_object_tree() {
        let mut heap = heap();
        let obj = heap.allocate(Var::object()).unwrap();
        let a = heap.allocate(Var::int(1)).unwrap();
        heap.add_child(obj, "a", a);
        let s = heap.allocate(Var::str("two".to_owned())).unwrap();
        heap.add_child(obj, "b", s);
        assert_eq!(heap.var_to_string(obj), r#"{"a":1,"b":"two"}"#);
        heap.dec_ref(obj);
    }
}
