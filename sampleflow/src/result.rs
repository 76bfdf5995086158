//! The uniform output of every consumer.
//!
//! A result is a tree of three node kinds: a scalar ([`ValueResultData`]), an
//! ordered list ([`ListResultData`]) and an insertion ordered string keyed map
//! ([`MapResultData`]). Nodes own their children and hold no reference to
//! their parent, so a tree has no cycles and serializes top-down as-is.

use rustc_hash::FxHashMap;
use serde::{
    Serialize, Serializer,
    ser::{SerializeMap, SerializeSeq},
};

/// A scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// A boolean
    Bool(bool),
    /// A signed integer, 64 bits wide
    Int(i64),
    /// A floating point, 64 bits wide
    Float(f64),
    /// Text
    Str(String),
}

impl Value {
    /// Get an f64 representation of this value, if it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(int) => Some(*int as f64),
            Value::Float(float) => Some(*float),
            Value::Bool(_) | Value::Str(_) => None,
        }
    }

    /// The text of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(int) => write!(f, "{int}"),
            Value::Float(float) => write!(f, "{float}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// A node wrapping exactly one scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValueResultData(Value);

impl ValueResultData {
    /// Wrap `value`.
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// The wrapped scalar.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// An append-only ordered sequence of nodes. Entries may be null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResultData {
    items: Vec<Option<ResultData>>,
}

impl ListResultData {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `item`. Always succeeds.
    pub fn add_result(&mut self, item: impl Into<Option<ResultData>>) -> bool {
        self.items.push(item.into());
        true
    }

    /// Number of entries, nulls included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Whether the list holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The entry at `index`, `None` if out of bounds or null.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ResultData> {
        self.items.get(index).and_then(Option::as_ref)
    }

    /// Mutable access to the entry at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ResultData> {
        self.items.get_mut(index).and_then(Option::as_mut)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Option<&ResultData>> {
        self.items.iter().map(Option::as_ref)
    }

    /// A snapshot of the entries in insertion order.
    #[must_use]
    pub fn to_list(&self) -> Vec<Option<ResultData>> {
        self.items.clone()
    }

    /// Reorder entries. Used by sorting utilities only, the tree is otherwise
    /// append-only.
    pub(crate) fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Option<ResultData>, &Option<ResultData>) -> std::cmp::Ordering,
    {
        self.items.sort_by(compare);
    }
}

impl FromIterator<ResultData> for ListResultData {
    fn from_iter<T: IntoIterator<Item = ResultData>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().map(Some).collect(),
        }
    }
}

impl Serialize for ListResultData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

/// A string keyed map that iterates in insertion order.
///
/// Replacing the value of an existing key keeps the key's original position.
#[derive(Debug, Clone, Default)]
pub struct MapResultData {
    entries: Vec<(String, ResultData)>,
    index: FxHashMap<String, usize>,
}

impl MapResultData {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, returning the previous value if any.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<ResultData>) -> Option<ResultData> {
        let key = key.into();
        let value = value.into();
        if let Some(&idx) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[idx].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    /// The value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ResultData> {
        self.index.get(key).map(|&idx| &self.entries[idx].1)
    }

    /// Mutable access to the value of `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut ResultData> {
        match self.index.get(key) {
            Some(&idx) => Some(&mut self.entries[idx].1),
            None => None,
        }
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResultData)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl PartialEq for MapResultData {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Serialize for MapResultData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Any node of a result tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultData {
    /// See [`ValueResultData`]
    Value(ValueResultData),
    /// See [`ListResultData`]
    List(ListResultData),
    /// See [`MapResultData`]
    Map(MapResultData),
}

impl ResultData {
    /// Shorthand for a scalar node.
    pub fn value(value: impl Into<Value>) -> Self {
        ResultData::Value(ValueResultData::new(value))
    }

    /// The scalar of a value node.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ResultData::Value(v) => Some(v.value()),
            _ => None,
        }
    }

    /// The list of a list node.
    #[must_use]
    pub fn as_list(&self) -> Option<&ListResultData> {
        match self {
            ResultData::List(l) => Some(l),
            _ => None,
        }
    }

    /// The map of a map node.
    #[must_use]
    pub fn as_map(&self) -> Option<&MapResultData> {
        match self {
            ResultData::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Dispatch to the `visitor` method matching this node's kind.
    pub fn accept<V: ResultDataVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            ResultData::Value(v) => visitor.visit_value(v),
            ResultData::List(l) => visitor.visit_list(l),
            ResultData::Map(m) => visitor.visit_map(m),
        }
    }
}

impl From<ValueResultData> for ResultData {
    fn from(v: ValueResultData) -> Self {
        ResultData::Value(v)
    }
}

impl From<ListResultData> for ResultData {
    fn from(v: ListResultData) -> Self {
        ResultData::List(v)
    }
}

impl From<MapResultData> for ResultData {
    fn from(v: MapResultData) -> Self {
        ResultData::Map(v)
    }
}

/// A walk over a result tree, for renderers that do not go through serde.
pub trait ResultDataVisitor {
    /// What each visit produces.
    type Output;

    /// Visit a scalar node.
    fn visit_value(&mut self, value: &ValueResultData) -> Self::Output;
    /// Visit a list node.
    fn visit_list(&mut self, list: &ListResultData) -> Self::Output;
    /// Visit a map node.
    fn visit_map(&mut self, map: &MapResultData) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_put_replaces_in_place() {
        let mut map = MapResultData::new();
        assert!(map.put("a", ResultData::value(1_i64)).is_none());
        assert!(map.put("b", ResultData::value(2_i64)).is_none());
        let previous = map.put("a", ResultData::value("one"));

        assert_eq!(previous, Some(ResultData::value(1_i64)));
        assert_eq!(map.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(map.get("a"), Some(&ResultData::value("one")));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn list_accepts_duplicates_and_nulls() {
        let mut list = ListResultData::new();
        assert!(list.add_result(ResultData::value(true)));
        assert!(list.add_result(ResultData::value(true)));
        assert!(list.add_result(None));
        assert_eq!(list.size(), 3);
        assert_eq!(list.get(2), None);
        assert_eq!(list.to_list()[0], Some(ResultData::value(true)));
    }

    #[test]
    fn value_equality_is_scalar_equality() {
        assert_eq!(ValueResultData::new(1.5), ValueResultData::new(1.5));
        assert_ne!(ValueResultData::new(1_i64), ValueResultData::new(1.0));
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut inner = ListResultData::new();
        inner.add_result(ResultData::value(1_i64));
        inner.add_result(None);
        inner.add_result(ResultData::value("x"));

        let mut map = MapResultData::new();
        map.put("z", ResultData::value(false));
        map.put("a", inner);
        map.put("m", ResultData::value(0.5));

        let json = serde_json::to_string(&ResultData::from(map)).expect("serializable");
        assert_eq!(json, r#"{"z":false,"a":[1,null,"x"],"m":0.5}"#);
    }

    struct Depth;

    impl ResultDataVisitor for Depth {
        type Output = usize;

        fn visit_value(&mut self, _: &ValueResultData) -> usize {
            1
        }

        fn visit_list(&mut self, list: &ListResultData) -> usize {
            1 + list.iter().flatten().map(|c| c.accept(self)).max().unwrap_or(0)
        }

        fn visit_map(&mut self, map: &MapResultData) -> usize {
            1 + map.iter().map(|(_, c)| c.accept(self)).max().unwrap_or(0)
        }
    }

    #[test]
    fn visitor_walks_every_level() {
        let mut leaf = MapResultData::new();
        leaf.put("k", ResultData::value(1_i64));
        let list: ListResultData = std::iter::once(ResultData::from(leaf)).collect();
        assert_eq!(ResultData::from(list).accept(&mut Depth), 3);
    }
}
