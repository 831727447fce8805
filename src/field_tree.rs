//! In-memory shape shared by request bodies and normalized responses.
//!
//! QBXML schemas are positional, so a [`Record`] keeps its keys in insertion order and
//! the request builder emits them exactly in that order.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A request body or a normalized response node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTree {
    Scalar(String),
    Record(Record),
    List(Vec<FieldTree>),
}

/// Ordered mapping from element name to [`FieldTree`] with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    entries: Vec<(String, FieldTree)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`.
    ///
    /// A new key is appended. An existing key keeps its position and the previous value
    /// is returned.
    pub fn insert(&mut self, key: impl Into<String>, value: FieldTree) -> Option<FieldTree> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldTree>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldTree> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldTree> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldTree)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldTree)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, FieldTree)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, FieldTree);
    type IntoIter = std::vec::IntoIter<(String, FieldTree)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FieldTree {
    pub fn scalar(value: impl Into<String>) -> Self {
        FieldTree::Scalar(value.into())
    }

    pub fn record<K: Into<String>>(entries: impl IntoIterator<Item = (K, FieldTree)>) -> Self {
        FieldTree::Record(entries.into_iter().collect())
    }

    pub fn list(items: impl IntoIterator<Item = FieldTree>) -> Self {
        FieldTree::List(items.into_iter().collect())
    }

    /// An empty record, used for requests without fields.
    pub fn empty() -> Self {
        FieldTree::Record(Record::new())
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldTree::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            FieldTree::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            FieldTree::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldTree]> {
        match self {
            FieldTree::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldTree::List(_))
    }

    /// Looks up `key` when this node is a record.
    pub fn get(&self, key: &str) -> Option<&FieldTree> {
        self.as_record().and_then(|record| record.get(key))
    }

    /// Follows a chain of record keys, e.g. `["ClassRef", "FullName"]`.
    pub fn path(&self, keys: &[&str]) -> Option<&FieldTree> {
        keys.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Scalar text at the end of `keys`, if any.
    pub fn text_at(&self, keys: &[&str]) -> Option<&str> {
        self.path(keys).and_then(FieldTree::as_scalar)
    }

    /// Elements of a list, or the node itself as the only element.
    pub fn into_items(self) -> Vec<FieldTree> {
        match self {
            FieldTree::List(items) => items,
            other => vec![other],
        }
    }
}

impl From<&str> for FieldTree {
    fn from(value: &str) -> Self {
        FieldTree::Scalar(value.to_string())
    }
}

impl From<String> for FieldTree {
    fn from(value: String) -> Self {
        FieldTree::Scalar(value)
    }
}

impl From<Record> for FieldTree {
    fn from(record: Record) -> Self {
        FieldTree::Record(record)
    }
}

impl From<Vec<FieldTree>> for FieldTree {
    fn from(items: Vec<FieldTree>) -> Self {
        FieldTree::List(items)
    }
}

impl Serialize for FieldTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldTree::Scalar(value) => serializer.serialize_str(value),
            FieldTree::Record(record) => record.serialize(serializer),
            FieldTree::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order_and_replaces_in_place() {
        let mut record = Record::new();
        record.insert("IncludeLineItems", "1".into());
        record.insert("MaxReturned", "10".into());
        let previous = record.insert("IncludeLineItems", "0".into());

        assert_eq!(previous, Some(FieldTree::scalar("1")));
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["IncludeLineItems", "MaxReturned"]);
        assert_eq!(record.get("IncludeLineItems"), Some(&FieldTree::scalar("0")));
    }

    #[test]
    fn test_path_lookup() {
        let po = FieldTree::record([
            ("RefNumber", FieldTree::scalar("1001")),
            ("ClassRef", FieldTree::record([("FullName", FieldTree::scalar("Gifting"))])),
        ]);

        assert_eq!(po.text_at(&["ClassRef", "FullName"]), Some("Gifting"));
        assert_eq!(po.text_at(&["VendorRef", "FullName"]), None);
        assert_eq!(po.text_at(&["ClassRef"]), None);
        assert!(po.path(&[]).is_some());
    }

    #[test]
    fn test_into_items() {
        assert_eq!(FieldTree::scalar("a").into_items(), vec![FieldTree::scalar("a")]);
        let list = FieldTree::list([FieldTree::scalar("a"), FieldTree::scalar("b")]);
        assert_eq!(list.into_items().len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut record: Record = [("a", FieldTree::scalar("1")), ("b", FieldTree::scalar("2"))]
            .into_iter()
            .collect();
        assert_eq!(record.remove("a"), Some(FieldTree::scalar("1")));
        assert_eq!(record.remove("a"), None);
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_serialize_keeps_record_order() {
        let tree = FieldTree::record([
            ("Zeta", FieldTree::scalar("1")),
            ("Alpha", FieldTree::list([FieldTree::scalar("x"), FieldTree::empty()])),
        ]);
        let json = serde_json::to_string(&tree).unwrap();
        assert_eq!(json, r#"{"Zeta":"1","Alpha":["x",{}]}"#);
    }
}
