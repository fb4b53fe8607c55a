/*!
Attribute sets attached to measurements and resources.
*/

use std::{
    borrow::Cow,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/**
The value of an attribute.
*/
#[derive(Debug, Clone)]
pub enum AttributeValue {
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(value) => Some(value),
            _ => None,
        }
    }
}

// Floats compare by their bits so attribute sets can key a map
impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttributeValue::String(a), AttributeValue::String(b)) => a == b,
            (AttributeValue::I64(a), AttributeValue::I64(b)) => a == b,
            (AttributeValue::F64(a), AttributeValue::F64(b)) => a.to_bits() == b.to_bits(),
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            AttributeValue::String(value) => {
                state.write_u8(0);
                value.hash(state);
            }
            AttributeValue::I64(value) => {
                state.write_u8(1);
                value.hash(state);
            }
            AttributeValue::F64(value) => {
                state.write_u8(2);
                value.to_bits().hash(state);
            }
            AttributeValue::Bool(value) => {
                state.write_u8(3);
                value.hash(state);
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttributeValue::String(value) => f.write_str(value),
            AttributeValue::I64(value) => fmt::Display::fmt(value, f),
            AttributeValue::F64(value) => fmt::Display::fmt(value, f),
            AttributeValue::Bool(value) => fmt::Display::fmt(value, f),
        }
    }
}

impl<'a> From<&'a str> for AttributeValue {
    fn from(value: &'a str) -> Self {
        AttributeValue::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::I64(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::I64(value.into())
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::I64(value.into())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::F64(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/**
A key-value pair in an [`Attributes`] set.
*/
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub key: Cow<'static, str>,
    pub value: AttributeValue,
}

/**
An immutable set of attributes, sorted by key.

If the same key is given more than once, the last value wins. Cloning a set is cheap.

```
let attributes = tally::Attributes::from_iter([
    ("endpoint", "/api/test"),
    ("status", "success"),
]);

assert_eq!(Some("success"), attributes.get("status").and_then(|v| v.as_str()));
```
*/
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Attributes(Arc<[Attribute]>);

impl Attributes {
    pub fn empty() -> Self {
        Attributes(Arc::new([]))
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0
            .binary_search_by(|attr| (*attr.key).cmp(key))
            .ok()
            .map(|i| &self.0[i].value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|attr| (&*attr.key, &attr.value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /**
    Combine with another set, taking values from `other` where keys overlap.
    */
    pub fn merge(&self, other: &Attributes) -> Attributes {
        self.0.iter().chain(other.0.iter()).cloned().collect()
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes::empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut attributes: Vec<Attribute> = iter.into_iter().collect();

        // Stable, so later duplicates stay after earlier ones
        attributes.sort_by(|a, b| a.key.cmp(&b.key));

        let mut deduped: Vec<Attribute> = Vec::with_capacity(attributes.len());
        for attr in attributes {
            match deduped.last_mut() {
                Some(last) if last.key == attr.key => *last = attr,
                _ => deduped.push(attr),
            }
        }

        Attributes(deduped.into())
    }
}

impl<K: Into<Cow<'static, str>>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(key, value)| Attribute {
                key: key.into(),
                value: value.into(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    #[test]
    fn sorted_and_deduplicated() {
        let attributes = Attributes::from_iter([
            ("b", AttributeValue::I64(1)),
            ("a", AttributeValue::I64(2)),
            ("b", AttributeValue::I64(3)),
        ]);

        let collected: Vec<_> = attributes
            .iter()
            .map(|(k, v)| (k.to_owned(), v.clone()))
            .collect();

        assert_eq!(
            vec![
                ("a".to_owned(), AttributeValue::I64(2)),
                ("b".to_owned(), AttributeValue::I64(3)),
            ],
            collected
        );
    }

    #[test]
    fn order_does_not_affect_identity() {
        let a = Attributes::from_iter([("endpoint", "/api/test"), ("status", "success")]);
        let b = Attributes::from_iter([("status", "success"), ("endpoint", "/api/test")]);

        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(1, set.len());
    }

    #[test]
    fn float_values_hash_by_bits() {
        let a = Attributes::from_iter([("ratio", f64::NAN)]);
        let b = Attributes::from_iter([("ratio", f64::NAN)]);

        assert_eq!(a, b);
    }

    #[test]
    fn merge_prefers_other() {
        let base = Attributes::from_iter([("a", "1"), ("b", "2")]);
        let merged = base.merge(&Attributes::from_iter([("b", "3")]));

        assert_eq!(Some("3"), merged.get("b").and_then(|v| v.as_str()));
        assert_eq!(Some("1"), merged.get("a").and_then(|v| v.as_str()));
    }
}
