use sval_derive::Value;
use tally::{AttributeValue, Attributes};

#[derive(Value)]
pub enum AnyValue<'a> {
    #[sval(label = "stringValue", index = 1)]
    String(&'a str),
    #[sval(label = "boolValue", index = 2)]
    Bool(bool),
    #[sval(label = "intValue", index = 3)]
    Int(i64),
    #[sval(label = "doubleValue", index = 4)]
    Double(f64),
}

impl<'a> From<&'a AttributeValue> for AnyValue<'a> {
    fn from(value: &'a AttributeValue) -> Self {
        match value {
            AttributeValue::String(value) => AnyValue::String(value),
            AttributeValue::Bool(value) => AnyValue::Bool(*value),
            AttributeValue::I64(value) => AnyValue::Int(*value),
            AttributeValue::F64(value) => AnyValue::Double(*value),
        }
    }
}

#[derive(Value)]
pub struct KeyValue<'a> {
    #[sval(label = "key", index = 1)]
    pub key: &'a str,
    #[sval(label = "value", index = 2)]
    pub value: AnyValue<'a>,
}

pub fn key_values(attributes: &Attributes) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| KeyValue {
            key,
            value: value.into(),
        })
        .collect()
}

/**
Capture a log property as an owned attribute value.

Anything that isn't a primitive is captured using its `Display` implementation.
*/
pub fn to_attribute_value(value: &tally::value::Value) -> AttributeValue {
    if let Some(value) = value.to_bool() {
        return AttributeValue::Bool(value);
    }

    if let Some(value) = value.to_i64() {
        return AttributeValue::I64(value);
    }

    if let Some(value) = value.to_f64() {
        return AttributeValue::F64(value);
    }

    match value.to_borrowed_str() {
        Some(value) => AttributeValue::String(value.to_owned()),
        None => AttributeValue::String(value.to_string()),
    }
}
