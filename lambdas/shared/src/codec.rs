//! Decoding of DynamoDB export lines
//!
//! Each line of an export file is one JSON object shaped
//! `{"Item": {"field": {"S": "value"}, ...}}`. Field order is kept as written,
//! which schema inference relies on.

use std::collections::HashMap;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use base64::{engine::general_purpose::STANDARD, Engine};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::errors::{Error, Result};

/// Item as written to the destination table
pub type Item = HashMap<String, AttributeValue>;

#[derive(Deserialize)]
struct ExportLine {
    #[serde(rename = "Item")]
    item: IndexMap<String, WireValue>,
}

/// Attribute value in DynamoDB JSON, exactly one tag per value
#[derive(Deserialize)]
enum WireValue {
    S(String),
    N(String),
    B(String),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    #[serde(rename = "NS")]
    Ns(Vec<String>),
    #[serde(rename = "BS")]
    Bs(Vec<String>),
    M(IndexMap<String, WireValue>),
    L(Vec<WireValue>),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "BOOL")]
    Bool(bool),
}

impl WireValue {
    fn into_attribute(self) -> Result<AttributeValue> {
        Ok(match self {
            WireValue::S(s) => AttributeValue::S(s),
            WireValue::N(n) => AttributeValue::N(n),
            WireValue::B(b) => AttributeValue::B(decode_binary(&b)?),
            WireValue::Ss(values) => AttributeValue::Ss(values),
            WireValue::Ns(values) => AttributeValue::Ns(values),
            WireValue::Bs(values) => AttributeValue::Bs(
                values
                    .iter()
                    .map(|b| decode_binary(b))
                    .collect::<Result<Vec<_>>>()?,
            ),
            WireValue::M(fields) => AttributeValue::M(
                fields
                    .into_iter()
                    .map(|(name, value)| Ok((name, value.into_attribute()?)))
                    .collect::<Result<HashMap<_, _>>>()?,
            ),
            WireValue::L(values) => AttributeValue::L(
                values
                    .into_iter()
                    .map(WireValue::into_attribute)
                    .collect::<Result<Vec<_>>>()?,
            ),
            WireValue::Null(n) => AttributeValue::Null(n),
            WireValue::Bool(b) => AttributeValue::Bool(b),
        })
    }
}

fn decode_binary(encoded: &str) -> Result<Blob> {
    STANDARD
        .decode(encoded)
        .map(Blob::new)
        .map_err(|e| Error::InvalidRecord(format!("invalid base64 binary value: {}", e)))
}

/// One decoded record, fields in line order
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    attributes: IndexMap<String, AttributeValue>,
}

impl Record {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// First field as it appeared in the stored line
    pub fn first_field(&self) -> Option<(&str, &AttributeValue)> {
        self.attributes
            .get_index(0)
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn into_item(self) -> Item {
        self.attributes.into_iter().collect()
    }
}

/// Decode a single export line into a record
pub fn decode_line(line: &str) -> Result<Record> {
    let parsed: ExportLine =
        serde_json::from_str(line).map_err(|e| Error::InvalidRecord(e.to_string()))?;

    let attributes = parsed
        .item
        .into_iter()
        .map(|(name, value)| Ok((name, value.into_attribute()?)))
        .collect::<Result<IndexMap<_, _>>>()?;

    Ok(Record { attributes })
}
