/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Typed view of Redfish attribute maps
//!
//! Attributes come over the wire as free-form JSON. We narrow to the
//! int/string/float vocabulary at the boundary and compare typed against
//! typed from there on. Desired values are always spec'd as strings; the
//! authorized coercion direction is string→number when the live side is
//! numeric.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RedfishError;

/// One BIOS or BMC attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Str(String),
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    /// Narrows a wire value. Booleans, nulls and containers are
    /// structural errors.
    pub fn narrow(key: &str, value: &serde_json::Value) -> Result<AttributeValue, RedfishError> {
        match value {
            serde_json::Value::String(s) => Ok(AttributeValue::Str(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(AttributeValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(AttributeValue::Float(f))
                } else {
                    Err(RedfishError::UnsupportedAttributeType {
                        key: key.to_string(),
                        value: value.clone(),
                    })
                }
            }
            _ => Err(RedfishError::UnsupportedAttributeType {
                key: key.to_string(),
                value: value.clone(),
            }),
        }
    }

    /// The JSON value to send when the BMC expects this value's type.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::Float(f) => serde_json::Value::from(*f),
            AttributeValue::Str(s) => serde_json::Value::from(s.clone()),
        }
    }
}

/// Narrows a whole wire map, failing on the first unsupported value.
pub fn narrow_map(
    raw: &serde_json::Map<String, serde_json::Value>,
) -> Result<AttributeMap, RedfishError> {
    raw.iter()
        .map(|(key, value)| Ok((key.clone(), AttributeValue::narrow(key, value)?)))
        .collect()
}

/// Whether a live value satisfies a desired (string-typed) value.
pub fn matches_desired(live: &AttributeValue, desired: &str) -> bool {
    match live {
        AttributeValue::Str(s) => s == desired,
        AttributeValue::Int(i) => desired.parse::<i64>() == Ok(*i),
        AttributeValue::Float(f) => desired.parse::<f64>() == Ok(*f),
    }
}

/// The set of (key, desired) pairs whose live values differ from desired.
/// A key the live side does not report at all counts as differing.
pub fn diff(
    desired: &BTreeMap<String, String>,
    live: &AttributeMap,
) -> BTreeMap<String, String> {
    desired
        .iter()
        .filter(|(key, value)| {
            live.get(*key)
                .map(|current| !matches_desired(current, value))
                .unwrap_or(true)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
