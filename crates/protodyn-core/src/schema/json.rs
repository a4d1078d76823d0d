//! JSON descriptor import and export.
//!
//! The JSON shape is the interchange format emitted by `.proto` parsers:
//! a namespace body `{ "options", "nested" }` whose nested entries are
//! classified by the keys they carry (`fields` for a type, `values` for an
//! enum, `methods` for a service, `id` for an extension field, anything
//! else for a plain namespace).

use super::{Field, Method, NodeId, NodeKind, OneOf, Options, ProtoSyntax, Root, Rule};
use crate::error::{Error, Result};
use crate::wire::MAX_FIELD_ID;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

type JsonObject = Map<String, JsonValue>;

impl Root {
    /// Builds a root from a JSON namespace body
    pub fn from_json(json: &JsonValue) -> Result<Root> {
        let mut root = Root::new();
        root.add_json(NodeId::ROOT, json)?;
        Ok(root)
    }

    /// Builds a root from JSON text
    pub fn from_json_str(text: &str) -> Result<Root> {
        let json: JsonValue = serde_json::from_str(text)?;
        Self::from_json(&json)
    }

    /// Adds the contents of a JSON namespace body below `parent`.
    ///
    /// Namespaces that already exist are merged, so several descriptor
    /// fragments of one package can be added one after another.
    pub fn add_json(&mut self, parent: NodeId, json: &JsonValue) -> Result<()> {
        let path = self.describe(parent);
        let body = as_object(json, &path)?;
        self.apply_namespace_body(parent, body, &path)?;
        debug!(parent = %path, nodes = self.len(), "added JSON descriptor");
        Ok(())
    }

    fn apply_namespace_body(&mut self, id: NodeId, body: &JsonObject, path: &str) -> Result<()> {
        self.merge_options(id, body.get("options"), path)?;
        if let Some(syntax) = body.get("syntax") {
            let syntax = syntax
                .as_str()
                .ok_or_else(|| Error::invalid_descriptor(path, "'syntax' must be a string"))?;
            self.set_syntax(id, ProtoSyntax::try_from(syntax)?)?;
        }
        if let Some(nested) = body.get("nested") {
            for (name, desc) in as_object(nested, path)? {
                self.add_json_node(id, name, desc, &format!("{path}.{name}"))?;
            }
        }
        Ok(())
    }

    fn add_json_node(
        &mut self,
        parent: NodeId,
        name: &str,
        desc: &JsonValue,
        path: &str,
    ) -> Result<()> {
        let obj = as_object(desc, path)?;
        if obj.contains_key("fields") {
            self.add_json_type(parent, name, obj, path)
        } else if obj.contains_key("values") {
            self.add_json_enum(parent, name, obj, path)
        } else if obj.contains_key("methods") {
            self.add_json_service(parent, name, obj, path)
        } else if obj.contains_key("id") {
            let field = field_from_json(name, obj, path)?;
            if field.extend.is_none() {
                return Err(Error::invalid_descriptor(
                    path,
                    "a field outside a type must name the type it extends",
                ));
            }
            self.add_extension(parent, field)
        } else {
            let id = self.add_namespace(parent, name)?;
            self.apply_namespace_body(id, obj, path)
        }
    }

    fn add_json_type(
        &mut self,
        parent: NodeId,
        name: &str,
        obj: &JsonObject,
        path: &str,
    ) -> Result<()> {
        let id = self.add_type(parent, name)?;
        if obj.get("group").and_then(JsonValue::as_bool) == Some(true) {
            self.set_group(id, true)?;
        }
        self.apply_reserved(id, obj.get("reserved"), path)?;
        if let Some(ranges) = obj.get("extensions") {
            for range in as_array(ranges, path)? {
                let (lo, hi) = range_pair(range, path)?;
                let positive = |value: i32| {
                    u32::try_from(value).map_err(|_| {
                        Error::invalid_descriptor(path, "extension ranges must be positive")
                    })
                };
                self.add_extension_range(id, positive(lo)?, positive(hi)?)?;
            }
        }
        if let Some(fields) = obj.get("fields") {
            for (field_name, desc) in as_object(fields, path)? {
                let field_path = format!("{path}.{field_name}");
                let field = field_from_json(field_name, as_object(desc, &field_path)?, &field_path)?;
                self.add_field(id, field)?;
            }
        }
        if let Some(oneofs) = obj.get("oneofs") {
            for (oneof_name, desc) in as_object(oneofs, path)? {
                let oneof_path = format!("{path}.{oneof_name}");
                let desc = as_object(desc, &oneof_path)?;
                let members: &[JsonValue] = match desc.get("oneof") {
                    Some(m) => as_array(m, &oneof_path)?,
                    None => &[],
                };
                let members = members
                    .iter()
                    .map(|m| {
                        m.as_str().map(str::to_string).ok_or_else(|| {
                            Error::invalid_descriptor(&oneof_path, "oneof members must be names")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut oneof = OneOf::new(oneof_name.as_str(), members);
                oneof.options = options_from(desc.get("options"), &oneof_path)?;
                self.add_oneof(id, oneof)?;
            }
        }
        self.apply_namespace_body(id, obj, path)
    }

    fn add_json_enum(
        &mut self,
        parent: NodeId,
        name: &str,
        obj: &JsonObject,
        path: &str,
    ) -> Result<()> {
        let id = self.add_enum(parent, name)?;
        self.merge_options(id, obj.get("options"), path)?;
        self.apply_reserved(id, obj.get("reserved"), path)?;
        if let Some(values) = obj.get("values") {
            for (value_name, number) in as_object(values, path)? {
                let number = number
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| {
                        Error::invalid_descriptor(
                            format!("{path}.{value_name}"),
                            "enum values must be 32-bit integers",
                        )
                    })?;
                self.add_enum_value(id, value_name, number)?;
            }
        }
        Ok(())
    }

    fn add_json_service(
        &mut self,
        parent: NodeId,
        name: &str,
        obj: &JsonObject,
        path: &str,
    ) -> Result<()> {
        let id = self.add_service(parent, name)?;
        if let Some(methods) = obj.get("methods") {
            for (method_name, desc) in as_object(methods, path)? {
                let method_path = format!("{path}.{method_name}");
                let desc = as_object(desc, &method_path)?;
                let request = required_str(desc, "requestType", &method_path)?;
                let response = required_str(desc, "responseType", &method_path)?;
                let mut method = Method::new(method_name.as_str(), request, response)
                    .request_stream(flag(desc, "requestStream"))
                    .response_stream(flag(desc, "responseStream"));
                method.options = options_from(desc.get("options"), &method_path)?;
                self.add_method(id, method)?;
            }
        }
        self.apply_namespace_body(id, obj, path)
    }

    fn merge_options(&mut self, id: NodeId, value: Option<&JsonValue>, path: &str) -> Result<()> {
        let options = options_from(value, path)?;
        if !options.is_empty() {
            self.get_node_mut(id)?.options.extend(options);
            self.touch();
        }
        Ok(())
    }

    fn apply_reserved(&mut self, id: NodeId, value: Option<&JsonValue>, path: &str) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        for entry in as_array(value, path)? {
            match entry {
                JsonValue::String(name) => self.add_reserved_name(id, name)?,
                JsonValue::Array(_) => {
                    let (lo, hi) = range_pair(entry, path)?;
                    self.add_reserved_range(id, lo, hi)?;
                }
                _ => {
                    return Err(Error::invalid_descriptor(
                        path,
                        "reserved entries must be [lo, hi] pairs or names",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Exports the whole tree as a JSON namespace body
    pub fn to_json(&self) -> JsonValue {
        self.node_to_json(NodeId::ROOT)
    }

    /// Exports one node in the shape [`Root::add_json`] accepts as a nested entry
    pub fn node_to_json(&self, id: NodeId) -> JsonValue {
        let Some(node) = self.node(id) else {
            return JsonValue::Null;
        };
        let mut out = JsonObject::new();
        if !node.options.is_empty() {
            out.insert("options".into(), options_to_json(&node.options));
        }
        if let Some(syntax) = node.syntax {
            out.insert("syntax".into(), syntax.as_str().into());
        }

        match &node.kind {
            NodeKind::Namespace => {}
            NodeKind::Type(data) => {
                if !data.oneofs.is_empty() {
                    let oneofs = data
                        .oneofs
                        .iter()
                        .map(|oneof| {
                            let mut desc = JsonObject::new();
                            desc.insert("oneof".into(), oneof.fields.clone().into());
                            if !oneof.options.is_empty() {
                                desc.insert("options".into(), options_to_json(&oneof.options));
                            }
                            (oneof.name.clone(), JsonValue::Object(desc))
                        })
                        .collect::<JsonObject>();
                    out.insert("oneofs".into(), JsonValue::Object(oneofs));
                }
                let fields = data
                    .fields
                    .iter()
                    .filter(|f| !f.is_extension())
                    .map(|f| (f.name.clone(), field_to_json(f)))
                    .collect::<JsonObject>();
                out.insert("fields".into(), JsonValue::Object(fields));
                if !data.extension_ranges.is_empty() {
                    let ranges = data
                        .extension_ranges
                        .iter()
                        .map(|(lo, hi)| JsonValue::from(vec![*lo, *hi]))
                        .collect::<Vec<_>>();
                    out.insert("extensions".into(), ranges.into());
                }
                let reserved = reserved_to_json(
                    data.reserved_ranges.iter().map(|(lo, hi)| (i64::from(*lo), i64::from(*hi))),
                    &data.reserved_names,
                );
                if !reserved.is_empty() {
                    out.insert("reserved".into(), reserved.into());
                }
                if data.group {
                    out.insert("group".into(), true.into());
                }
            }
            NodeKind::Enum(data) => {
                let values = data
                    .values
                    .iter()
                    .map(|(name, id)| (name.clone(), JsonValue::from(*id)))
                    .collect::<JsonObject>();
                out.insert("values".into(), JsonValue::Object(values));
                let reserved = reserved_to_json(
                    data.reserved_ranges.iter().map(|(lo, hi)| (i64::from(*lo), i64::from(*hi))),
                    &data.reserved_names,
                );
                if !reserved.is_empty() {
                    out.insert("reserved".into(), reserved.into());
                }
            }
            NodeKind::Service(data) => {
                let methods = data
                    .methods
                    .iter()
                    .map(|m| (m.name.clone(), method_to_json(m)))
                    .collect::<JsonObject>();
                out.insert("methods".into(), JsonValue::Object(methods));
            }
        }

        let mut nested = JsonObject::new();
        for child in &node.nested {
            if let Some(child_node) = self.node(*child) {
                nested.insert(child_node.name.clone(), self.node_to_json(*child));
            }
        }
        for ext in &node.extension_fields {
            nested.insert(ext.name.clone(), field_to_json(ext));
        }
        if !nested.is_empty() {
            out.insert("nested".into(), JsonValue::Object(nested));
        }
        JsonValue::Object(out)
    }
}

fn as_object<'a>(value: &'a JsonValue, path: &str) -> Result<&'a JsonObject> {
    value
        .as_object()
        .ok_or_else(|| Error::invalid_descriptor(path, "expected an object"))
}

fn as_array<'a>(value: &'a JsonValue, path: &str) -> Result<&'a Vec<JsonValue>> {
    value
        .as_array()
        .ok_or_else(|| Error::invalid_descriptor(path, "expected an array"))
}

fn required_str<'a>(obj: &'a JsonObject, key: &str, path: &str) -> Result<&'a str> {
    obj.get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::invalid_descriptor(path, format!("'{key}' must be a string")))
}

fn flag(obj: &JsonObject, key: &str) -> bool {
    obj.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
}

fn options_from(value: Option<&JsonValue>, path: &str) -> Result<Options> {
    match value {
        None | Some(JsonValue::Null) => Ok(Options::new()),
        Some(JsonValue::Object(map)) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Some(_) => Err(Error::invalid_descriptor(path, "'options' must be an object")),
    }
}

fn options_to_json(options: &Options) -> JsonValue {
    JsonValue::Object(options.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Reads an inclusive `[lo, hi]` pair; `"max"` stands for the largest field id
fn range_pair(value: &JsonValue, path: &str) -> Result<(i32, i32)> {
    let bound = |v: &JsonValue| -> Option<i32> {
        match v {
            JsonValue::String(s) if s == "max" => Some(MAX_FIELD_ID as i32),
            _ => v.as_i64().and_then(|n| i32::try_from(n).ok()),
        }
    };
    match value.as_array().map(Vec::as_slice) {
        Some([lo, hi]) => match (bound(lo), bound(hi)) {
            (Some(lo), Some(hi)) => Ok((lo, hi)),
            _ => Err(Error::invalid_descriptor(path, "range bounds must be integers")),
        },
        _ => Err(Error::invalid_descriptor(path, "ranges must be [lo, hi] pairs")),
    }
}

fn reserved_to_json(ranges: impl Iterator<Item = (i64, i64)>, names: &[String]) -> Vec<JsonValue> {
    ranges
        .map(|(lo, hi)| JsonValue::from(vec![lo, hi]))
        .chain(names.iter().map(|n| JsonValue::from(n.as_str())))
        .collect()
}

fn field_from_json(name: &str, obj: &JsonObject, path: &str) -> Result<Field> {
    let id = obj
        .get("id")
        .and_then(JsonValue::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::invalid_descriptor(path, "'id' must be a non-negative integer"))?;
    let type_name = required_str(obj, "type", path)?;
    let mut field = Field::new(name, id, type_name);
    if let Some(rule) = obj.get("rule") {
        let rule = rule
            .as_str()
            .and_then(Rule::from_name)
            .ok_or_else(|| Error::invalid_descriptor(path, format!("invalid rule {rule}")))?;
        field.rule = rule;
    }
    if obj.contains_key("keyType") {
        field.key_type = Some(required_str(obj, "keyType", path)?.to_string());
    }
    if obj.contains_key("extend") {
        field.extend = Some(required_str(obj, "extend", path)?.to_string());
    }
    field.options = options_from(obj.get("options"), path)?;
    Ok(field)
}

fn field_to_json(field: &Field) -> JsonValue {
    let mut out = JsonObject::new();
    if let Some(rule) = field.rule.as_str() {
        out.insert("rule".into(), rule.into());
    }
    if let Some(key) = &field.key_type {
        out.insert("keyType".into(), key.as_str().into());
    }
    out.insert("type".into(), field.type_name.as_str().into());
    out.insert("id".into(), field.id.into());
    if let Some(extend) = &field.extend {
        out.insert("extend".into(), extend.as_str().into());
    }
    if !field.options.is_empty() {
        out.insert("options".into(), options_to_json(&field.options));
    }
    JsonValue::Object(out)
}

fn method_to_json(method: &Method) -> JsonValue {
    let mut out = JsonObject::new();
    out.insert("requestType".into(), method.request_type.as_str().into());
    if method.request_stream {
        out.insert("requestStream".into(), true.into());
    }
    out.insert("responseType".into(), method.response_type.as_str().into());
    if method.response_stream {
        out.insert("responseStream".into(), true.into());
    }
    if !method.options.is_empty() {
        out.insert("options".into(), options_to_json(&method.options));
    }
    JsonValue::Object(out)
}
