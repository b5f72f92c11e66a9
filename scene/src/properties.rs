use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use math::{Matrix4f32, Point3f32, Vector3f32};

use crate::error::{Error, Result};
use crate::object::ObjectRef;
use crate::spectrum::Color3;
use crate::Float;

/// A tagged property value.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(Float),
    String(String),
    Vector3(Vector3f32),
    Point3(Point3f32),
    Color(Color3),
    Transform(Matrix4f32),
    Object(ObjectRef),
    /// Opaque typed payload, e.g. the sample array of an interpolated
    /// spectrum.
    Any(Arc<dyn Any + Send + Sync>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Vector3(_) => "vector",
            Value::Point3(_) => "point",
            Value::Color(_) => "color",
            Value::Transform(_) => "transform",
            Value::Object(_) => "object",
            Value::Any(_) => "pointer",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Vector3(v) => write!(f, "Vector3({v:?})"),
            Value::Point3(v) => write!(f, "Point3({v:?})"),
            Value::Color(v) => write!(f, "Color({v:?})"),
            Value::Transform(v) => write!(f, "Transform({v:?})"),
            Value::Object(_) => write!(f, "Object(..)"),
            Value::Any(_) => write!(f, "Any(..)"),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: Value,
    queried: Cell<bool>,
}

/// Insertion-ordered property bag handed to plugin factories.
///
/// Each entry tracks whether it has ever been read; entries left unread
/// after construction trip the consumption audit in the instantiator.
/// Named references are pending `(property name, foreign id)` edges that the
/// instantiator resolves into `Object` entries.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    plugin_name: String,
    id: String,
    entries: Vec<Entry>,
    named_references: Vec<(String, String)>,
}

impl Properties {
    pub fn new(plugin_name: &str) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            ..Default::default()
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn set_plugin_name(&mut self, name: &str) {
        self.plugin_name = name.to_string();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Replaces an existing entry in place or appends a new one. A replaced
    /// entry counts as unread again.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.value = value;
                entry.queried.set(false);
            }
            None => self.entries.push(Entry {
                name: name.to_string(),
                value,
                queried: Cell::new(false),
            }),
        }
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.set(name, Value::Bool(value));
    }

    pub fn set_long(&mut self, name: &str, value: i64) {
        self.set(name, Value::Int(value));
    }

    pub fn set_float(&mut self, name: &str, value: Float) {
        self.set(name, Value::Float(value));
    }

    pub fn set_string(&mut self, name: &str, value: &str) {
        self.set(name, Value::String(value.to_string()));
    }

    pub fn set_vector3(&mut self, name: &str, value: Vector3f32) {
        self.set(name, Value::Vector3(value));
    }

    pub fn set_point3(&mut self, name: &str, value: Point3f32) {
        self.set(name, Value::Point3(value));
    }

    pub fn set_color(&mut self, name: &str, value: Color3) {
        self.set(name, Value::Color(value));
    }

    pub fn set_transform(&mut self, name: &str, value: Matrix4f32) {
        self.set(name, Value::Transform(value));
    }

    pub fn set_object(&mut self, name: &str, value: ObjectRef) {
        self.set(name, Value::Object(value));
    }

    pub fn set_any(&mut self, name: &str, value: Arc<dyn Any + Send + Sync>) {
        self.set(name, Value::Any(value));
    }

    /// Looks up a value and marks it as queried.
    fn value(&self, name: &str) -> Result<&Value> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| {
                e.queried.set(true);
                &e.value
            })
            .ok_or_else(|| Error::msg(format!("Property \"{name}\" has not been specified!")))
    }

    fn type_error(&self, name: &str, expected: &str, got: &Value) -> Error {
        Error::msg(format!(
            "The property \"{}\" has the wrong type (expected {}, got {})",
            name,
            expected,
            got.type_name()
        ))
    }

    pub fn bool_(&self, name: &str) -> Result<bool> {
        match self.value(name)? {
            Value::Bool(v) => Ok(*v),
            v => Err(self.type_error(name, "boolean", v)),
        }
    }

    pub fn long_(&self, name: &str) -> Result<i64> {
        match self.value(name)? {
            Value::Int(v) => Ok(*v),
            v => Err(self.type_error(name, "integer", v)),
        }
    }

    pub fn float_(&self, name: &str) -> Result<Float> {
        match self.value(name)? {
            Value::Float(v) => Ok(*v),
            v => Err(self.type_error(name, "float", v)),
        }
    }

    pub fn string_(&self, name: &str) -> Result<String> {
        match self.value(name)? {
            Value::String(v) => Ok(v.clone()),
            v => Err(self.type_error(name, "string", v)),
        }
    }

    pub fn vector3(&self, name: &str) -> Result<Vector3f32> {
        match self.value(name)? {
            Value::Vector3(v) => Ok(*v),
            v => Err(self.type_error(name, "vector", v)),
        }
    }

    pub fn point3(&self, name: &str) -> Result<Point3f32> {
        match self.value(name)? {
            Value::Point3(v) => Ok(*v),
            v => Err(self.type_error(name, "point", v)),
        }
    }

    pub fn color(&self, name: &str) -> Result<Color3> {
        match self.value(name)? {
            Value::Color(v) => Ok(*v),
            v => Err(self.type_error(name, "color", v)),
        }
    }

    pub fn transform(&self, name: &str) -> Result<Matrix4f32> {
        match self.value(name)? {
            Value::Transform(v) => Ok(*v),
            v => Err(self.type_error(name, "transform", v)),
        }
    }

    pub fn object(&self, name: &str) -> Result<ObjectRef> {
        match self.value(name)? {
            Value::Object(v) => Ok(v.clone()),
            v => Err(self.type_error(name, "object", v)),
        }
    }

    pub fn any(&self, name: &str) -> Result<Arc<dyn Any + Send + Sync>> {
        match self.value(name)? {
            Value::Any(v) => Ok(v.clone()),
            v => Err(self.type_error(name, "pointer", v)),
        }
    }

    pub fn bool_or(&self, name: &str, def: bool) -> Result<bool> {
        if self.has_property(name) {
            self.bool_(name)
        } else {
            Ok(def)
        }
    }

    pub fn long_or(&self, name: &str, def: i64) -> Result<i64> {
        if self.has_property(name) {
            self.long_(name)
        } else {
            Ok(def)
        }
    }

    pub fn float_or(&self, name: &str, def: Float) -> Result<Float> {
        if self.has_property(name) {
            self.float_(name)
        } else {
            Ok(def)
        }
    }

    pub fn string_or(&self, name: &str, def: &str) -> Result<String> {
        if self.has_property(name) {
            self.string_(name)
        } else {
            Ok(def.to_string())
        }
    }

    pub fn transform_or(&self, name: &str, def: Matrix4f32) -> Result<Matrix4f32> {
        if self.has_property(name) {
            self.transform(name)
        } else {
            Ok(def)
        }
    }

    /// All object-typed entries in insertion order; each is marked queried.
    pub fn objects(&self) -> Vec<(String, ObjectRef)> {
        self.entries
            .iter()
            .filter_map(|e| match &e.value {
                Value::Object(obj) => {
                    e.queried.set(true);
                    Some((e.name.clone(), obj.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Whether the entry is object-typed, without marking it queried.
    pub fn is_object(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.name == name && matches!(e.value, Value::Object(_)))
    }

    pub fn named_references(&self) -> &[(String, String)] {
        &self.named_references
    }

    pub fn set_named_reference(&mut self, name: &str, id: &str) {
        self.named_references
            .push((name.to_string(), id.to_string()));
    }

    /// Names of all entries that were never read, in insertion order.
    pub fn unqueried(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.queried.get())
            .map(|e| e.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getters_mark_entries_queried() {
        let mut props = Properties::new("path");
        props.set_long("samples", 16);
        props.set_float("unused", 1.0);
        assert_eq!(props.unqueried(), vec!["samples", "unused"]);

        assert_eq!(props.long_("samples").unwrap(), 16);
        assert_eq!(props.unqueried(), vec!["unused"]);
    }

    #[test]
    fn missing_and_mistyped_lookups_fail() {
        let mut props = Properties::new("path");
        props.set_bool("flag", true);
        assert!(props.long_("flag").is_err());
        assert!(props.long_("nope").is_err());
        assert_eq!(props.long_or("nope", 7).unwrap(), 7);
        assert!(props.bool_or("flag", false).unwrap());
    }

    #[test]
    fn entries_keep_insertion_order() {
        let mut props = Properties::new("p");
        props.set_float("b", 2.0);
        props.set_float("a", 1.0);
        props.set_float("c", 3.0);
        // Replacing keeps the original position.
        props.set_float("a", 4.0);
        assert_eq!(props.unqueried(), vec!["b", "a", "c"]);
        assert_eq!(props.float_("a").unwrap(), 4.0);
    }

    #[test]
    fn named_references_accumulate_in_order() {
        let mut props = Properties::new("scene");
        props.set_named_reference("_arg_0", "obj_a");
        props.set_named_reference("bsdf", "obj_b");
        assert_eq!(
            props.named_references(),
            &[
                ("_arg_0".to_string(), "obj_a".to_string()),
                ("bsdf".to_string(), "obj_b".to_string())
            ]
        );
    }
}
