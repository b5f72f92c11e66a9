use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::Result;
use crate::object::ObjectRef;
use crate::properties::Properties;

/// The closed set of tag kinds understood by the walker. Everything that is
/// not one of the fixed entries below is either a registered plugin alias
/// (`Object`) or an error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Tag {
    Boolean,
    Integer,
    Float,
    String,
    Point,
    Vector,
    Spectrum,
    Rgb,
    Color,
    Transform,
    Translate,
    Matrix,
    Rotate,
    Scale,
    LookAt,
    Object,
    NamedReference,
    Include,
    Alias,
    Default,
    /// Sentinel used as the parent of the root element.
    Invalid,
}

impl Tag {
    pub(crate) fn is_transform_op(self) -> bool {
        matches!(
            self,
            Tag::Translate | Tag::Rotate | Tag::Scale | Tag::LookAt | Tag::Matrix
        )
    }
}

pub type Constructor = Arc<dyn Fn(&mut Properties) -> Result<ObjectRef> + Send + Sync>;

/// Descriptor of a registered plugin class: the category name used in
/// diagnostics (e.g. `Integrator`), the XML tag alias (e.g. `integrator`),
/// the variant the class was built for, and its factory.
#[derive(Clone)]
pub struct Class {
    pub name: String,
    pub alias: String,
    pub variant: String,
    pub construct: Constructor,
}

impl Class {
    pub fn new(
        name: &str,
        alias: &str,
        variant: &str,
        construct: impl Fn(&mut Properties) -> Result<ObjectRef> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            alias: alias.to_string(),
            variant: variant.to_string(),
            construct: Arc::new(construct),
        }
    }

    fn key(alias: &str, variant: &str) -> String {
        format!("{alias}.{variant}")
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

struct Registry {
    tags: HashMap<String, Tag>,
    classes: HashMap<String, Class>,
}

impl Registry {
    fn with_builtin_tags() -> Self {
        let mut tags = HashMap::new();
        tags.insert("boolean".to_string(), Tag::Boolean);
        tags.insert("integer".to_string(), Tag::Integer);
        tags.insert("float".to_string(), Tag::Float);
        tags.insert("string".to_string(), Tag::String);
        tags.insert("point".to_string(), Tag::Point);
        tags.insert("vector".to_string(), Tag::Vector);
        tags.insert("transform".to_string(), Tag::Transform);
        tags.insert("translate".to_string(), Tag::Translate);
        tags.insert("matrix".to_string(), Tag::Matrix);
        tags.insert("rotate".to_string(), Tag::Rotate);
        tags.insert("scale".to_string(), Tag::Scale);
        tags.insert("lookat".to_string(), Tag::LookAt);
        tags.insert("ref".to_string(), Tag::NamedReference);
        tags.insert("spectrum".to_string(), Tag::Spectrum);
        tags.insert("rgb".to_string(), Tag::Rgb);
        tags.insert("color".to_string(), Tag::Color);
        tags.insert("include".to_string(), Tag::Include);
        tags.insert("alias".to_string(), Tag::Alias);
        tags.insert("default".to_string(), Tag::Default);
        Self {
            tags,
            classes: HashMap::new(),
        }
    }
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(Registry::with_builtin_tags()))
}

/// Registers a plugin class for its `(alias, variant)` key and records the
/// alias as an Object-kind tag unless it collides with a fixed tag name.
///
/// Registration is expected to happen during program initialization, before
/// any load begins; the registry is read-only afterwards.
pub fn register_class(class: Class) {
    let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
    if class.alias == "spectrum" {
        // A texture is a kind of continuous spectrum.
        reg.tags.insert("texture".to_string(), Tag::Object);
        reg.classes
            .insert(Class::key("texture", &class.variant), class.clone());
    }
    reg.tags
        .entry(class.alias.clone())
        .or_insert(Tag::Object);
    reg.classes
        .insert(Class::key(&class.alias, &class.variant), class);
}

/// Drops all registered plugin classes, restoring the fixed tag table.
pub fn cleanup() {
    if let Some(lock) = REGISTRY.get() {
        let mut reg = lock.write().unwrap_or_else(|e| e.into_inner());
        *reg = Registry::with_builtin_tags();
    }
}

pub(crate) fn tag_for(name: &str) -> Option<Tag> {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .tags
        .get(name)
        .copied()
}

pub(crate) fn class_for(alias: &str, variant: &str) -> Option<Class> {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .classes
        .get(&Class::key(alias, variant))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::SceneObject;

    struct Dummy;
    impl SceneObject for Dummy {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn fixed_tags_resolve() {
        assert_eq!(tag_for("boolean"), Some(Tag::Boolean));
        assert_eq!(tag_for("ref"), Some(Tag::NamedReference));
        assert_eq!(tag_for("no-such-tag"), None);
    }

    #[test]
    fn registration_is_per_variant_and_adds_an_object_tag() {
        register_class(Class::new("Widget", "widget", "variant_a", |_| {
            Ok(Arc::new(Dummy))
        }));
        register_class(Class::new("Widget", "widget", "variant_b", |_| {
            Ok(Arc::new(Dummy))
        }));
        assert_eq!(tag_for("widget"), Some(Tag::Object));
        assert!(class_for("widget", "variant_a").is_some());
        assert!(class_for("widget", "variant_b").is_some());
        assert!(class_for("widget", "variant_c").is_none());
    }

    #[test]
    fn spectrum_registration_also_registers_texture() {
        register_class(Class::new("Spectrum", "spectrum", "variant_tex", |_| {
            Ok(Arc::new(Dummy))
        }));
        assert_eq!(tag_for("texture"), Some(Tag::Object));
        assert!(class_for("texture", "variant_tex").is_some());
        // The fixed spectrum tag keeps its spectral kind.
        assert_eq!(tag_for("spectrum"), Some(Tag::Spectrum));
        assert!(class_for("spectrum", "variant_tex").is_some());
    }
}
