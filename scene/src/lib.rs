//! Loader for XML scene descriptions.
//!
//! Loading runs in two phases: the document is parsed and staged into a
//! table of property bags keyed by id (single-threaded), then the staged
//! objects are instantiated bottom-up through the registered plugin
//! factories, in parallel where the reference graph allows.

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod error;
pub mod object;
pub mod properties;
pub mod registry;
pub mod resolver;
pub mod spectrum;
pub mod version;

mod dom;
mod instantiate;
mod parse;
mod source;
mod upgrade;

pub use error::{Error, Result};
pub use object::{ObjectRef, SceneObject};
pub use properties::{Properties, Value};
pub use registry::{cleanup, register_class, Class, Tag};
pub use resolver::FileResolver;
pub use version::Version;

use dom::Element;
use parse::{ParseContext, XmlSource};
use source::Source;

/// Numeric type used for scalar properties and transforms.
pub type Float = f32;

/// Ordered name/value pairs substituted for `$name` references; extended by
/// `<default>` tags during parsing.
pub type ParameterList = Vec<(String, String)>;

/// Nesting depth beyond which `<include>` is rejected.
pub const MAX_INCLUDE_RECURSION: usize = 15;

/// Loads a scene description from an XML string and returns the root
/// object.
pub fn load_string(text: &str, variant: &str, mut params: ParameterList) -> Result<ObjectRef> {
    let source = Arc::new(Source::new("<string>", text));
    let mut root = dom::parse_document(&source)?;

    let mut ctx = ParseContext::new(variant, Arc::new(FileResolver::new()));
    let mut src = XmlSource::new(source, 0);
    let mut props = Properties::new("");
    let mut arg_counter = 0;
    let (_, scene_id) = parse::parse_xml(
        &mut src,
        &mut ctx,
        &mut root,
        Tag::Invalid,
        &mut props,
        &mut params,
        &mut arg_counter,
        0,
        false,
    )?;

    instantiate::instantiate_top(&ctx, &scene_id)
}

/// Loads a scene description from a file. When the document declared an
/// older version and `write_update` is set, the original file is renamed to
/// `<path>.bak` and the upgraded document written back in its place.
pub fn load_file(
    path: &Path,
    variant: &str,
    mut params: ParameterList,
    write_update: bool,
) -> Result<ObjectRef> {
    if !path.exists() {
        return Err(Error::msg(format!(
            "\"{}\": file does not exist!",
            path.display()
        )));
    }

    log::info!("Loading XML file \"{}\" ..", path.display());

    let text = std::fs::read_to_string(path)?;
    let source = Arc::new(Source::new(path.display().to_string(), text));
    let mut root = dom::parse_document(&source)?;

    let mut resolver = FileResolver::new();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            resolver.prepend(parent);
        }
    }

    let mut ctx = ParseContext::new(variant, Arc::new(resolver));
    let mut src = XmlSource::new(source, 0);
    let mut props = Properties::new("");
    let mut arg_counter = 0;
    let (_, scene_id) = parse::parse_xml(
        &mut src,
        &mut ctx,
        &mut root,
        Tag::Invalid,
        &mut props,
        &mut params,
        &mut arg_counter,
        0,
        false,
    )?;

    if src.modified && write_update {
        let backup = PathBuf::from(format!("{}.bak", path.display()));
        log::info!(
            "Writing updated \"{}\" .. (backup at \"{}\")",
            path.display(),
            backup.display()
        );
        std::fs::rename(path, &backup).map_err(|_| {
            Error::msg(format!(
                "Unable to rename file \"{}\" to \"{}\"!",
                path.display(),
                backup.display()
            ))
        })?;

        root.prepend_attribute("version", &Version::CURRENT.to_string());
        if root.attribute("type") == Some("scene") {
            root.remove_attribute("type");
        }
        strip_synthetic_identifiers(&mut root);

        std::fs::write(path, root.to_xml_string())?;
    }

    instantiate::instantiate_top(&ctx, &scene_id)
}

/// Removes the loader-synthesized `_unnamed_*` ids and `_arg_*` names before
/// a document is written back to disk.
fn strip_synthetic_identifiers(el: &mut Element) {
    if el
        .attribute("id")
        .is_some_and(|id| id.starts_with("_unnamed_"))
    {
        el.remove_attribute("id");
    }
    if el
        .attribute("name")
        .is_some_and(|name| name.starts_with("_arg_"))
    {
        el.remove_attribute("name");
    }
    for child in el.children.iter_mut() {
        strip_synthetic_identifiers(child);
    }
}
