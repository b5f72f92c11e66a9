use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use math::{Matrix4f32, Vector3f32};

use crate::dom::{self, Element};
use crate::error::{Error, Result};
use crate::object::ObjectRef;
use crate::properties::Properties;
use crate::registry::{self, Class, Tag};
use crate::resolver::FileResolver;
use crate::source::Source;
use crate::spectrum::{
    cie1931_y, luminance, Color3, InterpolatedSpectrum, D65_UNIT_CONVERSION, WAVELENGTH_MAX,
    WAVELENGTH_MIN,
};
use crate::upgrade;
use crate::version::Version;
use crate::{Float, ParameterList, MAX_INCLUDE_RECURSION};

/// Tolerance when deciding whether spectrum samples are regularly spaced.
const SPACING_EPSILON: Float = 1e-4;

/// One document being parsed: the shared source text plus per-document
/// parse state (include depth, upgrade flag).
pub(crate) struct XmlSource {
    pub source: Arc<Source>,
    pub depth: usize,
    pub modified: bool,
}

impl XmlSource {
    pub fn new(source: Arc<Source>, depth: usize) -> Self {
        Self {
            source,
            depth,
            modified: false,
        }
    }

    fn error(&self, pos: usize, msg: impl Into<String>) -> Error {
        Error::Parse {
            src: self.source.id.clone(),
            loc: self.source.offset(pos),
            msg: msg.into(),
        }
    }

    /// Attaches this node's location unless the error already carries one.
    fn wrap(&self, pos: usize, err: Error) -> Error {
        if err.is_located() {
            err
        } else {
            self.error(pos, err.to_string())
        }
    }
}

/// A staged object: everything Phase A knows about one future plugin
/// instance, keyed by id in the parse context.
pub(crate) struct StagedObject {
    pub src: Arc<Source>,
    pub location: usize,
    pub kind: StagedKind,
}

pub(crate) enum StagedKind {
    /// Indirection to another staged id.
    Alias { target: String },
    /// A real entry; the mutex guards the one-time construction in Phase B.
    Object {
        class: Class,
        state: Mutex<InstanceState>,
    },
}

pub(crate) struct InstanceState {
    pub props: Properties,
    pub object: Option<ObjectRef>,
}

/// State shared across one whole load (including all included files).
pub(crate) struct ParseContext {
    pub instances: HashMap<String, StagedObject>,
    pub transform: Matrix4f32,
    pub id_counter: usize,
    pub variant: String,
    pub monochrome: bool,
    pub resolver: Arc<FileResolver>,
}

impl ParseContext {
    pub fn new(variant: &str, resolver: Arc<FileResolver>) -> Self {
        Self {
            instances: HashMap::new(),
            transform: Matrix4f32::identity(),
            id_counter: 0,
            variant: variant.to_string(),
            monochrome: variant.contains("mono"),
            resolver,
        }
    }
}

/// Splits on commas and whitespace, dropping empty tokens.
fn tokenize(s: &str) -> Vec<&str> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Locale-insensitive float parsing; surrounding whitespace is tolerated,
/// any other trailing characters are not.
pub(crate) fn stof(s: &str) -> Option<Float> {
    s.trim().parse().ok()
}

pub(crate) fn stoll(s: &str) -> Option<i64> {
    s.trim().parse().ok()
}

/// Verifies that the node carries exactly the permitted attributes. With
/// `expect_all` unset, missing attributes are tolerated as long as at least
/// one permitted attribute is present.
fn check_attributes(
    src: &XmlSource,
    node: &Element,
    attrs: &[&str],
    expect_all: bool,
) -> Result<()> {
    let mut missing: Vec<&str> = attrs.to_vec();
    let mut found_one = false;
    for (name, _) in &node.attrs {
        match missing.iter().position(|a| a == name) {
            Some(i) => {
                missing.remove(i);
                found_one = true;
            }
            None => {
                return Err(src.error(
                    node.offset,
                    format!(
                        "unexpected attribute \"{}\" in element \"{}\"",
                        name, node.name
                    ),
                ));
            }
        }
    }
    if !missing.is_empty() && (!found_one || expect_all) {
        return Err(src.error(
            node.offset,
            format!(
                "missing attribute \"{}\" in element \"{}\"",
                missing[0], node.name
            ),
        ));
    }
    Ok(())
}

/// Expands a `value` attribute into `x`/`y`/`z` components.
fn expand_value_to_xyz(src: &XmlSource, node: &mut Element) -> Result<()> {
    let Some(value) = node.attribute("value").map(str::to_string) else {
        return Ok(());
    };
    if node.attribute("x").is_some() || node.attribute("y").is_some() || node.attribute("z").is_some()
    {
        return Err(src.error(
            node.offset,
            "can't mix and match \"value\" and \"x\"/\"y\"/\"z\" attributes",
        ));
    }
    let tokens = tokenize(&value);
    match tokens.as_slice() {
        [v] => {
            node.set_attribute("x", v);
            node.set_attribute("y", v);
            node.set_attribute("z", v);
        }
        [x, y, z] => {
            node.set_attribute("x", x);
            node.set_attribute("y", y);
            node.set_attribute("z", z);
        }
        _ => {
            return Err(src.error(
                node.offset,
                "\"value\" attribute must have exactly 1 or 3 elements",
            ));
        }
    }
    node.remove_attribute("value");
    Ok(())
}

/// Reads `x`/`y`/`z` attributes, substituting `def_val` for absent or empty
/// components.
fn parse_vector_attrs(src: &XmlSource, node: &Element, def_val: Float) -> Result<Vector3f32> {
    let mut out = [def_val; 3];
    for (slot, attr) in out.iter_mut().zip(["x", "y", "z"]) {
        let value = node.attribute(attr).unwrap_or_default();
        if !value.is_empty() {
            *slot = stof(value).ok_or_else(|| {
                src.error(
                    node.offset,
                    format!("could not parse floating point value \"{value}\""),
                )
            })?;
        }
    }
    Ok(out.into())
}

/// Reads a whitespace-separated 3-vector from a named attribute.
fn parse_named_vector(src: &XmlSource, node: &Element, attr_name: &str) -> Result<Vector3f32> {
    let value = node.attribute(attr_name).unwrap_or_default();
    let tokens = tokenize(value);
    if tokens.len() != 3 {
        return Err(src.error(
            node.offset,
            format!("\"{attr_name}\" attribute must have exactly 3 elements"),
        ));
    }
    let mut out = [0.0 as Float; 3];
    for (slot, token) in out.iter_mut().zip(&tokens) {
        *slot = stof(token).ok_or_else(|| {
            src.error(
                node.offset,
                format!("could not parse floating point values in \"{value}\""),
            )
        })?;
    }
    Ok(out.into())
}

/// Inserts a staged object, rejecting duplicate ids with a diagnostic that
/// cites the previous definition.
fn stage(
    src: &XmlSource,
    ctx: &mut ParseContext,
    node: &Element,
    id: String,
    kind: StagedKind,
) -> Result<()> {
    if let Some(previous) = ctx.instances.get(&id) {
        return Err(src.error(
            node.offset,
            format!(
                "\"{}\" has duplicate id \"{}\" (previous was at {})",
                node.name,
                id,
                previous.src.offset(previous.location)
            ),
        ));
    }
    ctx.instances.insert(
        id,
        StagedObject {
            src: src.source.clone(),
            location: node.offset,
            kind,
        },
    );
    Ok(())
}

/// Stages a lowered spectrum sub-object under a fresh anonymous id and
/// records a named reference to it in the parent bag.
fn stage_spectrum(
    src: &XmlSource,
    ctx: &mut ParseContext,
    node: &Element,
    props: &mut Properties,
    name: &str,
    mut spectrum_props: Properties,
) -> Result<()> {
    let Some(class) = registry::class_for("spectrum", &ctx.variant) else {
        return Err(src.error(
            node.offset,
            "could not retrieve class object for tag \"spectrum\"",
        ));
    };
    let id = format!("_unnamed_{}", ctx.id_counter);
    ctx.id_counter += 1;
    spectrum_props.set_id(&id);
    stage(
        src,
        ctx,
        node,
        id.clone(),
        StagedKind::Object {
            class,
            state: Mutex::new(InstanceState {
                props: spectrum_props,
                object: None,
            }),
        },
    )?;
    props.set_named_reference(name, &id);
    Ok(())
}

/// Recursive descent over one element. Returns the `(name, id)` pair the
/// parent records as a named reference when the element produced a staged
/// object (empty strings otherwise).
#[allow(clippy::too_many_arguments)]
pub(crate) fn parse_xml(
    src: &mut XmlSource,
    ctx: &mut ParseContext,
    node: &mut Element,
    parent_tag: Tag,
    props: &mut Properties,
    params: &mut ParameterList,
    arg_counter: &mut usize,
    depth: usize,
    within_emitter: bool,
) -> Result<(String, String)> {
    let pos = node.offset;
    parse_element(
        src,
        ctx,
        node,
        parent_tag,
        props,
        params,
        arg_counter,
        depth,
        within_emitter,
    )
    .map_err(|e| src.wrap(pos, e))
}

#[allow(clippy::too_many_arguments)]
fn parse_element(
    src: &mut XmlSource,
    ctx: &mut ParseContext,
    node: &mut Element,
    parent_tag: Tag,
    props: &mut Properties,
    params: &mut ParameterList,
    arg_counter: &mut usize,
    depth: usize,
    within_emitter: bool,
) -> Result<(String, String)> {
    // Substitute $name parameter references in attribute values. This is a
    // single lexical pass; substituted text is not rescanned.
    if !params.is_empty() {
        for (_, value) in node.attrs.iter_mut() {
            if !value.contains('$') {
                continue;
            }
            for (key, replacement) in params.iter() {
                *value = value.replace(&format!("${key}"), replacement);
            }
        }
    }

    let Some(mut tag) = registry::tag_for(&node.name) else {
        return Err(src.error(node.offset, format!("unexpected tag \"{}\"", node.name)));
    };

    // A fixed-kind tag carrying a type attribute is reclassified as an
    // object when a matching plugin class exists (e.g. <spectrum type=...>).
    if node.attribute("type").is_some()
        && tag != Tag::Object
        && registry::class_for(&node.name, &ctx.variant).is_some()
    {
        tag = Tag::Object;
    }

    let has_parent = parent_tag != Tag::Invalid;
    let parent_is_object = parent_tag == Tag::Object;
    let current_is_object = tag == Tag::Object;
    let parent_is_transform = parent_tag == Tag::Transform;
    let current_is_transform_op = tag.is_transform_op();

    if !has_parent && !current_is_object {
        return Err(src.error(
            node.offset,
            format!("root element \"{}\" must be an object", node.name),
        ));
    }

    if parent_is_transform != current_is_transform_op {
        if parent_is_transform {
            return Err(src.error(
                node.offset,
                "transform nodes can only contain transform operations",
            ));
        } else {
            return Err(src.error(
                node.offset,
                "transform operations can only occur in a transform node",
            ));
        }
    }

    if has_parent && !parent_is_object && !(parent_is_transform && current_is_transform_op) {
        return Err(src.error(
            node.offset,
            format!("node \"{}\" cannot occur as child of a property", node.name),
        ));
    }

    if depth == 0 && node.attribute("version").is_none() {
        return Err(src.error(
            node.offset,
            format!("missing version attribute in root element \"{}\"", node.name),
        ));
    }

    if let Some(value) = node.attribute("version").map(str::to_string) {
        let version: Version = value.parse().map_err(|_| {
            src.error(
                node.offset,
                format!("could not parse version number \"{value}\""),
            )
        })?;
        if version < Version::CURRENT {
            upgrade::upgrade_tree(&src.source.id, node, version)?;
            src.modified = true;
        }
        node.remove_attribute("version");
    }

    if node.name == "scene" {
        node.set_attribute("type", "scene");
    } else if tag == Tag::Transform {
        ctx.transform = Matrix4f32::identity();
    }

    if let Some(name) = node.attribute("name") {
        if name.starts_with('_') {
            return Err(src.error(
                node.offset,
                format!(
                    "invalid parameter name \"{}\" in element \"{}\": leading \
                     underscores are reserved for internal identifiers.",
                    name, node.name
                ),
            ));
        }
    } else if current_is_object || tag == Tag::NamedReference {
        node.set_attribute("name", &format!("_arg_{}", *arg_counter));
        *arg_counter += 1;
    }

    if let Some(id) = node.attribute("id") {
        if id.starts_with('_') {
            return Err(src.error(
                node.offset,
                format!(
                    "invalid id \"{}\" in element \"{}\": leading underscores \
                     are reserved for internal identifiers.",
                    id, node.name
                ),
            ));
        }
    } else if current_is_object {
        node.set_attribute("id", &format!("_unnamed_{}", ctx.id_counter));
        ctx.id_counter += 1;
    }

    match tag {
        Tag::Object => {
            check_attributes(src, node, &["type", "id", "name"], true)?;
            let id = node.attribute("id").unwrap_or_default().to_string();
            let name = node.attribute("name").unwrap_or_default().to_string();
            let plugin_type = node.attribute("type").unwrap_or_default().to_string();
            let node_name = node.name.clone();

            if let Some(previous) = ctx.instances.get(&id) {
                return Err(src.error(
                    node.offset,
                    format!(
                        "\"{}\" has duplicate id \"{}\" (previous was at {})",
                        node_name,
                        id,
                        previous.src.offset(previous.location)
                    ),
                ));
            }

            let Some(class) = registry::class_for(&node_name, &ctx.variant) else {
                return Err(src.error(
                    node.offset,
                    format!("could not retrieve class object for tag \"{node_name}\""),
                ));
            };

            let mut props_nested = Properties::new(&plugin_type);
            props_nested.set_id(&id);

            let nested_emitter = within_emitter || node_name == "emitter";
            let mut arg_counter_nested = 0;
            for child in node.children.iter_mut() {
                let (arg_name, nested_id) = parse_xml(
                    src,
                    ctx,
                    child,
                    Tag::Object,
                    &mut props_nested,
                    params,
                    &mut arg_counter_nested,
                    depth + 1,
                    nested_emitter,
                )?;
                if !nested_id.is_empty() {
                    props_nested.set_named_reference(&arg_name, &nested_id);
                }
            }

            stage(
                src,
                ctx,
                node,
                id.clone(),
                StagedKind::Object {
                    class,
                    state: Mutex::new(InstanceState {
                        props: props_nested,
                        object: None,
                    }),
                },
            )?;
            return Ok((name, id));
        }

        Tag::NamedReference => {
            check_attributes(src, node, &["name", "id"], true)?;
            let id = node.attribute("id").unwrap_or_default().to_string();
            let name = node.attribute("name").unwrap_or_default().to_string();
            return Ok((name, id));
        }

        Tag::Alias => {
            check_attributes(src, node, &["id", "as"], true)?;
            let alias_src = node.attribute("id").unwrap_or_default().to_string();
            let alias_dst = node.attribute("as").unwrap_or_default().to_string();
            if !ctx.instances.contains_key(&alias_src) {
                return Err(src.error(
                    node.offset,
                    format!("referenced id \"{alias_src}\" not found"),
                ));
            }
            stage(
                src,
                ctx,
                node,
                alias_dst,
                StagedKind::Alias { target: alias_src },
            )?;
            return Ok((String::new(), String::new()));
        }

        Tag::Default => {
            check_attributes(src, node, &["name", "value"], true)?;
            let name = node.attribute("name").unwrap_or_default().to_string();
            let value = node.attribute("value").unwrap_or_default().to_string();
            if name.is_empty() {
                return Err(src.error(node.offset, "<default>: name must be non-empty"));
            }
            if !params.iter().any(|(key, _)| *key == name) {
                params.push((name, value));
            }
            return Ok((String::new(), String::new()));
        }

        Tag::Include => {
            check_attributes(src, node, &["filename"], true)?;
            let filename = ctx
                .resolver
                .resolve(node.attribute("filename").unwrap_or_default());
            if !filename.exists() {
                return Err(src.error(
                    node.offset,
                    format!("included file \"{}\" not found", filename.display()),
                ));
            }

            log::info!("Loading included XML file \"{}\" ..", filename.display());

            if src.depth + 1 > MAX_INCLUDE_RECURSION {
                return Err(Error::msg(format!(
                    "Exceeded <include> recursion limit of {MAX_INCLUDE_RECURSION}"
                )));
            }

            let text = std::fs::read_to_string(&filename)?;
            let nested_source = Arc::new(Source::new(filename.display().to_string(), text));
            let mut nested_src = XmlSource::new(nested_source.clone(), src.depth + 1);
            let mut nested_root =
                dom::parse_document(&nested_source).map_err(|e| src.error(node.offset, e.to_string()))?;

            if nested_root.name == "scene" {
                // Splice the included scene's children into the current
                // parent as if they appeared in place.
                for child in nested_root.children.iter_mut() {
                    let result = parse_xml(
                        &mut nested_src,
                        ctx,
                        child,
                        parent_tag,
                        props,
                        params,
                        arg_counter,
                        1,
                        within_emitter,
                    );
                    let (arg_name, nested_id) =
                        result.map_err(|e| src.error(node.offset, e.to_string()))?;
                    if !nested_id.is_empty() {
                        props.set_named_reference(&arg_name, &nested_id);
                    }
                }
            } else {
                let result = parse_xml(
                    &mut nested_src,
                    ctx,
                    &mut nested_root,
                    parent_tag,
                    props,
                    params,
                    arg_counter,
                    0,
                    within_emitter,
                );
                return result.map_err(|e| src.error(node.offset, e.to_string()));
            }
        }

        Tag::String => {
            check_attributes(src, node, &["name", "value"], true)?;
            props.set_string(
                node.attribute("name").unwrap_or_default(),
                node.attribute("value").unwrap_or_default(),
            );
        }

        Tag::Float => {
            check_attributes(src, node, &["name", "value"], true)?;
            let value = node.attribute("value").unwrap_or_default();
            let parsed = stof(value).ok_or_else(|| {
                src.error(
                    node.offset,
                    format!("could not parse floating point value \"{value}\""),
                )
            })?;
            props.set_float(node.attribute("name").unwrap_or_default(), parsed);
        }

        Tag::Integer => {
            check_attributes(src, node, &["name", "value"], true)?;
            let value = node.attribute("value").unwrap_or_default();
            let parsed = stoll(value).ok_or_else(|| {
                src.error(
                    node.offset,
                    format!("could not parse integer value \"{value}\""),
                )
            })?;
            props.set_long(node.attribute("name").unwrap_or_default(), parsed);
        }

        Tag::Boolean => {
            check_attributes(src, node, &["name", "value"], true)?;
            let value = node
                .attribute("value")
                .unwrap_or_default()
                .to_ascii_lowercase();
            let parsed = match value.as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    return Err(src.error(
                        node.offset,
                        format!(
                            "could not parse boolean value \"{value}\" -- must be \
                             \"true\" or \"false\""
                        ),
                    ));
                }
            };
            props.set_bool(node.attribute("name").unwrap_or_default(), parsed);
        }

        Tag::Vector => {
            expand_value_to_xyz(src, node)?;
            check_attributes(src, node, &["name", "x", "y", "z"], true)?;
            let vec = parse_vector_attrs(src, node, 0.0)?;
            props.set_vector3(node.attribute("name").unwrap_or_default(), vec);
        }

        Tag::Point => {
            expand_value_to_xyz(src, node)?;
            check_attributes(src, node, &["name", "x", "y", "z"], true)?;
            let vec = parse_vector_attrs(src, node, 0.0)?;
            props.set_point3(node.attribute("name").unwrap_or_default(), vec.to_point());
        }

        Tag::Color => {
            check_attributes(src, node, &["name", "value"], true)?;
            let value = node.attribute("value").unwrap_or_default().to_string();
            let tokens = tokenize(&value);
            if tokens.len() != 3 {
                return Err(src.error(
                    node.offset,
                    format!("'color' tag requires three values (got \"{value}\")"),
                ));
            }
            let mut components = [0.0 as Float; 3];
            for (slot, token) in components.iter_mut().zip(&tokens) {
                *slot = stof(token).ok_or_else(|| {
                    src.error(node.offset, format!("could not parse color \"{value}\""))
                })?;
            }
            let mut col = Color3::from(components);
            if ctx.monochrome {
                col = Color3::splat(luminance(col));
            }
            props.set_color(node.attribute("name").unwrap_or_default(), col);
        }

        Tag::Rgb => {
            check_attributes(src, node, &["name", "value"], true)?;
            let value = node.attribute("value").unwrap_or_default().to_string();
            let mut tokens = tokenize(&value);
            if tokens.len() == 1 {
                tokens.push(tokens[0]);
                tokens.push(tokens[0]);
            }
            if tokens.len() != 3 {
                return Err(src.error(
                    node.offset,
                    format!("'rgb' tag requires one or three values (got \"{value}\")"),
                ));
            }
            let mut components = [0.0 as Float; 3];
            for (slot, token) in components.iter_mut().zip(&tokens) {
                *slot = stof(token).ok_or_else(|| {
                    src.error(node.offset, format!("could not parse RGB value \"{value}\""))
                })?;
            }
            let col = Color3::from(components);
            if !within_emitter && (col.min_component() < 0.0 || col.max_component() > 1.0) {
                return Err(src.error(
                    node.offset,
                    "invalid RGB reflectance value, must be in the range [0, 1]!",
                ));
            }

            let spectrum_props = if ctx.monochrome {
                // Monochrome mode: replace by a uniform spectrum.
                let mut p = Properties::new("uniform");
                p.set_float("value", luminance(col));
                p
            } else {
                let mut p = Properties::new(if within_emitter { "srgb_d65" } else { "srgb" });
                p.set_color("color", col);
                p
            };
            let name = node.attribute("name").unwrap_or_default().to_string();
            stage_spectrum(src, ctx, node, props, &name, spectrum_props)?;
        }

        Tag::Spectrum => {
            check_attributes(src, node, &["name", "value"], true)?;
            let name = node.attribute("name").unwrap_or_default().to_string();
            let value = node.attribute("value").unwrap_or_default().to_string();
            let tokens = tokenize(&value);
            if tokens.is_empty() {
                return Err(src.error(
                    node.offset,
                    format!("'spectrum' tag requires one or more values (got \"{value}\")"),
                ));
            }

            if tokens.len() == 1 {
                let parsed = stof(tokens[0]).ok_or_else(|| {
                    src.error(
                        node.offset,
                        format!("could not parse constant spectrum \"{}\"", tokens[0]),
                    )
                })?;
                let mut spectrum_props;
                if ctx.monochrome {
                    spectrum_props = Properties::new("uniform");
                    spectrum_props.set_float(
                        "value",
                        if within_emitter {
                            parsed / (WAVELENGTH_MAX - WAVELENGTH_MIN)
                        } else {
                            parsed
                        },
                    );
                } else {
                    spectrum_props =
                        Properties::new(if within_emitter { "d65" } else { "uniform" });
                    spectrum_props.set_float("value", parsed);
                }
                stage_spectrum(src, ctx, node, props, &name, spectrum_props)?;
            } else {
                // Parse wavelength:value pairs, specified with increasing,
                // regularly spaced wavelengths.
                let unit_conversion = if within_emitter {
                    D65_UNIT_CONVERSION
                } else {
                    1.0
                };
                let mut wavelengths: Vec<Float> = Vec::with_capacity(tokens.len());
                let mut values: Vec<Float> = Vec::with_capacity(tokens.len());
                let mut interval = 0.0;
                let mut is_regular = true;

                for token in &tokens {
                    let pair: Vec<&str> = token.split(':').collect();
                    let [wavelength_str, value_str] = pair.as_slice() else {
                        return Err(src.error(
                            node.offset,
                            "invalid spectrum (expected wavelength:value pairs)",
                        ));
                    };
                    let (Some(wavelength), Some(sample)) = (stof(wavelength_str), stof(value_str))
                    else {
                        return Err(src.error(
                            node.offset,
                            format!("could not parse wavelength:value pair: \"{token}\""),
                        ));
                    };
                    wavelengths.push(wavelength);
                    values.push(sample * unit_conversion);

                    let n = wavelengths.len();
                    if n <= 1 {
                        continue;
                    }
                    let distance = wavelengths[n - 1] - wavelengths[n - 2];
                    if distance <= 0.0 {
                        return Err(src.error(
                            node.offset,
                            "wavelengths must be specified in increasing order",
                        ));
                    }
                    if n == 2 {
                        interval = distance;
                    } else if (distance - interval).abs() > SPACING_EPSILON {
                        is_regular = false;
                    }
                }

                if !is_regular {
                    return Err(Error::msg(
                        "Not implemented yet: irregularly sampled spectra",
                    ));
                }

                let lambda_min = wavelengths[0];
                let lambda_max = wavelengths[wavelengths.len() - 1];

                let spectrum_props = if ctx.monochrome {
                    // Replace by the equivalent uniform spectrum by
                    // pre-integrating against the CIE Y matching curve.
                    let interpolated =
                        InterpolatedSpectrum::new(lambda_min, lambda_max, values);
                    let mut average = 0.0;
                    let mut wav = WAVELENGTH_MIN;
                    while wav <= WAVELENGTH_MAX {
                        average += cie1931_y(wav) * interpolated.eval(wav);
                        wav += 1.0;
                    }
                    if within_emitter {
                        average /= WAVELENGTH_MAX - WAVELENGTH_MIN;
                    } else {
                        average *= crate::spectrum::CIE_Y_NORMALIZATION;
                    }
                    let mut p = Properties::new("uniform");
                    p.set_float("value", average);
                    p
                } else {
                    let mut p = Properties::new("interpolated");
                    p.set_float("lambda_min", lambda_min);
                    p.set_float("lambda_max", lambda_max);
                    p.set_long("size", values.len() as i64);
                    p.set_any("values", Arc::new(values));
                    p
                };
                stage_spectrum(src, ctx, node, props, &name, spectrum_props)?;
            }
        }

        Tag::Transform => {
            check_attributes(src, node, &["name"], true)?;
        }

        Tag::Rotate => {
            expand_value_to_xyz(src, node)?;
            check_attributes(src, node, &["angle", "x", "y", "z"], false)?;
            let axis = parse_vector_attrs(src, node, 0.0)?;
            let angle = node.attribute("angle").unwrap_or_default();
            let angle = stof(angle).ok_or_else(|| {
                src.error(
                    node.offset,
                    format!("could not parse floating point value \"{angle}\""),
                )
            })?;
            ctx.transform =
                Matrix4f32::from_rotation(axis.normalized(), angle.to_radians()) * ctx.transform;
        }

        Tag::Translate => {
            expand_value_to_xyz(src, node)?;
            check_attributes(src, node, &["x", "y", "z"], false)?;
            let vec = parse_vector_attrs(src, node, 0.0)?;
            ctx.transform = Matrix4f32::from_translation(vec) * ctx.transform;
        }

        Tag::Scale => {
            expand_value_to_xyz(src, node)?;
            check_attributes(src, node, &["x", "y", "z"], false)?;
            let vec = parse_vector_attrs(src, node, 1.0)?;
            ctx.transform = Matrix4f32::from_scale(vec) * ctx.transform;
        }

        Tag::LookAt => {
            check_attributes(src, node, &["origin", "target", "up"], true)?;
            let origin = parse_named_vector(src, node, "origin")?.to_point();
            let target = parse_named_vector(src, node, "target")?.to_point();
            let up = parse_named_vector(src, node, "up")?;
            let result = Matrix4f32::look_at(origin, target, up);
            if result.has_nan() {
                return Err(src.error(node.offset, "invalid lookat transformation"));
            }
            ctx.transform = result * ctx.transform;
        }

        Tag::Matrix => {
            check_attributes(src, node, &["value"], true)?;
            let value = node.attribute("value").unwrap_or_default().to_string();
            let tokens = tokenize(&value);
            if tokens.len() != 16 {
                return Err(src.error(node.offset, "matrix: expected 16 values"));
            }
            let mut components = [0.0 as Float; 16];
            for (slot, token) in components.iter_mut().zip(&tokens) {
                *slot = stof(token).ok_or_else(|| {
                    src.error(
                        node.offset,
                        format!("could not parse floating point value \"{token}\""),
                    )
                })?;
            }
            ctx.transform = Matrix4f32::from_rows_components(components) * ctx.transform;
        }

        Tag::Invalid => {
            return Err(src.error(
                node.offset,
                format!("unhandled element \"{}\"", node.name),
            ));
        }
    }

    for child in node.children.iter_mut() {
        parse_xml(src, ctx, child, tag, props, params, arg_counter, depth + 1, false)?;
    }

    if tag == Tag::Transform {
        let name = node.attribute("name").unwrap_or_default().to_string();
        props.set_transform(&name, ctx.transform);
    }

    Ok((String::new(), String::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stof_tolerates_whitespace_but_not_garbage() {
        assert_eq!(stof("1.5"), Some(1.5));
        assert_eq!(stof("  1.5  "), Some(1.5));
        assert_eq!(stof("1.5x"), None);
        assert_eq!(stof("1.5 2"), None);
        assert_eq!(stof(""), None);
    }

    #[test]
    fn stoll_parses_decimal_integers() {
        assert_eq!(stoll("42 "), Some(42));
        assert_eq!(stoll("-7"), Some(-7));
        assert_eq!(stoll("42.5"), None);
        assert_eq!(stoll("0x10"), None);
    }

    #[test]
    fn tokenize_splits_on_commas_and_whitespace() {
        assert_eq!(tokenize("1 2 3"), vec!["1", "2", "3"]);
        assert_eq!(tokenize("1, 2,3"), vec!["1", "2", "3"]);
        assert_eq!(tokenize("  "), Vec::<&str>::new());
    }
}
