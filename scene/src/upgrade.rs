use crate::dom::Element;
use crate::error::{Error, Result};
use crate::parse::stof;
use crate::version::Version;
use crate::Float;

/// Rewrites a document declaring an older schema version in place. The
/// caller invokes this once per source, at the element carrying the version
/// attribute, and only when that version is older than the current one.
pub(crate) fn upgrade_tree(src_id: &str, root: &mut Element, version: Version) -> Result<()> {
    log::info!(
        "\"{}\": upgrading document from v{} to v{} ..",
        src_id,
        version,
        Version::CURRENT
    );

    if version < Version::new(2, 0, 0) {
        rename_identifiers(root);
        promote_uv_transforms(root)?;
    }

    Ok(())
}

/// Rewrites every `name` attribute from camelCase to underscore_case and
/// renames `lookAt` elements to `lookat`.
fn rename_identifiers(el: &mut Element) {
    if el.name == "lookAt" {
        el.name = "lookat".to_string();
    }
    for (key, value) in el.attrs.iter_mut() {
        if key == "name" {
            *value = camel_to_snake(value);
        }
    }
    for child in el.children.iter_mut() {
        rename_identifiers(child);
    }
}

/// At each lowercase-uppercase boundary, inserts an underscore and
/// lowercases the contiguous run of uppercase letters that follows.
fn camel_to_snake(name: &str) -> String {
    let mut chars: Vec<char> = name.chars().collect();
    let mut i = 0;
    while i + 1 < chars.len() {
        if chars[i].is_ascii_lowercase() && chars[i + 1].is_ascii_uppercase() {
            chars.insert(i + 1, '_');
            i += 2;
            while i < chars.len() && chars[i].is_ascii_uppercase() {
                chars[i] = chars[i].to_ascii_lowercase();
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    chars.into_iter().collect()
}

/// Replaces `uoffset`/`voffset`/`uscale`/`vscale` float children by an
/// equivalent `<transform name="to_uv">` block.
fn promote_uv_transforms(el: &mut Element) -> Result<()> {
    let mut offset = [0.0 as Float; 2];
    let mut scale = [1.0 as Float; 2];
    let mut matched = false;

    for child in &el.children {
        if child.name != "float" {
            continue;
        }
        let slot = match child.attribute("name") {
            Some("uoffset") | Some("u_offset") => &mut offset[0],
            Some("voffset") | Some("v_offset") => &mut offset[1],
            Some("uscale") | Some("u_scale") => &mut scale[0],
            Some("vscale") | Some("v_scale") => &mut scale[1],
            _ => continue,
        };
        let value = child.attribute("value").unwrap_or_default();
        *slot = stof(value).ok_or_else(|| {
            Error::msg(format!(
                "could not parse floating point value \"{value}\""
            ))
        })?;
        matched = true;
    }

    if matched {
        el.children.retain(|child| {
            !(child.name == "float"
                && matches!(
                    child.attribute("name"),
                    Some("uoffset")
                        | Some("u_offset")
                        | Some("voffset")
                        | Some("v_offset")
                        | Some("uscale")
                        | Some("u_scale")
                        | Some("vscale")
                        | Some("v_scale")
                ))
        });

        let mut trafo = Element::new("transform", el.offset);
        trafo.set_attribute("name", "to_uv");
        if offset != [0.0, 0.0] {
            let mut translate = Element::new("translate", el.offset);
            translate.set_attribute("x", &format!("{}", offset[0]));
            translate.set_attribute("y", &format!("{}", offset[1]));
            trafo.children.push(translate);
        }
        if scale != [1.0, 1.0] {
            let mut scale_el = Element::new("scale", el.offset);
            scale_el.set_attribute("x", &format!("{}", scale[0]));
            scale_el.set_attribute("y", &format!("{}", scale[1]));
            trafo.children.push(scale_el);
        }
        el.children.push(trafo);
    }

    for child in el.children.iter_mut() {
        promote_uv_transforms(child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom;
    use crate::source::Source;

    fn parse(text: &str) -> Element {
        dom::parse_document(&Source::new("<string>", text)).unwrap()
    }

    #[test]
    fn camel_case_becomes_snake_case() {
        assert_eq!(camel_to_snake("uOffset"), "u_offset");
        assert_eq!(camel_to_snake("focalLength"), "focal_length");
        assert_eq!(camel_to_snake("camelCaseXYZ"), "camel_case_xyz");
        assert_eq!(camel_to_snake("already_snake"), "already_snake");
        assert_eq!(camel_to_snake("XYZ"), "XYZ");
        assert_eq!(camel_to_snake("x"), "x");
        assert_eq!(camel_to_snake(""), "");
    }

    #[test]
    fn renames_name_attributes_and_lookat_elements() {
        let mut root = parse(
            "<scene><sensor type=\"perspective\"><transform name=\"toWorld\">\
             <lookAt origin=\"0 0 0\" target=\"0 0 1\" up=\"0 1 0\"/>\
             </transform></sensor></scene>",
        );
        upgrade_tree("<string>", &mut root, Version::new(0, 6, 0)).unwrap();
        let trafo = &root.children[0].children[0];
        assert_eq!(trafo.attribute("name"), Some("to_world"));
        assert_eq!(trafo.children[0].name, "lookat");
    }

    #[test]
    fn uv_floats_become_a_to_uv_transform() {
        let mut root = parse(
            "<scene><texture type=\"bitmap\">\
             <float name=\"uOffset\" value=\"0.5\"/>\
             <float name=\"uscale\" value=\"2\"/>\
             </texture></scene>",
        );
        upgrade_tree("<string>", &mut root, Version::new(1, 5, 0)).unwrap();

        let texture = &root.children[0];
        assert!(texture.children.iter().all(|c| c.name != "float"));
        let trafo = texture
            .children
            .iter()
            .find(|c| c.name == "transform")
            .unwrap();
        assert_eq!(trafo.attribute("name"), Some("to_uv"));
        let translate = &trafo.children[0];
        assert_eq!(translate.name, "translate");
        assert_eq!(translate.attribute("x"), Some("0.5"));
        assert_eq!(translate.attribute("y"), Some("0"));
        let scale = &trafo.children[1];
        assert_eq!(scale.name, "scale");
        assert_eq!(scale.attribute("x"), Some("2"));
        assert_eq!(scale.attribute("y"), Some("1"));
    }

    #[test]
    fn unit_scale_and_zero_offset_are_omitted() {
        let mut root = parse(
            "<scene><texture type=\"bitmap\">\
             <float name=\"vscale\" value=\"3\"/>\
             </texture></scene>",
        );
        upgrade_tree("<string>", &mut root, Version::new(1, 5, 0)).unwrap();
        let trafo = root.children[0]
            .children
            .iter()
            .find(|c| c.name == "transform")
            .cloned()
            .unwrap();
        assert_eq!(trafo.children.len(), 1);
        assert_eq!(trafo.children[0].name, "scale");
    }
}
