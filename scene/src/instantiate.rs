use std::sync::Mutex;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::object::ObjectRef;
use crate::parse::{InstanceState, ParseContext, StagedKind, StagedObject};
use crate::registry::Class;

/// Constructs the staged object graph bottom-up, starting from `id`.
pub(crate) fn instantiate_top(ctx: &ParseContext, id: &str) -> Result<ObjectRef> {
    instantiate_node(ctx, id, &[])
}

/// Resolves `id` to a constructed object, following alias indirection.
/// `chain` lists the ids currently under construction on this call path;
/// re-entering one of them means the reference graph is cyclic.
fn instantiate_node(ctx: &ParseContext, id: &str, chain: &[String]) -> Result<ObjectRef> {
    let mut id = id.to_string();
    let mut hops = 0usize;
    loop {
        let Some(inst) = ctx.instances.get(&id) else {
            return Err(Error::msg(format!("reference to unknown object \"{id}\"!")));
        };
        match &inst.kind {
            StagedKind::Alias { target } => {
                hops += 1;
                if hops > ctx.instances.len() {
                    return Err(Error::msg(format!(
                        "circular alias chain involving id \"{id}\""
                    )));
                }
                id = target.clone();
            }
            StagedKind::Object { class, state } => {
                return construct(ctx, inst, class, state, &id, chain);
            }
        }
    }
}

fn construct(
    ctx: &ParseContext,
    inst: &StagedObject,
    class: &Class,
    state: &Mutex<InstanceState>,
    id: &str,
    chain: &[String],
) -> Result<ObjectRef> {
    // Detected before touching the lock: re-entry on an id this call path is
    // already building would otherwise block on our own mutex forever.
    if chain.iter().any(|c| c == id) {
        return Err(Error::msg(format!(
            "circular reference to object \"{id}\""
        )));
    }

    // The lock is held for the whole construction, so a concurrent request
    // for the same id waits here and then takes the memoized fast path.
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(object) = &state.object {
        return Ok(object.clone());
    }

    let chain: Vec<String> = chain
        .iter()
        .cloned()
        .chain([id.to_string()])
        .collect();
    let refs: Vec<(String, String)> = state.props.named_references().to_vec();

    let resolved: Vec<(String, ObjectRef)> = if refs.len() <= 1 {
        let mut out = Vec::new();
        for reference in &refs {
            out.extend(resolve_reference(ctx, inst, reference, &chain)?);
        }
        out
    } else {
        // Fan out across the named references. Each parallel section runs in
        // a freshly built pool: a thread blocked in `install` on a foreign
        // pool does not steal, so it can never pick up a task that needs a
        // mutex held further up this call path.
        let pool = rayon::ThreadPoolBuilder::new()
            .build()
            .map_err(|e| Error::msg(format!("could not start worker pool: {e}")))?;
        let nested: Vec<Vec<(String, ObjectRef)>> = pool.install(|| {
            refs.par_iter()
                .map(|reference| resolve_reference(ctx, inst, reference, &chain))
                .collect::<Result<_>>()
        })?;
        nested.into_iter().flatten().collect()
    };

    for (name, object) in resolved {
        state.props.set_object(&name, object);
    }

    let object = match (class.construct)(&mut state.props) {
        Ok(object) => object,
        Err(e) => {
            return Err(instantiate_error(
                inst,
                format!(
                    "could not instantiate {} plugin of type \"{}\": {}",
                    class.name.to_lowercase(),
                    state.props.plugin_name(),
                    e
                ),
            ));
        }
    };

    audit_unqueried(inst, class, &state)?;

    state.object = Some(object.clone());
    Ok(object)
}

/// Instantiates one named reference and applies the expansion hook,
/// producing the `(property name, object)` pairs to install.
fn resolve_reference(
    ctx: &ParseContext,
    inst: &StagedObject,
    (name, child_id): &(String, String),
    chain: &[String],
) -> Result<Vec<(String, ObjectRef)>> {
    let result = (|| -> Result<Vec<(String, ObjectRef)>> {
        let object = instantiate_node(ctx, child_id, chain)?;
        let children = object.expand();
        Ok(match children.len() {
            0 => vec![(name.clone(), object)],
            1 => children
                .into_iter()
                .map(|child| (name.clone(), child))
                .collect(),
            _ => children
                .into_iter()
                .enumerate()
                .map(|(i, child)| (format!("{name}_{i}"), child))
                .collect(),
        })
    })();
    result.map_err(|e| wrap(inst, e))
}

/// Rejects construction when the factory left properties unread.
fn audit_unqueried(inst: &StagedObject, class: &Class, state: &InstanceState) -> Result<()> {
    let unqueried = state.props.unqueried();
    if unqueried.is_empty() {
        return Ok(());
    }
    let class_name = class.name.to_lowercase();
    let plugin_name = state.props.plugin_name();
    for name in &unqueried {
        if state.props.is_object(name) {
            return Err(instantiate_error(
                inst,
                format!(
                    "unreferenced object \"{name}\" (within {class_name} of type \
                     \"{plugin_name}\")"
                ),
            ));
        }
    }
    let list = unqueried
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    Err(instantiate_error(
        inst,
        format!(
            "unreferenced {} {} in {} plugin of type \"{}\"",
            if unqueried.len() > 1 {
                "properties"
            } else {
                "property"
            },
            list,
            class_name,
            plugin_name
        ),
    ))
}

fn instantiate_error(inst: &StagedObject, msg: String) -> Error {
    Error::Instantiate {
        src: inst.src.id.clone(),
        loc: inst.src.offset(inst.location),
        msg,
    }
}

/// Attaches the staged object's location unless the error already carries
/// one.
fn wrap(inst: &StagedObject, err: Error) -> Error {
    if err.is_located() {
        err
    } else {
        instantiate_error(inst, err.to_string())
    }
}
