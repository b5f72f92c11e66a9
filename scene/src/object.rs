use std::any::Any;
use std::sync::Arc;

/// A constructed plugin instance.
///
/// The loader itself only needs two things from an object: the expansion
/// hook, and a way for downstream code to recover the concrete type.
pub trait SceneObject: Send + Sync {
    /// Gives the object a chance to replace itself with one or more
    /// substitutes when it is installed into a parent's property bag. The
    /// default is no expansion.
    fn expand(&self) -> Vec<ObjectRef> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;
}

pub type ObjectRef = Arc<dyn SceneObject>;
