// JBasic External Objects
// OBJECT values are opaque handles owned by the embedding application

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::vm::interner::{fold, normalize};
use crate::vm::Value;

/// An external object whose methods programs may invoke
pub trait ObjectHandle: Send + Sync {
    fn class_name(&self) -> &str;

    /// Invoke a method. `Ok(None)` means the method produced no value.
    fn invoke(&self, method: &str, args: &[Value]) -> VmResult<Option<Value>>;
}

/// Shared reference to an external object
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn ObjectHandle>);

impl ObjectRef {
    pub fn new(handle: impl ObjectHandle + 'static) -> Self {
        Self(Arc::new(handle))
    }

    pub fn class_name(&self) -> &str {
        self.0.class_name()
    }

    pub fn invoke(&self, method: &str, args: &[Value]) -> VmResult<Option<Value>> {
        self.0.invoke(method, args)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<object {}>", self.class_name())
    }
}

/// Constructor registered for a class name
pub type ObjectConstructor = Arc<dyn Fn(&[Value]) -> VmResult<ObjectRef> + Send + Sync>;

/// Class-name → constructor catalog consulted by the NEW opcode
#[derive(Default)]
pub struct ObjectRegistry {
    constructors: RwLock<FxHashMap<Arc<str>, ObjectConstructor>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, class: &str, constructor: F)
    where
        F: Fn(&[Value]) -> VmResult<ObjectRef> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .insert(normalize(class), Arc::new(constructor));
    }

    pub fn create(&self, class: &str, args: &[Value]) -> VmResult<Value> {
        let constructor = self
            .constructors
            .read()
            .get(fold(class).as_ref())
            .cloned()
            .ok_or_else(|| VmError::with_param(ErrorKind::UnknownClass, class))?;
        Ok(Value::Object(constructor(args)?))
    }
}
