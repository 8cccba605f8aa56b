//! The executable schema produced from an annotated SDL document.
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use derivative::Derivative;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::directives::DirectiveRegistry;
use crate::directives::exports::ExportRegistry;
use crate::error::CompileError;
use crate::json_ext::Value;
use crate::middleware::Resolver;
use crate::upstreams::Upstreams;

pub(crate) mod compiler;
pub(crate) mod scalars;

/// The kind of a named type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Scalar,
    Enum,
    Object,
    Interface,
    Union,
    InputObject,
}

/// A reference to a type of the compiled schema.
///
/// Named types are referenced by name and kind, the definition lives in
/// [`CompiledSchema`]. Compiled types never point at each other directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A scalar, enum, object, interface, union or input object.
    Named { name: String, kind: TypeKind },
    /// `[T]`
    List(Box<TypeRef>),
    /// `T!`
    NonNull(Box<TypeRef>),
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named { name, .. } => write!(f, "{name}"),
            TypeRef::List(ty) => write!(f, "[{ty}]"),
            TypeRef::NonNull(ty) => write!(f, "{ty}!"),
        }
    }
}

impl TypeRef {
    pub fn named(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeRef::Named {
            name: name.into(),
            kind,
        }
    }

    pub(crate) fn json() -> Self {
        TypeRef::named(scalars::JSON, TypeKind::Scalar)
    }

    /// Name of the innermost named type.
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Named { name, .. } => name,
            TypeRef::List(ty) | TypeRef::NonNull(ty) => ty.name(),
        }
    }

    /// Kind of the innermost named type.
    pub fn kind(&self) -> TypeKind {
        match self {
            TypeRef::Named { kind, .. } => *kind,
            TypeRef::List(ty) | TypeRef::NonNull(ty) => ty.kind(),
        }
    }

    /// Scalars and enums, possibly wrapped in lists.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind(), TypeKind::Scalar | TypeKind::Enum)
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// The type without its outer non-null modifier.
    pub fn nullable(&self) -> &TypeRef {
        match self {
            TypeRef::NonNull(ty) => ty.as_ref(),
            ty => ty,
        }
    }
}

/// An argument of a field, or a field of an input object.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<Value>,
}

/// A field of an object or interface, with the resolver built from its directives.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct CompiledField {
    pub name: String,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
    #[derivative(Debug = "ignore")]
    pub resolver: Resolver,
}

type Supplier<T> = Box<dyn FnOnce() -> Result<T, CompileError> + Send>;

/// Fields computed the first time they are forced.
///
/// Field sets reference other types, so they are only materialized once the owning type is in
/// the compilation cache. That is what lets mutually recursive types compile.
pub struct LazyFields<T> {
    value: OnceLock<T>,
    supplier: Mutex<Option<Supplier<T>>>,
}

impl<T> LazyFields<T> {
    pub(crate) fn new<F>(supplier: F) -> Self
    where
        F: FnOnce() -> Result<T, CompileError> + Send + 'static,
    {
        Self {
            value: OnceLock::new(),
            supplier: Mutex::new(Some(Box::new(supplier))),
        }
    }

    /// Runs the supplier if it has not run yet.
    pub(crate) fn force(&self) -> Result<(), CompileError> {
        if self.value.get().is_some() {
            return Ok(());
        }
        let supplier = self.supplier.lock().take();
        if let Some(supplier) = supplier {
            let value = supplier()?;
            let _ = self.value.set(value);
        }
        Ok(())
    }

    /// The fields, `None` until forced.
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for LazyFields<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(value) => value.fmt(f),
            None => f.write_str("<unforced>"),
        }
    }
}

pub type FieldMap = IndexMap<String, CompiledField>;

#[derive(Debug)]
pub struct ObjectType {
    pub name: String,
    pub interfaces: Vec<String>,
    pub fields: LazyFields<FieldMap>,
}

#[derive(Debug)]
pub struct InterfaceType {
    pub name: String,
    pub fields: LazyFields<FieldMap>,
    /// Object types implementing this interface.
    pub implementers: Vec<String>,
}

#[derive(Debug)]
pub struct UnionType {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug)]
pub struct InputObjectType {
    pub name: String,
    pub fields: LazyFields<Vec<ArgumentDefinition>>,
}

/// The runtime counterpart of a type definition.
#[derive(Debug)]
pub enum CompiledType {
    Object(ObjectType),
    Interface(InterfaceType),
    Union(UnionType),
    Enum(EnumType),
    InputObject(InputObjectType),
}

impl CompiledType {
    pub fn name(&self) -> &str {
        match self {
            CompiledType::Object(ty) => &ty.name,
            CompiledType::Interface(ty) => &ty.name,
            CompiledType::Union(ty) => &ty.name,
            CompiledType::Enum(ty) => &ty.name,
            CompiledType::InputObject(ty) => &ty.name,
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            CompiledType::Object(_) => TypeKind::Object,
            CompiledType::Interface(_) => TypeKind::Interface,
            CompiledType::Union(_) => TypeKind::Union,
            CompiledType::Enum(_) => TypeKind::Enum,
            CompiledType::InputObject(_) => TypeKind::InputObject,
        }
    }

    /// Output fields of an object or interface.
    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            CompiledType::Object(ty) => ty.fields.get(),
            CompiledType::Interface(ty) => ty.fields.get(),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.fields().and_then(|fields| fields.get(name))
    }

    /// Object types a value of this type can be.
    pub fn possible_types(&self) -> Vec<&str> {
        match self {
            CompiledType::Object(ty) => vec![ty.name.as_str()],
            CompiledType::Interface(ty) => ty.implementers.iter().map(String::as_str).collect(),
            CompiledType::Union(ty) => ty.members.iter().map(String::as_str).collect(),
            CompiledType::Enum(_) | CompiledType::InputObject(_) => Vec::new(),
        }
    }

    pub(crate) fn force(&self) -> Result<(), CompileError> {
        match self {
            CompiledType::Object(ty) => ty.fields.force(),
            CompiledType::Interface(ty) => ty.fields.force(),
            CompiledType::InputObject(ty) => ty.fields.force(),
            CompiledType::Union(_) | CompiledType::Enum(_) => Ok(()),
        }
    }
}

/// An executable schema.
///
/// Built once per configuration snapshot and immutable afterwards. Requests hold an
/// `Arc<CompiledSchema>` for their whole duration, so a schema swap never affects a request
/// that already started.
#[derive(Debug)]
pub struct CompiledSchema {
    pub(crate) types: IndexMap<String, Arc<CompiledType>>,
    pub(crate) query_type: String,
    pub(crate) mutation_type: Option<String>,
    pub(crate) exports: Arc<ExportRegistry>,
}

impl CompiledSchema {
    /// Compiles an annotated SDL document.
    pub fn parse(
        sdl: &str,
        registry: &DirectiveRegistry,
        upstreams: Arc<Upstreams>,
    ) -> Result<Self, CompileError> {
        compiler::compile(sdl, registry, upstreams)
    }

    pub fn get_type(&self, name: &str) -> Option<&CompiledType> {
        self.types.get(name).map(Arc::as_ref)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type.as_deref()
    }

    pub fn exports(&self) -> &Arc<ExportRegistry> {
        &self.exports
    }
}
