//! Compilation of an annotated SDL document.
//!
//! Types are compiled on demand from the root operation types. A type is put in the cache
//! before anything it references is compiled and its fields are only built when forced, which
//! lets recursive types compile to exactly one [`CompiledType`] each.
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Weak;

use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;
use parking_lot::Mutex;

use super::ArgumentDefinition;
use super::CompiledField;
use super::CompiledSchema;
use super::CompiledType;
use super::EnumType;
use super::FieldMap;
use super::InputObjectType;
use super::InterfaceType;
use super::LazyFields;
use super::ObjectType;
use super::TypeKind;
use super::TypeRef;
use super::UnionType;
use super::scalars;
use crate::directives::DirectiveContext;
use crate::directives::DirectiveRegistry;
use crate::directives::exports;
use crate::directives::exports::ExportRegistryBuilder;
use crate::error::CompileError;
use crate::json_ext::value_from_ast;
use crate::middleware::Resolver;
use crate::middleware::identity_resolver;
use crate::middleware::pipeline;
use crate::upstreams::Upstreams;

#[derive(Clone, Copy)]
enum Position {
    Input,
    Output,
    Root,
}

impl Position {
    fn usage(self) -> &'static str {
        match self {
            Position::Input => "an input type",
            Position::Output => "an output type",
            Position::Root => "a root operation type",
        }
    }

    fn accepts(self, kind: TypeKind) -> bool {
        match self {
            Position::Input => matches!(
                kind,
                TypeKind::Scalar | TypeKind::Enum | TypeKind::InputObject
            ),
            Position::Output => kind != TypeKind::InputObject,
            Position::Root => kind == TypeKind::Object,
        }
    }
}

/// Per-compilation state.
struct Compiler {
    schema: Schema,
    registry: DirectiveRegistry,
    upstreams: Arc<Upstreams>,
    types: Mutex<IndexMap<String, Arc<CompiledType>>>,
    exports: ExportRegistryBuilder,
}

pub(crate) fn compile(
    sdl: &str,
    registry: &DirectiveRegistry,
    upstreams: Arc<Upstreams>,
) -> Result<CompiledSchema, CompileError> {
    let schema = Schema::parse(sdl, "schema.graphql")
        .map_err(|invalid| CompileError::Parse(invalid.errors.to_string()))?;
    let query_type = schema
        .root_operation(ast::OperationType::Query)
        .map(|name| name.to_string())
        .ok_or(CompileError::MissingRootType)?;
    let mutation_type = schema
        .root_operation(ast::OperationType::Mutation)
        .map(|name| name.to_string());

    let compiler = Arc::new(Compiler {
        schema,
        registry: registry.clone(),
        upstreams,
        types: Default::default(),
        exports: Default::default(),
    });

    compiler.named_type(&query_type, Position::Root)?;
    if let Some(mutation_type) = &mutation_type {
        compiler.named_type(mutation_type, Position::Root)?;
    }
    compiler.force_all()?;

    let mut roots = vec![query_type.clone()];
    roots.extend(mutation_type.clone());
    let exports = Arc::new(compiler.exports.freeze(roots));
    let types = std::mem::take(&mut *compiler.types.lock());
    tracing::debug!(types = types.len(), "schema compiled");

    Ok(CompiledSchema {
        types,
        query_type,
        mutation_type,
        exports,
    })
}

impl Compiler {
    /// Forces the fields of every cached type, including the types discovered while doing so.
    fn force_all(&self) -> Result<(), CompileError> {
        let mut forced = 0;
        loop {
            let pending: Vec<Arc<CompiledType>> =
                self.types.lock().values().skip(forced).cloned().collect();
            if pending.is_empty() {
                return Ok(());
            }
            forced += pending.len();
            for ty in pending {
                ty.force()?;
            }
        }
    }

    fn type_ref(self: &Arc<Self>, ty: &ast::Type, position: Position) -> Result<TypeRef, CompileError> {
        Ok(match ty {
            ast::Type::Named(name) => self.named_type(name.as_str(), position)?,
            ast::Type::NonNullNamed(name) => {
                TypeRef::NonNull(Box::new(self.named_type(name.as_str(), position)?))
            }
            ast::Type::List(inner) => TypeRef::List(Box::new(self.type_ref(inner, position)?)),
            ast::Type::NonNullList(inner) => TypeRef::NonNull(Box::new(TypeRef::List(Box::new(
                self.type_ref(inner, position)?,
            )))),
        })
    }

    fn named_type(self: &Arc<Self>, name: &str, position: Position) -> Result<TypeRef, CompileError> {
        let kind = if scalars::is_builtin(name) {
            TypeKind::Scalar
        } else {
            self.compile_type(name)?
        };
        if !position.accepts(kind) {
            return Err(CompileError::InvalidTypeUsage {
                name: name.to_string(),
                usage: position.usage(),
            });
        }
        Ok(TypeRef::named(name, kind))
    }

    /// Compiles `name` unless it is already cached, and returns its kind.
    fn compile_type(self: &Arc<Self>, name: &str) -> Result<TypeKind, CompileError> {
        if let Some(ty) = self.types.lock().get(name) {
            return Ok(ty.kind());
        }

        let mut related = Vec::new();
        let compiled = match self.schema.types.get(name) {
            None => return Err(CompileError::UnknownType(name.to_string())),
            Some(ExtendedType::Scalar(_)) => {
                return Err(CompileError::UnsupportedScalar(name.to_string()));
            }
            Some(ExtendedType::Object(object)) => {
                let interfaces: Vec<String> = object
                    .implements_interfaces
                    .iter()
                    .map(|interface| interface.name.to_string())
                    .collect();
                related.extend(interfaces.iter().cloned());
                CompiledType::Object(ObjectType {
                    name: name.to_string(),
                    interfaces,
                    fields: self.lazy_fields(name),
                })
            }
            Some(ExtendedType::Interface(_)) => {
                let implementers = self.implementers(name);
                related.extend(implementers.iter().cloned());
                CompiledType::Interface(InterfaceType {
                    name: name.to_string(),
                    fields: self.lazy_fields(name),
                    implementers,
                })
            }
            Some(ExtendedType::Union(union_)) => {
                let members: Vec<String> = union_
                    .members
                    .iter()
                    .map(|member| member.name.to_string())
                    .collect();
                related.extend(members.iter().cloned());
                CompiledType::Union(UnionType {
                    name: name.to_string(),
                    members,
                })
            }
            Some(ExtendedType::Enum(enum_)) => CompiledType::Enum(EnumType {
                name: name.to_string(),
                values: enum_.values.keys().map(|value| value.to_string()).collect(),
            }),
            Some(ExtendedType::InputObject(_)) => CompiledType::InputObject(InputObjectType {
                name: name.to_string(),
                fields: self.lazy_input_fields(name),
            }),
        };

        let kind = compiled.kind();
        self.types
            .lock()
            .insert(name.to_string(), Arc::new(compiled));
        for related in related {
            self.named_type(&related, Position::Output)?;
        }
        Ok(kind)
    }

    /// Object types declaring that they implement the interface `name`.
    fn implementers(&self, name: &str) -> Vec<String> {
        self.schema
            .types
            .iter()
            .filter_map(|(type_name, ty)| match ty {
                ExtendedType::Object(object)
                    if object
                        .implements_interfaces
                        .iter()
                        .any(|interface| interface.name.as_str() == name) =>
                {
                    Some(type_name.to_string())
                }
                _ => None,
            })
            .collect()
    }

    fn lazy_fields(self: &Arc<Self>, type_name: &str) -> LazyFields<FieldMap> {
        let compiler = Arc::downgrade(self);
        let type_name = type_name.to_string();
        LazyFields::new(move || upgrade(&compiler)?.output_fields(&type_name))
    }

    fn lazy_input_fields(self: &Arc<Self>, type_name: &str) -> LazyFields<Vec<ArgumentDefinition>> {
        let compiler = Arc::downgrade(self);
        let type_name = type_name.to_string();
        LazyFields::new(move || upgrade(&compiler)?.input_fields(&type_name))
    }

    fn output_fields(self: &Arc<Self>, type_name: &str) -> Result<FieldMap, CompileError> {
        let definitions = match self.schema.types.get(type_name) {
            Some(ExtendedType::Object(object)) => &object.fields,
            Some(ExtendedType::Interface(interface)) => &interface.fields,
            _ => return Err(CompileError::UnknownType(type_name.to_string())),
        };

        let mut fields = FieldMap::new();
        for (name, definition) in definitions {
            if name.as_str().starts_with("__") {
                continue;
            }
            let ty = self.type_ref(&definition.ty, Position::Output)?;
            let arguments = definition
                .arguments
                .iter()
                .map(|argument| self.argument(type_name, name.as_str(), argument))
                .collect::<Result<Vec<_>, _>>()?;
            let resolver = self.resolver(type_name, definition, &ty)?;
            fields.insert(
                name.to_string(),
                CompiledField {
                    name: name.to_string(),
                    ty,
                    arguments,
                    resolver,
                },
            );
        }
        Ok(fields)
    }

    fn input_fields(self: &Arc<Self>, type_name: &str) -> Result<Vec<ArgumentDefinition>, CompileError> {
        let Some(ExtendedType::InputObject(input)) = self.schema.types.get(type_name) else {
            return Err(CompileError::UnknownType(type_name.to_string()));
        };
        input
            .fields
            .values()
            .map(|field| self.argument(type_name, field.name.as_str(), field))
            .collect()
    }

    fn argument(
        self: &Arc<Self>,
        type_name: &str,
        field: &str,
        definition: &ast::InputValueDefinition,
    ) -> Result<ArgumentDefinition, CompileError> {
        let ty = self.type_ref(&definition.ty, Position::Input)?;
        let default_value = definition
            .default_value
            .as_ref()
            .map(|value| value_from_ast(value, None))
            .transpose()
            .map_err(|reason| CompileError::InvalidDefaultValue {
                type_name: type_name.to_string(),
                field: field.to_string(),
                argument: definition.name.to_string(),
                reason,
            })?;
        Ok(ArgumentDefinition {
            name: definition.name.to_string(),
            ty,
            default_value,
        })
    }

    /// Folds the directives of a field over the identity accessor, in declaration order.
    fn resolver(
        &self,
        type_name: &str,
        definition: &ast::FieldDefinition,
        ty: &TypeRef,
    ) -> Result<Resolver, CompileError> {
        let mut middlewares = Vec::new();
        for directive in definition.directives.iter() {
            let Some(factory) = self.registry.get(directive.name.as_str()) else {
                continue;
            };
            let context = DirectiveContext {
                type_name,
                field: definition,
                directive,
                upstreams: &self.upstreams,
                exports: &self.exports,
            };
            let middleware = std::panic::catch_unwind(AssertUnwindSafe(|| factory.build(&context)))
                .map_err(|panic| {
                    CompileError::Panic(format!(
                        "@{} on '{}.{}': {}",
                        directive.name,
                        type_name,
                        definition.name,
                        panic_message(panic.as_ref())
                    ))
                })?
                .map_err(|source| CompileError::Directive {
                    type_name: type_name.to_string(),
                    field: definition.name.to_string(),
                    directive: directive.name.to_string(),
                    source,
                })?;
            middlewares.push(middleware);
        }
        Ok(exports::connect(
            pipeline(identity_resolver(), &middlewares),
            ty.clone(),
        ))
    }
}

fn upgrade(compiler: &Weak<Compiler>) -> Result<Arc<Compiler>, CompileError> {
    compiler
        .upgrade()
        .ok_or_else(|| CompileError::Panic("fields forced after compilation ended".to_string()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
