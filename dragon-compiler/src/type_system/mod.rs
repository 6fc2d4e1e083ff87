//! Semantic (C-IR level) types: the result of resolving a source
//! [`TypeExpr`](dragon_ast::TypeExpr) against an environment.
//!
//! Class types are shared, mutable graph nodes (bases reference other
//! `ClassType`s, generics lazily grow an `instantiations` map as new
//! argument tuples are seen) so they live behind `Rc<RefCell<_>>`
//! rather than being owned by a single parent, mirroring how the
//! resolver's environment tree itself is a shared, mutating structure.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type ClassRef = Rc<RefCell<ClassType>>;
pub type GenericRef = Rc<RefCell<GenericClassType>>;

#[derive(Debug, Clone)]
pub enum Type {
    Int,
    Bool,
    Void,
    VoidPtr,
    NullType,
    String,
    Integer,
    Object,
    Array,
    Class(ClassRef),
    Generic(GenericRef),
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Int, Type::Int)
            | (Type::Bool, Type::Bool)
            | (Type::Void, Type::Void)
            | (Type::VoidPtr, Type::VoidPtr)
            | (Type::NullType, Type::NullType)
            | (Type::String, Type::String)
            | (Type::Integer, Type::Integer)
            | (Type::Object, Type::Object)
            | (Type::Array, Type::Array) => true,
            (Type::Class(a), Type::Class(b)) => Rc::ptr_eq(a, b),
            (Type::Generic(a), Type::Generic(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Void => write!(f, "void"),
            Type::VoidPtr => write!(f, "void*"),
            Type::NullType => write!(f, "null"),
            Type::String => write!(f, "String"),
            Type::Integer => write!(f, "Integer"),
            Type::Object => write!(f, "Object"),
            Type::Array => write!(f, "_Array"),
            Type::Class(c) => write!(f, "{}", c.borrow().name),
            Type::Generic(g) => write!(f, "{}", g.borrow().name),
        }
    }
}

impl Type {
    pub fn is_class_like(&self) -> bool {
        matches!(self, Type::Class(_) | Type::String | Type::Integer | Type::Object | Type::Array)
    }

    /// Whether a value of this type can be produced in a slot declared
    /// `to`, via the same coercions `codegen::coerce` knows how to emit
    /// (identity, class-to-ancestor upcast, boxing an `Int` to `Integer`
    /// or `Object`). Used by overload resolution's coercion fallback.
    pub fn is_coercible_to(&self, to: &Type) -> bool {
        if self == to {
            return true;
        }
        match (self, to) {
            (Type::Class(fc), Type::Class(tc)) => ClassType::path_to_ancestor(fc, tc).is_some(),
            (Type::Class(_), Type::Object) | (Type::Integer, Type::Object) | (Type::String, Type::Object) | (Type::Array, Type::Object) => true,
            (Type::Int, Type::Integer) | (Type::Int, Type::Object) => true,
            _ => false,
        }
    }

    /// The C struct tag this type's values carry, used when a slot
    /// holding it needs a destructor/ref-count call.
    pub fn c_struct_name(&self) -> String {
        match self {
            Type::Class(c) => c.borrow().struct_tag.clone(),
            Type::String => "String".into(),
            Type::Integer => "Integer".into(),
            Type::Object => "Object".into(),
            Type::Array => "_Array".into(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleFuncType {
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub c_name: String,
}

/// An ordered mapping from an argument-type-list/return-type key to a
/// C symbol. Kept as a linear `Vec`, not a `HashMap`: lookups must use
/// exact structural equality of the *ordered* argument type list, and
/// declaration order is itself meaningful (first-declared-wins ties).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverloadedFuncType {
    pub overloads: Vec<((Vec<Type>, Type), String)>,
}

impl OverloadedFuncType {
    pub fn insert(&mut self, args: Vec<Type>, ret: Type, c_name: String) {
        self.overloads.push(((args, ret), c_name));
    }

    /// Select the overload whose argument type list matches exactly; if
    /// none does, fall back to the first (declaration-order) overload
    /// every argument coerces to, so e.g. a `String` argument can select
    /// an `Object`-typed overload.
    pub fn resolve(&self, args: &[Type]) -> Option<&((Vec<Type>, Type), String)> {
        self.overloads
            .iter()
            .find(|((params, _), _)| params == args)
            .or_else(|| {
                self.overloads.iter().find(|((params, _), _)| {
                    params.len() == args.len() && args.iter().zip(params).all(|(arg, param)| arg.is_coercible_to(param))
                })
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FuncType {
    Single(SingleFuncType),
    Overloaded(OverloadedFuncType),
}

#[derive(Debug, Clone)]
pub struct ClassType {
    pub name: String,
    pub c_name: String,
    pub struct_tag: String,
    pub bases: Vec<Type>,
    /// name -> declared type, in declaration order.
    pub attrs: Vec<(String, Type)>,
    /// own methods only: name -> signature (includes the implicit `_self` receiver).
    pub methods: Vec<(String, SingleFuncType)>,
    /// constructor, if the class declared one (`other["new"]`).
    pub constructor: Option<SingleFuncType>,
    /// every name with a callable slot (own or inherited), mapped to the
    /// C function that currently occupies that slot.
    pub func_names: HashMap<String, String>,
    /// methods inherited (not overridden) that need a redirect thunk,
    /// mapped to the thunk's C name.
    pub redirects: HashMap<String, String>,
}

impl ClassType {
    pub fn new(name: String, c_name: String) -> Self {
        let struct_tag = c_name.clone();
        ClassType {
            name,
            c_name,
            struct_tag,
            bases: Vec::new(),
            attrs: Vec::new(),
            methods: Vec::new(),
            constructor: None,
            func_names: HashMap::new(),
            redirects: HashMap::new(),
        }
    }

    fn base_classes(&self) -> Vec<ClassRef> {
        self.bases
            .iter()
            .filter_map(|t| if let Type::Class(c) = t { Some(c.clone()) } else { None })
            .collect()
    }

    /// Depth-first, left-to-right lookup of an attribute's declared type.
    pub fn find_attr(&self, name: &str) -> Option<Type> {
        if let Some((_, ty)) = self.attrs.iter().find(|(n, _)| n == name) {
            return Some(ty.clone());
        }
        for base in self.base_classes() {
            let found = base.borrow().find_attr(name);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    pub fn find_method(&self, name: &str) -> Option<SingleFuncType> {
        if let Some((_, sig)) = self.methods.iter().find(|(n, _)| n == name) {
            return Some(sig.clone());
        }
        for base in self.base_classes() {
            let found = base.borrow().find_method(name);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    pub fn all_methods(&self) -> Vec<String> {
        self.func_names.keys().cloned().collect()
    }

    pub fn all_attrs(&self) -> Vec<(String, Type)> {
        let mut out: Vec<(String, Type)> = self.attrs.clone();
        for base in self.base_classes() {
            for (n, t) in base.borrow().all_attrs() {
                if !out.iter().any(|(on, _)| on == &n) {
                    out.push((n, t));
                }
            }
        }
        out
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.func_names.contains_key(name) || self.attrs.iter().any(|(n, _)| n == name)
    }

    /// Depth-first search for `ancestor` among this class's bases.
    /// Returns the chain `[self, ..., ancestor]` (self included, base-most last).
    pub fn path_to_ancestor(this: &ClassRef, ancestor: &ClassRef) -> Option<Vec<ClassRef>> {
        if Rc::ptr_eq(this, ancestor) {
            return Some(vec![this.clone()]);
        }
        for base in this.borrow().base_classes() {
            if let Some(mut path) = ClassType::path_to_ancestor(&base, ancestor) {
                path.insert(0, this.clone());
                return Some(path);
            }
        }
        None
    }

    /// Field-access expression fragment (`.parent_Base.parent_Base2…`)
    /// to reach `ancestor`'s storage inside `this`'s struct.
    pub fn field_path_to_ancestor(this: &ClassRef, ancestor: &ClassRef) -> Option<Vec<String>> {
        let chain = ClassType::path_to_ancestor(this, ancestor)?;
        Some(chain.windows(2).map(|w| format!("parent_{}", w[1].borrow().name)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct GenericClassType {
    pub name: String,
    pub c_name: String,
    pub type_vars: Vec<String>,
    /// keyed by the tuple of instantiation argument C names, in request order.
    pub instantiations: Vec<(Vec<String>, ClassRef)>,
}

impl GenericClassType {
    pub fn new(name: String, c_name: String, type_vars: Vec<String>) -> Self {
        GenericClassType { name, c_name, type_vars, instantiations: Vec::new() }
    }

    pub fn find_instantiation(&self, key: &[String]) -> Option<ClassRef> {
        self.instantiations.iter().find(|(k, _)| k == key).map(|(_, c)| c.clone())
    }
}
