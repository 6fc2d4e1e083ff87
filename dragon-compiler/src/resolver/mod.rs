//! Two-pass resolver: `AST -> annotated AST + symbol tables`.
//!
//! Pass one registers every top-level name (function, class, generic
//! class, overload group) with a fresh unique C name; pass two recurses
//! into bodies, resolving identifiers, laying out classes (attributes,
//! methods, inherited-method redirection), monomorphizing generics on
//! first use, and selecting overloads by argument-type equality.
//!
//! The AST itself is never mutated: everything a later pass needs is
//! recorded in an [`Annotations`] side table keyed by [`NodeId`].

use crate::type_system::{ClassRef, ClassType, FuncType, GenericClassType, GenericRef, OverloadedFuncType, SingleFuncType, Type};
use dragon_ast::{BinOpKind, ClassMember, Expr, LiteralKind, NodeId, Overload, Params, Program, Stmt, TopLevel, TypeExpr, UnaryOpKind};
use dragon_diagnostics::Span;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ResolveError {
    #[error("undefined name '{name}'")]
    UndefinedName { name: String, span: Span },
    #[error("undefined type '{name}'")]
    UndefinedType { name: String, span: Span },
    #[error("'{name}' is not a class")]
    NotAClass { name: String, span: Span },
    #[error("class '{class}' has no member '{name}'")]
    MissingMember { class: String, name: String, span: Span },
    #[error("'{name}' is not callable")]
    NotCallable { name: String, span: Span },
    #[error("no overload of '{name}' matches the given argument types")]
    NoMatchingOverload { name: String, span: Span },
    #[error("'{name}' is not generic")]
    NotGeneric { name: String, span: Span },
    #[error("unsupported operand types for '{op}'")]
    BadOperands { op: String, span: Span },
    #[error("module '{name}' not found")]
    UnknownModule { name: String, span: Span },
    #[error("failed to load import '{file}': {reason}")]
    ImportFailed { file: String, reason: String, span: Span },
}

impl dragon_diagnostics::IntoDiagnostic for ResolveError {
    fn into_diagnostic(self) -> dragon_diagnostics::Diagnostic {
        let span = self.span();
        dragon_diagnostics::Diagnostic::new(span, self.to_string())
    }
}

impl ResolveError {
    pub fn span(&self) -> Span {
        match self {
            ResolveError::UndefinedName { span, .. }
            | ResolveError::UndefinedType { span, .. }
            | ResolveError::NotAClass { span, .. }
            | ResolveError::MissingMember { span, .. }
            | ResolveError::NotCallable { span, .. }
            | ResolveError::NoMatchingOverload { span, .. }
            | ResolveError::NotGeneric { span, .. }
            | ResolveError::BadOperands { span, .. }
            | ResolveError::UnknownModule { span, .. }
            | ResolveError::ImportFailed { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VarMeta {
    pub c_name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleSnapshot {
    pub vars: HashMap<String, VarMeta>,
    pub types: HashMap<String, Type>,
    pub funcs: HashMap<String, FuncType>,
}

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeRef>,
    pub vars: HashMap<String, VarMeta>,
    pub types: HashMap<String, Type>,
    pub funcs: HashMap<String, FuncType>,
    pub modules: HashMap<String, ModuleSnapshot>,
    counter: Rc<RefCell<u32>>,
}

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            parent: None,
            vars: HashMap::new(),
            types: HashMap::new(),
            funcs: HashMap::new(),
            modules: HashMap::new(),
            counter: Rc::new(RefCell::new(0)),
        }))
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            parent: Some(parent.clone()),
            vars: HashMap::new(),
            types: HashMap::new(),
            funcs: HashMap::new(),
            modules: HashMap::new(),
            counter: parent.borrow().counter.clone(),
        }))
    }

    pub fn fresh_name(scope: &ScopeRef, base: &str) -> String {
        let counter_cell = scope.borrow().counter.clone();
        let mut counter = counter_cell.borrow_mut();
        *counter += 1;
        format!("{base}_{counter}")
    }

    pub fn lookup_var(scope: &ScopeRef, name: &str) -> Option<VarMeta> {
        if let Some(v) = scope.borrow().vars.get(name) {
            return Some(v.clone());
        }
        let parent = scope.borrow().parent.clone()?;
        Scope::lookup_var(&parent, name)
    }

    pub fn lookup_type(scope: &ScopeRef, name: &str) -> Option<Type> {
        if let Some(t) = scope.borrow().types.get(name) {
            return Some(t.clone());
        }
        let parent = scope.borrow().parent.clone()?;
        Scope::lookup_type(&parent, name)
    }

    pub fn lookup_func(scope: &ScopeRef, name: &str) -> Option<FuncType> {
        if let Some(f) = scope.borrow().funcs.get(name) {
            return Some(f.clone());
        }
        let parent = scope.borrow().parent.clone()?;
        Scope::lookup_func(&parent, name)
    }

    pub fn lookup_module(scope: &ScopeRef, name: &str) -> Option<ModuleSnapshot> {
        if let Some(m) = scope.borrow().modules.get(name) {
            return Some(m.clone());
        }
        let parent = scope.borrow().parent.clone()?;
        Scope::lookup_module(&parent, name)
    }
}

/// Side table of everything the resolver learns about a node, keyed by
/// [`NodeId`] rather than stored on the node itself.
#[derive(Debug, Default)]
pub struct Annotations {
    pub expr_types: HashMap<NodeId, Type>,
    /// `GetVar`/`SetVar`/`VarStmt` -> the variable's minted C identifier.
    pub var_cnames: HashMap<NodeId, String>,
    /// `Call` (free-function call only; method calls dispatch through
    /// the struct's function-pointer slot and need no override) -> C symbol.
    pub call_targets: HashMap<NodeId, String>,
    /// `ReturnStmt` -> locally scoped class-typed bindings to release.
    pub to_delete: HashMap<NodeId, Vec<(String, Type)>>,
    /// Top-level `Function`/`Class`/`GenericClass` -> minted C identifier.
    pub top_cnames: HashMap<NodeId, String>,
    /// Class-shaped top-level source name -> its resolved layout.
    pub classes: HashMap<String, ClassRef>,
    pub generics: HashMap<String, GenericRef>,
    /// Generic class node id -> synthesized instantiation class ASTs,
    /// kept out-of-tree rather than spliced into the source AST.
    pub generic_implements: HashMap<NodeId, Vec<ClassRef>>,
    /// instantiated class's C name -> the (shared) template body used to build it,
    /// so codegen can emit method/constructor bodies for monomorphized classes too.
    pub generic_instance_bodies: HashMap<String, Vec<ClassMember>>,
    /// `Function`/`Overload` node id -> resolved, ordered parameter types.
    pub func_param_types: HashMap<NodeId, Vec<(String, Type)>>,
    pub main_cname: Option<String>,
}

struct GenericTemplate {
    bases: Vec<TypeExpr>,
    body: Vec<ClassMember>,
    scope: ScopeRef,
    type_vars: Vec<String>,
    node_id: NodeId,
}

#[derive(Debug)]
pub struct Resolved {
    pub program: Program,
    pub annotations: Annotations,
    pub root_scope: ScopeRef,
    /// class-shaped top-level declarations in declaration order, generics first
    /// expanded after their own-member pass — used by codegen for emission order.
    pub class_order: Vec<ClassRef>,
}

/// Resolve a loader to bring in an imported file's text, letting the
/// CLI choose filesystem semantics while the resolver stays I/O-free by
/// default in tests.
pub trait ImportLoader {
    fn load(&mut self, file: &str) -> Result<String, String>;
}

pub struct NoImports;
impl ImportLoader for NoImports {
    fn load(&mut self, file: &str) -> Result<String, String> {
        Err(format!("imports are not supported in this context ('{file}')"))
    }
}

struct Ctx<'a> {
    ann: Annotations,
    templates: HashMap<String, GenericTemplate>,
    loader: &'a mut dyn ImportLoader,
}

pub fn resolve(program: Program) -> Result<Resolved, ResolveError> {
    resolve_with_loader(program, &mut NoImports)
}

pub fn resolve_with_loader(program: Program, loader: &mut dyn ImportLoader) -> Result<Resolved, ResolveError> {
    let root = Scope::root();
    seed_builtins(&root);
    let globals = Scope::child(&root);

    let mut ctx = Ctx { ann: Annotations::default(), templates: HashMap::new(), loader };

    // Step A: placeholders for every class-shaped top level, so forward
    // references between classes resolve regardless of declaration order.
    for item in &program.top_level {
        match item {
            TopLevel::Class { id, name, .. } => {
                let c_name = Scope::fresh_name(&globals, name);
                let class_ref = Rc::new(RefCell::new(ClassType::new(name.clone(), c_name.clone())));
                globals.borrow_mut().types.insert(name.clone(), Type::Class(class_ref.clone()));
                ctx.ann.classes.insert(name.clone(), class_ref);
                ctx.ann.top_cnames.insert(*id, c_name);
            }
            TopLevel::GenericClass { id, name, type_vars, .. } => {
                let c_name = Scope::fresh_name(&globals, name);
                let generic_ref = Rc::new(RefCell::new(GenericClassType::new(name.clone(), c_name.clone(), type_vars.clone())));
                globals.borrow_mut().types.insert(name.clone(), Type::Generic(generic_ref.clone()));
                ctx.ann.generics.insert(name.clone(), generic_ref);
                ctx.ann.top_cnames.insert(*id, c_name);
            }
            _ => {}
        }
    }

    // Step B+C: bases and own members for every concrete (non-generic) class.
    for item in &program.top_level {
        if let TopLevel::Class { name, bases, body, .. } = item {
            let class_ref = ctx.ann.classes.get(name).expect("placed in step A").clone();
            resolve_own_members(&class_ref, bases, body, &globals, &mut ctx)?;
        }
    }

    // Generic class templates are recorded, not resolved yet — they resolve
    // lazily per concrete instantiation (see `monomorphize`).
    for item in &program.top_level {
        if let TopLevel::GenericClass { id, name, bases, body, type_vars, .. } = item {
            ctx.templates.insert(
                name.clone(),
                GenericTemplate {
                    bases: bases.clone(),
                    body: body.clone(),
                    scope: globals.clone(),
                    type_vars: type_vars.clone(),
                    node_id: *id,
                },
            );
        }
    }

    // Step D: inherited-method tables. Bases must be computed before the
    // classes that inherit from them, so this can't just walk the (HashMap,
    // thus arbitrarily ordered) class registry — it recurses into bases first.
    let mut computed: std::collections::HashSet<String> = std::collections::HashSet::new();
    let class_refs: Vec<ClassRef> = ctx.ann.classes.values().cloned().collect();
    for class_ref in &class_refs {
        ensure_func_table(class_ref, &globals, &mut computed);
    }

    // Pass 1b: function / overload-group / import signatures.
    for item in &program.top_level {
        match item {
            TopLevel::Function { id, name, params, ret, .. } => {
                let sig = resolve_signature(params, ret, &globals, &mut ctx)?;
                let c_name = Scope::fresh_name(&globals, name);
                ctx.ann.top_cnames.insert(*id, c_name.clone());
                ctx.ann.func_param_types.insert(*id, sig.params.clone());
                if name == "main" {
                    ctx.ann.main_cname = Some(c_name.clone());
                }
                globals.borrow_mut().funcs.insert(name.clone(), FuncType::Single(SingleFuncType { c_name, ..sig }));
            }
            TopLevel::OverloadedFunction { name, overloads, .. } => {
                let mut group = OverloadedFuncType::default();
                for (n, overload) in overloads.iter().enumerate() {
                    let sig = resolve_signature(&overload.params, &overload.ret, &globals, &mut ctx)?;
                    let c_name = format!("{name}_{n}");
                    ctx.ann.func_param_types.insert(overload.id, sig.params.clone());
                    group.insert(sig.params.iter().map(|(_, t)| t.clone()).collect(), sig.ret.clone(), c_name);
                }
                globals.borrow_mut().funcs.insert(name.clone(), FuncType::Overloaded(group));
            }
            TopLevel::Import { file, .. } => {
                let snapshot = load_import(file, &mut ctx)?;
                let module_name = std::path::Path::new(file)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.clone());
                globals.borrow_mut().modules.insert(module_name, snapshot);
            }
            _ => {}
        }
    }

    // Pass 2: resolve bodies.
    for item in &program.top_level {
        match item {
            TopLevel::Function { id, name, params, body, .. } => {
                let func_scope = Scope::child(&globals);
                bind_params(params, &func_scope, &mut ctx)?;
                let mut locals = Vec::new();
                resolve_stmts(body, &func_scope, &mut ctx, &mut locals)?;
                let _ = (id, name);
            }
            TopLevel::OverloadedFunction { overloads, .. } => {
                for Overload { params, body, .. } in overloads {
                    let func_scope = Scope::child(&globals);
                    bind_params(params, &func_scope, &mut ctx)?;
                    let mut locals = Vec::new();
                    resolve_stmts(body, &func_scope, &mut ctx, &mut locals)?;
                }
            }
            TopLevel::Class { name, .. } => {
                let class_ref = ctx.ann.classes.get(name).expect("resolved above").clone();
                resolve_class_bodies(&class_ref, &class_ast_body(item), &globals, &mut ctx)?;
            }
            _ => {}
        }
    }

    let class_order = program
        .top_level
        .iter()
        .filter_map(|item| match item {
            TopLevel::Class { name, .. } => ctx.ann.classes.get(name).cloned(),
            _ => None,
        })
        .collect();

    Ok(Resolved { program, annotations: ctx.ann, root_scope: globals, class_order })
}

fn class_ast_body(item: &TopLevel) -> Vec<ClassMember> {
    match item {
        TopLevel::Class { body, .. } => body.clone(),
        _ => Vec::new(),
    }
}

fn seed_builtins(root: &ScopeRef) {
    let mut scope = root.borrow_mut();
    scope.types.insert("int".into(), Type::Int);
    scope.types.insert("Object".into(), Type::Object);
    scope.types.insert("Integer".into(), Type::Integer);
    scope.types.insert("String".into(), Type::String);
    scope.types.insert("_Array".into(), Type::Array);

    scope.funcs.insert(
        "print".into(),
        FuncType::Single(SingleFuncType { params: vec![("v".into(), Type::Object)], ret: Type::Void, c_name: "print".into() }),
    );
    scope.funcs.insert(
        "exit".into(),
        FuncType::Single(SingleFuncType { params: vec![("code".into(), Type::Int)], ret: Type::Void, c_name: "exit".into() }),
    );
    scope.funcs.insert(
        "is_null".into(),
        FuncType::Single(SingleFuncType { params: vec![("v".into(), Type::Object)], ret: Type::Bool, c_name: "is_null".into() }),
    );
    scope.funcs.insert(
        "clock".into(),
        FuncType::Single(SingleFuncType { params: vec![], ret: Type::Int, c_name: "dragon_clock".into() }),
    );
    scope.vars.insert("null".into(), VarMeta { c_name: "NULL".into(), ty: Type::NullType });
}

fn load_import(file: &str, ctx: &mut Ctx) -> Result<ModuleSnapshot, ResolveError> {
    let span = Span::point(0, 0);
    let text = ctx.loader.load(file).map_err(|reason| ResolveError::ImportFailed { file: file.to_string(), reason, span })?;
    let program = dragon_parser::parse(&text).map_err(|e| ResolveError::ImportFailed { file: file.to_string(), reason: e.to_string(), span })?;
    let resolved = resolve_with_loader(program, ctx.loader).map_err(|e| ResolveError::ImportFailed { file: file.to_string(), reason: e.to_string(), span })?;
    let mut snapshot = ModuleSnapshot::default();
    for (name, c) in resolved.annotations.classes {
        snapshot.types.insert(name, Type::Class(c));
    }
    for (name, g) in resolved.annotations.generics {
        snapshot.types.insert(name, Type::Generic(g));
    }
    for item in &resolved.program.top_level {
        if let Some(name) = item.name() {
            if let Some(f) = Scope::lookup_func(&resolved.root_scope, name) {
                snapshot.funcs.insert(name.to_string(), f);
            }
        }
    }
    Ok(snapshot)
}

fn resolve_signature(params: &Params, ret: &Option<TypeExpr>, scope: &ScopeRef, ctx: &mut Ctx) -> Result<SingleFuncType, ResolveError> {
    let mut resolved_params = Vec::new();
    for (name, ty) in params {
        resolved_params.push((name.clone(), resolve_type_expr(ty, scope, ctx)?));
    }
    let ret_ty = match ret {
        Some(t) => resolve_type_expr(t, scope, ctx)?,
        None => Type::Void,
    };
    Ok(SingleFuncType { params: resolved_params, ret: ret_ty, c_name: String::new() })
}

fn bind_params(params: &Params, scope: &ScopeRef, ctx: &mut Ctx) -> Result<(), ResolveError> {
    for (name, ty) in params {
        let resolved = resolve_type_expr(ty, scope, ctx)?;
        scope.borrow_mut().vars.insert(name.clone(), VarMeta { c_name: name.clone(), ty: resolved });
    }
    Ok(())
}

fn resolve_type_expr(ty: &TypeExpr, scope: &ScopeRef, ctx: &mut Ctx) -> Result<Type, ResolveError> {
    match ty {
        TypeExpr::Name { name, span, .. } => match name.as_str() {
            "int" => Ok(Type::Int),
            "bool" => Ok(Type::Bool),
            "void" => Ok(Type::Void),
            _ => Scope::lookup_type(scope, name).ok_or(ResolveError::UndefinedType { name: name.clone(), span: *span }),
        },
        TypeExpr::GetName { base, name, span, .. } => {
            let module_name = base.head_name();
            let module = Scope::lookup_module(scope, module_name).ok_or(ResolveError::UnknownModule { name: module_name.to_string(), span: *span })?;
            module.types.get(name).cloned().ok_or(ResolveError::UndefinedType { name: name.clone(), span: *span })
        }
        TypeExpr::Generic { base, args, span, .. } => {
            let head = base.head_name();
            let generic_type = Scope::lookup_type(scope, head).ok_or(ResolveError::UndefinedType { name: head.to_string(), span: *span })?;
            let generic_ref = match generic_type {
                Type::Generic(g) => g,
                _ => return Err(ResolveError::NotGeneric { name: head.to_string(), span: *span }),
            };
            let mut resolved_args = Vec::new();
            for a in args {
                resolved_args.push(resolve_type_expr(a, scope, ctx)?);
            }
            let class = monomorphize(&generic_ref, resolved_args, ctx)?;
            Ok(Type::Class(class))
        }
    }
}

fn arg_key(ty: &Type) -> String {
    match ty {
        Type::Class(c) => c.borrow().c_name.clone(),
        Type::Generic(g) => g.borrow().c_name.clone(),
        other => other.to_string(),
    }
}

fn monomorphize(generic: &GenericRef, args: Vec<Type>, ctx: &mut Ctx) -> Result<ClassRef, ResolveError> {
    let key: Vec<String> = args.iter().map(arg_key).collect();
    if let Some(existing) = generic.borrow().find_instantiation(&key) {
        return Ok(existing);
    }

    let name = generic.borrow().name.clone();
    let template_scope;
    let template_bases;
    let template_body;
    let template_vars;
    let node_id;
    {
        let t = ctx.templates.get(&name).expect("generic template registered");
        template_scope = t.scope.clone();
        template_bases = t.bases.clone();
        template_body = t.body.clone();
        template_vars = t.type_vars.clone();
        node_id = t.node_id;
    }

    let inst_scope = Scope::child(&template_scope);
    for (var, arg) in template_vars.iter().zip(args.iter()) {
        inst_scope.borrow_mut().types.insert(var.clone(), arg.clone());
    }

    let inst_name = format!("{}__{}", name, key.join("_"));
    let c_name = Scope::fresh_name(&template_scope, &inst_name);
    let class_ref = Rc::new(RefCell::new(ClassType::new(inst_name, c_name)));

    resolve_own_members(&class_ref, &template_bases, &template_body, &inst_scope, ctx)?;
    compute_func_table(&class_ref, &inst_scope);
    resolve_class_bodies(&class_ref, &template_body, &inst_scope, ctx)?;
    ctx.ann.generic_instance_bodies.insert(class_ref.borrow().c_name.clone(), template_body.clone());

    generic.borrow_mut().instantiations.push((key, class_ref.clone()));
    ctx.ann.generic_implements.entry(node_id).or_default().push(class_ref.clone());
    Ok(class_ref)
}

fn resolve_own_members(class_ref: &ClassRef, bases: &[TypeExpr], body: &[ClassMember], scope: &ScopeRef, ctx: &mut Ctx) -> Result<(), ResolveError> {
    let mut resolved_bases = Vec::new();
    for b in bases {
        resolved_bases.push(resolve_type_expr(b, scope, ctx)?);
    }
    class_ref.borrow_mut().bases = resolved_bases;

    let class_c_name = class_ref.borrow().c_name.clone();
    for member in body {
        match member {
            ClassMember::Attr { name, ty, .. } => {
                let resolved = resolve_type_expr(ty, scope, ctx)?;
                class_ref.borrow_mut().attrs.push((name.clone(), resolved));
            }
            ClassMember::Method { name, params, ret, .. } => {
                let mut resolved_params = vec![("_self".to_string(), Type::VoidPtr)];
                for (pname, pty) in params {
                    resolved_params.push((pname.clone(), resolve_type_expr(pty, scope, ctx)?));
                }
                let ret_ty = match ret {
                    Some(t) => resolve_type_expr(t, scope, ctx)?,
                    None => Type::Void,
                };
                let c_name = format!("{class_c_name}_{name}");
                class_ref.borrow_mut().methods.push((name.clone(), SingleFuncType { params: resolved_params, ret: ret_ty, c_name }));
            }
            ClassMember::Constructor { params, .. } => {
                let mut resolved_params = Vec::new();
                for (pname, pty) in params {
                    resolved_params.push((pname.clone(), resolve_type_expr(pty, scope, ctx)?));
                }
                let c_name = format!("new_{class_c_name}");
                let ret_ty = Type::Class(class_ref.clone());
                class_ref.borrow_mut().constructor = Some(SingleFuncType { params: resolved_params, ret: ret_ty, c_name });
            }
        }
    }
    Ok(())
}

/// Computes `class_ref`'s func table after recursively computing every
/// base's, memoized by C name so diamond/shared bases aren't redone.
fn ensure_func_table(class_ref: &ClassRef, scope: &ScopeRef, computed: &mut std::collections::HashSet<String>) {
    let c_name = class_ref.borrow().c_name.clone();
    if computed.contains(&c_name) {
        return;
    }
    computed.insert(c_name);
    let bases: Vec<ClassRef> = class_ref
        .borrow()
        .bases
        .iter()
        .filter_map(|t| if let Type::Class(c) = t { Some(c.clone()) } else { None })
        .collect();
    for base in &bases {
        ensure_func_table(base, scope, computed);
    }
    compute_func_table(class_ref, scope);
}

fn compute_func_table(class_ref: &ClassRef, scope: &ScopeRef) {
    let class_c_name = class_ref.borrow().c_name.clone();
    let bases: Vec<ClassRef> = class_ref
        .borrow()
        .bases
        .iter()
        .filter_map(|t| if let Type::Class(c) = t { Some(c.clone()) } else { None })
        .collect();

    let mut func_names: HashMap<String, String> = HashMap::new();
    for base in &bases {
        for (name, cname) in &base.borrow().func_names {
            func_names.entry(name.clone()).or_insert_with(|| cname.clone());
        }
    }

    let own_names: Vec<String> = class_ref.borrow().methods.iter().map(|(n, _)| n.clone()).collect();
    for (name, sig) in &class_ref.borrow().methods {
        func_names.insert(name.clone(), sig.c_name.clone());
        let _ = sig;
    }

    let mut redirect_names: Vec<String> = func_names.keys().filter(|&n| !own_names.contains(n)).cloned().collect();
    redirect_names.sort();
    let mut redirects = HashMap::new();
    for name in redirect_names {
        let thunk = Scope::fresh_name(scope, &format!("{class_c_name}_redirect_{name}"));
        redirects.insert(name.clone(), thunk.clone());
        func_names.insert(name, thunk);
    }

    let mut c = class_ref.borrow_mut();
    c.func_names = func_names;
    c.redirects = redirects;
}

fn resolve_class_bodies(class_ref: &ClassRef, body: &[ClassMember], scope: &ScopeRef, ctx: &mut Ctx) -> Result<(), ResolveError> {
    for member in body {
        match member {
            ClassMember::Method { name, body: stmts, .. } => {
                let method_scope = Scope::child(scope);
                method_scope.borrow_mut().vars.insert("self".into(), VarMeta { c_name: "self".into(), ty: Type::Class(class_ref.clone()) });
                method_scope.borrow_mut().vars.insert("_self".into(), VarMeta { c_name: "_self".into(), ty: Type::VoidPtr });
                let sig = class_ref.borrow().methods.iter().find(|(n, _)| n == name).map(|(_, s)| s.clone());
                if let Some(sig) = sig {
                    for (pname, pty) in sig.params.iter().skip(1) {
                        method_scope.borrow_mut().vars.insert(pname.clone(), VarMeta { c_name: pname.clone(), ty: pty.clone() });
                    }
                }
                let mut locals = Vec::new();
                resolve_stmts(stmts, &method_scope, ctx, &mut locals)?;
            }
            ClassMember::Constructor { params, body: stmts, .. } => {
                let ctor_scope = Scope::child(scope);
                ctor_scope.borrow_mut().vars.insert("self".into(), VarMeta { c_name: "self".into(), ty: Type::Class(class_ref.clone()) });
                for (pname, pty) in params {
                    let resolved = resolve_type_expr(pty, scope, ctx)?;
                    ctor_scope.borrow_mut().vars.insert(pname.clone(), VarMeta { c_name: pname.clone(), ty: resolved });
                }
                let mut locals = Vec::new();
                resolve_stmts(stmts, &ctor_scope, ctx, &mut locals)?;
            }
            ClassMember::Attr { .. } => {}
        }
    }
    Ok(())
}

fn resolve_stmts(stmts: &[Stmt], scope: &ScopeRef, ctx: &mut Ctx, locals: &mut Vec<(String, Type)>) -> Result<(), ResolveError> {
    for stmt in stmts {
        resolve_stmt(stmt, scope, ctx, locals)?;
    }
    Ok(())
}

fn resolve_stmt(stmt: &Stmt, scope: &ScopeRef, ctx: &mut Ctx, locals: &mut Vec<(String, Type)>) -> Result<(), ResolveError> {
    match stmt {
        Stmt::Block { stmts, .. } => {
            let block_scope = Scope::child(scope);
            resolve_stmts(stmts, &block_scope, ctx, locals)?;
        }
        Stmt::If { cond, then_branch, else_branch, .. } => {
            resolve_expr(cond, scope, ctx)?;
            resolve_stmt(then_branch, scope, ctx, locals)?;
            if let Some(e) = else_branch {
                resolve_stmt(e, scope, ctx, locals)?;
            }
        }
        Stmt::While { cond, body, .. } => {
            resolve_expr(cond, scope, ctx)?;
            resolve_stmt(body, scope, ctx, locals)?;
        }
        Stmt::Var { id, name, ty, value, .. } => {
            let value_ty = resolve_expr(value, scope, ctx)?;
            let declared = match ty {
                Some(t) => resolve_type_expr(t, scope, ctx)?,
                None => value_ty,
            };
            let c_name = Scope::fresh_name(scope, name);
            scope.borrow_mut().vars.insert(name.clone(), VarMeta { c_name: c_name.clone(), ty: declared.clone() });
            ctx.ann.var_cnames.insert(*id, c_name.clone());
            if declared.is_class_like() {
                locals.push((c_name, declared));
            }
        }
        Stmt::Delete { obj, .. } => {
            resolve_expr(obj, scope, ctx)?;
        }
        Stmt::Return { id, value, .. } => {
            if let Some(v) = value {
                resolve_expr(v, scope, ctx)?;
            }
            ctx.ann.to_delete.insert(*id, locals.clone());
        }
        Stmt::ExprStmt { expr, .. } => {
            resolve_expr(expr, scope, ctx)?;
        }
    }
    Ok(())
}

fn resolve_expr(expr: &Expr, scope: &ScopeRef, ctx: &mut Ctx) -> Result<Type, ResolveError> {
    let ty = match expr {
        Expr::Literal { id, kind, .. } => {
            let t = match kind {
                LiteralKind::Num(_) | LiteralKind::Hex(_) => Type::Int,
                LiteralKind::Str(_) => Type::String,
            };
            ctx.ann.expr_types.insert(*id, t.clone());
            t
        }
        Expr::GetVar { id, name, span } => {
            let var = Scope::lookup_var(scope, name).ok_or(ResolveError::UndefinedName { name: name.clone(), span: *span })?;
            ctx.ann.var_cnames.insert(*id, var.c_name);
            ctx.ann.expr_types.insert(*id, var.ty.clone());
            var.ty
        }
        Expr::SetVar { id, name, value, span } => {
            resolve_expr(value, scope, ctx)?;
            let var = Scope::lookup_var(scope, name).ok_or(ResolveError::UndefinedName { name: name.clone(), span: *span })?;
            ctx.ann.var_cnames.insert(*id, var.c_name);
            ctx.ann.expr_types.insert(*id, var.ty.clone());
            var.ty
        }
        Expr::GetAttr { id, obj, attr, span } => {
            let obj_ty = resolve_expr(obj, scope, ctx)?;
            let class_ref = class_of(&obj_ty, span)?;
            let ty = class_ref
                .borrow()
                .find_attr(attr)
                .or_else(|| class_ref.borrow().find_method(attr).map(|_| Type::VoidPtr))
                .ok_or_else(|| ResolveError::MissingMember { class: class_ref.borrow().name.clone(), name: attr.clone(), span: *span })?;
            ctx.ann.expr_types.insert(*id, ty.clone());
            ty
        }
        Expr::SetAttr { id, obj, attr, value, span } => {
            let obj_ty = resolve_expr(obj, scope, ctx)?;
            resolve_expr(value, scope, ctx)?;
            let class_ref = class_of(&obj_ty, span)?;
            let ty = class_ref
                .borrow()
                .find_attr(attr)
                .ok_or_else(|| ResolveError::MissingMember { class: class_ref.borrow().name.clone(), name: attr.clone(), span: *span })?;
            ctx.ann.expr_types.insert(*id, ty.clone());
            ty
        }
        Expr::BinOp { id, left, op, right, span } => {
            let lt = resolve_expr(left, scope, ctx)?;
            let rt = resolve_expr(right, scope, ctx)?;
            let ty = resolve_binop(*op, &lt, &rt, *span)?;
            ctx.ann.expr_types.insert(*id, ty.clone());
            ty
        }
        Expr::Unary { id, op, right, .. } => {
            let rt = resolve_expr(right, scope, ctx)?;
            let ty = match op {
                UnaryOpKind::Neg => Type::Int,
                UnaryOpKind::Not => Type::Bool,
            };
            let _ = rt;
            ctx.ann.expr_types.insert(*id, ty.clone());
            ty
        }
        Expr::Grouping { id, inner, .. } => {
            let t = resolve_expr(inner, scope, ctx)?;
            ctx.ann.expr_types.insert(*id, t.clone());
            t
        }
        Expr::Cast { id, obj, ty, .. } => {
            resolve_expr(obj, scope, ctx)?;
            let target = resolve_type_expr(ty, scope, ctx)?;
            ctx.ann.expr_types.insert(*id, target.clone());
            target
        }
        Expr::New { id, class, args, span } => {
            let ty = resolve_type_expr(class, scope, ctx)?;
            for a in args {
                resolve_expr(a, scope, ctx)?;
            }
            let _ = span;
            ctx.ann.expr_types.insert(*id, ty.clone());
            ty
        }
        Expr::Call { id, callee, args, span } => resolve_call(*id, callee, args, *span, scope, ctx)?,
    };
    Ok(ty)
}

fn class_of(ty: &Type, span: &Span) -> Result<ClassRef, ResolveError> {
    match ty {
        Type::Class(c) => Ok(c.clone()),
        other => Err(ResolveError::NotAClass { name: other.to_string(), span: *span }),
    }
}

fn resolve_binop(op: BinOpKind, lt: &Type, rt: &Type, span: Span) -> Result<Type, ResolveError> {
    use BinOpKind::*;
    match op {
        Add | Sub | Mul | Div | FloorDiv | Mod => {
            if *lt == Type::Int && *rt == Type::Int {
                Ok(Type::Int)
            } else {
                Err(ResolveError::BadOperands { op: format!("{op:?}"), span })
            }
        }
        Lt | Gt | Le | Ge => {
            if *lt == Type::Int && *rt == Type::Int {
                Ok(Type::Bool)
            } else {
                Err(ResolveError::BadOperands { op: format!("{op:?}"), span })
            }
        }
        Eq | Ne => {
            if matches!(lt, Type::NullType) || matches!(rt, Type::NullType) || lt == rt {
                Ok(Type::Bool)
            } else {
                Err(ResolveError::BadOperands { op: format!("{op:?}"), span })
            }
        }
    }
}

fn resolve_call(id: NodeId, callee: &Expr, args: &[Expr], span: Span, scope: &ScopeRef, ctx: &mut Ctx) -> Result<Type, ResolveError> {
    let mut arg_types = Vec::new();
    for a in args {
        arg_types.push(resolve_expr(a, scope, ctx)?);
    }

    match callee {
        Expr::GetAttr { obj, attr, .. } => {
            let obj_ty = resolve_expr(obj, scope, ctx)?;
            let class_ref = class_of(&obj_ty, &span)?;
            let method = class_ref
                .borrow()
                .find_method(attr)
                .ok_or_else(|| ResolveError::MissingMember { class: class_ref.borrow().name.clone(), name: attr.clone(), span })?;
            ctx.ann.expr_types.insert(id, method.ret.clone());
            Ok(method.ret)
        }
        Expr::GetVar { name, .. } => match Scope::lookup_func(scope, name) {
            Some(FuncType::Single(sig)) => {
                ctx.ann.call_targets.insert(id, sig.c_name.clone());
                ctx.ann.expr_types.insert(id, sig.ret.clone());
                Ok(sig.ret)
            }
            Some(FuncType::Overloaded(group)) => {
                let ((_, ret), c_name) = group
                    .resolve(&arg_types)
                    .ok_or_else(|| ResolveError::NoMatchingOverload { name: name.clone(), span })?
                    .clone();
                ctx.ann.call_targets.insert(id, c_name);
                ctx.ann.expr_types.insert(id, ret.clone());
                Ok(ret)
            }
            None => Err(ResolveError::UndefinedName { name: name.clone(), span }),
        },
        _ => Err(ResolveError::NotCallable { name: "<expr>".into(), span }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_src(src: &str) -> Resolved {
        let program = dragon_parser::parse(src).expect("parse ok");
        resolve(program).expect("resolve ok")
    }

    #[test]
    fn hello_world_binds_main_and_print() {
        let resolved = resolve_src("def main() -> int { print(\"hi\"); return 0; }");
        assert!(resolved.annotations.main_cname.is_some());
    }

    #[test]
    fn single_inheritance_override_keeps_own_slot() {
        let resolved = resolve_src(
            "class A { method f() -> int { return 1; } } \
             class B(A) { method f() -> int { return 2; } } \
             def main() -> int { return 0; }",
        );
        let b = resolved.annotations.classes.get("B").expect("B registered");
        let slot = b.borrow().func_names.get("f").cloned();
        let own_c_name = b.borrow().methods.iter().find(|(n, _)| n == "f").map(|(_, s)| s.c_name.clone());
        assert_eq!(slot, own_c_name, "overriding class keeps its own method in the dispatch slot");
        assert!(b.borrow().redirects.is_empty(), "no thunk needed when the subclass overrides every inherited name");
    }

    #[test]
    fn inherited_method_gets_a_redirect_thunk() {
        let resolved = resolve_src(
            "class A { method f() -> int { return 1; } } \
             class B(A) { attr x: int; } \
             def main() -> int { return 0; }",
        );
        let b = resolved.annotations.classes.get("B").expect("B registered");
        assert!(b.borrow().redirects.contains_key("f"), "B inherits f without overriding it, so it needs a redirect thunk");
        let thunk = b.borrow().redirects.get("f").cloned().expect("thunk recorded");
        assert_eq!(b.borrow().func_names.get("f").cloned(), Some(thunk), "the dispatch slot points at the thunk, not A's own method");
    }

    #[test]
    fn multiple_inheritance_first_base_wins_unclaimed_names() {
        let resolved = resolve_src(
            "class A { method f() -> int { return 1; } } \
             class C { method g() -> int { return 2; } } \
             class D(A, C) { } \
             def main() -> int { return 0; }",
        );
        let d = resolved.annotations.classes.get("D").expect("D registered");
        assert!(d.borrow().redirects.contains_key("f"));
        assert!(d.borrow().redirects.contains_key("g"));
    }

    #[test]
    fn generic_class_monomorphizes_per_argument_combination() {
        let resolved = resolve_src(
            "class Box<T> { attr v: T; method get() -> T { return self.v; } } \
             class A { } \
             def main() -> int { var a: Box<A> = new Box<A>(); var b: Box<A> = new Box<A>(); return 0; }",
        );
        // both `Box<A>` usages must monomorphize to the same cached class.
        let total_instances: usize = resolved.annotations.generic_implements.values().map(|v| v.len()).sum();
        assert_eq!(total_instances, 1, "identical argument lists share one instantiation");
    }

    #[test]
    fn overloaded_functions_mint_distinct_c_symbols() {
        let resolved = resolve_src(
            "def add(a: int, b: int) -> int { return a; } \
             def add(a: String, b: String) -> String { return a; } \
             def main() -> int { return 0; }",
        );
        let add = Scope::lookup_func(&resolved.root_scope, "add").expect("add registered");
        let FuncType::Overloaded(group) = add else { panic!("expected overload group") };
        assert_eq!(group.overloads.len(), 2);
        let names: Vec<&String> = group.overloads.iter().map(|(_, c)| c).collect();
        assert_ne!(names[0], names[1], "each overload gets a distinct C symbol");
    }

    #[test]
    fn overload_call_with_exact_int_selects_the_int_overload() {
        let resolved = resolve_src(
            "def f(a: int) -> int { return a; } \
             def f(a: Object) -> int { return 0; } \
             def main() -> int { return f(1); }",
        );
        let add = Scope::lookup_func(&resolved.root_scope, "f").expect("f registered");
        let FuncType::Overloaded(group) = add else { panic!("expected overload group") };
        let int_overload_name = group.overloads[0].1.clone();
        let TopLevel::Function { body, .. } = resolved.program.top_level.last().expect("main present") else { panic!("expected function") };
        let Stmt::Return { value: Some(call), .. } = &body[0] else { panic!("expected return") };
        assert_eq!(resolved.annotations.call_targets.get(&call.id()).cloned(), Some(int_overload_name));
    }

    #[test]
    fn overload_call_with_a_string_coerces_to_the_object_overload() {
        let resolved = resolve_src(
            "def f(a: int) -> int { return a; } \
             def f(a: Object) -> int { return 0; } \
             def main() -> int { return f(\"s\"); }",
        );
        let add = Scope::lookup_func(&resolved.root_scope, "f").expect("f registered");
        let FuncType::Overloaded(group) = add else { panic!("expected overload group") };
        let object_overload_name = group.overloads[1].1.clone();
        let TopLevel::Function { body, .. } = resolved.program.top_level.last().expect("main present") else { panic!("expected function") };
        let Stmt::Return { value: Some(call), .. } = &body[0] else { panic!("expected return") };
        assert_eq!(
            resolved.annotations.call_targets.get(&call.id()).cloned(),
            Some(object_overload_name),
            "a String argument has no exact match but coerces to the Object overload"
        );
    }

    #[test]
    fn overload_call_matching_neither_overload_is_an_error() {
        let program = dragon_parser::parse(
            "def f(a: int) -> int { return a; } \
             def f(a: Object) -> int { return 0; } \
             def main() -> int { return f(1 == 1); }",
        )
        .expect("parse ok");
        let err = resolve(program).expect_err("Bool matches neither overload and doesn't coerce to either");
        assert!(matches!(err, ResolveError::NoMatchingOverload { name, .. } if name == "f"));
    }

    #[test]
    fn undefined_name_is_reported_with_a_span() {
        let program = dragon_parser::parse("def main() -> int { return missing; }").expect("parse ok");
        let err = resolve(program).expect_err("missing should fail to resolve");
        assert!(matches!(err, ResolveError::UndefinedName { name, .. } if name == "missing"));
    }

    #[test]
    fn import_without_a_loader_fails_cleanly() {
        let program = dragon_parser::parse("#import \"other.drgn\" def main() -> int { return 0; }").expect("parse ok");
        let err = resolve(program).expect_err("NoImports always errors");
        assert!(matches!(err, ResolveError::ImportFailed { .. }));
    }
}
