//! AST + annotations -> C-IR -> C source text.
//!
//! One [`CUnit`] is produced per compiled program. Class layout,
//! dispatch-table wiring, coercion and cast lowering follow the
//! resolver's `ClassType`/`Annotations` side tables rather than
//! re-deriving anything from the source text.

use crate::codegen_ast::{CExpr, CFunction, CParam, CStmt, CStruct, CStructField, CUnit};
use crate::resolver::Resolved;
use crate::type_system::{ClassRef, ClassType, Type};
use dragon_ast::{BinOpKind, ClassMember, Expr, LiteralKind, Overload, Stmt, TopLevel, UnaryOpKind};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CodegenError {
    #[error("no 'main' function declared at top level")]
    MissingMain,
    #[error("cannot coerce {from} to {to}")]
    BadCoercion { from: String, to: String },
}

pub fn generate(resolved: &Resolved) -> Result<CUnit, CodegenError> {
    let mut unit = CUnit { includes: vec!["dragon.h".into(), "list.h".into()], ..Default::default() };

    for item in &resolved.program.top_level {
        if let TopLevel::Class { name, body, .. } = item {
            let class_ref = resolved.annotations.classes.get(name).expect("every Class was registered during resolve");
            emit_class(class_ref, &mut unit);
            emit_class_bodies(class_ref, body, resolved, &mut unit)?;
        }
    }
    for classes in resolved.annotations.generic_implements.values() {
        for class_ref in classes {
            emit_class(class_ref, &mut unit);
            let c_name = class_ref.borrow().c_name.clone();
            if let Some(body) = resolved.annotations.generic_instance_bodies.get(&c_name).cloned() {
                emit_class_bodies(class_ref, &body, resolved, &mut unit)?;
            }
        }
    }

    for item in &resolved.program.top_level {
        match item {
            TopLevel::Function { id, name, body, .. } => {
                let c_name = resolved.annotations.top_cnames.get(id).cloned().unwrap_or_else(|| name.clone());
                let sig = resolved.annotations.func_param_types.get(id).cloned().unwrap_or_default();
                unit.functions.push(emit_function_body(&c_name, &sig, body, resolved)?);
            }
            TopLevel::OverloadedFunction { name, overloads, .. } => {
                for (n, Overload { id, body, .. }) in overloads.iter().enumerate() {
                    let c_name = format!("{name}_{n}");
                    let sig = resolved.annotations.func_param_types.get(id).cloned().unwrap_or_default();
                    unit.functions.push(emit_function_body(&c_name, &sig, body, resolved)?);
                }
            }
            _ => {}
        }
    }

    let main_c_name = resolved.annotations.main_cname.clone().ok_or(CodegenError::MissingMain)?;
    unit.main = Some(CFunction {
        ret: "int".into(),
        name: "main".into(),
        params: vec![],
        body: vec![CStmt::Return(Some(CExpr::Call { callee: Box::new(CExpr::Ident(main_c_name)), args: vec![] }))],
    });

    Ok(unit)
}

fn c_ptr_type(ty: &Type) -> String {
    match ty {
        Type::Int => "int32_t".into(),
        Type::Bool => "int32_t".into(),
        Type::Void => "void".into(),
        Type::VoidPtr => "void*".into(),
        Type::NullType => "void*".into(),
        Type::String => "struct String*".into(),
        Type::Integer => "struct Integer*".into(),
        Type::Object => "struct BaseObject*".into(),
        Type::Array => "struct _Array*".into(),
        Type::Class(c) => format!("struct {}*", c.borrow().c_name),
        Type::Generic(_) => "void*".into(),
    }
}

fn default_of(ty: &Type) -> CExpr {
    match ty {
        Type::Int | Type::Bool => CExpr::IntLit(0),
        _ => CExpr::Null,
    }
}

fn sorted_func_names(class: &ClassRef) -> Vec<(String, String)> {
    let mut v: Vec<(String, String)> = class.borrow().func_names.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    v.sort_by(|a, b| a.0.cmp(&b.0));
    v
}

fn sorted_redirects(class: &ClassRef) -> Vec<(String, String)> {
    let mut v: Vec<(String, String)> = class.borrow().redirects.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    v.sort_by(|a, b| a.0.cmp(&b.0));
    v
}

fn class_bases(class: &ClassRef) -> Vec<ClassRef> {
    class
        .borrow()
        .bases
        .iter()
        .filter_map(|t| if let Type::Class(c) = t { Some(c.clone()) } else { None })
        .collect()
}

fn emit_class(class_ref: &ClassRef, unit: &mut CUnit) {
    let (c_name, own_attrs, constructor) = {
        let c = class_ref.borrow();
        (c.c_name.clone(), c.attrs.clone(), c.constructor.clone())
    };
    let bases = class_bases(class_ref);
    let func_names = sorted_func_names(class_ref);
    let redirects = sorted_redirects(class_ref);

    // struct: meta, then inlined base sub-structs, then own attrs, then method slots.
    let mut fields = vec![CStructField { ty: "struct BaseObject".into(), name: "meta".into() }];
    for base in &bases {
        fields.push(CStructField { ty: format!("struct {}", base.borrow().c_name), name: format!("parent_{}", base.borrow().name) });
    }
    for (name, ty) in &own_attrs {
        fields.push(CStructField { ty: c_ptr_type(ty), name: name.clone() });
    }
    for (name, target_c_name) in &func_names {
        let sig = class_ref.borrow().find_method(name);
        let (ret, params) = match sig {
            Some(s) => (c_ptr_type(&s.ret), s.params.iter().map(|(_, t)| c_ptr_type(t)).collect::<Vec<_>>().join(", ")),
            None => ("void".into(), "void*".into()),
        };
        let _ = target_c_name;
        fields.push(CStructField { ty: format!("{ret} (*"), name: format!("{name})({params})") });
    }
    unit.structs.push(CStruct { tag: c_name.clone(), fields });

    // new_parent_C(parent_ptr, child_ptr, self_ptr)
    let mut new_parent_body = vec![
        CStmt::ExprStmt(CExpr::Raw("parent_ptr->meta.self = self_ptr".to_string())),
        CStmt::ExprStmt(CExpr::Raw("parent_ptr->meta.up = child_ptr".to_string())),
    ];
    for base in &bases {
        new_parent_body.push(CStmt::ExprStmt(CExpr::Raw(format!(
            "new_parent_{}(&parent_ptr->parent_{}, parent_ptr, self_ptr)",
            base.borrow().c_name,
            base.borrow().name
        ))));
    }
    unit.functions.push(CFunction {
        ret: "void".into(),
        name: format!("new_parent_{c_name}"),
        params: vec![
            CParam { ty: format!("struct {c_name}*"), name: "parent_ptr".into() },
            CParam { ty: "void*".into(), name: "child_ptr".into() },
            CParam { ty: "void*".into(), name: "self_ptr".into() },
        ],
        body: new_parent_body,
    });

    // new_empty_C
    let mut empty_body = vec![CStmt::Declare {
        ty: format!("struct {c_name}*"),
        name: "obj".into(),
        init: Some(CExpr::Cast { to: format!("struct {c_name}*"), expr: Box::new(CExpr::Call { callee: Box::new(CExpr::Ident("malloc".into())), args: vec![CExpr::SizeOf(format!("struct {c_name}"))] }) }),
    }];
    empty_body.push(CStmt::ExprStmt(CExpr::Raw("obj->meta.self = obj".into())));
    empty_body.push(CStmt::ExprStmt(CExpr::Raw("obj->meta.up = obj".into())));
    empty_body.push(CStmt::ExprStmt(CExpr::Raw("obj->meta.ref_count = 0".into())));
    empty_body.push(CStmt::ExprStmt(CExpr::Raw("obj->meta.ref_ptr = &obj->meta.ref_count".into())));
    empty_body.push(CStmt::ExprStmt(CExpr::Raw(format!("obj->meta.del = del_{c_name}"))));
    for base in &bases {
        empty_body.push(CStmt::ExprStmt(CExpr::Raw(format!("new_parent_{}(&obj->parent_{}, obj, obj)", base.borrow().c_name, base.borrow().name))));
    }
    for (name, ty) in &own_attrs {
        empty_body.push(CStmt::ExprStmt(CExpr::Raw(format!("obj->{name} = {}", default_of(ty).emit()))));
    }
    for (name, target_c_name) in &func_names {
        empty_body.push(CStmt::ExprStmt(CExpr::Raw(format!("obj->{name} = {target_c_name}"))));
    }
    empty_body.push(CStmt::Return(Some(CExpr::Ident("obj".into()))));
    unit.functions.push(CFunction { ret: format!("struct {c_name}*"), name: format!("new_empty_{c_name}"), params: vec![], body: empty_body });

    // redirect thunks
    for (name, thunk_c_name) in &redirects {
        let sig = class_ref.borrow().find_method(name).expect("redirect name came from func_names/base lookup");
        let owner = find_owning_base(class_ref, name).expect("redirect implies an inherited, non-own method");
        let field_path = ClassType::field_path_to_ancestor(class_ref, &owner).unwrap_or_default();
        let receiver = build_field_chain(&c_name, &field_path);
        let params: Vec<CParam> = std::iter::once(CParam { ty: "void*".into(), name: "_self".into() })
            .chain(sig.params.iter().skip(1).map(|(n, t)| CParam { ty: c_ptr_type(t), name: n.clone() }))
            .collect();
        let args: Vec<CExpr> = std::iter::once(receiver.clone())
            .chain(sig.params.iter().skip(1).map(|(n, _)| CExpr::Ident(n.clone())))
            .collect();
        let call = CExpr::Call { callee: Box::new(CExpr::GetArrow { obj: Box::new(receiver.clone()), field: name.clone() }), args };
        let body = if matches!(sig.ret, Type::Void) { vec![CStmt::ExprStmt(call)] } else { vec![CStmt::Return(Some(call))] };
        unit.functions.push(CFunction { ret: c_ptr_type(&sig.ret), name: thunk_c_name.clone(), params, body });
    }

    // default `new_C`, emitted only when the source declared no constructor;
    // a declared constructor's body is emitted by `emit_class_bodies`.
    if constructor.is_none() {
        unit.functions.push(CFunction {
            ret: format!("struct {c_name}*"),
            name: format!("new_{c_name}"),
            params: vec![],
            body: vec![CStmt::Return(Some(CExpr::Call { callee: Box::new(CExpr::Ident(format!("new_empty_{c_name}"))), args: vec![] }))],
        });
    }

    // del_C
    let mut del_body = vec![];
    for (name, ty) in &own_attrs {
        if ty.is_class_like() {
            del_body.push(CStmt::ExprStmt(CExpr::Raw(format!("DRGN_DECREF(self->{name})"))));
        }
    }
    del_body.push(CStmt::ExprStmt(CExpr::Raw("free(self)".into())));
    unit.functions.push(CFunction {
        ret: "void".into(),
        name: format!("del_{c_name}"),
        params: vec![CParam { ty: format!("struct {c_name}*"), name: "self".into() }],
        body: del_body,
    });
}

fn build_field_chain(root_c_name: &str, path: &[String]) -> CExpr {
    let mut expr = CExpr::Cast { to: format!("struct {root_c_name}*"), expr: Box::new(CExpr::Ident("_self".into())) };
    for (i, field) in path.iter().enumerate() {
        expr = if i == 0 {
            CExpr::Ref(Box::new(CExpr::GetArrow { obj: Box::new(expr), field: field.clone() }))
        } else {
            CExpr::Ref(Box::new(CExpr::GetAttr { obj: Box::new(CExpr::Deref(Box::new(expr))), field: field.clone() }))
        };
    }
    expr
}

fn find_owning_base(class_ref: &ClassRef, name: &str) -> Option<ClassRef> {
    for base in class_bases(class_ref) {
        if base.borrow().methods.iter().any(|(n, _)| n == name) {
            return Some(base);
        }
        if let Some(found) = find_owning_base(&base, name) {
            return Some(found);
        }
    }
    None
}

fn emit_class_bodies(class_ref: &ClassRef, body: &[ClassMember], resolved: &Resolved, unit: &mut CUnit) -> Result<(), CodegenError> {
    let c_name = class_ref.borrow().c_name.clone();
    let cls_ptr = format!("struct {c_name}*");
    for member in body {
        match member {
            ClassMember::Method { name, body: stmts, .. } => {
                let sig = class_ref.borrow().methods.iter().find(|(n, _)| n == name).map(|(_, s)| s.clone()).expect("own method signature exists");
                let mut fn_body = vec![CStmt::Declare { ty: cls_ptr.clone(), name: "self".into(), init: Some(CExpr::Cast { to: cls_ptr.clone(), expr: Box::new(CExpr::Ident("_self".into())) }) }];
                for s in stmts {
                    fn_body.push(emit_stmt(s, resolved)?);
                }
                let params: Vec<CParam> = sig.params.iter().map(|(n, t)| CParam { ty: c_ptr_type(t), name: n.clone() }).collect();
                unit.functions.push(CFunction { ret: c_ptr_type(&sig.ret), name: sig.c_name.clone(), params, body: fn_body });
            }
            ClassMember::Constructor { params, body: stmts, .. } => {
                let sig = class_ref.borrow().constructor.clone().expect("constructor body implies a registered signature");
                let mut fn_body = vec![CStmt::Declare {
                    ty: cls_ptr.clone(),
                    name: "self".into(),
                    init: Some(CExpr::Call { callee: Box::new(CExpr::Ident(format!("new_empty_{c_name}"))), args: vec![] }),
                }];
                for s in stmts {
                    fn_body.push(emit_stmt(s, resolved)?);
                }
                fn_body.push(CStmt::Return(Some(CExpr::Ident("self".into()))));
                let c_params: Vec<CParam> = params.iter().zip(sig.params.iter()).map(|((n, _), (_, t))| CParam { ty: c_ptr_type(t), name: n.clone() }).collect();
                unit.functions.push(CFunction { ret: cls_ptr.clone(), name: sig.c_name.clone(), params: c_params, body: fn_body });
            }
            ClassMember::Attr { .. } => {}
        }
    }
    Ok(())
}

fn emit_function_body(c_name: &str, params: &[(String, Type)], body: &[Stmt], resolved: &Resolved) -> Result<CFunction, CodegenError> {
    let ret = infer_return_type(body, resolved);
    let mut stmts = Vec::new();
    for s in body {
        stmts.push(emit_stmt(s, resolved)?);
    }
    Ok(CFunction {
        ret: c_ptr_type(&ret),
        name: c_name.to_string(),
        params: params.iter().map(|(n, t)| CParam { ty: c_ptr_type(t), name: n.clone() }).collect(),
        body: stmts,
    })
}

fn infer_return_type(body: &[Stmt], resolved: &Resolved) -> Type {
    for s in body {
        if let Stmt::Return { value: Some(v), .. } = s {
            if let Some(t) = resolved.annotations.expr_types.get(&v.id()) {
                return t.clone();
            }
        }
    }
    Type::Void
}

fn emit_stmt(stmt: &Stmt, resolved: &Resolved) -> Result<CStmt, CodegenError> {
    Ok(match stmt {
        Stmt::Block { stmts, .. } => {
            let mut out = Vec::new();
            for s in stmts {
                out.push(emit_stmt(s, resolved)?);
            }
            CStmt::Block(out)
        }
        Stmt::If { cond, then_branch, else_branch, .. } => CStmt::If {
            cond: emit_expr(cond, resolved)?,
            then_block: vec![emit_stmt(then_branch, resolved)?],
            else_block: match else_branch {
                Some(e) => Some(vec![emit_stmt(e, resolved)?]),
                None => None,
            },
        },
        Stmt::While { cond, body, .. } => CStmt::While { cond: emit_expr(cond, resolved)?, body: vec![emit_stmt(body, resolved)?] },
        Stmt::Var { id, name, value, .. } => {
            let c_name = resolved.annotations.var_cnames.get(id).cloned().unwrap_or_else(|| name.clone());
            let declared = resolved.annotations.expr_types.get(&value.id()).cloned().unwrap_or(Type::Void);
            let mut init = emit_expr(value, resolved)?;
            if declared.is_class_like() {
                init = CExpr::Call { callee: Box::new(CExpr::Ident("drgn_inc_ref".into())), args: vec![init] };
            }
            CStmt::Declare { ty: c_ptr_type(&declared), name: c_name, init: Some(init) }
        }
        Stmt::Delete { obj, .. } => {
            let e = emit_expr(obj, resolved)?;
            CStmt::UnscopedBlock(vec![
                CStmt::Declare { ty: "struct BaseObject*".into(), name: "__del_tmp".into(), init: Some(CExpr::Raw(format!("{}->meta.self", e.emit()))) },
                CStmt::ExprStmt(CExpr::Raw("(__del_tmp->del)(__del_tmp)".into())),
            ])
        }
        Stmt::Return { id, value, .. } => {
            let to_delete = resolved.annotations.to_delete.get(id).cloned().unwrap_or_default();
            let mut decrefs: Vec<CStmt> = to_delete.iter().map(|(cname, _)| CStmt::ExprStmt(CExpr::Raw(format!("DRGN_DECREF({cname})")))).collect();
            let ret_stmt = match value {
                Some(v) => CStmt::Return(Some(emit_expr(v, resolved)?)),
                None => CStmt::Return(None),
            };
            if decrefs.is_empty() {
                ret_stmt
            } else {
                decrefs.push(ret_stmt);
                CStmt::UnscopedBlock(decrefs)
            }
        }
        Stmt::ExprStmt { expr, .. } => CStmt::ExprStmt(emit_expr(expr, resolved)?),
    })
}

fn emit_expr(expr: &Expr, resolved: &Resolved) -> Result<CExpr, CodegenError> {
    Ok(match expr {
        Expr::Literal { kind, .. } => match kind {
            LiteralKind::Num(s) => CExpr::IntLit(s.parse().unwrap_or(0)),
            LiteralKind::Hex(s) => CExpr::IntLit(i64::from_str_radix(s.trim_start_matches("0x").trim_start_matches("0X"), 16).unwrap_or(0)),
            LiteralKind::Str(raw) => {
                let unquoted = raw.trim_start_matches('"').trim_end_matches('"');
                CExpr::Call {
                    callee: Box::new(CExpr::Ident("_new_String".into())),
                    args: vec![CExpr::StrLit(unquoted.to_string()), CExpr::IntLit(unquoted.len() as i64)],
                }
            }
        },
        Expr::GetVar { id, name, .. } => CExpr::Ident(resolved.annotations.var_cnames.get(id).cloned().unwrap_or_else(|| name.clone())),
        Expr::SetVar { id, value, .. } => {
            let c_name = resolved.annotations.var_cnames.get(id).cloned().expect("resolver records SetVar's target");
            CExpr::BinOp { op: "=", left: Box::new(CExpr::Ident(c_name)), right: Box::new(emit_expr(value, resolved)?) }
        }
        Expr::GetAttr { obj, attr, .. } => CExpr::GetArrow { obj: Box::new(emit_expr(obj, resolved)?), field: attr.clone() },
        Expr::SetAttr { obj, attr, value, .. } => {
            let target = CExpr::GetArrow { obj: Box::new(emit_expr(obj, resolved)?), field: attr.clone() };
            CExpr::BinOp { op: "=", left: Box::new(target), right: Box::new(emit_expr(value, resolved)?) }
        }
        Expr::BinOp { left, op, right, .. } => CExpr::BinOp { op: c_binop(*op), left: Box::new(emit_expr(left, resolved)?), right: Box::new(emit_expr(right, resolved)?) },
        Expr::Unary { op, right, .. } => CExpr::Unary { op: if matches!(op, UnaryOpKind::Neg) { "-" } else { "!" }, operand: Box::new(emit_expr(right, resolved)?) },
        Expr::Grouping { inner, .. } => emit_expr(inner, resolved)?,
        Expr::Cast { id, obj, .. } => {
            let from = resolved.annotations.expr_types.get(&obj.id()).cloned().unwrap_or(Type::Void);
            let to = resolved.annotations.expr_types.get(id).cloned().unwrap_or(Type::Void);
            let obj_expr = emit_expr(obj, resolved)?;
            emit_cast(obj_expr, &from, &to)?
        }
        Expr::New { id, args, .. } => {
            let ty = resolved.annotations.expr_types.get(id).cloned().unwrap_or(Type::Void);
            let class_ref = match &ty {
                Type::Class(c) => c.clone(),
                _ => return Err(CodegenError::BadCoercion { from: "new".into(), to: ty.to_string() }),
            };
            let ctor_name = class_ref.borrow().constructor.as_ref().map(|c| c.c_name.clone()).unwrap_or_else(|| format!("new_{}", class_ref.borrow().c_name));
            let mut c_args = Vec::new();
            for a in args {
                c_args.push(emit_expr(a, resolved)?);
            }
            CExpr::Call { callee: Box::new(CExpr::Ident(ctor_name)), args: c_args }
        }
        Expr::Call { id, callee, args, .. } => {
            let mut c_args = Vec::new();
            for a in args {
                c_args.push(emit_expr(a, resolved)?);
            }
            match &**callee {
                Expr::GetAttr { obj, attr, .. } => {
                    let obj_expr = emit_expr(obj, resolved)?;
                    let receiver = CExpr::Raw(format!("{}->meta.self", obj_expr.emit()));
                    let mut full_args = vec![receiver];
                    full_args.extend(c_args);
                    CExpr::Call { callee: Box::new(CExpr::GetArrow { obj: Box::new(obj_expr), field: attr.clone() }), args: full_args }
                }
                Expr::GetVar { .. } => {
                    let c_name = resolved.annotations.call_targets.get(id).cloned().expect("resolver records every Call's target");
                    CExpr::Call { callee: Box::new(CExpr::Ident(c_name)), args: c_args }
                }
                _ => CExpr::Call { callee: Box::new(emit_expr(callee, resolved)?), args: c_args },
            }
        }
    })
}

fn c_binop(op: BinOpKind) -> &'static str {
    match op {
        BinOpKind::Add => "+",
        BinOpKind::Sub => "-",
        BinOpKind::Mul => "*",
        BinOpKind::Div => "/",
        BinOpKind::FloorDiv => "/",
        BinOpKind::Mod => "%",
        BinOpKind::Eq => "==",
        BinOpKind::Ne => "!=",
        BinOpKind::Lt => "<",
        BinOpKind::Gt => ">",
        BinOpKind::Le => "<=",
        BinOpKind::Ge => ">=",
    }
}

/// `coerce`: produce an expression of type `to` from one of type `from`.
fn coerce(expr: CExpr, from: &Type, to: &Type) -> Result<CExpr, CodegenError> {
    if from == to {
        return Ok(expr);
    }
    match (from, to) {
        (Type::Class(fc), Type::Class(tc)) => {
            let path = ClassType::field_path_to_ancestor(fc, tc).ok_or_else(|| CodegenError::BadCoercion { from: from.to_string(), to: to.to_string() })?;
            Ok(CExpr::Ref(Box::new(field_chain_from_expr(expr, &path))))
        }
        (Type::Class(_), Type::Object) | (Type::Integer, Type::Object) | (Type::String, Type::Object) | (Type::Array, Type::Object) => {
            Ok(CExpr::Cast { to: "struct BaseObject*".into(), expr: Box::new(expr) })
        }
        (Type::Int, Type::Integer) => Ok(CExpr::Call { callee: Box::new(CExpr::Ident("_new_Integer".into())), args: vec![expr] }),
        (Type::Int, Type::Object) => Ok(CExpr::Cast {
            to: "struct BaseObject*".into(),
            expr: Box::new(CExpr::Call { callee: Box::new(CExpr::Ident("_new_Integer".into())), args: vec![expr] }),
        }),
        _ => Err(CodegenError::BadCoercion { from: from.to_string(), to: to.to_string() }),
    }
}

fn field_chain_from_expr(base: CExpr, path: &[String]) -> CExpr {
    let mut expr = base;
    for (i, field) in path.iter().enumerate() {
        expr = if i == 0 { CExpr::GetArrow { obj: Box::new(expr), field: field.clone() } } else { CExpr::GetAttr { obj: Box::new(expr), field: field.clone() } };
    }
    expr
}

/// `Cast(obj, to)`: try coercion, else climb through `meta.up` along the
/// downward path from `to` to `from` (dropping `to` itself, the self entry).
fn emit_cast(obj: CExpr, from: &Type, to: &Type) -> Result<CExpr, CodegenError> {
    if let Ok(coerced) = coerce(obj.clone(), from, to) {
        return Ok(coerced);
    }
    match (from, to) {
        (Type::Class(fc), Type::Class(tc)) => {
            let chain = ClassType::path_to_ancestor(tc, fc).ok_or_else(|| CodegenError::BadCoercion { from: from.to_string(), to: to.to_string() })?;
            let mut current = obj;
            let steps: Vec<ClassRef> = chain[..chain.len().saturating_sub(1)].iter().rev().cloned().collect();
            for step in steps {
                let up = CExpr::Raw(format!("{}->meta.up", current.emit()));
                current = CExpr::Cast { to: format!("struct {}*", step.borrow().c_name), expr: Box::new(up) };
            }
            Ok(current)
        }
        _ => Err(CodegenError::BadCoercion { from: from.to_string(), to: to.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> CUnit {
        let program = dragon_parser::parse(src).expect("parse ok");
        let resolved = crate::resolver::resolve(program).expect("resolve ok");
        generate(&resolved).expect("generate ok")
    }

    #[test]
    fn hello_world_calls_print_and_returns_zero_from_main() {
        let unit = compile("def main() -> int { print(\"hi\"); return 0; }");
        let source = unit.emit_source("program.h");
        assert!(source.contains("_new_String(\"hi\", 2)"));
        assert!(unit.main.is_some());
        assert!(source.contains("return main_1();") || source.contains("main_1()"));
    }

    #[test]
    fn missing_main_is_an_error() {
        let program = dragon_parser::parse("def f() -> int { return 0; }").expect("parse ok");
        let resolved = crate::resolver::resolve(program).expect("resolve ok");
        assert!(matches!(generate(&resolved), Err(CodegenError::MissingMain)));
    }

    #[test]
    fn single_inheritance_override_needs_no_redirect_thunk() {
        let unit = compile(
            "class A { method f() -> int { return 1; } } \
             class B(A) { method f() -> int { return 2; } } \
             def main() -> int { return 0; }",
        );
        let b_struct = unit.structs.iter().find(|s| s.tag.contains("B")).expect("B struct emitted");
        assert!(b_struct.fields.iter().any(|f| f.name.contains("parent_A")), "B inlines A as a base sub-struct");
        assert!(!unit.functions.iter().any(|f| f.name.contains("redirect")), "no redirect thunks when every inherited name is overridden");
    }

    #[test]
    fn inherited_method_emits_a_redirect_thunk_through_the_parent_chain() {
        let unit = compile(
            "class A { method f() -> int { return 1; } } \
             class B(A) { attr x: int; } \
             def main() -> int { return 0; }",
        );
        let thunk = unit.functions.iter().find(|f| f.name.contains("redirect")).expect("a redirect thunk was emitted");
        let body = thunk.emit_definition();
        assert!(body.contains("parent_A"), "the thunk reaches A's slot through the inlined parent_A sub-struct");
    }

    #[test]
    fn generic_monomorphization_mints_a_combined_class_name() {
        let unit = compile(
            "class Box<T> { attr v: T; method get() -> T { return self.v; } } \
             class A { } \
             def main() -> int { var b: Box<A> = new Box<A>(); return 0; }",
        );
        assert!(unit.structs.iter().any(|s| s.tag.contains("Box") && s.tag.contains('_')), "instantiated class gets a name combining the generic and its argument");
    }

    #[test]
    fn overloaded_functions_emit_distinct_c_functions() {
        let unit = compile(
            "def add(a: int, b: int) -> int { return a; } \
             def add(a: String, b: String) -> String { return a; } \
             def main() -> int { return 0; }",
        );
        let add_fns: Vec<&CFunction> = unit.functions.iter().filter(|f| f.name.starts_with("add_")).collect();
        assert_eq!(add_fns.len(), 2);
        assert_ne!(add_fns[0].name, add_fns[1].name);
    }

    #[test]
    fn deterministic_codegen_is_idempotent_across_runs() {
        let src = "class A { method f() -> int { return 1; } } \
                   class C { method g() -> int { return 2; } } \
                   class D(A, C) { } \
                   def main() -> int { return 0; }";
        let first = compile(src).emit_source("program.h");
        let second = compile(src).emit_source("program.h");
        assert_eq!(first, second, "compiling the same source twice yields byte-identical C");
    }

    #[test]
    fn cast_to_a_base_coerces_through_the_inlined_field_chain() {
        let unit = compile(
            "class A { method f() -> int { return 1; } } \
             class B(A) { method f() -> int { return 2; } } \
             def main() -> int { var b: B = new B(); var a: A = b as A; return 0; }",
        );
        let source = unit.emit_source("program.h");
        assert!(source.contains("parent_A"), "upcasting to a direct base reads through the inlined parent sub-struct");
    }
}
