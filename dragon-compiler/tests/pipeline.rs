//! Exercises the full scan -> parse -> resolve -> codegen pipeline against
//! short snippets, without shelling out to a C compiler. The generated C is
//! only checked for the structural markers each scenario promises; an actual
//! compile-and-run smoke test lives in dragon-cli's tests (guarded by `cc`
//! being on PATH).

fn compile(src: &str) -> dragon_compiler::codegen_ast::CUnit {
    let program = dragon_parser::parse(src).expect("parse ok");
    let resolved = dragon_compiler::resolve(program).expect("resolve ok");
    dragon_compiler::generate(&resolved).expect("generate ok")
}

#[test]
fn hello_emits_string_literal_and_forwards_to_user_main() {
    let unit = compile(r#"def main() -> int { print("hi"); return 0; }"#);
    let source = unit.emit_source("hello.h");
    assert!(source.contains("_new_String(\"hi\", 2)"));
    assert!(source.contains("print("));
    assert!(source.contains("int main(void)"));
}

#[test]
fn single_inheritance_overrides_without_a_redirect_thunk() {
    let src = "class A { method f() -> int { return 1; } } \
               class B(A) { method f() -> int { return 2; } } \
               def main() -> int { return 0; }";
    let unit = compile(src);
    let source = unit.emit_source("prog.h");
    assert!(source.contains("struct B"));
    assert!(source.contains("parent_A"));
    assert!(!source.contains("B_redirect_f"));
}

#[test]
fn multiple_inheritance_mints_a_redirect_per_base() {
    let src = "class A { method f() -> int { return 1; } } \
               class B { method g() -> int { return 2; } } \
               class C(A, B) {} \
               def main() -> int { return 0; }";
    let unit = compile(src);
    let source = unit.emit_source("prog.h");
    assert!(source.contains("redirect_f"));
    assert!(source.contains("redirect_g"));
    assert!(source.contains("parent_A"));
    assert!(source.contains("parent_B"));
}

#[test]
fn generic_box_monomorphizes_per_argument() {
    let src = "class Box<T> { attr v: T; method get() -> T { return self.v; } } \
               def main() -> int { \
                 var bi: Box<Integer> = new Box<Integer>(); \
                 var bs: Box<String> = new Box<String>(); \
                 return 0; \
               }";
    let unit = compile(src);
    let source = unit.emit_source("prog.h");
    assert!(source.contains("Box__Integer"));
    assert!(source.contains("Box__String"));
}

#[test]
fn overloaded_add_compiles_to_distinct_symbols() {
    let src = "def add(a: int, b: int) -> int { return a + b; } \
               def add(a: String, b: String) -> String { return a; } \
               def main() -> int { return add(1, 2); }";
    let unit = compile(src);
    let source = unit.emit_source("prog.h");
    assert!(source.contains("add_0"));
    assert!(source.contains("add_1"));
    assert!(source.contains("add_0(1, 2)"));
}

#[test]
fn macro_expands_unless_into_a_negated_if() {
    let src = "#macro $( unless $c:expr then $b:stmt )$ => stmt : $( if (!($c)) $b )$ #endmacro \
               def main() -> int { unless 0 == 1 then print(\"z\"); return 0; }";
    let unit = compile(src);
    let source = unit.emit_source("prog.h");
    assert!(source.contains("if ((!("));
}

#[test]
fn return_teardown_decrements_every_class_typed_local() {
    let src = "class A {} \
               def main() -> int { \
                 var a: A = new A(); \
                 var b: A = new A(); \
                 return 0; \
               }";
    let unit = compile(src);
    let source = unit.emit_source("prog.h");
    assert_eq!(source.matches("DRGN_DECREF").count(), 2);
}
