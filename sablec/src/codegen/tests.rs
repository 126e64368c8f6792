//! End-to-end lowering tests.
//!
//! Each test builds a tiny analyzed program, runs the code generator with a
//! real LLVM context, and asserts on the printed module (or the emitted
//! header). Debug-build options are the default, so module verification
//! runs as part of `compile`.

use std::rc::Rc;

use inkwell::context::Context;
use inkwell::targets::TargetData;

use crate::diagnostics::Diagnostic;
use crate::ir::{
    BinOp, CastOp, ConstValue, FnBodyBuilder, FnDecl, FnId, FnInline, FnParam, FnSig, Inst,
    InstId, InstKind, Program, ScopeId, ScopeKind, Type, Variable,
};
use crate::span::Span;
use crate::target::TargetInfo;

use super::{CodeGen, CodegenOptions};

const X86_64_LAYOUT: &str =
    "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128";

fn debug_opts() -> CodegenOptions {
    CodegenOptions::default()
}

fn release_opts() -> CodegenOptions {
    CodegenOptions {
        is_release_build: true,
        ..CodegenOptions::default()
    }
}

/// Compile a program and return the printed module.
fn compile(program: &Program, opts: CodegenOptions) -> Result<String, Vec<Diagnostic>> {
    let context = Context::create();
    let module = context.create_module(&program.root_out_name);
    let builder = context.create_builder();
    let target_data = TargetData::create(X86_64_LAYOUT);
    let target = TargetInfo::from_triple("x86_64-unknown-linux-gnu").unwrap();
    let mut g = CodeGen::new(
        &context,
        &module,
        &builder,
        target_data,
        target,
        opts,
        program,
    )?;
    g.compile()?;
    Ok(module.print_to_string().to_string())
}

/// Allocate the scope chain for one function: root decls, fn-def scope,
/// and an inner block scope.
fn fn_scopes(program: &mut Program, safety_set: bool, safety_off: bool) -> (ScopeId, ScopeId) {
    let root = program.scopes.alloc_root();
    let fn_id = FnId(program.fns.len() as u32);
    let fn_scope = program.scopes.alloc(
        Some(root),
        ScopeKind::FnDef { fn_id },
        Span::at(1, 1),
    );
    let block = program.scopes.alloc(
        Some(fn_scope),
        ScopeKind::Block {
            safety_set,
            safety_off,
        },
        Span::at(1, 10),
    );
    (fn_scope, block)
}

fn const_inst(
    b: &mut FnBodyBuilder,
    ty: Type,
    value: Rc<ConstValue>,
    scope: ScopeId,
) -> InstId {
    let mut inst = Inst::new(InstKind::Const, ty, Span::at(2, 1), scope);
    inst.value = value;
    b.push(inst)
}

fn push(b: &mut FnBodyBuilder, kind: InstKind, ty: Type, scope: ScopeId) -> InstId {
    b.push(Inst::new(kind, ty, Span::at(2, 5), scope))
}

/// `fn add(a: i32, b: i32) i32 { return a + b; }`, optionally inside a
/// scope that turns safety off.
fn build_add_program(safety_set: bool, safety_off: bool, exported: bool) -> Program {
    let mut program = Program::new("foo", "foo.sable");
    let i32_ty = Type::int(true, 32);
    let (fn_scope, block) = fn_scopes(&mut program, safety_set, safety_off);

    let mut b = FnBodyBuilder::new();
    let var_a = b.add_variable(Variable::param("a", i32_ty.clone(), 0, Some(0), fn_scope, Span::at(1, 12)));
    let var_b = b.add_variable(Variable::param("b", i32_ty.clone(), 1, Some(1), fn_scope, Span::at(1, 20)));

    let ptr_i32 = Type::pointer(i32_ty.clone(), false);
    let pa = push(&mut b, InstKind::VarPtr { var: var_a }, ptr_i32.clone(), block);
    let va = push(&mut b, InstKind::LoadPtr { ptr: pa }, i32_ty.clone(), block);
    let pb = push(&mut b, InstKind::VarPtr { var: var_b }, ptr_i32, block);
    let vb = push(&mut b, InstKind::LoadPtr { ptr: pb }, i32_ty.clone(), block);
    let sum = push(
        &mut b,
        InstKind::BinOp {
            op: BinOp::Add,
            lhs: va,
            rhs: vb,
            safety_check_on: true,
        },
        i32_ty.clone(),
        block,
    );
    push(&mut b, InstKind::Return { value: sum }, Type::unreachable_(), block);

    let sig = FnSig::new(
        vec![FnParam::new(i32_ty.clone()), FnParam::new(i32_ty.clone())],
        i32_ty,
    );
    program.add_fn(FnDecl {
        symbol_name: "add".to_string(),
        fn_type: Type::fn_(sig),
        internal_linkage: !exported,
        inline: FnInline::Auto,
        is_test: false,
        param_names: vec!["a".to_string(), "b".to_string()],
        scope: fn_scope,
        span: Span::at(1, 1),
        body: Some(b.finish()),
    });
    program
}

#[test]
fn test_overflow_checked_add() {
    let program = build_add_program(false, false, false);
    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    assert!(
        ir.contains("llvm.sadd.with.overflow.i32"),
        "expected overflow intrinsic:\n{}",
        ir
    );
    assert!(ir.contains("OverflowFail"), "expected trap arm:\n{}", ir);
    assert!(ir.contains("llvm.debugtrap"), "expected debugtrap:\n{}", ir);
    // Exactly one overflow call for the single add.
    assert_eq!(ir.matches("call { i32, i1 }").count(), 1, "{}", ir);
}

#[test]
fn test_safety_off_scope_suppresses_checks() {
    let program = build_add_program(true, true, false);
    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    assert!(
        !ir.contains("with.overflow"),
        "safety-off scope must not emit overflow checks:\n{}",
        ir
    );
    assert!(!ir.contains("OverflowFail"), "{}", ir);
    assert!(ir.contains("add nsw i32"), "{}", ir);
}

#[test]
fn test_release_build_uses_nsw_add() {
    let program = build_add_program(false, false, false);
    let ir = compile(&program, release_opts()).expect("codegen should succeed");
    assert!(!ir.contains("with.overflow"), "{}", ir);
    assert!(ir.contains("add nsw i32"), "{}", ir);
}

#[test]
fn test_bounds_checked_elem_ptr() {
    let mut program = Program::new("foo", "foo.sable");
    let i32_ty = Type::int(true, 32);
    let u64_ty = Type::int(false, 64);
    let arr_ty = Type::array(i32_ty.clone(), 10);
    let (fn_scope, block) = fn_scopes(&mut program, false, false);

    let mut b = FnBodyBuilder::new();
    let var_i = b.add_variable(Variable::param("i", u64_ty.clone(), 0, Some(0), fn_scope, Span::at(1, 12)));
    let var_arr = b.add_variable(Variable::local("arr", arr_ty.clone(), block, Span::at(2, 5)));

    let pa = push(
        &mut b,
        InstKind::VarPtr { var: var_arr },
        Type::pointer(arr_ty, false),
        block,
    );
    let pi = push(
        &mut b,
        InstKind::VarPtr { var: var_i },
        Type::pointer(u64_ty.clone(), false),
        block,
    );
    let iv = push(&mut b, InstKind::LoadPtr { ptr: pi }, u64_ty.clone(), block);
    let elem = push(
        &mut b,
        InstKind::ElemPtr {
            array_ptr: pa,
            index: iv,
            safety_check_on: true,
        },
        Type::pointer(i32_ty.clone(), false),
        block,
    );
    let v = push(&mut b, InstKind::LoadPtr { ptr: elem }, i32_ty.clone(), block);
    push(&mut b, InstKind::Return { value: v }, Type::unreachable_(), block);

    let sig = FnSig::new(vec![FnParam::new(u64_ty)], i32_ty);
    program.add_fn(FnDecl {
        symbol_name: "index".to_string(),
        fn_type: Type::fn_(sig),
        internal_linkage: true,
        inline: FnInline::Auto,
        is_test: false,
        param_names: vec!["i".to_string()],
        scope: fn_scope,
        span: Span::at(1, 1),
        body: Some(b.finish()),
    });

    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    assert!(ir.contains("BoundsCheckFail"), "{}", ir);
    assert!(ir.contains("icmp ult i64"), "{}", ir);
    assert!(ir.contains("getelementptr inbounds"), "{}", ir);
}

#[test]
fn test_slice_from_array() {
    let mut program = Program::new("foo", "foo.sable");
    let u8_ty = Type::int(false, 8);
    let usize_ty = Type::type_decl("usize", Type::int(false, 64));
    let arr_ty = Type::array(u8_ty.clone(), 5);
    let slice_ty = program
        .types
        .slice_of(u8_ty.clone(), true, usize_ty.clone());
    let (fn_scope, block) = fn_scopes(&mut program, false, false);

    let mut b = FnBodyBuilder::new();
    let var_arr = b.add_variable(Variable::local("arr", arr_ty.clone(), block, Span::at(2, 5)));
    let pa = push(
        &mut b,
        InstKind::VarPtr { var: var_arr },
        Type::pointer(arr_ty, false),
        block,
    );
    let _slice = push(
        &mut b,
        InstKind::Cast {
            op: CastOp::ArrayToSlice,
            operand: pa,
        },
        slice_ty,
        block,
    );
    let void_val = const_inst(&mut b, Type::void(), ConstValue::void(), block);
    push(&mut b, InstKind::Return { value: void_val }, Type::unreachable_(), block);

    let sig = FnSig::new(vec![], Type::void());
    program.add_fn(FnDecl {
        symbol_name: "as_slice".to_string(),
        fn_type: Type::fn_(sig),
        internal_linkage: true,
        inline: FnInline::Auto,
        is_test: false,
        param_names: vec![],
        scope: fn_scope,
        span: Span::at(1, 1),
        body: Some(b.finish()),
    });

    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    // The slice temporary is a { ptr, len } struct; its length field gets
    // the array length.
    assert!(ir.contains("store i64 5"), "expected slice length:\n{}", ir);
    assert!(
        ir.contains("%\"[]const u8\"") || ir.contains("[]const u8"),
        "expected slice struct type:\n{}",
        ir
    );
}

#[test]
fn test_optional_pointer_is_raw_pointer() {
    let mut program = Program::new("foo", "foo.sable");
    let u8_ptr = Type::pointer(Type::int(false, 8), false);
    let opt_ptr = Type::optional(u8_ptr);
    let (fn_scope, block) = fn_scopes(&mut program, false, false);

    let mut b = FnBodyBuilder::new();
    let var_o = b.add_variable(Variable::param("o", opt_ptr.clone(), 0, Some(0), fn_scope, Span::at(1, 12)));
    let po = push(
        &mut b,
        InstKind::VarPtr { var: var_o },
        Type::pointer(opt_ptr.clone(), false),
        block,
    );
    let bit = push(&mut b, InstKind::TestNull { value: po }, Type::bool_(), block);
    push(&mut b, InstKind::Return { value: bit }, Type::unreachable_(), block);

    let sig = FnSig::new(vec![FnParam::new(opt_ptr)], Type::bool_());
    program.add_fn(FnDecl {
        symbol_name: "is_some".to_string(),
        fn_type: Type::fn_(sig),
        internal_linkage: true,
        inline: FnInline::Auto,
        is_test: false,
        param_names: vec!["o".to_string()],
        scope: fn_scope,
        span: Span::at(1, 1),
        body: Some(b.finish()),
    });

    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    // No presence bit: the optional pointer is the pointer itself, and the
    // null test is a pointer comparison.
    assert!(ir.contains("icmp ne i8*"), "{}", ir);
    assert!(
        !ir.contains("{ i8*, i1 }"),
        "optional pointer must not carry a presence bit:\n{}",
        ir
    );
}

#[test]
fn test_error_name_table() {
    let mut program = Program::new("foo", "foo.sable");
    program.declare_error("OutOfMemory");
    program.declare_error("Overflow");
    program.generate_error_name_table = true;

    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    assert!(ir.contains("err_name_table"), "{}", ir);
    assert!(ir.contains("OutOfMemory"), "{}", ir);
    assert!(ir.contains("Overflow"), "{}", ir);
    // Slot 0 is the reserved ok tag: three entries, first undefined.
    assert!(ir.contains("undef"), "{}", ir);
}

#[test]
fn test_c_header_for_exported_fn() {
    let program = build_add_program(false, false, true);
    let context = Context::create();
    let module = context.create_module("foo");
    let builder = context.create_builder();
    let target_data = TargetData::create(X86_64_LAYOUT);
    let target = TargetInfo::from_triple("x86_64-unknown-linux-gnu").unwrap();
    let mut g = CodeGen::new(
        &context,
        &module,
        &builder,
        target_data,
        target,
        debug_opts(),
        &program,
    )
    .unwrap();

    let mut out = Vec::new();
    g.write_c_header(&mut out).expect("header should emit");
    let header = String::from_utf8(out).unwrap();

    assert!(header.contains("#ifndef FOO_FOO_H"), "{}", header);
    assert!(header.contains("#include <stdint.h>"), "{}", header);
    assert!(
        header.contains("FOO_EXPORT int32_t add(int32_t a, int32_t b);"),
        "{}",
        header
    );
    assert!(header.contains("__declspec(dllimport)"), "{}", header);
    assert!(
        header.contains("__attribute__((visibility (\"default\")))"),
        "{}",
        header
    );
}

#[test]
fn test_type_memoization() {
    let program = Program::new("foo", "foo.sable");
    let context = Context::create();
    let module = context.create_module("foo");
    let builder = context.create_builder();
    let target_data = TargetData::create(X86_64_LAYOUT);
    let target = TargetInfo::from_triple("x86_64-unknown-linux-gnu").unwrap();
    let mut g = CodeGen::new(
        &context,
        &module,
        &builder,
        target_data,
        target,
        debug_opts(),
        &program,
    )
    .unwrap();

    let ty = Type::pointer(Type::int(false, 8), true);
    let first = g.lower_type(&ty).unwrap();
    let second = g.lower_type(&Type::pointer(Type::int(false, 8), true)).unwrap();
    assert_eq!(first, second);

    let opt = Type::optional(Type::int(true, 32));
    assert_eq!(g.lower_type(&opt).unwrap(), g.lower_type(&opt).unwrap());

    // The registry's canonical constructors agree with the primitive table.
    let via_registry = g.get_int_type(false, 64);
    assert_eq!(
        g.lower_type(&via_registry).unwrap(),
        g.lower_type(&Type::int(false, 64)).unwrap()
    );
    assert!(g.primitive_type("usize").is_some());
    assert!(g.primitive_type("c_int").is_some());
    assert!(g.primitive_type("AtomicOrder").is_some());
}

#[test]
fn test_const_global_dedup() {
    let program = Program::new("foo", "foo.sable");
    let context = Context::create();
    let module = context.create_module("foo");
    let builder = context.create_builder();
    let target_data = TargetData::create(X86_64_LAYOUT);
    let target = TargetInfo::from_triple("x86_64-unknown-linux-gnu").unwrap();
    let mut g = CodeGen::new(
        &context,
        &module,
        &builder,
        target_data,
        target,
        debug_opts(),
        &program,
    )
    .unwrap();

    let i32_ty = Type::int(true, 32);
    let value = ConstValue::int(42);
    g.render_const_val(&i32_ty, &value).unwrap();
    let g1 = g.render_const_val_global(&i32_ty, &value).unwrap();
    let g2 = g.render_const_val_global(&i32_ty, &value).unwrap();
    assert_eq!(g1, g2, "same constant identity must share its global");
}

#[test]
fn test_aggregate_return_abi() {
    let mut program = Program::new("foo", "foo.sable");
    let i64_ty = Type::int(true, 64);
    let point_id = program.types.declare_struct(
        "Point",
        vec![
            ("x".to_string(), i64_ty.clone()),
            ("y".to_string(), i64_ty.clone()),
        ],
    );
    let point_ty = Type::struct_(point_id);
    let root = program.scopes.alloc_root();
    let fn_scope = program.scopes.alloc(
        Some(root),
        ScopeKind::FnDef { fn_id: FnId(0) },
        Span::at(1, 1),
    );

    // Non-extern prototype: hidden sret pointer parameter.
    let sig = FnSig::new(vec![], point_ty.clone());
    program.add_fn(FnDecl {
        symbol_name: "origin".to_string(),
        fn_type: Type::fn_(sig),
        internal_linkage: false,
        inline: FnInline::Auto,
        is_test: false,
        param_names: vec![],
        scope: fn_scope,
        span: Span::at(1, 1),
        body: None,
    });

    // Extern prototype: returned by value instead.
    let mut extern_sig = FnSig::new(vec![], point_ty);
    extern_sig.is_extern = true;
    let extern_scope = program.scopes.alloc(
        Some(root),
        ScopeKind::FnDef { fn_id: FnId(1) },
        Span::at(2, 1),
    );
    program.add_fn(FnDecl {
        symbol_name: "extern_origin".to_string(),
        fn_type: Type::fn_(extern_sig),
        internal_linkage: false,
        inline: FnInline::Auto,
        is_test: false,
        param_names: vec![],
        scope: extern_scope,
        span: Span::at(2, 1),
        body: None,
    });

    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    assert!(ir.contains("sret"), "expected sret attribute:\n{}", ir);
    assert!(
        ir.contains("void @origin(%Point*"),
        "aggregate return must become a pointer parameter:\n{}",
        ir
    );
    assert!(
        ir.contains("%Point @extern_origin()"),
        "extern functions return aggregates by value:\n{}",
        ir
    );
}

#[test]
fn test_internal_linkage_prefix() {
    let program = build_add_program(false, false, false);
    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    assert!(
        ir.contains("@_add"),
        "internal functions get an underscore prefix:\n{}",
        ir
    );
}

#[test]
fn test_unreachable_lowering_modes() {
    let build = || {
        let mut program = Program::new("foo", "foo.sable");
        let (fn_scope, block) = fn_scopes(&mut program, false, false);
        let mut b = FnBodyBuilder::new();
        push(&mut b, InstKind::Unreachable, Type::unreachable_(), block);
        let sig = FnSig::new(vec![], Type::unreachable_());
        program.add_fn(FnDecl {
            symbol_name: "never".to_string(),
            fn_type: Type::fn_(sig),
            internal_linkage: true,
            inline: FnInline::Auto,
            is_test: false,
            param_names: vec![],
            scope: fn_scope,
            span: Span::at(1, 1),
            body: Some(b.finish()),
        });
        program
    };

    let debug_ir = compile(&build(), debug_opts()).expect("codegen should succeed");
    assert!(debug_ir.contains("llvm.debugtrap"), "{}", debug_ir);

    let release_ir = compile(&build(), release_opts()).expect("codegen should succeed");
    assert!(!release_ir.contains("llvm.debugtrap"), "{}", release_ir);
    assert!(release_ir.contains("unreachable"), "{}", release_ir);
}

#[test]
fn test_decl_var_fills_uninitialized_memory() {
    let mut program = Program::new("foo", "foo.sable");
    let i64_ty = Type::int(true, 64);
    let (fn_scope, block) = fn_scopes(&mut program, false, false);

    let mut b = FnBodyBuilder::new();
    let var_x = b.add_variable(Variable::local("x", i64_ty.clone(), block, Span::at(2, 5)));
    let undef_init = const_inst(&mut b, i64_ty.clone(), ConstValue::undef(), block);
    push(
        &mut b,
        InstKind::DeclVar {
            var: var_x,
            init: undef_init,
        },
        Type::void(),
        block,
    );
    let void_val = const_inst(&mut b, Type::void(), ConstValue::void(), block);
    push(&mut b, InstKind::Return { value: void_val }, Type::unreachable_(), block);

    let sig = FnSig::new(vec![], Type::void());
    program.add_fn(FnDecl {
        symbol_name: "locals".to_string(),
        fn_type: Type::fn_(sig),
        internal_linkage: true,
        inline: FnInline::Auto,
        is_test: false,
        param_names: vec![],
        scope: fn_scope,
        span: Span::at(1, 1),
        body: Some(b.finish()),
    });

    let ir = compile(&program, debug_opts()).expect("codegen should succeed");
    // Uninitialized memory gets the 0xaa fill pattern in safe builds.
    assert!(ir.contains("memset"), "{}", ir);
    assert!(ir.contains("i8 -86"), "expected 0xaa fill byte:\n{}", ir);
}

#[test]
fn test_test_fn_list_global() {
    let mut program = Program::new("foo", "foo.sable");
    let (fn_scope, block) = fn_scopes(&mut program, false, false);
    let mut b = FnBodyBuilder::new();
    let void_val = const_inst(&mut b, Type::void(), ConstValue::void(), block);
    push(&mut b, InstKind::Return { value: void_val }, Type::unreachable_(), block);
    let sig = FnSig::new(vec![], Type::void());
    program.add_fn(FnDecl {
        symbol_name: "basic arithmetic".to_string(),
        fn_type: Type::fn_(sig),
        internal_linkage: true,
        inline: FnInline::Auto,
        is_test: true,
        param_names: vec![],
        scope: fn_scope,
        span: Span::at(1, 1),
        body: Some(b.finish()),
    });

    let opts = CodegenOptions {
        is_test_build: true,
        ..CodegenOptions::default()
    };
    let ir = compile(&program, opts).expect("codegen should succeed");
    assert!(ir.contains("sable_test_fn_list"), "{}", ir);
    assert!(ir.contains("basic arithmetic"), "{}", ir);
}

#[test]
fn test_test_build_without_tests_fails() {
    let program = Program::new("foo", "foo.sable");
    let opts = CodegenOptions {
        is_test_build: true,
        ..CodegenOptions::default()
    };
    let err = compile(&program, opts).expect_err("no tests must be an error");
    assert!(err[0].message.contains("no tests"), "{:?}", err);
}
