//! End-to-end tests running real modules under wasmtime
#![cfg(feature = "wasmtime")]

mod common;

use common::CapturedWriter;
use std::rc::Rc;
use wasmjs::runtime::engine::run_module;
use wasmjs::runtime::{HostError, Instance};

/// Helper to compile WAT to WASM
fn wat_to_wasm(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("Failed to parse WAT")
}

#[test]
fn test_hello_and_exit_code() {
    let wat = r#"
    (module
      (import "gojs" "runtime.wasmWrite" (func $write (param i32)))
      (import "gojs" "runtime.wasmExit" (func $exit (param i32)))
      (memory (export "mem") 1)

      ;; past the argv area
      (data (i32.const 16384) "hello\n")

      (global $sp (mut i32) (i32.const 1024))
      (func (export "getsp") (result i32) (global.get $sp))
      (func (export "resume"))

      (func (export "run") (param $argc i32) (param $argv i32)
        ;; wasmWrite(fd=1, p=16384, n=6)
        (i64.store (i32.const 1032) (i64.const 1))
        (i64.store (i32.const 1040) (i64.const 16384))
        (i32.store (i32.const 1048) (i32.const 6))
        (call $write (i32.const 1024))

        ;; wasmExit(argc)
        (i32.store (i32.const 1032) (local.get $argc))
        (call $exit (i32.const 1024)))
    )
    "#;

    let (stdout, buffer) = CapturedWriter::new();
    let instance = Rc::new(
        Instance::builder()
            .args(["hello", "x"])
            .stdout(Box::new(stdout))
            .build(),
    );

    let code = run_module(&wat_to_wasm(wat), instance.clone()).unwrap();
    assert_eq!(code, 2);
    assert_eq!(&*buffer.lock().unwrap(), b"hello\n");
}

#[test]
fn test_value_get_through_the_engine() {
    // valueGet(global, "fs") then exit with the returned slot's type flag
    let wat = r#"
    (module
      (import "gojs" "syscall/js.valueGet" (func $get (param i32)))
      (import "gojs" "runtime.wasmExit" (func $exit (param i32)))
      (memory (export "mem") 1)
      (data (i32.const 16384) "fs")

      (global $sp (mut i32) (i32.const 1024))
      (func (export "getsp") (result i32) (global.get $sp))
      (func (export "resume"))

      (func (export "run") (param i32 i32)
        ;; global is id 5, type flag 1
        (i32.store (i32.const 1032) (i32.const 5))
        (i32.store (i32.const 1036) (i32.const 0x7FF80001))
        (i64.store (i32.const 1040) (i64.const 16384))
        (i64.store (i32.const 1048) (i64.const 2))
        (call $get (i32.const 1024))

        (i32.store (i32.const 1032)
          (i32.and (i32.load (i32.const 1060)) (i32.const 7)))
        (call $exit (i32.const 1024)))
    )
    "#;

    let instance = Rc::new(Instance::builder().stdout(Box::new(std::io::sink())).build());
    let code = run_module(&wat_to_wasm(wat), instance).unwrap();
    assert_eq!(code, 1);
}

#[test]
fn test_unresolved_import_fails_before_running() {
    let wat = r#"
    (module
      (import "gojs" "runtime.notAnImport" (func (param i32)))
      (memory (export "mem") 1)
      (func (export "getsp") (result i32) (i32.const 0))
      (func (export "resume"))
      (func (export "run") (param i32 i32)))
    "#;

    let instance = Rc::new(Instance::new());
    let err = run_module(&wat_to_wasm(wat), instance.clone()).unwrap_err();
    assert!(matches!(err, HostError::UnresolvedImport { ref name, .. } if name == "runtime.notAnImport"));
    assert_eq!(instance.exit_code(), None);
}

#[test]
fn test_fatal_import_error_surfaces() {
    // wasmWrite to fd 3
    let wat = r#"
    (module
      (import "gojs" "runtime.wasmWrite" (func $write (param i32)))
      (memory (export "mem") 1)
      (func (export "getsp") (result i32) (i32.const 1024))
      (func (export "resume"))
      (func (export "run") (param i32 i32)
        (i64.store (i32.const 1032) (i64.const 3))
        (call $write (i32.const 1024))))
    "#;

    let instance = Rc::new(Instance::new());
    let err = run_module(&wat_to_wasm(wat), instance).unwrap_err();
    assert!(matches!(err, HostError::BadFileDescriptor(3)), "{err}");
}
