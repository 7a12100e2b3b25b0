//! End-to-end compilation tests
//!
//! Each test drives the full pipeline through `tomb::compile` and asserts
//! on the produced artifacts: bytecode, ABI tables, event descriptions,
//! and diagnostics.

use tomb::parser::MethodKind;
use tomb::vm::Opcode;
use tomb::{compile, Assembler, Compiler, CompileOptions, Error, ModuleKind};

/// Find an `EMIT` instruction and return its little-endian event value
fn find_emit_value(bytecode: &[u8]) -> Option<u32> {
    let emit = Opcode::Emit.byte();
    for i in 0..bytecode.len().saturating_sub(6) {
        if bytecode[i] == emit {
            let value = u32::from_le_bytes(bytecode[i + 3..i + 7].try_into().ok()?);
            return Some(value);
        }
    }
    None
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn test_minimal_contract() {
    let artifacts = compile("contract Hello { constructor(owner:address) { return; } }")
        .expect("compiles");
    assert_eq!(artifacts.len(), 1);
    let artifact = &artifacts[0];
    assert_eq!(artifact.name, "Hello");
    assert_eq!(artifact.kind, ModuleKind::Contract);
    assert!(!artifact.bytecode.is_empty());

    let method = &artifact.abi.methods[0];
    assert_eq!(method.name, "Initialize");
    assert_eq!(method.kind, MethodKind::Constructor);
    assert_eq!(method.parameters.len(), 1);
    assert_eq!(method.parameters[0].name, "owner");
    assert_eq!(method.parameters[0].ty, "address");
    assert!(artifact.abi.events.is_empty());
}

#[test]
fn test_event_with_inline_string_description() {
    let artifacts = compile(
        "contract C {\n\
           event Paid : number = \"payment received\";\n\
           public pay(a:address) { emit Paid(a, 100); }\n\
         }",
    )
    .expect("compiles");
    let artifact = &artifacts[0];

    let event = &artifact.abi.events[0];
    assert_eq!(event.name, "Paid");
    assert_eq!(event.value, 64);
    assert_eq!(event.payload_type, "number");

    // The description is the string-to-script encoding of the text.
    let expected = Assembler::new()
        .assemble(&[
            "LOAD r1 \"payment received\"".to_string(),
            "MOVE r0 r1".to_string(),
            "RET".to_string(),
        ])
        .unwrap()
        .bytecode;
    assert_eq!(event.description, expected);

    // The EMIT instruction in the method body references the event value.
    assert_eq!(find_emit_value(&artifact.bytecode), Some(64));
}

#[test]
fn test_type_error_on_condition() {
    let source = "contract C {\n\
                    public f() {\n\
                      if (1 + 1) { return; }\n\
                    }\n\
                  }";
    let err = compile(source).unwrap_err();
    assert!(matches!(err, Error::Type { .. }));
    assert!(err.to_string().contains("boolean"));
    assert_eq!(err.line(), Some(3));
}

#[test]
fn test_generic_collection_patch() {
    let artifacts = compile(
        "contract C {\n\
           import Map;\n\
           global balances : storage_map<address, number>;\n\
           public add(a:address, v:number) { balances.set(a, v); }\n\
         }",
    )
    .expect("compiles");
    let bytecode = &artifacts[0].bytecode;
    // The call resolved to Map.set and the collection name became the
    // literal string first argument.
    assert!(contains_bytes(bytecode, b"Map.set"));
    assert!(contains_bytes(bytecode, b"balances"));
}

#[test]
fn test_mistyped_collection_argument_is_rejected() {
    let err = compile(
        "contract C {\n\
           import Map;\n\
           global balances : storage_map<address, number>;\n\
           public add(v:number) { balances.set(v, v); }\n\
         }",
    )
    .unwrap_err();
    assert!(matches!(err, Error::Type { .. }));
}

#[test]
fn test_register_leak_is_fatal() {
    use tomb::RegisterPool;
    let mut pool = RegisterPool::new(8);
    let _leaked = pool.alloc("artificial method", None, 1).unwrap();
    let err = pool.verify_empty().unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
    assert!(err.to_string().contains("register r1 not deallocated"));
}

#[test]
fn test_alias_collision_in_overlapping_scopes() {
    // The inner `local x` is live while the outer one still holds its
    // aliased register.
    let err = compile(
        "contract C { public f() {\n\
           local x : number := 1;\n\
           if (x == 1) { local x : number := 2; }\n\
         } }",
    )
    .unwrap_err();
    assert!(matches!(err, Error::Shape { .. }));
    assert!(err.to_string().contains("alias already exists"));
}

#[test]
fn test_alias_reuse_after_inner_scope_dies() {
    // Two sibling blocks may both declare `x`; the first register is freed
    // before the second is allocated.
    compile(
        "contract C { public f(flag:bool) {\n\
           if (flag) { local x : number := 1; }\n\
           if (flag) { local x : number := 2; }\n\
         } }",
    )
    .expect("sibling scopes reuse the register");
}

#[test]
fn test_compilation_is_idempotent() {
    let source = "description PaidDesc { code(amount:number): string { return \"got \" + amount; } }\n\
                  contract Token {\n\
                    import Map;\n\
                    global balances : storage_map<address, number>;\n\
                    event Paid : number = PaidDesc;\n\
                    constructor(owner:address) { return; }\n\
                    public pay(a:address, v:number) {\n\
                      balances.set(a, v);\n\
                      emit Paid(a, v);\n\
                    }\n\
                  }";
    let first = compile(source).expect("compiles");
    let second = compile(source).expect("compiles");
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.bytecode, b.bytecode);
        assert_eq!(a.abi, b.abi);
    }
}

#[test]
fn test_description_script_bytecode_is_embedded() {
    let artifacts = compile(
        "description PaidDesc { code(amount:number): string { return \"got \" + amount; } }\n\
         contract C {\n\
           event Paid : number = PaidDesc;\n\
           constructor(owner:address) { return; }\n\
         }",
    )
    .expect("compiles");
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].kind, ModuleKind::Description);
    assert_eq!(artifacts[1].kind, ModuleKind::Contract);
    assert_eq!(
        artifacts[1].abi.events[0].description,
        artifacts[0].bytecode
    );
}

#[test]
fn test_event_values_are_dense() {
    let artifacts = compile(
        "contract C {\n\
           event A : number = \"a\";\n\
           event B : string = \"b\";\n\
           event D : bytes = 0xff;\n\
           constructor(owner:address) { return; }\n\
         }",
    )
    .expect("compiles");
    let values: Vec<u32> = artifacts[0].abi.events.iter().map(|e| e.value).collect();
    assert_eq!(values, vec![64, 65, 66]);
}

#[test]
fn test_bytes_event_description_embedded_verbatim() {
    let artifacts = compile(
        "contract C {\n\
           event Raw : number = 0xdeadbeef;\n\
           constructor(owner:address) { return; }\n\
         }",
    )
    .expect("compiles");
    assert_eq!(
        artifacts[0].abi.events[0].description,
        vec![0xde, 0xad, 0xbe, 0xef]
    );
}

#[test]
fn test_trigger_names_are_normalized() {
    let artifacts = compile(
        "contract C { trigger upgrade(from:address) { return; } }",
    )
    .expect("compiles");
    let method = &artifacts[0].abi.methods[0];
    assert_eq!(method.name, "onUpgrade");
    assert_eq!(method.kind, MethodKind::Trigger);
}

#[test]
fn test_unknown_trigger_is_rejected() {
    let err = compile("contract C { trigger explode(a:address) { return; } }").unwrap_err();
    assert!(matches!(err, Error::Resolution { .. }));
}

#[test]
fn test_task_and_private_methods_in_abi() {
    let artifacts = compile(
        "contract C {\n\
           task tick() { return; }\n\
           private helper(): number { return 1; }\n\
         }",
    )
    .expect("compiles");
    let methods = &artifacts[0].abi.methods;
    assert_eq!(methods[0].kind, MethodKind::Task);
    assert_eq!(methods[1].kind, MethodKind::Method);
    assert_eq!(methods[1].return_type, "number");
}

#[test]
fn test_method_offsets_point_into_bytecode() {
    let artifacts = compile(
        "contract C {\n\
           constructor(owner:address) { return; }\n\
           public f(): number { return 42; }\n\
         }",
    )
    .expect("compiles");
    let artifact = &artifacts[0];
    let offsets: Vec<u32> = artifact.abi.methods.iter().map(|m| m.offset).collect();
    assert_eq!(offsets[0], 0);
    assert!(offsets[1] > 0);
    assert!((offsets[1] as usize) < artifact.bytecode.len());
}

#[test]
fn test_emit_outside_contract_is_shape_error() {
    let err = compile("script S { code() { emit Paid(1, 2); } }").unwrap_err();
    assert!(matches!(err, Error::Shape { .. }));
}

#[test]
fn test_script_compiles_to_script_artifact() {
    let artifacts = compile(
        "script Greet { code(who:string): string { return \"hello \" + who; } }",
    )
    .expect("compiles");
    assert_eq!(artifacts[0].kind, ModuleKind::Script);
    let method = &artifacts[0].abi.methods[0];
    assert_eq!(method.name, "main");
    assert_eq!(method.return_type, "string");
}

#[test]
fn test_loops_and_compound_assignment() {
    let artifacts = compile(
        "contract C { public f(): number {\n\
           local total : number := 0;\n\
           local i : number := 0;\n\
           while (i < 10) { total += i; i += 1; }\n\
           do { total -= 1; } while (total > 100);\n\
           return total;\n\
         } }",
    )
    .expect("compiles");
    assert!(!artifacts[0].bytecode.is_empty());
}

#[test]
fn test_string_concatenation_coerces_numbers() {
    compile(
        "contract C { public f(v:number): string { return \"value=\" + v; } }",
    )
    .expect("compiles with implicit cast");
}

#[test]
fn test_mismatched_binary_operands_rejected() {
    let err = compile(
        "contract C { public f(v:number): number { return v + \"text\"; } }",
    )
    .unwrap_err();
    assert!(matches!(err, Error::Type { .. }));
}

#[test]
fn test_runtime_library_direct_call() {
    let artifacts = compile(
        "contract C {\n\
           import Runtime;\n\
           public f(owner:address) {\n\
             Runtime.expect(Runtime.isWitness(owner), \"not authorized\");\n\
             Runtime.log(\"checked\");\n\
           }\n\
         }",
    )
    .expect("compiles");
    assert!(contains_bytes(&artifacts[0].bytecode, b"Runtime.expect"));
    assert!(contains_bytes(&artifacts[0].bytecode, b"Runtime.isWitness"));
}

#[test]
fn test_zero_argument_call_uses_result_register_as_base() {
    let artifacts = compile(
        "contract C {\n\
           import Runtime;\n\
           public f(): number { return Runtime.time(); }\n\
         }",
    )
    .expect("compiles");
    let bytecode = &artifacts[0].bytecode;
    // With no arguments there is no marshalling window, so the CALL is the
    // method's first instruction and its base operand falls back to the
    // result register.
    assert_eq!(bytecode[0], Opcode::Call.byte());
    let dst = bytecode[1];
    let base = bytecode[2];
    let argc = bytecode[3];
    assert_eq!(base, dst);
    assert_eq!(argc, 0);
    assert!(contains_bytes(bytecode, b"Runtime.time"));
}

#[test]
fn test_asm_block_flows_into_bytecode() {
    let artifacts = compile(
        "contract C { public f() { asm {\n\
           LOAD r9 7\n\
           THROW r9\n\
         } } }",
    )
    .expect("compiles");
    assert!(!artifacts[0].bytecode.is_empty());
}

#[test]
fn test_abi_serializes_to_json() {
    let artifacts = compile(
        "contract C {\n\
           event Paid : number = \"paid\";\n\
           constructor(owner:address) { return; }\n\
         }",
    )
    .expect("compiles");
    let json = artifacts[0].abi.to_json().expect("serializes");
    assert!(json.contains("\"Initialize\""));
    assert!(json.contains("\"constructor\""));
    assert!(json.contains("\"Paid\""));
    assert!(json.contains("64"));
}

#[test]
fn test_source_line_map_is_monotonic() {
    let artifacts = Compiler::new(CompileOptions {
        source_map: true,
        ..CompileOptions::default()
    })
    .compile(
        "contract C {\n\
           public f(): number {\n\
             local a : number := 1;\n\
             return a;\n\
           }\n\
         }",
    )
    .expect("compiles");
    let map = artifacts[0].source_line_map.as_ref().expect("map emitted");
    assert!(!map.is_empty());
    let offsets: Vec<u32> = map.iter().map(|m| m.offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    assert!(map.iter().any(|m| m.line == 3));
}

#[test]
fn test_structs_are_usable_across_modules() {
    let artifacts = compile(
        "struct Point { x : number; y : number; }\n\
         contract C { public f(p:Point): Point { return p; } }",
    )
    .expect("compiles");
    let method = &artifacts[0].abi.methods[0];
    assert_eq!(method.parameters[0].ty, "Point");
    assert_eq!(method.return_type, "Point");
}

#[test]
fn test_unterminated_source_is_lex_error() {
    let err = compile("contract C { public f() { throw \"oops; } }").unwrap_err();
    assert!(matches!(err, Error::Lex { .. }));
}

#[test]
fn test_unknown_identifier_has_position() {
    let err = compile("contract C {\n  public f() {\n    y := 1;\n  }\n}").unwrap_err();
    assert!(matches!(err, Error::Resolution { .. }));
    assert_eq!(err.line(), Some(3));
}

#[test]
fn test_constant_resolution_in_expressions() {
    let artifacts = compile(
        "contract C {\n\
           const LIMIT : number = 100;\n\
           public f(v:number): bool { return v < LIMIT; }\n\
         }",
    )
    .expect("compiles");
    assert!(!artifacts[0].bytecode.is_empty());
}

#[test]
fn test_constant_literal_must_match_type() {
    let err = compile("contract C { const LIMIT : number = \"lots\"; }").unwrap_err();
    assert!(matches!(err, Error::Type { .. }));
}

#[test]
fn test_macros_compile() {
    let artifacts = compile(
        "contract C {\n\
           import Runtime;\n\
           public f(): number { return $BLOCK_TIME; }\n\
           public g(): address { return $CALLER; }\n\
         }",
    )
    .expect("compiles");
    assert!(contains_bytes(&artifacts[0].bytecode, b"block_time"));
    assert!(contains_bytes(&artifacts[0].bytecode, b"caller"));
}
