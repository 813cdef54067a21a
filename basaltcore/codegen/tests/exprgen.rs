use basalt_codegen::exprgen::{generate, generate_term, OperatorProvider};
use basalt_pcode::{parse_stream, CodeBuffer};

fn gen(src: &str) -> Vec<String> {
    generate(&parse_stream(src), &[]).expect("generate")
}

fn gen_err(src: &str) -> String {
    generate(&parse_stream(src), &[]).expect_err("expected failure").to_string()
}

#[test]
fn numeric_sum_of_two_variables() {
    let code = gen("A\nB\n:+\n_");
    assert_eq!(code, vec!["MOV Y,A", "MOV X,B", "ADD X,Y", "PUSH X"]);
}

#[test]
fn binary_operator_emits_one_mnemonic_and_push() {
    for (op, mnem) in [
        ("+", "ADD"), ("-", "SUB"), ("*", "MUL"), ("/", "DIV"), ("^", "POW"),
        ("|", "OR"), ("&", "AND"),
    ] {
        let code = gen(&format!("A\nB\n:{op}\n_"));
        assert_eq!(code[2], format!("{mnem} X,Y"), "operator {op}");
        assert_eq!(code.last().unwrap(), "PUSH X", "operator {op}");
        let mnemonics = code.iter().filter(|l| l.starts_with(mnem)).count();
        assert_eq!(mnemonics, 1, "operator {op}");
    }
}

#[test]
fn numeric_compares() {
    for (op, mnem) in [
        ("CMP =", "EQ"), ("CMP >", "GT"), ("CMP <", "LT"),
        ("CMP >=", "GTEQ"), ("CMP <=", "LTEQ"), ("CMP <>", "NEQ"),
    ] {
        let code = gen(&format!("A\nB\n:{op}\n_"));
        assert_eq!(code[2], format!("{mnem} X,Y"), "operator {op}");
    }
}

#[test]
fn string_concat_compacts_the_buffer() {
    let code = gen("A${STRING}\nB${STRING}\n:.\n_");
    assert_eq!(
        code,
        vec![
            "JSR COMPACTMAX",
            "MOV B,A${STRING}",
            "MOV A,B${STRING}",
            "JSR CONCAT",
            "PUSH A",
        ]
    );
}

#[test]
fn unary_sin() {
    let code = gen(":SIN\nA\n_");
    // Y just mirrors the undefined second slot of the single-operand form.
    assert_eq!(code, vec!["MOV Y,X", "MOV X,A", "SIN X,Y", "PUSH X"]);
    assert!(code.ends_with(&["MOV X,A".into(), "SIN X,Y".into(), "PUSH X".into()]));
}

#[test]
fn unary_not_consumes_saved_move() {
    let code = gen("A\n:!\n_");
    assert_eq!(code, vec!["MOV Y,A", "NOT X,Y", "PUSH X"]);
}

#[test]
fn peek_reads_memory_indirect() {
    let code = gen("#49152{INTEGER}\n:PEEK\n_");
    assert_eq!(code, vec!["MOV Y,#49152{INTEGER}", "MOVB X,(Y)", "PUSH X"]);
}

#[test]
fn unknown_operator_fails_with_its_name() {
    let msg = gen_err("A\n:~\n_");
    assert!(msg.contains("Unknown operator: ~"), "got: {msg}");
}

#[test]
fn stranded_operator_is_malformed() {
    let msg = gen_err("A\n:+");
    assert!(msg.contains("operator stack not empty, 1 element(s) remaining"), "got: {msg}");
}

#[test]
fn reduce_without_operator_is_malformed() {
    let msg = gen_err("A\n_");
    assert!(msg.contains("reduce marker without pending operator"), "got: {msg}");
}

#[test]
fn saved_move_is_replayed_without_stack_traffic() {
    // A + B * C: the value of A is produced by a trivial move, retracted
    // while B * C evaluates, and replayed right before the addition.
    let code = gen("A\n:+\nB\nC\n:*\n_\n_");
    assert_eq!(
        code,
        vec!["MOV Y,B", "MOV X,C", "MUL X,Y", "MOV Y,A", "ADD X,Y", "PUSH X"]
    );
    assert_eq!(code.iter().filter(|l| l.starts_with("PUSH")).count(), 1);
    assert!(!code.iter().any(|l| l.starts_with("POP")));
}

#[test]
fn adjacent_push_collapses_into_move() {
    // (A + B) * C: the sum is pushed, then the push is rewritten away when
    // the product consumes it, with the operands swapped in place.
    let code = gen("A\nB\n:+\n_\n:*\nC\n_");
    assert_eq!(
        code,
        vec![
            "MOV Y,A", "MOV X,B", "ADD X,Y", "MOV Y,X", "MOV X,C", "MUL X,Y", "PUSH X",
        ]
    );
}

#[test]
fn two_subterms_use_a_real_pop() {
    // (A + B) * (C + D): both sides fill both slots, so the left sum really
    // goes through the stack.
    let code = gen("A\nB\n:+\n_\n:*\nC\nD\n:+\n_\n_");
    assert_eq!(
        code,
        vec![
            "MOV Y,A", "MOV X,B", "ADD X,Y", "PUSH X", "MOV Y,C", "MOV X,D",
            "ADD X,Y", "POP Y", "MUL X,Y", "PUSH X",
        ]
    );
}

#[test]
fn numeric_only_expression_never_switches_banks() {
    let code = gen("A{REAL}\nB{REAL}\n:+\n_");
    assert!(!code.iter().any(|l| l.starts_with("CHGCTX")), "got: {code:?}");
}

#[test]
fn bank_switches_after_the_first_are_explicit() {
    // Three bank flips through operand markers: the first one is free.
    let code = generate(&parse_stream("A${STRING}\nB{REAL}\nC${STRING}"), &[]).unwrap();
    let switches = code.iter().filter(|l| l.starts_with("CHGCTX")).count();
    assert_eq!(switches, 2, "got: {code:?}");
    assert_eq!(code[1], "CHGCTX #0");
    assert_eq!(code[5], "CHGCTX #1");
}

#[test]
fn string_compare_calls_runtime_and_yields_a_number() {
    let code = gen("A${STRING}\nB${STRING}\n:SCMP <\n_");
    assert_eq!(
        code,
        vec![
            "MOV B,A${STRING}", "MOV A,B${STRING}", "CHGCTX #0", "JSR SLT", "PUSH X",
        ]
    );
    // comparisons reset the string buffer in the runtime
    assert!(!code.contains(&"JSR COMPACTMAX".to_string()));
}

#[test]
fn mid_binds_committed_parameters() {
    let code = gen("B{REAL}\n:PAR\n_\nC{REAL}\n:PAR\n_\nA${STRING}\n:MID\n_");
    assert_eq!(
        code,
        vec![
            "JSR COMPACTMAX",
            "MOV Y,B{REAL}",
            "MOV C,Y",
            "PUSH C",
            "MOV Y,C{REAL}",
            "MOV C,Y",
            "PUSH C",
            "CHGCTX #1",
            "MOV B,A${STRING}",
            "POP D",
            "POP C",
            "JSR MID",
            "PUSH A",
        ]
    );
}

#[test]
fn left_pops_one_parameter() {
    let code = gen("N{REAL}\n:PAR\n_\nA${STRING}\n:LEFT\n_");
    assert_eq!(code[0], "JSR COMPACTMAX");
    let tail = &code[code.len() - 3..];
    assert_eq!(tail, ["POP C", "JSR LEFT", "PUSH A"]);
}

#[test]
fn user_function_call_pops_result_at_the_end() {
    let code = gen("V{REAL}\n:FN DEF0\n_");
    assert_eq!(
        code,
        vec!["MOV Y,V{REAL}", "PUSH Y", "JSR DEF0", "POP X", "PUSH X"]
    );
}

#[test]
fn nested_user_function_calls_pop_only_at_the_outermost_reduce() {
    let code = gen("V{REAL}\n:FN DEFB\n_\n:FN DEFA\n_");
    assert_eq!(
        code,
        vec![
            "MOV Y,V{REAL}", "PUSH Y", "JSR DEFB", "POP Y", "PUSH Y", "JSR DEFA",
            "POP X", "PUSH X",
        ]
    );
    // exactly one pop per call result, none between the inner push and call
    assert_eq!(code.iter().filter(|l| l.starts_with("POP")).count(), 2);
}

#[test]
fn user_function_inside_expression_leaves_no_dangling_result() {
    // W + FNA(V): the inner call's result is popped by the addition, not by
    // the call itself.
    let code = gen("W{REAL}\n:+\nV{REAL}\n:FN DEFA\n_\n_");
    assert_eq!(
        code,
        vec![
            "MOV Y,V{REAL}", "PUSH Y", "JSR DEFA", "POP X", "MOV Y,W{REAL}",
            "ADD X,Y", "PUSH X",
        ]
    );
}

#[test]
fn array_index_moved_from_y() {
    let code = gen("I{REAL}\nARR[]{INTEGER[]}\n:ARRAYACCESS\n_");
    assert_eq!(
        code,
        vec![
            "MOV Y,I{REAL}",
            "MOV X,Y",
            "MOV G,ARR[]{INTEGER[]}",
            "CHGCTX #0",
            "JSR ARRAYACCESS",
            "PUSH X",
        ]
    );
}

#[test]
fn string_array_access_pushes_pointer_result() {
    let code = gen("I{REAL}\nS[]{STRING[]}\n:ARRAYACCESS\n_");
    assert_eq!(
        code,
        vec![
            "MOV Y,I{REAL}",
            "MOV X,Y",
            "CHGCTX #1",
            "MOV G,S[]{STRING[]}",
            "JSR ARRAYACCESS",
            "PUSH A",
        ]
    );
}

#[test]
fn array_index_already_in_x_is_left_alone() {
    // The index sub-expression ends in ADD X,Y whose push is retracted when
    // the array operand shows up; no relocation is needed.
    let code = gen("I{REAL}\n#1{INTEGER}\n:+\n_\nARR[]{INTEGER[]}\n:ARRAYACCESS\n_");
    assert_eq!(
        code,
        vec![
            "MOV Y,I{REAL}",
            "MOV X,#1{INTEGER}",
            "ADD X,Y",
            "MOV G,ARR[]{INTEGER[]}",
            "CHGCTX #0",
            "JSR ARRAYACCESS",
            "PUSH X",
        ]
    );
}

#[test]
fn array_index_from_user_call_is_popped() {
    let code = gen("V{REAL}\n:FN DEFIDX\n_\nARR[]{INTEGER[]}\n:ARRAYACCESS\n_");
    assert_eq!(
        code,
        vec![
            "MOV Y,V{REAL}",
            "PUSH Y",
            "JSR DEFIDX",
            "POP X",
            "MOV G,ARR[]{INTEGER[]}",
            "CHGCTX #0",
            "JSR ARRAYACCESS",
            "PUSH X",
        ]
    );
}

#[test]
fn single_operand_call_retargets_a_misplaced_operand() {
    // Both slots filled when a single-operand operator reduces: the operand
    // in the target register is retargeted and the other value parked.
    let code = gen("A\nB\n:SIN\n_");
    assert_eq!(
        code,
        vec!["MOV Y,A", "PUSH Y", "MOV Y,B", "SIN X,Y", "PUSH X"]
    );
}

#[test]
fn generate_term_prepends_the_separator() {
    let code = generate_term(&parse_stream("A\nB\n:+\n_"), &[]).unwrap();
    assert_eq!(code[0], "NOP");
    assert_eq!(code[1..], ["MOV Y,A", "MOV X,B", "ADD X,Y", "PUSH X"]);
}

#[test]
fn empty_stream_yields_no_code() {
    let code = generate(&[], &[]).unwrap();
    assert!(code.is_empty());
}

// ---- provider chain ----

struct Tilde;

impl OperatorProvider for Tilde {
    fn is_unary(&self, op: &str) -> bool {
        op == "~"
    }
    fn emit(&self, op: &str, code: &mut CodeBuffer) -> bool {
        if op == "~" {
            code.push("JSR TILDE");
            return true;
        }
        false
    }
}

#[test]
fn provider_chain_wins_over_the_table() {
    let providers: Vec<Box<dyn OperatorProvider>> = vec![Box::new(Tilde)];
    let code = generate(&parse_stream("A\n:~\n_"), &providers).unwrap();
    assert_eq!(code, vec!["MOV Y,A", "JSR TILDE", "PUSH X"]);
}

#[test]
fn provider_chain_does_not_swallow_other_operators() {
    let providers: Vec<Box<dyn OperatorProvider>> = vec![Box::new(Tilde)];
    let err = generate(&parse_stream("A\n:%\n_"), &providers).expect_err("expected failure");
    assert!(err.to_string().contains("Unknown operator: %"));
}
