use basalt_pcode::{is_label, opcode, parse_stream, CodeBuffer, Reg, Tok};

#[test]
fn stream_text_form_round_trips() {
    let src = "; numeric sum\nA{REAL}\nB{REAL}\n:+\n_\n";
    let toks = parse_stream(src);
    assert_eq!(
        toks,
        vec![
            Tok::operand("A{REAL}"),
            Tok::operand("B{REAL}"),
            Tok::operator("+"),
            Tok::Reduce,
        ]
    );
    let rendered: Vec<String> = toks.iter().map(|t| t.to_string()).collect();
    assert_eq!(rendered, ["A{REAL}", "B{REAL}", ":+", "_"]);
}

#[test]
fn operators_keep_their_payload() {
    let toks = parse_stream(":CMP >=\n:FN DEF0\n_");
    assert_eq!(toks[0], Tok::operator("CMP >="));
    assert_eq!(toks[1], Tok::operator("FN DEF0"));
    assert_eq!(toks[2], Tok::Reduce);
}

#[test]
fn buffer_tail_rewrites() {
    let mut buf = CodeBuffer::new();
    buf.push("MOV Y,A");
    buf.push("PUSH Y");
    assert_eq!(buf.last(), Some("PUSH Y"));
    buf.replace_last("MOV X,Y");
    assert_eq!(buf.last(), Some("MOV X,Y"));
    buf.insert(buf.len() - 1, "NOP");
    assert_eq!(buf.lines(), ["MOV Y,A", "NOP", "MOV X,Y"]);
    buf.remove(1);
    assert_eq!(buf.pop_last(), Some("MOV X,Y".to_string()));
    assert_eq!(buf.into_lines(), ["MOV Y,A"]);
}

#[test]
fn last_move_target_scans_backwards() {
    let mut buf = CodeBuffer::new();
    buf.push("MOV Y,A");
    buf.push("ADD X,Y");
    buf.push("MOV X,B");
    assert_eq!(buf.last_move_target(1), Some(Reg::X));
    // skip the last entry, the next move up wins
    assert_eq!(buf.last_move_target(2), Some(Reg::Y));
    let empty = CodeBuffer::new();
    assert_eq!(empty.last_move_target(1), None);
}

#[test]
fn listing_helpers_classify_lines() {
    assert!(is_label("PROGRAMSTART:"));
    assert!(is_label("0:"));
    assert!(!is_label("MOV X,Y"));
    assert_eq!(opcode("JSR CONCAT"), Some("JSR"));
    assert_eq!(opcode("NOP"), Some("NOP"));
    assert!(Reg::parse("G").unwrap().is_parameter());
    assert!(!Reg::parse("X").unwrap().is_parameter());
}
