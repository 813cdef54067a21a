//! Expression code generator: one linearized token stream in, one
//! instruction list out, the expression's value pushed at the end.
//!
//! The scan juggles two register banks (numeric `X`/`Y`, string/pointer
//! `A`/`B`) and elides stack traffic by remembering what a register currently
//! holds: a value produced by a trivial move is retracted and replayed later
//! instead of being pushed and popped.
use std::collections::HashSet;

use once_cell::sync::Lazy;

use basalt_common::{BasaltError, Result};
use basalt_pcode::{CodeBuffer, Reg, Tok};

/// Pluggable operator tier, queried before the built-in tables. First
/// acceptance wins.
pub trait OperatorProvider {
    /// True if the provider recognizes `op` as a single-operand operator.
    fn is_unary(&self, _op: &str) -> bool { false }
    /// Emit the code for `op`; return true if the operator was handled.
    fn emit(&self, _op: &str, _code: &mut CodeBuffer) -> bool { false }
}

// Built-in single-operand operators. User-defined function calls ("FN ...")
// are single-operand as well.
static SINGLES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "!", "SIN", "COS", "TAN", "ATN", "EXP", "LOG", "INT", "ABS", "SGN",
        "SQR", "RND", "FRE", "CHR", "ASC", "STR", "VAL", "POS", "TAB", "SPC",
        "TABCHANNEL", "SPCCHANNEL", "LEN", "USR", "PEEK", "MID", "PAR",
        "LEFT", "RIGHT", "ARRAYACCESS",
    ]
    .into_iter()
    .collect()
});

// Operators that work on the string/pointer bank. Checked against the
// operator's leading word in the recovery step, so "SCMP =" is covered by
// "SCMP" there; the later check runs against the complete operator string and
// must not include it, since string compares produce a number.
static STRING_OPERATORS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [".", "STR", "MID", "LEFT", "RIGHT", "CHR", "TAB", "SPC", "TABCHANNEL", "SPCCHANNEL", "SCMP"]
        .into_iter()
        .collect()
});

// Operators that take a number but create a string; their pending operand is
// recovered into the numeric source register.
static INT2STRING: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["STR", "CHR", "TAB", "SPC", "TABCHANNEL", "SPCCHANNEL"].into_iter().collect()
});

/// Generate code for one linearized expression.
pub fn generate(stream: &[Tok], providers: &[Box<dyn OperatorProvider>]) -> Result<Vec<String>> {
    Gen::new(providers).run(stream)
}

/// Like [`generate`], with the non-crossable `NOP` marker prepended. This is
/// the form operand fragment providers embed into command fragments, so later
/// rewrite passes never fuse instructions across a term border.
pub fn generate_term(stream: &[Tok], providers: &[Box<dyn OperatorProvider>]) -> Result<Vec<String>> {
    let mut code = generate(stream, providers)?;
    code.insert(0, "NOP".to_string());
    Ok(code)
}

/// How a saved value can be brought back.
enum Saved {
    /// A real push was emitted; recover with a pop.
    Pushed,
    /// The producing move was retracted; recover by replaying it verbatim.
    Move(String),
}

struct Gen<'a> {
    providers: &'a [Box<dyn OperatorProvider>],
    code: CodeBuffer,
    /// Pending operators, applied on reduce markers.
    ops: Vec<String>,
    /// One entry per recoverable value, newest last.
    saved: Vec<Saved>,
    /// One flag per nested array access: string-typed or not.
    string_access: Vec<bool>,
    /// Buffer indices of replayed moves; the swap fixup leaves those alone.
    replayed: HashSet<usize>,
    tr: Option<Reg>,
    sr: Option<Reg>,
    pointer_mode: bool,
    ctx: u8,
    /// Bank switch counter; the first switch is free since the registers are
    /// undefined before first use.
    switches: u32,
    src_filled: bool,
    tgt_filled: bool,
    with_strings: bool,
}

enum Filled {
    Reg(Reg),
    /// A user-function call whose result still has to be popped.
    PopResult,
}

impl<'a> Gen<'a> {
    fn new(providers: &'a [Box<dyn OperatorProvider>]) -> Self {
        Self {
            providers,
            code: CodeBuffer::new(),
            ops: Vec::new(),
            saved: Vec::new(),
            string_access: Vec::new(),
            replayed: HashSet::new(),
            tr: None,
            sr: None,
            pointer_mode: false,
            ctx: 0,
            switches: 0,
            src_filled: false,
            tgt_filled: false,
            with_strings: false,
        }
    }

    fn run(mut self, stream: &[Tok]) -> Result<Vec<String>> {
        for (idx, tok) in stream.iter().enumerate() {
            let is_last = idx + 1 >= stream.len();
            let old_sr = self.sr;
            match tok {
                Tok::Operand(text) => {
                    let is_array = self.switch_context(text, old_sr);
                    self.place_operand(text, is_array);
                }
                Tok::Operator(op) => {
                    self.save_source();
                    self.ops.push(op.clone());
                }
                Tok::Reduce => self.reduce(is_last)?,
            }
        }
        self.finish()
    }

    /// Handle a context marker embedded in an operand. Returns true when the
    /// operand is an array access.
    fn switch_context(&mut self, text: &str, old_sr: Option<Reg>) -> bool {
        if !text.contains('{') {
            return false;
        }
        let mut is_array = false;
        if text.contains("{STRING") || text.contains("[]") {
            self.switches += 1;
            let mut change = None;
            if !self.pointer_mode
                && self.switches > 1
                && !self.code.is_empty()
                && text.contains("{STRING")
                && self.ctx != 1
            {
                change = Some("CHGCTX #1");
            }
            self.ctx = 1;
            self.pointer_mode = true;
            if !text.contains("[]") {
                self.tr = Some(Reg::A);
                self.sr = Some(Reg::B);
            } else {
                // Array access keeps its index in the parameter register.
                self.tr = Some(Reg::G);
                self.sr = Some(Reg::G);
                is_array = true;
                self.string_access.push(text.contains("{STRING"));

                // A just-pushed index belongs ahead of the access call.
                if self.code.last() == Some("PUSH X") {
                    let _ = self.saved.pop();
                    let _ = self.code.pop_last();
                }

                if self.src_filled && self.tgt_filled {
                    if let Some(old_sr) = old_sr {
                        self.code.push(format!("PUSH {old_sr}"));
                        self.saved.push(Saved::Pushed);
                    }
                    self.src_filled = false;
                }
            }
            if let Some(change) = change {
                if self.src_filled && !is_array {
                    self.code.push("PUSH Y");
                    self.saved.push(Saved::Pushed);
                    self.src_filled = false;
                }
                if self.tgt_filled && !is_array {
                    self.code.push("PUSH X");
                    self.saved.push(Saved::Pushed);
                    self.tgt_filled = false;
                }
                self.code.push(change);
            }
        } else {
            self.switches += 1;
            if self.pointer_mode && self.switches > 1 && !self.code.is_empty() && self.ctx != 0 {
                self.code.push("CHGCTX #0");
                if self.src_filled {
                    self.code.push("PUSH B");
                    self.saved.push(Saved::Pushed);
                    self.src_filled = false;
                }
                if self.tgt_filled {
                    self.code.push("PUSH A");
                    self.saved.push(Saved::Pushed);
                    self.tgt_filled = false;
                }
            }
            self.ctx = 0;
            self.pointer_mode = false;
            self.tr = Some(Reg::X);
            self.sr = Some(Reg::Y);
        }
        is_array
    }

    /// Place an operand into the free slot: source first, then target. The
    /// input stream guarantees a reduction before a third operand shows up.
    fn place_operand(&mut self, text: &str, is_array: bool) {
        if self.tr.is_none() {
            // unmarked operands default to the numeric bank
            self.tr = Some(Reg::X);
            self.sr = Some(Reg::Y);
        }
        if !self.src_filled || is_array {
            let dst = if is_array { Reg::G } else { self.sr.unwrap() };
            self.code.push(format!("MOV {dst},{text}"));
            self.src_filled = true;
        } else if !self.tgt_filled {
            self.code.push(format!("MOV {},{}", self.tr.unwrap(), text));
            self.tgt_filled = true;
        }
    }

    /// An operator arrived while only the source slot holds a not-yet-pushed
    /// value: save it. A trivial move is retracted and remembered verbatim,
    /// anything else gets a real push.
    fn save_source(&mut self) {
        if !self.src_filled || self.tgt_filled {
            return;
        }
        let Some(sr) = self.sr else { return };
        let retractable = self
            .code
            .last()
            .map_or(false, |lc| lc.starts_with(&format!("MOV {sr}")) && !lc.contains("[]"));
        if retractable {
            let mv = self.code.pop_last().unwrap();
            self.saved.push(Saved::Move(mv));
        } else if !sr.is_parameter() {
            self.code.push(format!("PUSH {sr}"));
            self.saved.push(Saved::Pushed);
        }
        self.src_filled = false;
    }

    fn reduce(&mut self, is_last: bool) -> Result<()> {
        let op = self
            .ops
            .pop()
            .ok_or_else(|| BasaltError::new("reduce marker without pending operator"))?;
        let op_start = op.split(' ').next().unwrap_or(&op).to_string();
        let is_single = self.is_single(&op);

        if op.starts_with("ARRAYACCESS") {
            self.relocate_array_index();
        }

        let is_string_access =
            self.string_access.last().copied().unwrap_or(false) && self.ctx == 1;

        let (tr, sr) = match (self.tr, self.sr) {
            (Some(t), Some(s)) => (t, s),
            _ => {
                return Err(BasaltError(format!(
                    "internal error: target register undefined while reducing '{op}'"
                )))
            }
        };

        if !self.tgt_filled && !is_single {
            // Bring the waiting second operand back, cheapest form first:
            // collapse an adjacent push, else recover through the save stack.
            if self.code.last() == Some(format!("PUSH {tr}").as_str()) {
                let _ = self.code.pop_last();
                let _ = self.saved.pop();
            } else if self.code.len() >= 2
                && self.code.get(self.code.len() - 2) == Some(format!("PUSH {tr}").as_str())
                && self.code.last().map_or(false, |l| l.starts_with(&format!("MOV {sr}")))
            {
                self.code.remove(self.code.len() - 2);
                let _ = self.saved.pop();
            } else if self.recover_value(sr, tr, tr, true) {
                let _ = self.saved.pop();
            }
            self.tgt_filled = true;
        }

        if !self.src_filled {
            // The registers the result will live in, accounting for a bank
            // flip forced by the operator itself.
            let mut nsr = sr;
            if STRING_OPERATORS.contains(op_start.as_str()) || is_string_access {
                if (!self.pointer_mode || is_string_access)
                    && self.switches > 1
                    && !self.code.is_empty()
                {
                    nsr = if INT2STRING.contains(op_start.as_str()) { Reg::Y } else { Reg::B };
                }
            } else if self.pointer_mode && self.switches > 1 && !self.code.is_empty() {
                nsr = Reg::Y;
            }

            // Array access consumes its operands through G alone.
            if op != "ARRAYACCESS" {
                match self.saved.pop() {
                    None => {
                        self.recover_value(tr, sr, nsr, false);
                    }
                    Some(Saved::Pushed) => {
                        if !self.recover_value(tr, sr, nsr, true) {
                            self.saved.push(Saved::Pushed);
                        }
                    }
                    Some(Saved::Move(mv)) => {
                        self.code.push(mv);
                        self.replayed.insert(self.code.len() - 1);
                    }
                }
            }
            self.src_filled = true;
        }

        if tr != sr {
            self.fix_register_order(tr, sr, is_single);
        }

        let string_result = STRING_OPERATORS.contains(op.as_str()) || is_string_access;
        self.switches += 1;
        if string_result {
            if !self.pointer_mode && self.switches > 1 && !self.code.is_empty() && self.ctx != 1 {
                self.code.push("CHGCTX #1");
            }
            self.ctx = 1;
            self.pointer_mode = true;
            self.tr = Some(Reg::A);
            self.sr = Some(Reg::B);
        } else {
            if self.pointer_mode && self.switches > 1 && !self.code.is_empty() && self.ctx != 0 {
                self.code.push("CHGCTX #0");
            }
            self.ctx = 0;
            self.pointer_mode = false;
            self.tr = Some(Reg::X);
            self.sr = Some(Reg::Y);
        }

        let dont_push = self.emit_operator(&op, is_last)?;

        let tr = self.tr.unwrap();
        if !dont_push && !tr.is_parameter() {
            self.code.push(format!("PUSH {tr}"));
            self.saved.push(Saved::Pushed);
        }
        self.tgt_filled = false;
        self.src_filled = false;
        Ok(())
    }

    /// Swap-by-rewrite: a freshly emitted move that targeted the source
    /// register when the operator needs it in the target register (or the
    /// other way around, for single-operand operators) is rewritten in place
    /// instead of emitting a real swap instruction.
    fn fix_register_order(&mut self, tr: Reg, sr: Reg, is_single: bool) {
        let len = self.code.len();
        let Some(last) = self.code.last().map(str::to_string) else { return };
        if last.starts_with(&format!("MOV {sr}"))
            && last != format!("MOV {sr},{tr}")
            && !self.replayed.contains(&(len - 1))
        {
            self.code.insert(len - 1, format!("MOV {sr},{tr}"));
            let fixed = self
                .code
                .last()
                .unwrap()
                .replace(&format!("MOV {sr},"), &format!("MOV {tr},"));
            self.code.replace_last(fixed);
        } else if is_single && last.starts_with(&format!("MOV {tr}")) {
            // Wrong register order for a single-operand call: park the
            // previous value and retarget the move.
            if let Some(prev) = self.code.last_move_target(2) {
                self.code.insert(len - 1, format!("PUSH {prev}"));
                let fixed = self
                    .code
                    .last()
                    .unwrap()
                    .replace(&format!("MOV {tr},"), &format!("MOV {sr},"));
                self.code.replace_last(fixed);
                self.saved.push(Saved::Pushed);
            }
        }
    }

    /// Emit the operator's code: the provider chain first, then the built-in
    /// tables. Returns true when the result must not be pushed.
    fn emit_operator(&mut self, op: &str, is_last: bool) -> Result<bool> {
        let tr = self.tr.unwrap();
        let sr = self.sr.unwrap();
        let regs = if self.pointer_mode { "A,B" } else { "X,Y" };

        let providers = self.providers;
        if providers.iter().any(|p| p.emit(op, &mut self.code)) {
            return Ok(false);
        }

        match op {
            "+" | "-" | "*" | "/" | "^" | "|" | "&" | "!" => {
                let mnem = match op {
                    "+" => "ADD",
                    "-" => "SUB",
                    "*" => "MUL",
                    "/" => "DIV",
                    "^" => "POW",
                    "|" => "OR",
                    "&" => "AND",
                    _ => "NOT",
                };
                self.code.push(format!("{mnem} {regs}"));
            }
            "SIN" | "COS" | "TAN" | "ATN" | "EXP" | "LOG" | "SQR" | "INT" | "ABS" | "SGN"
            | "RND" => {
                self.code.push(format!("{op} {regs}"));
            }
            "PEEK" => {
                self.code.push(format!("MOVB {})", regs.replace(',', ",(")));
            }
            "." => {
                self.with_strings = true;
                self.code.push("JSR CONCAT");
            }
            "CHR" | "STR" => {
                self.with_strings = true;
                self.code.push(format!("JSR {op}"));
            }
            "VAL" | "ASC" | "LEN" | "TAB" | "SPC" | "TABCHANNEL" | "SPCCHANNEL" | "POS"
            | "FRE" | "USR" => {
                self.code.push(format!("JSR {op}"));
            }
            "MID" => {
                self.with_strings = true;
                self.code.push("POP D");
                self.code.push("POP C");
                self.code.push("JSR MID");
            }
            "LEFT" | "RIGHT" => {
                self.with_strings = true;
                self.code.push("POP C");
                self.code.push(format!("JSR {op}"));
            }
            "ARRAYACCESS" => {
                self.code.push("JSR ARRAYACCESS");
                let _ = self.string_access.pop();
            }
            "CMP =" | "CMP >" | "CMP <" | "CMP >=" | "CMP <=" | "CMP <>" => {
                let mnem = match op {
                    "CMP =" => "EQ",
                    "CMP >" => "GT",
                    "CMP <" => "LT",
                    "CMP >=" => "GTEQ",
                    "CMP <=" => "LTEQ",
                    _ => "NEQ",
                };
                self.code.push(format!("{mnem} {regs}"));
            }
            // String compares reset the string buffer in the runtime, so no
            // compaction call is needed for them.
            "SCMP =" | "SCMP >" | "SCMP <" | "SCMP >=" | "SCMP <=" | "SCMP <>" => {
                let routine = match op {
                    "SCMP =" => "SEQ",
                    "SCMP >" => "SGT",
                    "SCMP <" => "SLT",
                    "SCMP >=" => "SGTEQ",
                    "SCMP <=" => "SLTEQ",
                    _ => "SNEQ",
                };
                self.code.push(format!("JSR {routine}"));
            }
            "PAR" => {
                // Bind the value as a committed call argument.
                let src = if self.code.last().map_or(false, |l| l.starts_with(&format!("MOV {sr}"))) {
                    sr
                } else {
                    tr
                };
                self.code.push(format!("MOV C,{src}"));
                self.code.push("PUSH C");
                return Ok(true);
            }
            _ => {
                if let Some(label) = op.strip_prefix("FN ") {
                    let label = label.trim();
                    self.code.push(format!("PUSH {sr}"));
                    self.saved.push(Saved::Pushed);
                    self.code.push(format!("JSR {label}"));
                    if is_last {
                        // Pop the call result only at the outermost reduce;
                        // inner calls leave it on the stack for the caller.
                        self.code.push(format!("POP {tr}"));
                    }
                    return Ok(true);
                }
                return Err(BasaltError(format!("Unknown operator: {op}")));
            }
        }
        Ok(false)
    }

    /// Recover a saved value: turn an adjacent `PUSH` back into a move, drop
    /// a push that is about to be popped again, or fall back to a real pop.
    /// Returns false when nothing could be recovered.
    fn recover_value(&mut self, pushed: Reg, move_to: Reg, pop_into: Reg, allow_pop: bool) -> bool {
        let Some(last) = self.code.last().map(str::to_string) else { return true };
        if last == format!("PUSH {pushed}") {
            self.code.replace_last(format!("MOV {move_to},{pushed}"));
        } else if last == format!("PUSH {pop_into}") {
            let _ = self.code.pop_last();
        } else if allow_pop && !pop_into.is_parameter() {
            self.code.push(format!("POP {pop_into}"));
        } else {
            return false;
        }
        true
    }

    /// The array index has to sit in `X` ahead of the access call. The index
    /// sub-expression ends in one of a few known shapes; anything else is
    /// left untouched.
    fn relocate_array_index(&mut self) {
        let len = self.code.len();
        if len < 2 {
            return;
        }
        let before_change = self.code.get(len - 2).map_or(false, |l| l.starts_with("CHGCTX"));
        let pos = len - if before_change { 2 } else { 1 };
        match self.last_filled(1) {
            Some(Filled::Reg(Reg::Y)) => self.code.insert(pos, "MOV X,Y"),
            Some(Filled::PopResult) => self.code.insert(pos, "POP X"),
            _ => {}
        }
    }

    /// Scan backwards for the most recent instruction that filled one of the
    /// numeric registers, starting `back` entries from the end. A call to a
    /// single-operand routine counts as filling `X`; a user-function call
    /// means the result still sits on the stack.
    fn last_filled(&self, back: usize) -> Option<Filled> {
        let mut i = self.code.len() as isize - back as isize;
        while i >= 0 {
            let line = self.code.get(i as usize).unwrap().replace("MOVB", "MOV");
            if line.find(' ') == Some(3) {
                match line.find(',') {
                    Some(pos) if pos > 4 => {
                        let reg = line[4..pos].trim();
                        if reg.len() == 1 {
                            if let Some(r @ (Reg::X | Reg::Y)) = Reg::parse(reg) {
                                return Some(Filled::Reg(r));
                            }
                        }
                    }
                    _ => {
                        if let Some(addr) = line.strip_prefix("JSR ") {
                            let addr = addr.to_ascii_uppercase();
                            if self.is_single(&addr) {
                                return Some(Filled::Reg(Reg::X));
                            } else if addr.starts_with("DEF") {
                                return Some(Filled::PopResult);
                            }
                        }
                    }
                }
            }
            i -= 1;
        }
        None
    }

    fn is_single(&self, op: &str) -> bool {
        // the registered providers get the first say
        if self.providers.iter().any(|p| p.is_unary(op)) {
            return true;
        }
        SINGLES.contains(op.to_ascii_uppercase().as_str()) || op.starts_with("FN ")
    }

    fn finish(mut self) -> Result<Vec<String>> {
        if !self.ops.is_empty() {
            return Err(BasaltError(format!(
                "operator stack not empty, {} element(s) remaining",
                self.ops.len()
            )));
        }

        // End simple expressions properly: the last filled slot gets pushed.
        if let (Some(tr), Some(sr)) = (self.tr, self.sr) {
            if !self.code.is_empty() && self.code.last() != Some(format!("PUSH {tr}").as_str()) {
                let from_source =
                    self.code.last().map_or(false, |l| l.starts_with(&format!("MOV {sr}")));
                let reg = if from_source { sr } else { tr };
                if !reg.is_parameter() {
                    self.code.push(format!("PUSH {reg}"));
                }
            }
        }

        // Keep the shared string scratch buffer bounded.
        if self.with_strings {
            self.code.insert(0, "JSR COMPACTMAX");
        }
        Ok(self.code.into_lines())
    }
}
