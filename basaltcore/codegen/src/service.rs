use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use basalt_pcode::{is_comment, is_label, opcode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DiagnosticSeverity { Error, Warning, Information }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub line: usize,
    pub severity: DiagnosticSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SymbolKind { Label, Routine }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListingDiagnostics {
    pub errors: Vec<Diagnostic>,
    pub symbols: Vec<SymbolInfo>,
}

static MNEMONICS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "MOV", "MOVB", "PUSH", "POP", "ADD", "SUB", "MUL", "DIV", "POW", "AND", "OR", "NOT",
        "EQ", "GT", "LT", "GTEQ", "LTEQ", "NEQ", "SIN", "COS", "TAN", "ATN", "EXP", "LOG",
        "SQR", "INT", "ABS", "SGN", "RND", "JSR", "CHGCTX", "NOP", "RTS",
    ]
    .into_iter()
    .collect()
});

/// Analyze a pseudo-code listing without running the pipeline: collect label
/// and routine symbols, flag unknown mnemonics.
pub fn analyze_listing(listing: &str) -> ListingDiagnostics {
    let mut out = ListingDiagnostics::default();
    for (i, raw) in listing.lines().enumerate() {
        let line = raw.trim();
        let lineno = i + 1;
        if line.is_empty() || is_comment(line) {
            continue;
        }
        if is_label(line) {
            out.symbols.push(SymbolInfo {
                name: line.trim_end_matches(':').to_string(),
                kind: SymbolKind::Label,
                line: lineno,
            });
            continue;
        }
        let Some(opc) = opcode(line) else { continue };
        // SKIP markers come in numbered variants
        if !MNEMONICS.contains(opc) && !opc.starts_with("SKIP") {
            out.errors.push(Diagnostic {
                message: format!("unknown mnemonic: {}", opc),
                line: lineno,
                severity: DiagnosticSeverity::Error,
            });
            continue;
        }
        if opc == "JSR" {
            if let Some(target) = line.split_whitespace().nth(1) {
                out.symbols.push(SymbolInfo {
                    name: target.to_string(),
                    kind: SymbolKind::Routine,
                    line: lineno,
                });
            }
        }
    }
    out
}
