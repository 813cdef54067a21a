//! Splices per-command code into per-line and whole-program order
use basalt_common::{BasaltError, Result};
use basalt_pcode::CodeContainer;

use crate::config::CompilerConfig;
use crate::platform::PcodeOptimizer;

/// One command of a source line. Implemented by the command code generator
/// library; each command yields its instruction fragments on demand.
pub trait CommandGen {
    fn eval_to_code(&self, config: &CompilerConfig) -> Result<Vec<CodeContainer>>;
    /// True for commands that branch over the rest of the line.
    fn is_conditional(&self) -> bool { false }
}

/// One source line with its parsed commands.
pub struct ProgramLine {
    pub number: u32,
    pub text: String,
    pub commands: Vec<Box<dyn CommandGen>>,
}

/// The assembled program plus the advisory last processed source line.
#[derive(Debug)]
pub struct Assembled {
    pub code: Vec<String>,
    pub last_line: Option<String>,
}

/// Assemble a whole program: a label per line, each command's code in order,
/// separator markers between commands, end code and the fixed preamble.
pub fn assemble(
    config: &CompilerConfig,
    lines: &[ProgramLine],
    optimizer: Option<&dyn PcodeOptimizer>,
) -> Result<Assembled> {
    log::info!("compiling into intermediate code...");
    let mut m_code: Vec<String> = Vec::new();
    let mut last_line: Option<String> = None;

    for line in lines {
        last_line = Some(format!("{} {}", line.number, line.text));
        m_code.push(format!("{}:", line.number));
        let mut conditional_open = false;
        for cmd in &line.commands {
            let code_start = m_code.len();
            let cmd_code =
                command_code(config, cmd.as_ref()).map_err(|e| attach_line(e, &last_line))?;
            if !conditional_open {
                m_code.extend(cmd_code);
            } else {
                // Place the code inside of the still-open conditional area,
                // right after the first non-marker instruction from the end.
                // This handles nested ifs as well.
                if let Some(i) = m_code
                    .iter()
                    .rposition(|part| !part.starts_with("SKIP") && !part.starts_with("NOP"))
                {
                    m_code.splice(i + 1..i + 1, cmd_code);
                }
            }
            if cmd.is_conditional() {
                conditional_open = true;
            }
            if m_code.len() > code_start && !m_code[code_start].eq_ignore_ascii_case("NOP") {
                // Flag the end of a command, so that the optimizer doesn't
                // cross command borders. ...but avoid double NOPs.
                m_code.insert(code_start, "NOP".to_string());
            }
        }
    }

    if m_code.last().map(String::as_str) != Some("RTS") {
        add_end_code(&mut m_code);
    }

    if let Some(opt) = optimizer {
        let before = m_code.len();
        m_code = opt.optimize(config, m_code).map_err(|e| attach_line(e, &last_line))?;
        log::info!("code optimized: {} => {} lines", before, m_code.len());
    }

    if m_code.is_empty() {
        // An empty program simply returns without doing much.
        add_end_code(&mut m_code);
    }

    if m_code[0] != "0:" {
        // Artificial line zero, native jumps may target address 0.
        m_code.insert(0, "0:".to_string());
    }
    m_code.insert(0, "JSR START".to_string());
    m_code.insert(0, "PROGRAMSTART:".to_string());

    Ok(Assembled { code: m_code, last_line })
}

fn command_code(config: &CompilerConfig, cmd: &dyn CommandGen) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for cc in cmd.eval_to_code(config)? {
        out.extend(cc.before);
        out.extend(cc.expression);
        out.extend(cc.after);
    }
    Ok(out)
}

fn add_end_code(m_code: &mut Vec<String>) {
    m_code.push("NOP".to_string());
    m_code.push("JSR END".to_string());
    m_code.push("RTS".to_string());
}

pub(crate) fn attach_line(e: BasaltError, last_line: &Option<String>) -> BasaltError {
    match last_line {
        Some(line) => BasaltError(format!("{} (last processed line: {})", e.0, line)),
        None => e,
    }
}
