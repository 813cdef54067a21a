//! Drives one compilation: assemble, then the platform stages in fixed order
use std::time::Instant;

use basalt_common::{BasaltError, Result};

use crate::assembler::{assemble, attach_line, ProgramLine};
use crate::config::{CompilerConfig, MemoryConfig};
use crate::platform::PlatformProvider;

/// Compile a program into native (or assembly) code of the given target
/// platform. Fatal conditions abort the whole compilation; no partial output
/// is produced.
pub fn compile(
    config: &mut CompilerConfig,
    mem: &MemoryConfig,
    lines: &[ProgramLine],
    platform: &dyn PlatformProvider,
) -> Result<Vec<String>> {
    platform.override_config(config);

    if !mem.is_valid() {
        return Err(BasaltError(format!(
            "String memory ({}) must not be lower than variable memory ({})!",
            mem.string_end.unwrap_or(0),
            mem.variable_start.unwrap_or(0)
        )));
    }

    log::info!("running native compiler...");
    let started = Instant::now();
    let assembled = assemble(config, lines, platform.pcode_optimizer())?;
    log::info!("compiled to intermediate code in {:?}", started.elapsed());

    let last_line = assembled.last_line;
    let mut code = platform
        .transformer()
        .transform(config, mem, assembled.code)
        .map_err(|e| attach_line(e, &last_line))?;

    if config.native_optimizations {
        if let Some(opt) = platform.optimizer() {
            code = opt.optimize(config, code).map_err(|e| attach_line(e, &last_line))?;
        }
    }
    if config.optimized_linker {
        if let Some(unlinker) = platform.unlinker() {
            code = unlinker.unlink(code).map_err(|e| attach_line(e, &last_line))?;
        }
    }
    Ok(code)
}
