//! Seams to the platform-specific stages that consume the pseudo-code
use basalt_common::Result;

use crate::config::{CompilerConfig, MemoryConfig};

/// Lowers the pseudo-code into target-specific output (data sections,
/// variable layout and init scripts included).
pub trait Transformer {
    fn transform(&self, config: &CompilerConfig, mem: &MemoryConfig, code: Vec<String>) -> Result<Vec<String>>;
}

/// Peephole pass over the transformed native code.
pub trait NativeOptimizer {
    fn optimize(&self, config: &CompilerConfig, code: Vec<String>) -> Result<Vec<String>>;
}

/// Inlines runtime calls the optimizer exposed as redundant.
pub trait Unlinker {
    fn unlink(&self, code: Vec<String>) -> Result<Vec<String>>;
}

/// Peephole pass over the assembled pseudo-code itself. Must not fuse
/// instructions across `NOP` markers.
pub trait PcodeOptimizer {
    fn optimize(&self, config: &CompilerConfig, code: Vec<String>) -> Result<Vec<String>>;
}

/// One target platform: a transformer plus its optional rewrite passes.
pub trait PlatformProvider {
    fn override_config(&self, _config: &mut CompilerConfig) {}
    fn transformer(&self) -> &dyn Transformer;
    fn optimizer(&self) -> Option<&dyn NativeOptimizer> { None }
    fn unlinker(&self) -> Option<&dyn Unlinker> { None }
    fn pcode_optimizer(&self) -> Option<&dyn PcodeOptimizer> { None }
}
