//! Compiler and memory configuration for the backend pipeline

/// Toggles the driving pipeline honors when invoking the platform stages.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Run the platform's native-code optimizer after transformation.
    pub native_optimizations: bool,
    /// Run the platform's unlink pass on the optimized output.
    pub optimized_linker: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self { native_optimizations: true, optimized_linker: false }
    }
}

/// Memory layout bounds handed to the platform transformer. Unset fields keep
/// the platform's defaults.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    pub variable_start: Option<u32>,
    pub string_end: Option<u32>,
    pub program_start: Option<u32>,
    pub runtime_start: Option<u32>,
}

impl MemoryConfig {
    /// String memory must not end below the variable memory start.
    pub fn is_valid(&self) -> bool {
        match (self.variable_start, self.string_end) {
            (Some(vars), Some(strings)) => strings >= vars,
            _ => true,
        }
    }
}
