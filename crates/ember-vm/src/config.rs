use serde::Deserialize;

use ember_core::EmberError;

pub const DEFAULT_STACK_SIZE: usize = 2048;
pub const DEFAULT_MAX_FRAMES: usize = 1024;
pub const DEFAULT_GLOBALS_SIZE: usize = 65536;

/// Resource ceilings for one VM instance, fixed at construction.
///
/// Hosts can keep these in their own config file:
///
/// ```toml
/// stack_size = 4096
/// max_frames = 256
/// max_steps = 1_000_000
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmLimits {
    /// Operand stack slots.
    pub stack_size: usize,
    /// Call depth, the base frame included.
    pub max_frames: usize,
    pub globals_size: usize,
    /// Instructions executed per run before aborting. Zero means unbounded.
    pub max_steps: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        VmLimits {
            stack_size: DEFAULT_STACK_SIZE,
            max_frames: DEFAULT_MAX_FRAMES,
            globals_size: DEFAULT_GLOBALS_SIZE,
            max_steps: 0,
        }
    }
}

impl VmLimits {
    pub fn with_stack_size(mut self, n: usize) -> Self {
        self.stack_size = n;
        self
    }

    pub fn with_max_frames(mut self, n: usize) -> Self {
        self.max_frames = n;
        self
    }

    pub fn with_globals_size(mut self, n: usize) -> Self {
        self.globals_size = n;
        self
    }

    pub fn with_max_steps(mut self, n: usize) -> Self {
        self.max_steps = n;
        self
    }

    /// Parse limits from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, EmberError> {
        let limits: VmLimits =
            toml::from_str(src).map_err(|e| EmberError::Config(e.to_string()))?;
        if limits.max_frames == 0 {
            return Err(EmberError::Config(
                "max_frames must be at least 1".to_string(),
            ));
        }
        Ok(limits)
    }
}
