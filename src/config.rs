//! Render core configuration and capacity constants.

/// Number of frames that can be recorded ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Fence wait timeout in nanoseconds. Waits loop on timeout instead of failing.
pub const DEFAULT_FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Default number of elements reserved for a bindless descriptor.
pub const DEFAULT_MAX_BINDLESS_RESOURCES: u32 = 4096;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Byte budgets for each shader-data array.
///
/// The element capacity of an array is `budget / size_of::<T>()`. Shaders index
/// these arrays with the same stride, so changing a budget or a struct size
/// requires a matching shader change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderDataBudgets {
    pub scenes: usize,
    pub cameras: usize,
    pub materials: usize,
    pub entities: usize,
    pub lights: usize,
    pub skeletons: usize,
    pub shadow_maps: usize,
    pub env_probes: usize,
    pub env_grids: usize,
}

impl Default for ShaderDataBudgets {
    fn default() -> Self {
        Self {
            scenes: 64 * KIB,
            cameras: 64 * KIB,
            materials: 8 * MIB,
            entities: 32 * MIB,
            lights: 64 * KIB,
            skeletons: 8 * MIB,
            shadow_maps: 64 * KIB,
            env_probes: 256 * KIB,
            env_grids: 64 * KIB,
        }
    }
}

impl ShaderDataBudgets {
    /// Budgets scaled down for tests and tools that never fill the arrays.
    pub fn small() -> Self {
        Self {
            scenes: 4 * KIB,
            cameras: 4 * KIB,
            materials: 16 * KIB,
            entities: 64 * KIB,
            lights: 4 * KIB,
            skeletons: 64 * KIB,
            shadow_maps: 4 * KIB,
            env_probes: 4 * KIB,
            env_grids: 4 * KIB,
        }
    }
}

/// Configuration for initializing the render core.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable vsync (FIFO presentation).
    pub vsync: bool,
    /// Enable the Khronos validation layer when it is available.
    pub validation: bool,
    /// Enable ray tracing support (acceleration structures).
    pub raytracing: bool,
    /// Enable bindless (variable count, update-after-bind) descriptors.
    pub bindless: bool,
    /// Number of elements reserved for each bindless descriptor.
    pub max_bindless_resources: u32,
    /// Maximum number of sets allocated from one backend descriptor pool.
    pub descriptor_pool_max_sets: u32,
    /// Descriptors of each type reserved in one backend descriptor pool.
    pub descriptor_pool_size_per_type: u32,
    /// How many times the descriptor pool may grow before allocation fails.
    pub descriptor_pool_growth_limit: u32,
    /// Timeout used for each fence wait iteration.
    pub fence_timeout_ns: u64,
    /// Byte budgets for shader-data arrays.
    pub shader_data_budgets: ShaderDataBudgets,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: "render-core".to_string(),
            vsync: true,
            validation: cfg!(debug_assertions),
            raytracing: false,
            bindless: true,
            max_bindless_resources: DEFAULT_MAX_BINDLESS_RESOURCES,
            descriptor_pool_max_sets: 1000,
            descriptor_pool_size_per_type: 1000,
            descriptor_pool_growth_limit: 8,
            fence_timeout_ns: DEFAULT_FENCE_TIMEOUT_NS,
            shader_data_budgets: ShaderDataBudgets::default(),
        }
    }
}

impl RenderConfig {
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_raytracing(mut self, raytracing: bool) -> Self {
        self.raytracing = raytracing;
        self
    }

    pub fn with_bindless(mut self, bindless: bool) -> Self {
        self.bindless = bindless;
        self
    }

    pub fn with_max_bindless_resources(mut self, count: u32) -> Self {
        self.max_bindless_resources = count;
        self
    }

    pub fn with_descriptor_pool_limits(mut self, max_sets: u32, size_per_type: u32) -> Self {
        self.descriptor_pool_max_sets = max_sets;
        self.descriptor_pool_size_per_type = size_per_type;
        self
    }

    pub fn with_descriptor_pool_growth_limit(mut self, limit: u32) -> Self {
        self.descriptor_pool_growth_limit = limit;
        self
    }

    pub fn with_fence_timeout_ns(mut self, timeout: u64) -> Self {
        self.fence_timeout_ns = timeout;
        self
    }

    pub fn with_shader_data_budgets(mut self, budgets: ShaderDataBudgets) -> Self {
        self.shader_data_budgets = budgets;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let budgets = ShaderDataBudgets::default();
        assert_eq!(budgets.entities, 32 * 1024 * 1024);
        assert_eq!(budgets.materials, 8 * 1024 * 1024);
        assert_eq!(budgets.lights, 64 * 1024);
    }

    #[test]
    fn test_builder() {
        let config = RenderConfig::default()
            .with_vsync(false)
            .with_raytracing(true)
            .with_max_bindless_resources(128);
        assert!(!config.vsync);
        assert!(config.raytracing);
        assert_eq!(config.max_bindless_resources, 128);
    }
}
