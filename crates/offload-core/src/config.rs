use std::path::PathBuf;

pub const DEFAULT_KERNEL_PATH: &str = "./vector_ops_ocl.cl";
pub const DEFAULT_ENTRY_POINT: &str = "vector_add_ocl";

/// Where the kernel comes from and how it is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub kernel_path: PathBuf,
    pub entry_point: String,
    pub build_options: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            build_options: String::new(),
        }
    }
}

impl PipelineConfig {
    pub fn with_kernel_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kernel_path = path.into();
        self
    }

    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = name.into();
        self
    }

    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = options.into();
        self
    }
}
