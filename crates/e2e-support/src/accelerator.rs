use std::fmt;

use crate::config::TestConfig;

/// Hardware the training job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Cpu,
    Nvidia,
    Amd,
}

impl Accelerator {
    /// Value handed to the training script through the `ACCELERATOR` variable.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Nvidia | Self::Amd => "gpu",
        }
    }

    /// Extended resource name the device plugin advertises, if any.
    pub const fn resource_label(self) -> Option<&'static str> {
        match self {
            Self::Cpu => None,
            Self::Nvidia => Some("nvidia.com/gpu"),
            Self::Amd => Some("amd.com/gpu"),
        }
    }

    pub const fn is_gpu(self) -> bool {
        self.resource_label().is_some()
    }

    pub fn ray_image(self, config: &TestConfig) -> &str {
        match self {
            Self::Amd => &config.ray_rocm_image,
            Self::Cpu | Self::Nvidia => &config.ray_image,
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resource_label() {
            Some(label) => write!(f, "{} ({label})", self.type_name()),
            None => f.write_str(self.type_name()),
        }
    }
}
