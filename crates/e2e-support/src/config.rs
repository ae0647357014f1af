use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use error_stack::ResultExt;

use crate::error::SupportError;
use crate::error::SupportResult;

pub const DEFAULT_RAY_VERSION: &str = "2.35.0";
pub const DEFAULT_RAY_IMAGE: &str = "quay.io/modh/ray:2.35.0-py311-cu121";
pub const DEFAULT_RAY_ROCM_IMAGE: &str = "quay.io/modh/ray:2.35.0-py311-rocm61";
pub const DEFAULT_PIP_INDEX_URL: &str = "https://pypi.python.org/simple";

/// Settings for a test run, read from the environment.
///
/// Every field has a `CODEFLARE_TEST_*` (or conventional) variable; the long
/// flags only exist so the same definition can be exercised from unit tests.
#[derive(Parser, Debug, Clone)]
#[command(name = "e2e", about = "MNIST RayJob end-to-end test settings")]
pub struct TestConfig {
    #[arg(long, env = "CODEFLARE_TEST_RAY_VERSION", default_value = DEFAULT_RAY_VERSION)]
    pub ray_version: String,

    #[arg(long, env = "CODEFLARE_TEST_RAY_IMAGE", default_value = DEFAULT_RAY_IMAGE)]
    pub ray_image: String,

    #[arg(
        long,
        env = "CODEFLARE_TEST_RAY_ROCM_IMAGE",
        default_value = DEFAULT_RAY_ROCM_IMAGE,
        help = "Ray image used for AMD (ROCm) accelerators"
    )]
    pub ray_rocm_image: String,

    #[arg(
        long,
        env = "MNIST_DATASET_URL",
        default_value = "",
        help = "Mirror for the MNIST dataset, empty to download from the default location"
    )]
    pub mnist_dataset_url: String,

    #[arg(long, env = "PIP_INDEX_URL", default_value = DEFAULT_PIP_INDEX_URL)]
    pub pip_index_url: String,

    #[arg(long, env = "PIP_TRUSTED_HOST", default_value = "")]
    pub pip_trusted_host: String,

    #[arg(
        long,
        env = "CODEFLARE_TEST_TIMEOUT_SHORT",
        default_value = "1m",
        value_parser = humantime::parse_duration
    )]
    pub timeout_short: Duration,

    #[arg(
        long,
        env = "CODEFLARE_TEST_TIMEOUT_MEDIUM",
        default_value = "2m",
        value_parser = humantime::parse_duration
    )]
    pub timeout_medium: Duration,

    #[arg(
        long,
        env = "CODEFLARE_TEST_TIMEOUT_LONG",
        default_value = "5m",
        value_parser = humantime::parse_duration
    )]
    pub timeout_long: Duration,

    #[arg(
        long,
        env = "CODEFLARE_TEST_POLL_INTERVAL",
        default_value = "2s",
        value_parser = humantime::parse_duration
    )]
    pub poll_interval: Duration,

    #[arg(
        long,
        env = "CODEFLARE_TEST_OUTPUT_DIR",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory for collected logs, defaults to <tmp>/codeflare-e2e"
    )]
    pub output_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "CODEFLARE_TEST_KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Kubeconfig to use instead of the inferred one"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "CODEFLARE_TEST_BEARER_TOKEN",
        hide_env_values = true,
        help = "Token sent to the Ray dashboard when it sits behind an OAuth proxy"
    )]
    pub bearer_token: Option<String>,
}

impl TestConfig {
    /// Read the configuration from environment variables only.
    pub fn from_env() -> SupportResult<Self> {
        Self::try_parse_from([env!("CARGO_PKG_NAME")]).change_context(
            SupportError::Configuration {
                message: "invalid end-to-end test settings in environment".to_string(),
            },
        )
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("codeflare-e2e"))
    }
}
