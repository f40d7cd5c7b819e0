use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

pub const DEFAULT_WEIGHTS_PATH: &str = "en_hi_weights.pt";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub weights_path: PathBuf,
    pub source_tokenizer_path: PathBuf,
    pub target_tokenizer_path: PathBuf,
    pub frontend_dir: PathBuf,
    pub max_output_tokens: usize,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
            weights_path: PathBuf::from(DEFAULT_WEIGHTS_PATH),
            source_tokenizer_path: PathBuf::from("models/en_tokenizer.json"),
            target_tokenizer_path: PathBuf::from("models/hi_tokenizer.json"),
            frontend_dir: PathBuf::from("frontend"),
            max_output_tokens: 64,
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = env::var("SERVER_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listen_addr);

        let weights_path = env::var("MODEL_WEIGHTS_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.weights_path);
        let source_tokenizer_path = env::var("SOURCE_TOKENIZER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.source_tokenizer_path);
        let target_tokenizer_path = env::var("TARGET_TOKENIZER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.target_tokenizer_path);
        let frontend_dir = env::var("FRONTEND_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.frontend_dir);

        let max_output_tokens = env::var("MAX_OUTPUT_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.max_output_tokens);

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            weights_path,
            source_tokenizer_path,
            target_tokenizer_path,
            frontend_dir,
            max_output_tokens,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }

    /// Path of the page served on `/`.
    pub fn index_page_path(&self) -> PathBuf {
        self.frontend_dir.join("index.html")
    }
}

#[cfg(feature = "tch-backend")]
pub(crate) fn parse_device(raw: &str) -> Device {
    let lower = raw.trim().to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA not available, using CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
