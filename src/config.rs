use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::{self, prelude::*};
use std::time::Duration;

/// 单个请求的解析参数。
///
/// 由处理器在 `resolve_settings` 中按请求给出，创建后不可变，
/// 显式地传入请求体分发与 multipart 解码的每一步。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    #[serde(default = "default_true")]
    allow_body: bool,
    #[serde(default = "default_true")]
    allow_multipart: bool,
    #[serde(default = "default_memory_threshold")]
    memory_threshold: usize,
    #[serde(default = "default_scan_buffer_size")]
    scan_buffer_size: usize,
    #[serde(default = "default_max_simple_body_size")]
    max_simple_body_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_memory_threshold() -> usize {
    1048576 // 1MB
}

fn default_scan_buffer_size() -> usize {
    16384 // 16KB
}

fn default_max_simple_body_size() -> usize {
    2097152 // 2MB
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_body: true,
            allow_multipart: true,
            memory_threshold: default_memory_threshold(),
            scan_buffer_size: default_scan_buffer_size(),
            max_simple_body_size: default_max_simple_body_size(),
        }
    }
}

impl Settings {
    pub fn with_allow_body(mut self, allow: bool) -> Self {
        self.allow_body = allow;
        self
    }

    pub fn with_allow_multipart(mut self, allow: bool) -> Self {
        self.allow_multipart = allow;
        self
    }

    pub fn with_memory_threshold(mut self, bytes: usize) -> Self {
        self.memory_threshold = bytes;
        self
    }

    pub fn with_scan_buffer_size(mut self, bytes: usize) -> Self {
        self.scan_buffer_size = bytes;
        self
    }

    pub fn with_max_simple_body_size(mut self, bytes: usize) -> Self {
        self.max_simple_body_size = bytes;
        self
    }

    pub fn allow_body(&self) -> bool {
        self.allow_body
    }

    pub fn allow_multipart(&self) -> bool {
        self.allow_multipart
    }

    pub fn memory_threshold(&self) -> usize {
        self.memory_threshold
    }

    pub fn scan_buffer_size(&self) -> usize {
        self.scan_buffer_size
    }

    pub fn max_simple_body_size(&self) -> usize {
        self.max_simple_body_size
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    port: u16,
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    parsing: Settings,
}

fn default_max_connections() -> usize {
    1024
}

fn default_timeout_ms() -> u64 {
    30000
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: 7878,
            local: true,
            worker_threads: num_cpus::get(),
            max_connections: default_max_connections(),
            timeout_ms: default_timeout_ms(),
            parsing: Settings::default(),
        }
    }

    pub fn from_toml(filename: &str) -> io::Result<Self> {
        let mut file = File::open(filename)?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)?;
        Ok(Self::parse(&str_val))
    }

    /// 解析 TOML 文本。内容非法时记录错误并退回默认配置。
    pub fn parse(text: &str) -> Self {
        let mut raw_config: Config = match toml::from_str(text) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.max_connections == 0 {
            warn!("max_connections被设置为0，这会让服务器无法接受任何连接，因此该值将被改为1024。");
            raw_config.max_connections = default_max_connections();
        }
        raw_config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// 每个连接阶段的默认截止时间，`timeout_ms = 0` 表示不设限。
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn settings(&self) -> Settings {
        self.parsing
    }
}
