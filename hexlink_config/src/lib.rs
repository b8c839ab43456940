//! 配置管理系统
//!
//! 提供服务器、会话和握手配置，支持 TOML 文件与环境变量覆盖。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 解析错误
    #[error("解析配置文件失败: {0}")]
    Parse(String),

    /// 验证错误
    #[error("配置验证失败: {0}")]
    Validation(String),

    /// 环境变量错误
    #[error("环境变量解析失败: {0}")]
    EnvVar(String),
}

/// 配置 Result 类型
pub type Result<T> = std::result::Result<T, ConfigError>;

/// 传输协议
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// 面向流的 TCP
    Tcp,
    /// 无连接的 UDP（需要握手）
    Udp,
}

impl Protocol {
    /// 是否为无连接协议
    pub fn is_connectionless(&self) -> bool {
        matches!(self, Protocol::Udp)
    }
}

impl std::str::FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(ConfigError::Parse(format!("未知协议: {}", other))),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// 服务器配置
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 绑定地址
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// 监听端口（0 表示由系统分配）
    #[serde(default = "default_port")]
    pub port: u16,

    /// 传输协议
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,

    /// 最大会话数限制
    #[serde(default)]
    pub max_connections: Option<u32>,

    /// 心跳检查间隔（秒）
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// 心跳超时时间（秒），None 表示不检测
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: Option<u64>,
}

/// 会话配置
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 发送队列容量，溢出时丢弃最旧的消息
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// 接收缓冲区大小
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,

    /// 不可发送时的退避时间（毫秒）
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: u64,

    /// 最大帧长度（含长度前缀之后的全部字节）
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// 握手配置（仅无连接协议）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// 每一轮等待响应的超时时间（毫秒）
    #[serde(default = "default_handshake_timeout")]
    pub timeout_ms: u64,

    /// 初始帧的重发次数
    #[serde(default = "default_handshake_retries")]
    pub retries: u32,
}

/// 聚合配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HexlinkConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 会话配置
    #[serde(default)]
    pub session: SessionConfig,
    /// 握手配置
    #[serde(default)]
    pub handshake: HandshakeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            protocol: default_protocol(),
            max_connections: None,
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: default_send_queue_capacity(),
            receive_buffer_size: default_receive_buffer_size(),
            idle_backoff_ms: default_idle_backoff(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_handshake_timeout(),
            retries: default_handshake_retries(),
        }
    }
}

impl ServerConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("读取配置文件失败: {}", e)))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(format!("解析配置文件失败: {}", e)))
    }

    /// 从环境变量加载配置并覆盖
    ///
    /// 支持的环境变量：
    /// - HEXLINK_BIND_ADDRESS: 绑定地址
    /// - HEXLINK_PORT: 端口
    /// - HEXLINK_PROTOCOL: 传输协议 (tcp/udp)
    /// - HEXLINK_MAX_CONNECTIONS: 最大会话数
    /// - HEXLINK_HEARTBEAT_TIMEOUT_SECS: 心跳超时（秒）
    pub fn load_with_env_override(mut self) -> Result<Self> {
        if let Ok(addr) = std::env::var("HEXLINK_BIND_ADDRESS") {
            self.bind_address = addr;
        }

        if let Ok(port_str) = std::env::var("HEXLINK_PORT") {
            self.port = port_str
                .parse()
                .map_err(|_| ConfigError::EnvVar("HEXLINK_PORT 必须是有效的 u16 数字".to_string()))?;
        }

        if let Ok(protocol) = std::env::var("HEXLINK_PROTOCOL") {
            self.protocol = protocol
                .parse()
                .map_err(|_| ConfigError::EnvVar("HEXLINK_PROTOCOL 必须是 tcp 或 udp".to_string()))?;
        }

        if let Ok(max_conn) = std::env::var("HEXLINK_MAX_CONNECTIONS") {
            self.max_connections = Some(max_conn.parse().map_err(|_| {
                ConfigError::EnvVar("HEXLINK_MAX_CONNECTIONS 必须是有效的 u32 数字".to_string())
            })?);
        }

        if let Ok(timeout) = std::env::var("HEXLINK_HEARTBEAT_TIMEOUT_SECS") {
            self.heartbeat_timeout_secs = Some(timeout.parse().map_err(|_| {
                ConfigError::EnvVar("HEXLINK_HEARTBEAT_TIMEOUT_SECS 必须是有效的 u64 数字".to_string())
            })?);
        }

        Ok(self)
    }

    /// 从文件加载并应用环境变量覆盖
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file(path)?.load_with_env_override()
    }

    /// 验证配置是否有效
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.is_empty() {
            return Err(ConfigError::Validation("绑定地址不能为空".to_string()));
        }

        if let Some(max_conn) = self.max_connections {
            if max_conn == 0 {
                return Err(ConfigError::Validation("最大连接数不能为 0".to_string()));
            }
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Validation("心跳检查间隔不能为 0".to_string()));
        }

        if let Some(timeout) = self.heartbeat_timeout_secs {
            if timeout < self.heartbeat_interval_secs {
                return Err(ConfigError::Validation("心跳超时不能小于检查间隔".to_string()));
            }
        }

        Ok(())
    }

    /// 获取完整的绑定地址字符串
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// 心跳检查间隔
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// 心跳超时时间
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_secs.map(Duration::from_secs)
    }

    /// 获取配置摘要信息
    pub fn summary(&self) -> String {
        format!(
            "Hexlink 服务器配置:\n  地址: {}\n  协议: {}\n  最大连接数: {:?}\n  心跳超时: {:?}",
            self.bind_addr(),
            self.protocol,
            self.max_connections,
            self.heartbeat_timeout_secs
        )
    }
}

impl SessionConfig {
    /// 验证配置是否有效
    pub fn validate(&self) -> Result<()> {
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::Validation("发送队列容量不能为 0".to_string()));
        }

        if self.receive_buffer_size < 8 {
            return Err(ConfigError::Validation("接收缓冲区过小".to_string()));
        }

        // 长度前缀为 u16
        if self.max_frame_size == 0 || self.max_frame_size > u16::MAX as usize {
            return Err(ConfigError::Validation(format!(
                "最大帧长度必须在 1..={} 之间",
                u16::MAX
            )));
        }

        Ok(())
    }

    /// 不可发送时的退避时间
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

impl HandshakeConfig {
    /// 每一轮的超时时间
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl HexlinkConfig {
    /// 从 TOML 文件加载全部配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// 应用环境变量覆盖（作用于服务器部分）
    pub fn load_with_env_override(mut self) -> Result<Self> {
        self.server = self.server.load_with_env_override()?;
        Ok(self)
    }

    /// 验证全部配置
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.session.validate()?;
        if self.handshake.timeout_ms == 0 {
            return Err(ConfigError::Validation("握手超时不能为 0".to_string()));
        }
        Ok(())
    }
}

// 默认值函数
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_heartbeat_timeout() -> Option<u64> {
    Some(60)
}

fn default_send_queue_capacity() -> usize {
    1024
}

fn default_receive_buffer_size() -> usize {
    64 * 1024
}

fn default_idle_backoff() -> u64 {
    1
}

fn default_max_frame_size() -> usize {
    u16::MAX as usize
}

fn default_handshake_timeout() -> u64 {
    3000
}

fn default_handshake_retries() -> u32 {
    3
}
