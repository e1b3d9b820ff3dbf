//! Bridge configuration

/// Minimum datagram size every IPv4 host must accept.
const MIN_BUFFER_SIZE: usize = 576;

/// Configuration for a TUN-to-TCP bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Requested device name (e.g., "streamtun"); the kernel may assign
    /// a different one, reported back after creation
    pub device_name: String,

    /// Remote host to connect to; ignored in listener mode
    pub host: Option<String>,

    /// TCP port to connect to or listen on
    pub port: u16,

    /// Accept one inbound connection instead of dialing out
    pub listener: bool,

    /// Congestion control algorithm to request on each connection
    pub congestion: Option<String>,

    /// Capacity of each endpoint buffer, in bytes
    pub buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_name: "streamtun".to_string(),
            host: None,
            port: crate::DEFAULT_PORT,
            listener: false,
            congestion: None,
            buffer_size: crate::BUFFER_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Create a config for the named device
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            ..Default::default()
        }
    }

    /// Set the remote host
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the TCP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable listener mode
    pub fn with_listener(mut self, listener: bool) -> Self {
        self.listener = listener;
        self
    }

    /// Request a congestion control algorithm by name
    pub fn with_congestion(mut self, algo: &str) -> Self {
        self.congestion = Some(algo.to_string());
        self
    }

    /// Override the endpoint buffer capacity
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.listener && self.host.is_none() {
            return Err("A remote host is required unless running as listener".into());
        }

        if self.port == 0 {
            return Err("Port must be non-zero".into());
        }

        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(format!(
                "Buffer size {} is below the minimum of {} bytes",
                self.buffer_size, MIN_BUFFER_SIZE
            ));
        }

        if let Some(algo) = &self.congestion {
            if algo.is_empty() || algo.len() > 16 {
                return Err(format!(
                    "Congestion algorithm name '{}' is not a plausible kernel identifier",
                    algo
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_host_or_listener() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_err());
        assert!(config.clone().with_listener(true).validate().is_ok());
        assert!(config.with_host("198.51.100.7").validate().is_ok());
    }

    #[test]
    fn test_builders_populate_fields() {
        let config = BridgeConfig::new("tun9")
            .with_host("peer.example")
            .with_port(9000)
            .with_congestion("bbr")
            .with_buffer_size(64 * 1024);
        assert_eq!(config.device_name, "tun9");
        assert_eq!(config.host.as_deref(), Some("peer.example"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.congestion.as_deref(), Some("bbr"));
        assert_eq!(config.buffer_size, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_undersized_buffer_rejected() {
        let config = BridgeConfig::new("tun0")
            .with_listener(true)
            .with_buffer_size(128);
        let err = config.validate().unwrap_err();
        assert!(err.contains("128"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let config = BridgeConfig::new("tun0").with_listener(true).with_port(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlong_congestion_name_rejected() {
        let config = BridgeConfig::new("tun0")
            .with_listener(true)
            .with_congestion("a-very-long-algorithm-name");
        assert!(config.validate().is_err());
    }
}
