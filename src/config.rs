use std::time::Duration;
use anyhow::bail;


#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// A connection that neither wrote nor read a packet for this long writes a heartbeat (an
    ///  empty packet). Every packet written or read restarts the period.
    ///
    /// NB: This is not a read or write deadline - slow I/O does not time out because of it
    pub keep_alive_timeout: Duration,

    /// Upper bound for a packet's payload. A length prefix above this is treated as a corrupted
    ///  stream on the receiving side, and writing a longer packet is rejected before any bytes
    ///  go on the wire.
    pub max_packet_len: usize,

    /// bound for a single TCP connect attempt
    pub connect_timeout: Duration,

    pub tcp_nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    pub fn new() -> TransportConfig {
        TransportConfig {
            keep_alive_timeout: Duration::from_secs(5),
            max_packet_len: 16*1024*1024,
            connect_timeout: Duration::from_secs(5),
            tcp_nodelay: true,
        }
    }

    pub fn with_keep_alive_timeout(keep_alive_timeout: Duration) -> TransportConfig {
        TransportConfig {
            keep_alive_timeout,
            ..Self::new()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keep_alive_timeout.is_zero() {
            bail!("keep alive timeout must be positive");
        }
        if self.connect_timeout.is_zero() {
            bail!("connect timeout must be positive");
        }
        if self.max_packet_len == 0 {
            bail!("max packet length must be positive");
        }
        // the length prefix is a signed 32 bit number
        if self.max_packet_len > i32::MAX as usize {
            bail!("max packet length {} does not fit the length prefix", self.max_packet_len);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransportConfig::new();
        assert_eq!(config.keep_alive_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_keep_alive(TransportConfig { keep_alive_timeout: Duration::ZERO, ..TransportConfig::new() })]
    #[case::zero_connect_timeout(TransportConfig { connect_timeout: Duration::ZERO, ..TransportConfig::new() })]
    #[case::zero_packet_len(TransportConfig { max_packet_len: 0, ..TransportConfig::new() })]
    #[case::packet_len_overflow(TransportConfig { max_packet_len: i32::MAX as usize + 1, ..TransportConfig::new() })]
    fn test_validate_rejects(#[case] config: TransportConfig) {
        assert!(config.validate().is_err());
    }
}
