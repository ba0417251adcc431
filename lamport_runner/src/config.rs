// lamport_runner/src/config.rs
//! Immutable node configuration.
//!
//! A [`NodeConfig`] is built once by the launcher (CLI, cluster helper or a
//! test) and handed to [`crate::node::Node::bind`]. Nothing in the core reads
//! process-wide state except [`load_scheduler_tuning`], which the binaries
//! apply explicitly.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

pub const DEFAULT_CLOCK_RATE_MIN: u32 = 1;
pub const DEFAULT_CLOCK_RATE_MAX: u32 = 6;
pub const DEFAULT_IO_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// A peer's listening address as configured, host left unresolved.
///
/// Serializes as a `[host, port]` pair, which is the shape the log consumer
/// expects in SEND records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<(String, u16)> for PeerAddr {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<PeerAddr> for (String, u16) {
    fn from(peer: PeerAddr) -> Self {
        (peer.host, peer.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("peer '{}' is not in host:port form", s))?;
        let host = host.trim();
        if host.is_empty() {
            return Err(format!("peer '{}' has an empty host", s));
        }
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("peer '{}' has an invalid port: {}", s, e))?;
        Ok(Self::new(host, port))
    }
}

/// Parse a comma-separated `host:port` list. Blank entries are skipped.
pub fn parse_peer_list(raw: &str) -> Result<Vec<PeerAddr>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PeerAddr::from_str)
        .collect()
}

/// How the node picks its tick rate at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockRatePolicy {
    Fixed(u32),
    Uniform { min: u32, max: u32 },
}

impl Default for ClockRatePolicy {
    fn default() -> Self {
        ClockRatePolicy::Uniform {
            min: DEFAULT_CLOCK_RATE_MIN,
            max: DEFAULT_CLOCK_RATE_MAX,
        }
    }
}

impl ClockRatePolicy {
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match *self {
            ClockRatePolicy::Fixed(rate) => rate,
            ClockRatePolicy::Uniform { min, max } => rng.gen_range(min..=max),
        }
    }

    fn validate(&self) -> Result<(), NodeError> {
        match *self {
            ClockRatePolicy::Fixed(0) => Err(NodeError::InvalidConfig(
                "clock rate must be at least 1 tick/sec".into(),
            )),
            ClockRatePolicy::Uniform { min, max } if min == 0 || min > max => {
                Err(NodeError::InvalidConfig(format!(
                    "clock rate range {}..={} is empty or includes 0",
                    min, max
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Relative weights of the non-receive actions.
///
/// `per_peer` applies to each single-peer send, `all_peers` to the broadcast
/// action (offered only with two or more peers), `internal` to the no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionWeights {
    pub per_peer: u32,
    pub all_peers: u32,
    pub internal: u32,
}

impl Default for ActionWeights {
    fn default() -> Self {
        Self {
            per_peer: 1,
            all_peers: 1,
            internal: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub machine_id: u32,
    pub listen_host: IpAddr,
    pub listen_port: u16,
    pub peers: Vec<PeerAddr>,
    pub log_path: PathBuf,
    pub run_duration: Duration,
    pub clock_rate: ClockRatePolicy,
    pub action_weights: ActionWeights,
    /// Upper bound on any accept/read wait, so shutdown is observed promptly.
    pub io_poll_interval: Duration,
    /// Bound on each outbound connect and write.
    pub io_timeout: Duration,
    pub rng_seed: Option<u64>,
}

impl NodeConfig {
    pub fn new(
        machine_id: u32,
        listen_port: u16,
        peers: Vec<PeerAddr>,
        log_path: impl Into<PathBuf>,
        run_duration: Duration,
    ) -> Self {
        Self {
            machine_id,
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port,
            peers,
            log_path: log_path.into(),
            run_duration,
            clock_rate: ClockRatePolicy::default(),
            action_weights: ActionWeights::default(),
            io_poll_interval: DEFAULT_IO_POLL_INTERVAL,
            io_timeout: DEFAULT_IO_TIMEOUT,
            rng_seed: None,
        }
    }

    pub fn with_listen_host(mut self, host: IpAddr) -> Self {
        self.listen_host = host;
        self
    }

    pub fn with_clock_rate(mut self, policy: ClockRatePolicy) -> Self {
        self.clock_rate = policy;
        self
    }

    pub fn with_action_weights(mut self, weights: ActionWeights) -> Self {
        self.action_weights = weights;
        self
    }

    pub fn with_io_poll_interval(mut self, interval: Duration) -> Self {
        self.io_poll_interval = interval;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.machine_id == 0 {
            return Err(NodeError::InvalidConfig(
                "machine id must be a positive integer".into(),
            ));
        }
        if self.run_duration.is_zero() {
            return Err(NodeError::InvalidConfig(
                "run duration must be positive".into(),
            ));
        }
        if self.io_poll_interval.is_zero() || self.io_timeout.is_zero() {
            return Err(NodeError::InvalidConfig(
                "I/O poll interval and timeout must be positive".into(),
            ));
        }
        self.clock_rate.validate()
    }
}

/// Scheduler knobs that may be overridden from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTuning {
    pub weights: ActionWeights,
    pub clock_rate_min: u32,
    pub clock_rate_max: u32,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            weights: ActionWeights::default(),
            clock_rate_min: DEFAULT_CLOCK_RATE_MIN,
            clock_rate_max: DEFAULT_CLOCK_RATE_MAX,
        }
    }
}

impl SchedulerTuning {
    pub fn apply(&self, config: NodeConfig) -> NodeConfig {
        let config = config.with_action_weights(self.weights);
        match config.clock_rate {
            ClockRatePolicy::Fixed(_) => config,
            ClockRatePolicy::Uniform { .. } => config.with_clock_rate(ClockRatePolicy::Uniform {
                min: self.clock_rate_min,
                max: self.clock_rate_max,
            }),
        }
    }
}

fn env_or<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load_scheduler_tuning() -> SchedulerTuning {
    let defaults = SchedulerTuning::default();
    SchedulerTuning {
        weights: ActionWeights {
            per_peer: env_or("LAMPORT_WEIGHT_PER_PEER", defaults.weights.per_peer),
            all_peers: env_or("LAMPORT_WEIGHT_ALL_PEERS", defaults.weights.all_peers),
            internal: env_or("LAMPORT_WEIGHT_INTERNAL", defaults.weights.internal),
        },
        clock_rate_min: env_or("LAMPORT_CLOCK_RATE_MIN", defaults.clock_rate_min),
        clock_rate_max: env_or("LAMPORT_CLOCK_RATE_MAX", defaults.clock_rate_max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_peer_list() {
        let peers = parse_peer_list("localhost:5002, 10.0.0.3:5003,,").unwrap();
        assert_eq!(
            peers,
            vec![PeerAddr::new("localhost", 5002), PeerAddr::new("10.0.0.3", 5003)]
        );
        assert!(parse_peer_list("").unwrap().is_empty());
        assert!(parse_peer_list("localhost").is_err());
        assert!(parse_peer_list("localhost:99999").is_err());
        assert!(parse_peer_list(":5000").is_err());
    }

    #[test]
    fn test_peer_addr_serializes_as_pair() {
        let json = serde_json::to_string(&PeerAddr::new("localhost", 5002)).unwrap();
        assert_eq!(json, r#"["localhost",5002]"#);
        let back: PeerAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PeerAddr::new("localhost", 5002));
    }

    #[test]
    fn test_uniform_rate_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let policy = ClockRatePolicy::default();
        for _ in 0..1000 {
            let rate = policy.resolve(&mut rng);
            assert!((DEFAULT_CLOCK_RATE_MIN..=DEFAULT_CLOCK_RATE_MAX).contains(&rate));
        }
        assert_eq!(ClockRatePolicy::Fixed(4).resolve(&mut rng), 4);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = NodeConfig::new(1, 5001, vec![], "m.log", Duration::from_secs(1));
        assert!(base.validate().is_ok());

        let mut zero_id = base.clone();
        zero_id.machine_id = 0;
        assert!(zero_id.validate().is_err());

        let mut no_time = base.clone();
        no_time.run_duration = Duration::ZERO;
        assert!(no_time.validate().is_err());

        let zero_rate = base.clone().with_clock_rate(ClockRatePolicy::Fixed(0));
        assert!(zero_rate.validate().is_err());

        let inverted = base
            .clone()
            .with_clock_rate(ClockRatePolicy::Uniform { min: 5, max: 2 });
        assert!(inverted.validate().is_err());

        let no_poll = base.with_io_poll_interval(Duration::ZERO);
        assert!(no_poll.validate().is_err());
    }

    #[test]
    fn test_tuning_keeps_fixed_rate() {
        let tuning = SchedulerTuning {
            weights: ActionWeights {
                per_peer: 2,
                all_peers: 0,
                internal: 3,
            },
            clock_rate_min: 2,
            clock_rate_max: 3,
        };
        let fixed = NodeConfig::new(1, 0, vec![], "m.log", Duration::from_secs(1))
            .with_clock_rate(ClockRatePolicy::Fixed(6));
        let tuned = tuning.apply(fixed);
        assert_eq!(tuned.clock_rate, ClockRatePolicy::Fixed(6));
        assert_eq!(tuned.action_weights, tuning.weights);

        let random = NodeConfig::new(1, 0, vec![], "m.log", Duration::from_secs(1));
        assert_eq!(
            tuning.apply(random).clock_rate,
            ClockRatePolicy::Uniform { min: 2, max: 3 }
        );
    }
}
