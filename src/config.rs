use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser};

use crate::{
    allocator,
    cidr::AddressBlock,
    status::{StatusNormalizer, UnknownStatusLevel},
};

/// Settings for a launcher, meant to be flattened into the embedding
/// binary's own command line.
#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long = "stack-api-url",
        env = "FORMATION_STACK_API_URL",
        value_name = "URL",
        default_value = "http://127.0.0.1:9090"
    )]
    pub stack_api_url: String,

    #[arg(
        long = "base-network",
        env = "FORMATION_BASE_NETWORK",
        value_name = "CIDR",
        default_value = "10.0.0.0/16",
        value_parser = parse_base_network
    )]
    pub base_network: AddressBlock,

    #[arg(
        long = "subnet-divisions",
        env = "FORMATION_SUBNET_DIVISIONS",
        value_name = "N",
        default_value_t = 3,
        value_parser = clap::value_parser!(u8).range(0..=4)
    )]
    pub subnet_divisions: u8,

    #[arg(
        long = "template-dir",
        env = "FORMATION_TEMPLATE_DIR",
        value_name = "PATH",
        default_value = "./formation"
    )]
    pub template_dir: PathBuf,

    #[arg(
        long = "list-timeout-secs",
        env = "FORMATION_LIST_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub list_timeout_secs: u64,

    #[arg(
        long = "create-timeout-secs",
        env = "FORMATION_CREATE_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub create_timeout_secs: u64,

    #[arg(
        long = "launch-max-attempts",
        env = "FORMATION_LAUNCH_MAX_ATTEMPTS",
        value_name = "N",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=10)
    )]
    pub launch_max_attempts: u32,

    #[arg(
        long = "unknown-status-level",
        env = "FORMATION_UNKNOWN_STATUS_LEVEL",
        value_name = "LEVEL",
        default_value = "warn",
        value_enum
    )]
    pub unknown_status_level: UnknownStatusLevel,
}

#[derive(Parser, Debug)]
#[command(name = "formation", version = crate::version::VERSION)]
struct Standalone {
    #[command(flatten)]
    config: Config,
}

impl Config {
    /// Reads the `FORMATION_*` environment, falling back to defaults.
    pub fn from_env() -> Result<Self, clap::Error> {
        Self::try_parse_from(["formation"])
    }

    /// Parses `args` as a standalone command line (`args[0]` is the program
    /// name).
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Standalone::try_parse_from(args).map(|s| s.config)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    pub fn status_normalizer(&self) -> StatusNormalizer {
        StatusNormalizer::new(self.unknown_status_level)
    }
}

fn parse_base_network(raw: &str) -> Result<AddressBlock, String> {
    let block: AddressBlock = raw.parse().map_err(|e| format!("{e}"))?;
    allocator::candidates(&block).map_err(|e| format!("{e}"))?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply_when_flags_absent() {
        let config = Config::try_parse_from(["formation"]).unwrap();
        assert_eq!(config.stack_api_url, "http://127.0.0.1:9090");
        assert_eq!(config.base_network.to_string(), "10.0.0.0/16");
        assert_eq!(config.subnet_divisions, 3);
        assert_eq!(config.template_dir, PathBuf::from("./formation"));
        assert_eq!(config.list_timeout(), Duration::from_secs(10));
        assert_eq!(config.create_timeout(), Duration::from_secs(30));
        assert_eq!(config.launch_max_attempts, 3);
        assert_eq!(config.unknown_status_level, UnknownStatusLevel::Warn);
    }

    #[test]
    fn base_network_is_normalized() {
        let config =
            Config::try_parse_from(["formation", "--base-network", "172.16.9.9/16"]).unwrap();
        assert_eq!(config.base_network.to_string(), "172.16.0.0/16");
    }

    #[test]
    fn rejects_invalid_base_network() {
        for bad in [
            "10.0.0.0",
            "10.0.0.0/8",
            "10.0.0.0/23",
            "10.0.0.0/24",
            "not-a-network",
        ] {
            let err = Config::try_parse_from(["formation", "--base-network", bad]).unwrap_err();
            assert!(err.to_string().contains("--base-network"), "{bad}");
        }
    }

    #[test]
    fn smallest_accepted_base_network_leaves_usable_blocks() {
        let config =
            Config::try_parse_from(["formation", "--base-network", "10.0.0.0/22"]).unwrap();
        assert_eq!(allocator::candidates(&config.base_network).unwrap().len(), 2);
    }

    #[test]
    fn rejects_invalid_subnet_divisions() {
        let err = Config::try_parse_from(["formation", "--subnet-divisions", "5"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--subnet-divisions"));
        assert!(msg.contains("0..=4"));
    }

    #[test]
    fn rejects_invalid_list_timeout_secs() {
        let err = Config::try_parse_from(["formation", "--list-timeout-secs", "0"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--list-timeout-secs"));
        assert!(msg.contains("1..=300"));
    }

    #[test]
    fn rejects_invalid_create_timeout_secs() {
        let err =
            Config::try_parse_from(["formation", "--create-timeout-secs", "301"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--create-timeout-secs"));
        assert!(msg.contains("1..=300"));
    }

    #[test]
    fn rejects_invalid_launch_max_attempts() {
        let err =
            Config::try_parse_from(["formation", "--launch-max-attempts", "0"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--launch-max-attempts"));
        assert!(msg.contains("1..=10"));
    }

    #[test]
    fn parses_unknown_status_level() {
        let config =
            Config::try_parse_from(["formation", "--unknown-status-level", "error"]).unwrap();
        assert_eq!(config.unknown_status_level, UnknownStatusLevel::Error);
        assert!(
            Config::try_parse_from(["formation", "--unknown-status-level", "loud"]).is_err()
        );
    }
}
