use std::{
    sync::Arc,
    time::{Duration, UNIX_EPOCH},
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use leaseflake::{BitRange, Pattern, TWITTER_EPOCH, WaitMethod};

/// Command-line arguments for the `leaseflake` binary.
///
/// The ID layout defaults to the classic Twitter pattern. Every layout and
/// node option can also come from the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "leaseflake",
    version,
    about = "Mint and decode Snowflake-style IDs"
)]
pub struct CliArgs {
    /// Custom epoch in milliseconds since the UNIX epoch.
    ///
    /// Environment variable: `LEASEFLAKE_EPOCH_MS`
    #[arg(long, env = "LEASEFLAKE_EPOCH_MS", default_value_t = TWITTER_EPOCH.as_millis() as u64)]
    pub epoch_ms: u64,

    /// Length of one time unit in milliseconds.
    ///
    /// Environment variable: `LEASEFLAKE_TICK_MS`
    #[arg(long, env = "LEASEFLAKE_TICK_MS", default_value_t = 1)]
    pub tick_ms: u64,

    /// Sequence field as `shift:width`.
    ///
    /// Environment variable: `LEASEFLAKE_STEP_BITS`
    #[arg(long, env = "LEASEFLAKE_STEP_BITS", default_value = "0:12", value_parser = parse_bit_range)]
    pub step_bits: BitRange,

    /// Node ID field as `shift:width`.
    ///
    /// Environment variable: `LEASEFLAKE_NODE_BITS`
    #[arg(long, env = "LEASEFLAKE_NODE_BITS", default_value = "12:10", value_parser = parse_bit_range)]
    pub node_bits: BitRange,

    /// Time field as `shift:width`.
    ///
    /// Environment variable: `LEASEFLAKE_TIME_BITS`
    #[arg(long, env = "LEASEFLAKE_TIME_BITS", default_value = "22:41", value_parser = parse_bit_range)]
    pub time_bits: BitRange,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Mint IDs and print one per line.
    Generate {
        /// Number of IDs to print.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Node ID embedded in every ID.
        ///
        /// Environment variable: `LEASEFLAKE_NODE_ID`
        #[arg(long, env = "LEASEFLAKE_NODE_ID", default_value_t = 0)]
        node_id: u64,

        /// Reuse the last tick instead of waiting when the clock runs
        /// backwards.
        #[arg(long = "unsafe", default_value_t = false)]
        unsafe_clock: bool,

        /// How to wait for the next tick.
        ///
        /// Environment variable: `LEASEFLAKE_WAIT`
        #[arg(long, env = "LEASEFLAKE_WAIT", value_enum, default_value_t = WaitArg::Sleep)]
        wait: WaitArg,

        /// Read time from a monotonic clock anchored at startup instead of
        /// the wall clock.
        #[arg(long, default_value_t = false)]
        monotonic: bool,
    },
    /// Split IDs into their fields.
    Decode {
        /// IDs to decode.
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitArg {
    Sleep,
    Spin,
}

impl From<WaitArg> for WaitMethod {
    fn from(arg: WaitArg) -> Self {
        match arg {
            WaitArg::Sleep => Self::Sleep,
            WaitArg::Spin => Self::Spin,
        }
    }
}

fn parse_bit_range(s: &str) -> Result<BitRange, String> {
    let (shift, width) = s
        .split_once(':')
        .ok_or_else(|| format!("expected `shift:width`, got `{s}`"))?;
    let shift = shift
        .trim()
        .parse()
        .map_err(|e| format!("invalid shift `{shift}`: {e}"))?;
    let width = width
        .trim()
        .parse()
        .map_err(|e| format!("invalid width `{width}`: {e}"))?;
    Ok(BitRange::new(shift, width))
}

/// What to do, after validation.
#[derive(Debug, Clone)]
pub enum Action {
    Generate {
        count: usize,
        node_id: u64,
        safe: bool,
        wait: WaitMethod,
        monotonic: bool,
    },
    Decode {
        ids: Vec<i64>,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pattern: Arc<Pattern>,
    pub action: Action,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.tick_ms == 0 {
            bail!("LEASEFLAKE_TICK_MS must be greater than 0");
        }

        let pattern = Pattern::new(
            UNIX_EPOCH + Duration::from_millis(args.epoch_ms),
            Duration::from_millis(args.tick_ms),
            args.step_bits,
            args.node_bits,
            args.time_bits,
        )
        .context("invalid ID layout")?;

        let action = match args.command {
            Command::Generate {
                count,
                node_id,
                unsafe_clock,
                wait,
                monotonic,
            } => {
                if node_id > pattern.max_node_id() {
                    bail!(
                        "LEASEFLAKE_NODE_ID ({node_id}) exceeds the node field (max = {})",
                        pattern.max_node_id()
                    );
                }
                Action::Generate {
                    count,
                    node_id,
                    safe: !unsafe_clock,
                    wait: wait.into(),
                    monotonic,
                }
            }
            Command::Decode { ids } => {
                if let Some(id) = ids.iter().find(|id| **id < 0) {
                    bail!("{id} is negative; IDs only use the low 63 bits");
                }
                Action::Decode { ids }
            }
        };

        Ok(Self {
            pattern: Arc::new(pattern),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<AppConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("leaseflake").chain(args.iter().copied()))?;
        AppConfig::try_from(args)
    }

    #[test]
    fn defaults_use_twitter_layout() {
        let config = parse(&["generate"]).unwrap();
        assert_eq!(*config.pattern, Pattern::twitter());
        match config.action {
            Action::Generate {
                count,
                node_id,
                safe,
                wait,
                monotonic,
            } => {
                assert_eq!(count, 1);
                assert_eq!(node_id, 0);
                assert!(safe);
                assert_eq!(wait, WaitMethod::Sleep);
                assert!(!monotonic);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn custom_layout_is_applied() {
        let config = parse(&[
            "--step-bits",
            "0:8",
            "--node-bits",
            "8:16",
            "--time-bits",
            "24:39",
            "--tick-ms",
            "10",
            "generate",
            "--node-id",
            "65535",
            "--wait",
            "spin",
            "--unsafe",
        ])
        .unwrap();
        assert_eq!(config.pattern.max_node_id(), 65_535);
        assert_eq!(config.pattern.tick(), Duration::from_millis(10));
        assert!(matches!(
            config.action,
            Action::Generate {
                safe: false,
                wait: WaitMethod::Spin,
                ..
            }
        ));
    }

    #[test]
    fn overlapping_fields_are_rejected() {
        let err = parse(&["--node-bits", "10:10", "generate"]).unwrap_err();
        assert!(format!("{err:#}").contains("overlap"), "{err:#}");
    }

    #[test]
    fn node_id_must_fit_field() {
        let err = parse(&["generate", "--node-id", "1024"]).unwrap_err();
        assert!(err.to_string().contains("max = 1023"), "{err}");
    }

    #[test]
    fn zero_tick_is_rejected() {
        assert!(parse(&["--tick-ms", "0", "generate"]).is_err());
    }

    #[test]
    fn tick_too_long_for_the_clock_is_rejected() {
        let err = parse(&["--tick-ms", "18446744073709551615", "decode", "1"]).unwrap_err();
        assert!(format!("{err:#}").contains("overflow the system clock"), "{err:#}");
    }

    #[test]
    fn malformed_bit_range_is_a_parse_error() {
        assert!(parse(&["--step-bits", "12", "generate"]).is_err());
        assert!(parse(&["--step-bits", "a:b", "generate"]).is_err());
    }

    #[test]
    fn decode_requires_non_negative_ids() {
        let config = parse(&["decode", "1", "2"]).unwrap();
        assert!(matches!(config.action, Action::Decode { ref ids } if *ids == [1, 2]));
        assert!(parse(&["decode", "--", "-5"]).is_err());
        assert!(parse(&["decode"]).is_err());
    }
}
