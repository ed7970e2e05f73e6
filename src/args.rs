//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{LookupTable, RecorderConfig},
    exfil::MAX_CIRCULAR_IF_SIZE,
    mode::Mode,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Mode used to set up the front-end, 1 through 8 (see http://ccar.colorado.edu/gnss)
    #[clap(long, default_value = "8", value_parser = valid_mode)]
    pub devmode: Mode,
    /// Name to give to the device, used as prefix for generated files and tag in logs
    #[clap(long, default_value = "rec")]
    pub logname: String,
    /// Skips the collection of AGC data
    #[clap(long)]
    pub skipagc: bool,
    /// Lookup table mapping the four 2 bit codes to levels, must include -3, -1, 1 and 3 once each
    #[clap(long, default_value = "1 3 -3 -1", allow_hyphen_values = true)]
    #[clap(value_parser = valid_lookup_table)]
    pub lookuptable: LookupTable,
    /// Write the IF file linearly instead of wrapping it at 50 GiB
    #[clap(long)]
    pub linear_if: bool,
    /// How long to keep recording once launch is detected, in seconds
    #[clap(long, default_value_t = 9000)]
    pub record_seconds: u64,
    /// Seconds to wait before touching the device
    #[clap(long, default_value_t = 10)]
    pub startup_delay: u64,
    /// Don't use the rocket interface, treat launch as already detected
    #[clap(long)]
    pub no_gpio: bool,
    /// Sysfs GPIO directory the rocket interface pins are exported in
    #[clap(long, default_value = "/sys/class/gpio")]
    pub gpio_root: PathBuf,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Args {
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            mode: self.devmode,
            log_name: self.logname.clone(),
            skip_agc: self.skipagc,
            if_ceiling: (!self.linear_if).then_some(MAX_CIRCULAR_IF_SIZE),
            lookup_table: self.lookuptable,
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_mode(s: &str) -> Result<Mode, String> {
    let n: u8 = s.parse().map_err(|_| format!("{s:?} is not a mode number"))?;
    Mode::new(n).map_err(|e| e.to_string())
}

fn valid_lookup_table(s: &str) -> Result<LookupTable, String> {
    s.parse().map_err(|e: crate::errors::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["sige_slurper"]).unwrap();
        let config = args.recorder_config();
        assert_eq!(config.mode.number(), 8);
        assert_eq!(config.log_name, "rec");
        assert!(!config.skip_agc);
        assert_eq!(config.if_ceiling, Some(MAX_CIRCULAR_IF_SIZE));
        assert_eq!(config.lookup_table, LookupTable::default());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "sige_slurper",
            "--devmode",
            "3",
            "--logname",
            "flight/sige",
            "--skipagc",
            "--linear-if",
            "--lookuptable",
            "-3 -1 1 3",
        ])
        .unwrap();
        let config = args.recorder_config();
        assert_eq!(config.mode.firmware_mode(), 38);
        assert_eq!(config.log_name, "flight/sige");
        assert!(config.skip_agc);
        assert_eq!(config.if_ceiling, None);
        assert_eq!(config.lookup_table.levels(), [-3, -1, 1, 3]);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Args::try_parse_from(["sige_slurper", "--devmode", "9"]).is_err());
        assert!(Args::try_parse_from(["sige_slurper", "--devmode", "0"]).is_err());
        assert!(Args::try_parse_from(["sige_slurper", "--lookuptable", "1 2 3 4"]).is_err());
    }
}
