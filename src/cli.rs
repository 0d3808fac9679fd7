use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "cirrus",
    version,
    about = "A keyboard-driven terminal cockpit for EC2, S3 and EKS."
)]
pub struct CliArgs {
    /// Start in a specific AWS region
    #[arg(short, long)]
    pub region: Option<String>,

    /// Use a named AWS profile instead of the saved auth selection
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Path to a cirrus YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Append logs to this file instead of discarding them
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Redraw interval in milliseconds
    #[arg(long, default_value_t = 250)]
    pub tick_ms: u64,

    /// aws CLI binary used for every provider call
    #[arg(long, default_value = "aws")]
    pub aws_bin: String,
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn defaults_apply_without_flags() {
        let args = CliArgs::try_parse_from(["cirrus"]).expect("parse");
        assert_eq!(args.tick_ms, 250);
        assert_eq!(args.aws_bin, "aws");
        assert_eq!(args.log_filter, "info");
        assert!(args.region.is_none());
    }

    #[test]
    fn region_and_profile_flags_parse() {
        let args = CliArgs::try_parse_from(["cirrus", "-r", "eu-west-1", "--profile", "ops"])
            .expect("parse");
        assert_eq!(args.region.as_deref(), Some("eu-west-1"));
        assert_eq!(args.profile.as_deref(), Some("ops"));
    }
}
