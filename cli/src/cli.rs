use clap::{builder::TypedValueParser, Parser};

#[derive(Parser, Debug)]
#[clap(name = "rthrottle", version, about = "rthrottle Command Line Utility")]
pub struct Cli {
  #[clap(subcommand)]
  pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
  /// Print the admission timeline a set of rates produces for a call pattern
  Plan(PlanArgs),
  /// Parse rate expressions and print them normalized
  CheckRate(CheckRateArgs),
}

#[derive(Parser, Debug)]
pub struct PlanArgs {
  /// Global rate as N/duration, e.g. "20/1m". Repeat to overlay several rates
  #[clap(long = "rate", short = 'r', required = true)]
  pub rates: Vec<String>,

  /// Channel rate as NAME=N/duration, e.g. "data=1/1s". Repeatable
  #[clap(long = "channel-rate", short = 'c')]
  pub channel_rates: Vec<String>,

  /// Channel to submit on; repeat to cycle calls over several channels, "-" for none
  #[clap(long = "channel")]
  pub channels: Vec<String>,

  /// Number of calls to plan
  #[clap(long, short = 'n', default_value_t = 10)]
  pub calls: usize,

  /// Time between consecutive calls, e.g. "250ms" or "1s"
  #[clap(long, short = 'i', default_value = "0ms")]
  pub interval: String,

  /// Use the multi-rate policy even with a single global rate
  #[clap(long, action)]
  pub multi_rate: bool,

  /// Output format for the timeline
  #[clap(long, value_parser = clap::builder::PossibleValuesParser::new(["table", "csv"]).map(|s| s.to_lowercase()), default_value = "table")]
  pub format: String,
}

#[derive(Parser, Debug)]
pub struct CheckRateArgs {
  /// Rate expressions as N/duration
  #[clap(required = true)]
  pub rates: Vec<String>,
}
