mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
  let cli_args = Cli::parse();

  match cli_args.command {
    Commands::Plan(plan_args) => commands::plan::print_plan(plan_args),
    Commands::CheckRate(check_args) => commands::plan::check_rates(check_args),
  }
}
