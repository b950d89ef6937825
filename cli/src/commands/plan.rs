use crate::cli::{CheckRateArgs, PlanArgs};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as AnyhowContext, Result};
use rthrottle::options::parse_duration;
use rthrottle::{ManualClock, Policy, Rate, ThrottlePolicy};

/// One row of a planned timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCall {
  pub index: usize,
  pub channel: Option<String>,
  pub requested_at: u64,
  pub admitted_at: u64,
}

impl PlannedCall {
  pub fn delay_ms(&self) -> u64 {
    self.admitted_at - self.requested_at
  }
}

/// Parses `NAME=N/duration`.
fn parse_channel_rate(spec: &str) -> Result<(String, Rate)> {
  let Some((name, rate)) = spec.split_once('=') else {
    bail!("channel rate '{}' must look like NAME=N/duration", spec);
  };
  let name = name.trim();
  if name.is_empty() {
    bail!("channel rate '{}' has an empty channel name", spec);
  }
  let rate: Rate = rate
    .parse()
    .with_context(|| format!("Failed to parse rate for channel '{}'", name))?;
  Ok((name.to_string(), rate))
}

/// Replays `args.calls` submissions against a fresh policy on a manual clock.
pub fn plan(args: &PlanArgs) -> Result<Vec<PlannedCall>> {
  let globals = args
    .rates
    .iter()
    .map(|spec| {
      spec
        .parse::<Rate>()
        .with_context(|| format!("Failed to parse global rate '{}'", spec))
    })
    .collect::<Result<Vec<_>>>()?;
  let channel_rates = args
    .channel_rates
    .iter()
    .map(|spec| parse_channel_rate(spec))
    .collect::<Result<HashMap<_, _>>>()?;
  let interval = parse_duration(&args.interval).context("Failed to parse --interval")?;

  let clock = Arc::new(ManualClock::new(0));
  let policy = Policy::from_rates(globals, channel_rates, clock.clone(), args.multi_rate)
    .context("Failed to build throttle policy")?;

  let channels: Vec<Option<String>> = args
    .channels
    .iter()
    .map(|c| if c == "-" { None } else { Some(c.clone()) })
    .collect();

  let mut rows = Vec::with_capacity(args.calls);
  for index in 0..args.calls {
    if index > 0 {
      clock.advance(interval);
    }
    let channel = if channels.is_empty() {
      None
    } else {
      channels[index % channels.len()].clone()
    };
    let admission = policy.admit(channel.as_ref());
    rows.push(PlannedCall {
      index,
      channel,
      requested_at: admission.now,
      admitted_at: admission.at,
    });
  }
  Ok(rows)
}

pub fn print_plan(args: PlanArgs) -> Result<()> {
  let rows = plan(&args)?;

  match args.format.as_str() {
    "csv" => {
      println!("call,channel,requested_ms,admitted_ms,delay_ms");
      for row in &rows {
        println!(
          "{},{},{},{},{}",
          row.index,
          row.channel.as_deref().unwrap_or(""),
          row.requested_at,
          row.admitted_at,
          row.delay_ms()
        );
      }
    }
    _ => {
      println!(
        "{:>5}  {:<12}  {:>12}  {:>12}  {:>10}",
        "call", "channel", "requested", "admitted", "delay"
      );
      for row in &rows {
        println!(
          "{:>5}  {:<12}  {:>10}ms  {:>10}ms  {:>8}ms",
          row.index,
          row.channel.as_deref().unwrap_or("-"),
          row.requested_at,
          row.admitted_at,
          row.delay_ms()
        );
      }
      if let Some(last) = rows.iter().map(|r| r.admitted_at).max() {
        let max_delay = rows.iter().map(PlannedCall::delay_ms).max().unwrap_or(0);
        println!();
        println!(
          "{} calls admitted by {:?}, longest wait {:?}",
          rows.len(),
          Duration::from_millis(last),
          Duration::from_millis(max_delay)
        );
      }
    }
  }
  Ok(())
}

pub fn check_rates(args: CheckRateArgs) -> Result<()> {
  for spec in &args.rates {
    let rate: Rate = spec.parse().with_context(|| format!("Invalid rate '{}'", spec))?;
    println!(
      "{:<12} -> {} ({} calls per {:?})",
      spec,
      rate,
      rate.number_calls(),
      rate.window()
    );
  }
  Ok(())
}
