//! Line-oriented host around the engine. Sensors are simulated by typed
//! commands; prompts and remote alerts only go to the log.

use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::{self, MissedTickBehavior},
};

use crate::{
    collaborators::{BatterySource, LocalPromptDispatcher, RemoteAlertDispatcher},
    db::StateStore,
    engine::Engine,
    models::{
        AlertRequest, BatteryReading, ChargeState, DispatchReceipt, MotionSample, PromptRequest,
        SignalKind,
    },
};

const ROLLUP_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct LogPromptDispatcher;

#[async_trait]
impl LocalPromptDispatcher for LogPromptDispatcher {
    async fn prompt(&self, request: PromptRequest) {
        info!(
            "[prompt:{:?}] {}: {}",
            request.category, request.title, request.body
        );
    }
}

/// Stands in for the SMS gateway: every contact counts as reached.
pub struct LogAlertDispatcher;

#[async_trait]
impl RemoteAlertDispatcher for LogAlertDispatcher {
    async fn dispatch(&self, request: &AlertRequest) -> DispatchReceipt {
        for contact in &request.contacts {
            warn!(
                "[alert {}] {} alert for {} -> {} ({})",
                request.incident_id,
                request.kind.as_str(),
                request.display_name,
                contact.name,
                contact.phone
            );
        }
        DispatchReceipt {
            success: true,
            sent_count: request.contacts.len(),
            total_count: request.contacts.len(),
            error: None,
        }
    }
}

/// Reads a Linux power supply, e.g. `/sys/class/power_supply/BAT0`.
pub struct SysfsBatterySource {
    dir: PathBuf,
}

impl SysfsBatterySource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn detect() -> Option<Self> {
        let dir = PathBuf::from("/sys/class/power_supply/BAT0");
        dir.join("capacity").exists().then(|| Self::new(dir))
    }
}

#[async_trait]
impl BatterySource for SysfsBatterySource {
    async fn current(&self) -> Option<BatteryReading> {
        let capacity = tokio::fs::read_to_string(self.dir.join("capacity"))
            .await
            .ok()?;
        let status = tokio::fs::read_to_string(self.dir.join("status"))
            .await
            .unwrap_or_default();

        Some(BatteryReading {
            level: capacity.trim().parse().ok(),
            state: sysfs_charge_state(status.trim()),
            power_save: false,
        })
    }
}

fn sysfs_charge_state(status: &str) -> ChargeState {
    match status {
        "Discharging" | "Not charging" => ChargeState::Unplugged,
        "Charging" => ChargeState::Charging,
        "Full" => ChargeState::Full,
        _ => ChargeState::Unknown,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Activity { kind: SignalKind, quantity: Option<u32> },
    Motion(f64),
    MotionAxes { x: f64, y: f64, z: f64 },
    Battery(BatteryReading),
    CheckIn,
    Pause,
    Resume,
    TestFall,
    Hour { hour: u8, is_weekend: bool, activity: f64, events: f64 },
    Status,
    Quit,
}

impl HostCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            bail!("empty command");
        };
        let args: Vec<&str> = parts.collect();

        let command = match verb {
            "activity" => {
                let kind = arg(&args, 0, "signal kind")?;
                let kind = SignalKind::parse(kind)
                    .ok_or_else(|| anyhow!("unknown signal kind '{kind}'"))?;
                let quantity = args
                    .get(1)
                    .map(|value| value.parse::<u32>())
                    .transpose()
                    .context("quantity must be a whole number")?;
                HostCommand::Activity { kind, quantity }
            }
            "motion" => {
                let values = args
                    .iter()
                    .map(|value| value.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .context("motion values must be numbers")?;
                match values[..] {
                    [magnitude] => HostCommand::Motion(magnitude),
                    [x, y, z] => HostCommand::MotionAxes { x, y, z },
                    _ => bail!("expected a magnitude or x y z axes"),
                }
            }
            "battery" => {
                let level = match arg(&args, 0, "level")? {
                    "?" => None,
                    value => Some(value.parse::<u8>().context("level must be 0-100 or ?")?),
                };
                let state = ChargeState::parse(arg(&args, 1, "charge state")?);
                let power_save = args.get(2) == Some(&"save");
                HostCommand::Battery(BatteryReading {
                    level,
                    state,
                    power_save,
                })
            }
            "ok" => HostCommand::CheckIn,
            "pause" => HostCommand::Pause,
            "resume" => HostCommand::Resume,
            "test-fall" => HostCommand::TestFall,
            "hour" => {
                let hour: u8 = arg(&args, 0, "hour")?.parse().context("hour must be 0-23")?;
                if hour > 23 {
                    bail!("hour must be 0-23");
                }
                let is_weekend = match arg(&args, 1, "weekend flag")? {
                    "weekend" | "true" | "1" => true,
                    "weekday" | "false" | "0" => false,
                    other => bail!("expected weekend or weekday, got '{other}'"),
                };
                let activity = arg(&args, 2, "activity")?
                    .parse()
                    .context("activity must be a number")?;
                let events = arg(&args, 3, "events")?
                    .parse()
                    .context("events must be a number")?;
                HostCommand::Hour {
                    hour,
                    is_weekend,
                    activity,
                    events,
                }
            }
            "status" => HostCommand::Status,
            "quit" | "exit" => HostCommand::Quit,
            other => bail!("unknown command '{other}'"),
        };
        Ok(command)
    }
}

fn arg<'a>(args: &[&'a str], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .copied()
        .ok_or_else(|| anyhow!("missing {name}"))
}

/// Feeds stdin into the engine until `quit`, end of input or Ctrl-C.
pub async fn serve<S: StateStore>(engine: &Engine, store: &S) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut rollup_ticker = time::interval(ROLLUP_CHECK_INTERVAL);
    rollup_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("ready; type commands (activity, motion, battery, ok, pause, resume, test-fall, hour, status, quit)");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match HostCommand::parse(&line) {
                    Ok(HostCommand::Quit) => break,
                    Ok(command) => {
                        if let Err(err) = execute(engine, store, command).await {
                            error!("command failed: {err:#}");
                        }
                    }
                    Err(err) => warn!("{err}"),
                }
            }
            _ = rollup_ticker.tick() => {
                engine.poll_battery().await;
                if engine.tick_rollup().await {
                    if let Err(err) = engine.persist(store).await {
                        error!("failed to persist state after rollup: {err:#}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    Ok(())
}

async fn execute<S: StateStore>(engine: &Engine, store: &S, command: HostCommand) -> Result<()> {
    match command {
        HostCommand::Activity { kind, quantity } => engine.record_signal(kind, quantity).await?,
        HostCommand::Motion(magnitude) => {
            engine
                .push_motion(MotionSample::new(engine.now(), magnitude))
                .await?
        }
        HostCommand::MotionAxes { x, y, z } => {
            engine
                .push_motion(MotionSample::from_axes(engine.now(), x, y, z))
                .await?
        }
        HostCommand::Battery(reading) => {
            if engine.record_battery(reading).await {
                info!("battery snapshot stored");
            }
        }
        HostCommand::CheckIn => engine.check_in().await?,
        HostCommand::Pause => engine.pause_monitoring().await?,
        HostCommand::Resume => engine.resume_monitoring().await?,
        HostCommand::TestFall => engine.trigger_manual_fall_test().await?,
        HostCommand::Hour {
            hour,
            is_weekend,
            activity,
            events,
        } => {
            if let Some(deviation) = engine
                .observe_hour(hour, is_weekend, activity, events)
                .await
            {
                info!(
                    "hour {} flagged, expected about {:.0}",
                    deviation.hour, deviation.expected.activity
                );
            }
            engine.persist(store).await?;
        }
        HostCommand::Status => {
            let status = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        HostCommand::Quit => {}
    }
    Ok(())
}
