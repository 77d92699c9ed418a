// barline-controller - process A
// Owns rate policy and the command side of the mailbox pair. Reward
// integrations call into the same dispatch used by the stdin console here;
// the coordinator only ever hears from us through queued commands.

use std::path::PathBuf;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};

use barline::config::Config;
use barline::controller::{ActionError, ActionKind, ActionOptions, RateController};
use barline::ipc::{ChannelHealth, Command, CommandMailbox, StatusFile};
use barline::transport::OscTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let mut transport = OscTransport::connect(
        &config.osc.bind_addr,
        &config.osc.host_addr,
        config.osc.slider_min,
        config.osc.slider_max,
        config.bounds,
    )?;
    let commands = CommandMailbox::new(config.ipc.command_path.clone());
    let status = StatusFile::new(config.ipc.status_path.clone());
    let mut controller = RateController::new(&config);

    log::info!(
        "Controller up: host {}, mailbox {}",
        config.osc.host_addr,
        commands.path().display()
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(250));
    let mut last_health = ChannelHealth::Missing;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();

                transport.pump_feedback(now);
                controller.observe_rate(transport.rate());
                controller.observe_bpm(transport.tempo_bpm());

                match status.read() {
                    Ok(Some(s)) => controller.observe_status(&s, now),
                    Ok(None) => {}
                    Err(e) => log::warn!("Status read failed: {}", e),
                }

                let health = status.health(now, config.ipc.status_grace_secs);
                if health != last_health {
                    match health {
                        ChannelHealth::Live => log::info!("Coordinator connected"),
                        ChannelHealth::Stale => log::warn!("Coordinator status is stale, treating as disconnected"),
                        ChannelHealth::Missing => log::warn!("No coordinator status file"),
                    }
                    last_health = health;
                }
                controller.observe_connectivity(
                    health,
                    transport.is_connected(now, config.ipc.status_grace_secs),
                );

                if let Some(stuck) = controller.summary(now).stalled_for_secs {
                    log::warn!("Transport stopped awaiting count-in for {}s; send 'go' to resume", stuck);
                }

                // Auto-reset bypasses the measure machinery: force-set now
                if let Some(default_rate) = controller.tick(now) {
                    if let Err(e) = transport.set_rate(default_rate) {
                        log::error!("Auto-reset send failed: {}", e);
                    }
                }
            }

            line = stdin.next_line() => {
                let line = match line? {
                    Some(l) => l,
                    None => break,
                };
                handle_line(&line, &mut controller, &commands, &config);
            }
        }
    }

    Ok(())
}

/// Console commands, one per line:
///   on | off | up <user> | down <user> | chaos <user> | reset <user>
///   set <user> <rate> | cancel | now | go | status
fn handle_line(
    line: &str,
    controller: &mut RateController,
    commands: &CommandMailbox,
    config: &Config,
) {
    let mut words = line.split_whitespace();
    let verb = match words.next() {
        Some(v) => v,
        None => return,
    };
    let actor = words.next().unwrap_or("console");

    let kind = match verb {
        "on" => {
            controller.set_enabled(true);
            post(commands, Command::Enable);
            return;
        }
        "off" => {
            controller.set_enabled(false);
            post(commands, Command::Disable);
            return;
        }
        "cancel" => return post(commands, Command::Cancel),
        "now" => return post(commands, Command::ExecuteNow),
        // The external count-in presentation reports done through this
        "go" => return post(commands, Command::StartPlayback),
        "status" => {
            let summary = controller.summary(Utc::now());
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => log::error!("Summary serialization failed: {}", e),
            }
            return;
        }
        "up" => ActionKind::SpeedUp,
        "down" => ActionKind::SlowDown,
        "chaos" => ActionKind::Chaos,
        "reset" => ActionKind::Reset,
        "set" => ActionKind::SetExact,
        other => {
            println!("Unknown command: {}", other);
            return;
        }
    };

    let options = ActionOptions {
        exact_rate: words.next().and_then(|w| w.parse().ok()),
        ..ActionOptions::default()
    };

    match controller.process_action(kind, actor, options, Utc::now()) {
        Ok(outcome) => {
            println!("{}", outcome.announcement);
            if let Some(updates) = outcome.price_updates {
                for update in updates {
                    log::info!("Price sync: {:?} now {}", update.kind, update.cost);
                }
            }
            post(
                commands,
                Command::Queue {
                    new_rate: outcome.new_rate,
                    warning_beats: config.controller.warning_beats,
                    pre_count_bars: config.controller.pre_count_bars,
                },
            );
        }
        Err(ActionError::OnCooldown { remaining_secs }) => {
            println!("On cooldown, {}s left", remaining_secs);
        }
        Err(e) => println!("{}", e),
    }
}

fn post(commands: &CommandMailbox, command: Command) {
    if let Err(e) = commands.post(&command) {
        log::error!("Command post failed: {}", e);
    }
}
