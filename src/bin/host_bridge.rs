// barline-host-bridge - process B
// Runs beside the host workstation: polls its transport position at a fast
// cadence, drains the command mailbox at a slower one (commands always apply
// before the same pass's timing logic), and publishes status back. Every
// per-tick failure is logged and degrades that tick only.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use barline::config::Config;
use barline::coordinator::Coordinator;
use barline::ipc::{CommandMailbox, StatusFile};
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
        &config.osc.bridge_bind_addr,
        &config.osc.host_addr,
        config.osc.slider_min,
        config.osc.slider_max,
        config.bounds,
    )?;
    let commands = CommandMailbox::new(config.ipc.command_path.clone());
    let status = StatusFile::new(config.ipc.status_path.clone());
    let mut coordinator = Coordinator::new(config.bounds);

    log::info!(
        "Host bridge up: host {}, polling every {}ms",
        config.osc.host_addr,
        config.coordinator.transport_poll_ms
    );

    let mut poll = tokio::time::interval(Duration::from_millis(config.coordinator.transport_poll_ms));
    let mut command_poll = tokio::time::interval(Duration::from_millis(config.ipc.command_poll_ms));
    // Commands are due on the first pass so a queued command written before
    // startup is not missed
    let mut command_due = true;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let now = Utc::now();
                transport.pump_feedback(now);

                if command_due {
                    command_due = false;
                    match commands.take() {
                        Ok(Some(command)) => {
                            if let Err(e) = coordinator.apply_command(command, &mut transport, now) {
                                log::error!("Command failed: {}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => log::warn!("Command mailbox error: {}", e),
                    }
                }

                if let Err(e) = coordinator.poll(&mut transport) {
                    log::error!("Timing pass failed: {}", e);
                }

                if let Err(e) = status.publish(&coordinator.status(now)) {
                    log::warn!("Status publish failed: {}", e);
                }
            }

            _ = command_poll.tick() => {
                // Flag only; the drain happens inside the next timing pass so
                // command application and beat-edge logic stay ordered
                command_due = true;
            }

            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    let mut final_status = coordinator.status(Utc::now());
    final_status.shutdown = true;
    if let Err(e) = status.publish(&final_status) {
        log::warn!("Final status publish failed: {}", e);
    }

    Ok(())
}
