//! REPL – the operator shell.
//!
//! Supported slash-commands:
//!   /start <lat>,<lng> [<lat>,<lng> ...] – start a trip (last pair is the destination)
//!   /stop                                – stop the active trip
//!   /manual <forward|left|right|stop>    – one manual command
//!   /status                              – navigation snapshot
//!   /config                              – show the loaded configuration
//!   /help                                – show this list
//!   /quit | /exit                        – stop and exit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use wayfinder_channel::{NavBus, Topic};
use wayfinder_types::{Direction, GeoPoint, NavEvent, Waypoint};

use crate::config::{self, Config};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(session: &Session, cfg: &Config, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match editor.readline("wayfinder> ") {
            Ok(line) => {
                let cmd = line.trim();
                if cmd.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(cmd);
                if dispatch(session, cfg, cmd) == Flow::Quit {
                    println!("{}", "Goodbye.".green());
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "⚠  Ctrl-C – stopping the rover and exiting …".yellow().bold());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
    }
}

fn dispatch(session: &Session, cfg: &Config, line: &str) -> Flow {
    let (cmd, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match cmd {
        "/start" => cmd_start(session, args),
        "/stop" => cmd_stop(session),
        "/manual" => cmd_manual(session, args),
        "/status" => cmd_status(session),
        "/config" => cmd_config(session, cfg),
        "/help" => cmd_help(),
        "/quit" | "/exit" => return Flow::Quit,
        other => {
            println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            );
        }
    }
    Flow::Continue
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Wayfinder Commands".bold().underline());
    println!(
        "  {} – start a trip; the last pair is the destination",
        "/start <lat>,<lng> [...]".bold().cyan()
    );
    println!("  {}                     – stop the active trip", "/stop".bold().cyan());
    println!("  {}   – send one manual command", "/manual <direction>".bold().cyan());
    println!("  {}                   – navigation snapshot", "/status".bold().cyan());
    println!("  {}                   – show configuration", "/config".bold().cyan());
    println!("  {}              – stop and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_start(session: &Session, args: &str) {
    let (destination, waypoints) = match parse_start(args) {
        Ok(route) => route,
        Err(e) => {
            println!("{}: {}", "Usage".yellow(), e);
            return;
        }
    };
    match session.block_on(session.handle().start_trip(destination, waypoints)) {
        Ok(id) => println!(
            "{} {} {}",
            "✓ Trip".green(),
            id.to_string().bold(),
            format!("started towards {destination}").green()
        ),
        Err(e) => println!("{}: {}", "Cannot start".red(), e),
    }
}

fn cmd_stop(session: &Session) {
    match session.block_on(session.handle().stop_trip()) {
        Ok(Some(id)) => println!("{} {}", "✓ Stopped trip".green(), id.to_string().bold()),
        Ok(None) => println!("{}", "No active trip; stop sent.".dimmed()),
        Err(e) => println!("{}: {}", "Stop failed".red(), e),
    }
}

fn cmd_manual(session: &Session, args: &str) {
    let direction = match args.trim().parse::<Direction>() {
        Ok(d) => d,
        Err(e) => {
            println!("{}: {} (forward, left, right or stop)", "Usage".yellow(), e);
            return;
        }
    };
    match session.block_on(session.handle().manual(direction)) {
        Ok(()) => println!("{} {}", "✓ Manual command".green(), direction.as_str().bold()),
        Err(e) => println!("{}: {}", "Manual command rejected".red(), e),
    }
}

fn cmd_status(session: &Session) {
    match session.block_on(session.handle().status()) {
        Ok(status) => {
            println!("{}", "Navigation Status".bold().underline());
            for line in status.to_string().lines() {
                println!("  {}", line);
            }
        }
        Err(e) => println!("{}: {}", "Status unavailable".red(), e),
    }
}

fn cmd_config(session: &Session, cfg: &Config) {
    println!("{}", "Configuration".bold().underline());
    println!("  File    : {}", config::config_path().display().to_string().bold());
    println!("  Backend : {}", session.backend().to_string().yellow());
    println!("{:#?}", cfg);
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus events
// ─────────────────────────────────────────────────────────────────────────────

/// Print every bus event as it arrives.
pub fn spawn_event_printer(session: &Session) -> JoinHandle<()> {
    let bus: NavBus = session.bus().clone();
    let mut rx = bus.subscribe_all();
    session.runtime().spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let text = describe(&event.payload);
                    let line = match Topic::of(&event.payload) {
                        Topic::Safety => text.red().bold(),
                        Topic::Lifecycle => text.green(),
                        Topic::Diagnostics => text.dimmed(),
                    };
                    println!("\n  {} {}", "•".bold(), line);
                }
                Err(RecvError::Lagged(n)) => {
                    println!("\n  {}", format!("({n} events dropped)").dimmed());
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub(crate) fn describe(event: &NavEvent) -> String {
    match event {
        NavEvent::TripStarted {
            trip_id,
            destination,
            route_len,
        } => format!("Trip {trip_id} started: {route_len} point(s) to {destination}"),
        NavEvent::WaypointReached { index, instruction } => match instruction {
            Some(text) => format!("Waypoint {} reached – {text}", index + 1),
            None => format!("Waypoint {} reached", index + 1),
        },
        NavEvent::TripArrived { trip_id } => format!("Arrived at destination (trip {trip_id})"),
        NavEvent::TripStopped { trip_id: Some(id) } => format!("Trip {id} stopped"),
        NavEvent::TripStopped { trip_id: None } => "Stop sent".to_string(),
        NavEvent::ManualOverride { direction } => format!("Manual override: {direction}"),
        NavEvent::NavigationStalled { silent_ms } => format!(
            "Navigation stalled: no command for {:.1} s",
            *silent_ms as f64 / 1_000.0
        ),
        NavEvent::NavigationResumed => "Navigation resumed".to_string(),
        NavEvent::FailSafeStop {
            last_direction,
            silent_ms,
        } => format!("Executor fail-safe stop (was {last_direction}, silent {silent_ms} ms)"),
        NavEvent::GovernorOverride { kind, front_cm } => {
            format!("Proximity override {kind:?} (front {front_cm:.0} cm)")
        }
        NavEvent::ChannelUnavailable { key, details } => {
            format!("Channel unavailable on {key}: {details}")
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse `"<lat>,<lng>"`.  Range checks are left to the planner.
pub(crate) fn parse_point(raw: &str) -> Result<GeoPoint, String> {
    let (lat, lng) = raw
        .split_once(',')
        .ok_or_else(|| format!("'{raw}' is not a <lat>,<lng> pair"))?;
    let lat = lat
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a latitude", lat.trim()))?;
    let lng = lng
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a longitude", lng.trim()))?;
    Ok(GeoPoint::new(lat, lng))
}

/// Parse `/start` arguments into a destination and its waypoints.
///
/// The last pair is the destination.  Earlier pairs become waypoints in
/// order; a lone destination becomes a single waypoint.
pub(crate) fn parse_start(args: &str) -> Result<(GeoPoint, Vec<Waypoint>), String> {
    let normalised = args.replace(", ", ",");
    let points = normalised
        .split_whitespace()
        .map(parse_point)
        .collect::<Result<Vec<_>, _>>()?;
    let Some((&destination, before)) = points.split_last() else {
        return Err("/start <lat>,<lng> [<lat>,<lng> ...]".to_string());
    };
    let route: &[GeoPoint] = if before.is_empty() { &points } else { before };
    let waypoints = route
        .iter()
        .enumerate()
        .map(|(i, p)| Waypoint::new(p.lat, p.lng, i as u32))
        .collect();
    Ok((destination, waypoints))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfinder_types::OverrideKind;

    #[test]
    fn parses_point_with_spaces() {
        assert_eq!(parse_point(" 48.85 , 2.35 "), Ok(GeoPoint::new(48.85, 2.35)));
        assert!(parse_point("48.85").is_err());
        assert!(parse_point("north,2.35").is_err());
    }

    #[test]
    fn lone_destination_becomes_single_waypoint() {
        let (dest, wps) = parse_start("10.0,20.0").unwrap();
        assert_eq!(dest, GeoPoint::new(10.0, 20.0));
        assert_eq!(wps.len(), 1);
        assert_eq!(wps[0].point(), dest);
        assert_eq!(wps[0].order, 0);
    }

    #[test]
    fn earlier_pairs_are_waypoints_in_order() {
        let (dest, wps) = parse_start("1.0,1.0 2.0, 2.0 3.0,3.0").unwrap();
        assert_eq!(dest, GeoPoint::new(3.0, 3.0));
        assert_eq!(
            wps.iter().map(|w| (w.point(), w.order)).collect::<Vec<_>>(),
            vec![(GeoPoint::new(1.0, 1.0), 0), (GeoPoint::new(2.0, 2.0), 1)]
        );
    }

    #[test]
    fn empty_start_is_usage_error() {
        assert!(parse_start("   ").is_err());
    }

    #[test]
    fn describes_events_for_operators() {
        assert_eq!(
            describe(&NavEvent::WaypointReached {
                index: 0,
                instruction: Some("Turn left onto Main St".to_string()),
            }),
            "Waypoint 1 reached – Turn left onto Main St"
        );
        assert_eq!(
            describe(&NavEvent::NavigationStalled { silent_ms: 6_500 }),
            "Navigation stalled: no command for 6.5 s"
        );
        assert_eq!(
            describe(&NavEvent::GovernorOverride {
                kind: OverrideKind::EmergencyBackup,
                front_cm: 31.6,
            }),
            "Proximity override EmergencyBackup (front 32 cm)"
        );
    }
}
