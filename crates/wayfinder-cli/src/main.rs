//! `wayfinder-cli` – operator console for the wayfinder navigation core.
//!
//! 1. Checks for `~/.wayfinder/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Starts the planner loop against the configured shared channel.  With
//!    the `memory` backend a simulated rover and executor run in-process.
//! 3. Drops the operator into an **interactive REPL** (`/start`, `/stop`,
//!    `/manual`, `/status`, `/config`, `/help`).
//! 4. Intercepts **Ctrl-C** to write `stop` before exiting.

mod config;
mod repl;
mod session;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use config::{Backend, Config};
use session::Session;

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); WAYFINDER_LOG_FORMAT=json switches
    // to JSON lines; OTEL_EXPORTER_OTLP_ENDPOINT adds span export.
    let _telemetry = wayfinder_planner::init_tracing("wayfinder-cli");

    print_banner();

    // ── Configuration / First-Run Wizard ──────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Navigation loops ──────────────────────────────────────────────────
    let session = match Session::start(&cfg) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {}", "Startup failed".red().bold(), e);
            std::process::exit(1);
        }
    };
    match cfg.backend {
        Backend::Memory => println!(
            "  Backend: {} (simulated rover at {:.6}, {:.6})",
            "memory".yellow(),
            cfg.simulation.start_lat,
            cfg.simulation.start_lng
        ),
        Backend::Rest => println!("  Backend: {} at {}", "rest".yellow(), cfg.channel_url.bold()),
    }
    let _printer = repl::spawn_event_printer(&session);

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // Outside the line editor Ctrl-C arrives as a signal; write `stop`
    // straight away since the REPL may be blocked.
    let handle = session.handle().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the rover …".yellow().bold());
        match handle.blocking_stop_trip() {
            Ok(_) => println!("{}", "  ✓ Stop written to the shared channel.".green()),
            Err(e) => println!("  {}: {}", "Stop failed".red(), e),
        }
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&session, &cfg, shutdown);

    session.shutdown();
    println!("{}", "  ✓ Exiting Wayfinder.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║     Wayfinder First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Wayfinder.\n");

    let mut cfg = Config::default();

    println!("  Where should the planner and the rover meet?");
    println!("    1) In-process simulation  (default, no hardware)");
    println!("    2) Remote REST store      (rover runs its own executor)");
    let choice = prompt_line("  Enter choice [1]: ", "1");
    cfg.backend = match choice.trim() {
        "2" => Backend::Rest,
        _ => Backend::Memory,
    };

    match cfg.backend {
        Backend::Rest => {
            cfg.channel_url = prompt_line(
                &format!("  Store base URL [{}]: ", cfg.channel_url),
                &cfg.channel_url,
            );
            cfg.channel_auth = prompt_line("  Auth token (Enter for none): ", "");
        }
        Backend::Memory => {
            let start = prompt_line(
                &format!(
                    "  Simulated start <lat>,<lng> [{},{}]: ",
                    cfg.simulation.start_lat, cfg.simulation.start_lng
                ),
                "",
            );
            if !start.is_empty() {
                match repl::parse_point(&start) {
                    Ok(p) => {
                        cfg.simulation.start_lat = p.lat;
                        cfg.simulation.start_lng = p.lng;
                    }
                    Err(e) => println!("  {} {}, keeping default", "Warning:".yellow(), e),
                }
            }
        }
    }

    let tick = prompt_line(
        &format!("  Planner tick in ms [{}]: ", cfg.planner.tick_ms),
        &cfg.planner.tick_ms.to_string(),
    );
    if let Ok(ms) = tick.trim().parse::<u64>()
        && ms > 0
    {
        cfg.planner.tick_ms = ms;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#" _      __          ____ _         __       "#.bold().cyan());
    println!("{}", r#"| | /| / /__ ___ __/ __/(_)__  ___/ /__ ____"#.bold().cyan());
    println!("{}", r#"| |/ |/ / _ `/ // / _/ / / _ \/ _  / -_) __/"#.bold().cyan());
    println!("{}", r#"|__/|__/\_,_/\_, /_/  /_/_//_/\_,_/\__/_/   "#.bold().cyan());
    println!("{}", r#"            /___/                           "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Wayfinder".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  GPS waypoint navigation for small rovers");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
