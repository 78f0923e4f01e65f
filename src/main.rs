//! scxmlrt - SCXML statechart interpreter
//!
//! Runs a traffic-light statechart on an async session until it finishes
//! or ctrl-c is pressed.

use scxmlrt_core::{Interpreter, InterpreterConfig, Session, Signal};
use scxmlrt_model::{DataModelKind, Document, DocumentBuilder, HistoryKind, ModelError, SendInfo};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Red, green and yellow driven by delayed `timer` sends; shuts off after
/// `cycles` complete rounds. `maintenance` switches to flashing until
/// `resume` restores the last phase.
fn traffic_light(cycles: u32) -> Result<Document, ModelError> {
    let mut b = DocumentBuilder::new("traffic_light");
    b.data_model(DataModelKind::Json);
    let root = b.root();
    let limit = cycles.to_string();
    b.data(root, &[("rounds", Some("0")), ("limit", Some(limit.as_str()))]);

    let operating = b.state("operating");
    let history = b.history_in(operating, "last_phase", HistoryKind::Shallow);
    let red = b.state_in(operating, "red");
    let green = b.state_in(operating, "green");
    let yellow = b.state_in(operating, "yellow");
    let flashing = b.state("flashing");
    let off = b.final_state("off");
    b.initial(history).target(red).add();

    for (state, delay) in [(red, "2s"), (green, "2s"), (yellow, "500ms")] {
        let timer = b.send(SendInfo {
            event: Some("timer".into()),
            id: Some("phase".into()),
            delay: Some(delay.into()),
            ..Default::default()
        });
        let cancel = b.cancel("phase");
        b.on_entry(state, vec![timer]);
        b.on_exit(state, vec![cancel]);
    }

    let announce = b.log("rounds", "rounds");
    let count = b.assign("rounds", "rounds + 1");
    b.transition(red).on("timer").target(green).add();
    b.transition(green).on("timer").target(yellow).add();
    b.transition(yellow)
        .on("timer")
        .target(red)
        .content(vec![count, announce])
        .add();
    b.transition(operating)
        .cond("rounds >= limit")
        .target(off)
        .add();
    b.transition(operating)
        .on("maintenance")
        .target(flashing)
        .add();
    b.transition(flashing).on("resume").target(history).add();
    b.build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if SCXMLRT_CONFIG is set, then env overrides)
    let config = match InterpreterConfig::load() {
        Ok(c) => c,
        Err(e) => {
            if std::env::var("SCXMLRT_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            InterpreterConfig::default()
        }
    };

    let cycles = std::env::var("SCXMLRT_DEMO_CYCLES")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n: &u32| *n > 0)
        .unwrap_or(3);

    let interpreter = Interpreter::builder(traffic_light(cycles)?)
        .with_config(config)
        .build()?;

    tracing::info!("Starting session {}", interpreter.session_id());
    tracing::info!("  Rounds: {}", cycles);

    let handle = Session::spawn(interpreter);
    let mut signals = handle.subscribe();

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Ok(Signal::StateEntered(state)) => tracing::info!("-> {}", state),
                Ok(Signal::Log { label, message }) => tracing::info!("{}: {}", label, message),
                Ok(Signal::Finished) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(n)) => tracing::warn!("Skipped {} signals", n),
                Ok(_) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping session...");
                handle.shutdown();
                break;
            }
        }
    }

    handle.join().await?;
    tracing::info!("Session stopped");
    Ok(())
}
