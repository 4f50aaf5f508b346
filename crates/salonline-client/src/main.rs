//! # salonline-chat
//!
//! Headless host for the support widget. Reads commands from stdin and
//! prints widget events to stdout as JSON lines.
//!
//! Without `SALONLINE_BACKEND_URL` it runs in demo mode against an
//! in-memory inbox; `/op` and `/resolve` then play the operator.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use salonline_client::inbox::{HttpInboxAdapter, InMemoryInbox, InboxAdapter};
use salonline_client::notify::{Chime, Silent, TerminalBell};
use salonline_client::{init_tracing, WidgetConfig, WidgetEvent, WidgetHandle};
use salonline_shared::constants::APP_NAME;
use salonline_store::{IdentityStore, SqliteIdentityStore};

const HELP: &str = "\
commands:
  /intake NAME EMAIL [PHONE]   start the intake; the next line is your first message
  /open | /close               open or close the conversation view
  /continue | /new             after a resolution: keep the ticket or start over
  /forget                      drop the stored identity
  /snapshot                    print the current widget state
  /quit
demo mode only:
  /op TEXT                     reply as the operator
  /resolve [NOTE]              resolve the open ticket
anything else is sent as a message ([image:URL] style tags attach files)";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting {} support chat v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = WidgetConfig::from_env();
    info!(
        backend = ?config.backend_url,
        source = %config.source,
        data_dir = ?config.data_dir,
        "Loaded configuration"
    );

    let store: Arc<dyn IdentityStore> =
        Arc::new(SqliteIdentityStore::open(config.data_dir.as_deref())?);
    let chime: Arc<dyn Chime> = if config.chime_enabled {
        Arc::new(TerminalBell)
    } else {
        Arc::new(Silent)
    };

    match config.backend_url.clone() {
        Some(url) => {
            let adapter = Arc::new(HttpInboxAdapter::new(&url, config.api_key.clone())?);
            info!(backend = %url, "Using HTTP operator inbox");
            run(adapter, None, store, chime, &config).await
        }
        None => {
            let inbox = Arc::new(InMemoryInbox::new());
            info!("No backend configured, running in demo mode");
            run(Arc::clone(&inbox), Some(inbox), store, chime, &config).await
        }
    }
}

async fn run<A: InboxAdapter>(
    adapter: Arc<A>,
    demo: Option<Arc<InMemoryInbox>>,
    store: Arc<dyn IdentityStore>,
    chime: Arc<dyn Chime>,
    config: &WidgetConfig,
) -> anyhow::Result<()> {
    let (widget, events) = salonline_client::spawn(adapter, store, chime, config);
    tokio::spawn(print_events(events));

    let snapshot = widget.snapshot().await?;
    if snapshot.visitor.is_none() {
        println!("{HELP}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut intake: Option<(String, String, String)> = None;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        let outcome = match command {
            "/quit" => break,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/intake" => {
                let mut parts = rest.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(name), Some(email)) => {
                        let phone = parts.next().unwrap_or_default();
                        intake = Some((name.to_string(), email.to_string(), phone.to_string()));
                        println!("type your first message");
                    }
                    _ => println!("usage: /intake NAME EMAIL [PHONE]"),
                }
                Ok(())
            }
            "/open" => widget.open_view().await,
            "/close" => widget.close_view().await,
            "/continue" => widget.continue_subject().await,
            "/new" => widget.new_request().await,
            "/forget" => widget.forget().await,
            "/snapshot" => match widget.snapshot().await {
                Ok(snapshot) => {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            "/op" | "/resolve" => {
                match &demo {
                    Some(inbox) => operate(&widget, inbox, command, rest).await,
                    None => println!("{command} is only available in demo mode"),
                }
                Ok(())
            }
            _ => match intake.take() {
                Some((name, email, phone)) => {
                    widget.submit_intake(&name, &email, &phone, line).await
                }
                None => widget.send_message(line, None).await,
            },
        };

        if let Err(e) = outcome {
            println!("error: {e}");
        }
    }

    widget.shutdown().await?;
    Ok(())
}

/// Play the operator side of the demo inbox.
async fn operate(widget: &WidgetHandle, inbox: &InMemoryInbox, command: &str, text: &str) {
    let Ok(snapshot) = widget.snapshot().await else {
        return;
    };
    let Some(visitor) = snapshot.visitor else {
        println!("no visitor yet, use /intake first");
        return;
    };

    if command == "/op" {
        let ticket = inbox.operator_reply(&visitor.email, text);
        info!(ticket = %ticket, "Operator replied");
        return;
    }

    let ticket = visitor
        .ticket_id
        .or_else(|| inbox.open_ticket(&visitor.email));
    match ticket {
        Some(ticket) if inbox.resolve(&ticket, text) => {}
        _ => warn!(email = %visitor.email, "No open ticket to resolve"),
    }
}

async fn print_events(mut events: mpsc::Receiver<WidgetEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(error = %e, "Failed to encode widget event"),
        }
    }
}
