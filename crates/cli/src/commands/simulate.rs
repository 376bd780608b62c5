//! Full handshake against an in-process remote board.
//!
//! The host side is a real [`BridgeController`] over in-memory collaborators;
//! the remote side is a [`RemoteDocument`](pb_core::remote::RemoteDocument)
//! driven through the loopback transport.

use color_eyre::eyre::{bail, eyre};
use colored::Colorize;
use pb_core::bridge::{BridgeController, StatusCallback};
use pb_core::config::BridgeConfig;
use pb_core::loopback::{spawn_loopback, RemoteAction, RemoteHandle};
use pb_core::remote::RuntimeEvent;
use pb_core::store::{Contact, ContactLookup, Deal, DealStore, MemoryContacts, MemoryDealStore};
use pb_core::window::HostWindow;
use pb_protocol::{ConnectionState, ConnectionStatus, Message, MessageType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;

const HOST_ORIGIN: &str = "https://crm.example.com";
const CROSS_ORIGIN_REMOTE: &str = "https://pipeline.example.com/board";
const SAME_ORIGIN_REMOTE: &str = "https://crm.example.com/pipeline";

const MOVE_TIMEOUT: Duration = Duration::from_secs(5);

fn demo_data(count: usize, stage: &str) -> (Vec<Deal>, Vec<Contact>) {
    (1..=count)
        .map(|i| {
            let deal = Deal::new(
                format!("deal-{i}"),
                format!("Demo deal {i}"),
                1_000.0 * i as f64,
                stage,
            )
            .with_contact(format!("contact-{i}"));
            let contact = Contact {
                id: format!("contact-{i}"),
                name: format!("Customer {i}"),
                company: (i % 2 == 1).then(|| format!("Company {i}")),
            };
            (deal, contact)
        })
        .unzip()
}

fn print_status(status: &ConnectionStatus) {
    let label = status.state.to_string();
    let state = match status.state {
        ConnectionState::Connected => label.as_str().green(),
        ConnectionState::Error => label.as_str().red(),
        _ => label.as_str().yellow(),
    };
    print!(
        "  status: {state:<16} attempts={} deals={}",
        status.connection_attempts, status.deal_count
    );
    match &status.error_message {
        Some(error) => println!(" error={error}"),
        None => println!(),
    }
}

async fn wait_for_snapshot(remote: &mut RemoteHandle, limit: Duration) -> color_eyre::Result<()> {
    let initialized = timeout(limit, async {
        while let Some(event) = remote.next_event().await {
            if let RuntimeEvent::Initialized { deals, stages, .. } = event {
                return Some((deals.len(), stages.len()));
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    match initialized {
        Some((deals, stages)) => {
            println!("  remote board received {deals} deals in {stages} stages");
            Ok(())
        }
        None => Err(eyre!("remote board never received CRM_INIT")),
    }
}

pub async fn run(deal_count: usize, cross_origin: bool) -> color_eyre::Result<()> {
    let remote_url = if cross_origin {
        CROSS_ORIGIN_REMOTE
    } else {
        SAME_ORIGIN_REMOTE
    };
    let config = BridgeConfig::new(remote_url)?.with_host_origin(HOST_ORIGIN);
    let (host_origin, remote_origin) = (config.host_origin.clone(), config.remote_origin.clone());
    let stages = config.stages.clone();
    let first_stage = stages
        .first()
        .map(|stage| stage.id.clone())
        .ok_or_else(|| eyre!("no pipeline stages configured"))?;
    let handshake_limit = config.settle_delay + config.ready_timeout + config.handshake_timeout;

    let mode = if cross_origin {
        "cross-origin"
    } else {
        "same origin"
    };
    println!(
        "{} host {host_origin} -> remote {remote_origin} ({mode})",
        "Simulating".cyan().bold()
    );

    let (deals, contacts) = demo_data(deal_count, &first_stage);
    let store = Arc::new(MemoryDealStore::with_deals(deals));
    let contacts: Arc<dyn ContactLookup> = Arc::new(MemoryContacts::new(contacts));

    let (status_tx, mut statuses) = mpsc::unbounded_channel();
    let on_status: StatusCallback = Arc::new(move |status: &ConnectionStatus| {
        // The receiver lives until the end of the run.
        let _ = status_tx.send(status.clone());
    });

    let window = HostWindow::new();
    let bridge = BridgeController::new(
        config,
        window.clone(),
        store.clone(),
        Some(contacts),
        on_status,
    )?;

    let (moved_tx, mut moved) = mpsc::unbounded_channel();
    bridge.on_message(MessageType::DealStageChanged, move |_, message| {
        if let Message::DealStageChanged(change) = message {
            let _ = moved_tx.send(change.clone());
        }
    });

    let (frame, mut remote) = spawn_loopback(window, &host_origin, &remote_origin);
    bridge.set_iframe(frame)?;
    remote.load()?;

    loop {
        let status = timeout(handshake_limit, statuses.recv())
            .await
            .ok()
            .flatten()
            .ok_or_else(|| eyre!("no status change within {handshake_limit:?}"))?;
        print_status(&status);
        match status.state {
            ConnectionState::Connected => break,
            ConnectionState::Error => bail!(
                "handshake failed: {}",
                status.error_message.unwrap_or_default()
            ),
            _ => {}
        }
    }
    wait_for_snapshot(&mut remote, handshake_limit).await?;

    match stages.get(1) {
        Some(target) if deal_count > 0 => {
            remote
                .perform(RemoteAction::MoveDeal {
                    deal_id: "deal-1".to_string(),
                    stage: target.id.clone(),
                })
                .await?;
            let change = timeout(MOVE_TIMEOUT, moved.recv())
                .await
                .ok()
                .flatten()
                .ok_or_else(|| eyre!("stage change never reached the host store"))?;
            info!(deal_id = %change.deal_id, stage = %change.new_stage, "simulated move applied");
            println!(
                "  remote moved {} from {} to {}",
                change.deal_id,
                change.old_stage.as_deref().unwrap_or("?"),
                change.new_stage
            );
        }
        _ => println!("  no deals to move"),
    }

    println!("{}", "Host store".bold());
    for deal in store.fetch_deals()? {
        println!(
            "  {:<8} {:<14} {:>10.2}  {}",
            deal.id, deal.title, deal.value, deal.stage
        );
    }

    bridge.destroy();
    while let Ok(status) = statuses.try_recv() {
        print_status(&status);
    }
    Ok(())
}
