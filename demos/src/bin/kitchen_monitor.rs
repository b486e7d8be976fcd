//! Demo 1: Kitchen Monitor
//!
//! Showcases: live order board, REST fallback while the socket is down,
//! new-order chime, order refreshes driven by notifications
//!
//! Run: TABLESYNC_API_URL=https://api.example.com \
//!      TABLESYNC_WS_URL=wss://rt.example.com \
//!      TABLESYNC_TOKEN=... TABLESYNC_RESTAURANT=rest-1 TABLESYNC_USER=user-1 \
//!      cargo run --bin kitchen_monitor

use colored::*;
use tablesync_sdk::prelude::*;
use tracing_subscriber::EnvFilter;

fn required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(name).map_err(|_| format!("{} is not set", name).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tablesync=info")),
        )
        .init();

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  KITCHEN MONITOR".cyan().bold());
    println!("{}", "  tablesync Demo - Live Orders With REST Fallback".cyan());
    println!("{}", "═".repeat(65).cyan());
    println!();

    let token = AuthToken::new(required("TABLESYNC_TOKEN")?)?;
    let restaurant = SubscriptionKey::new(required("TABLESYNC_RESTAURANT")?)?;
    let user = SubscriptionKey::new(required("TABLESYNC_USER")?)?;

    let hooks = Hooks::new()
        .on_created(|created| {
            if created.channel == Channel::Orders {
                // Terminal bell stands in for the kitchen chime
                print!("\x07");
            }
        })
        .on_reconnect_attempt(|attempt, delay| {
            println!(
                "  {} reconnect attempt {} in {:?}",
                "↻".yellow(),
                attempt,
                delay
            );
        });

    let client = SyncClientBuilder::from_env()?.with_hooks(hooks).build()?;
    if !client.is_realtime_enabled() {
        println!("{} Realtime disabled, polling only", "!".yellow());
    }

    let session = client.session(token);
    let dashboard = session.dashboard(restaurant, user).await?;

    println!(
        "{} {} orders loaded, {} active",
        "✓".green(),
        dashboard.orders().len(),
        dashboard.active_order_count()
    );
    println!("{} {} unread notifications\n", "✓".green(), dashboard.unread_count());

    let mut orders = dashboard.orders().subscribe();
    let mut notifications = dashboard.notifications().subscribe();

    loop {
        let timestamp = chrono::Local::now().format("%H:%M:%S");
        let stamp = format!("[{}]", timestamp).dimmed();

        tokio::select! {
            event = orders.recv() => match event {
                Ok(SyncEvent::Data(DataEvent::Created(order))) => {
                    println!(
                        "  {} {} new order {} table {:?} total {}",
                        stamp,
                        "●".green(),
                        order.id.cyan(),
                        order.table_number,
                        order.total_amount
                    );
                }
                Ok(SyncEvent::Data(DataEvent::Updated(order))) => {
                    println!("  {} {} {} is {}", stamp, "●".blue(), order.id.cyan(), order.status);
                }
                Ok(SyncEvent::Data(DataEvent::Replaced { count, source, .. })) => {
                    println!("  {} {} {} orders ({:?})", stamp, "⟳".blue(), count, source);
                }
                Ok(SyncEvent::Connection(ConnectionEvent::Connected { .. })) => {
                    println!("  {} {} live", stamp, "●".green());
                }
                Ok(SyncEvent::Connection(ConnectionEvent::FallbackStarted { interval })) => {
                    println!(
                        "  {} {} socket down, polling every {:?}",
                        stamp,
                        "●".yellow(),
                        interval
                    );
                }
                Ok(SyncEvent::Connection(ConnectionEvent::AuthRejected { reason })) => {
                    println!("  {} {} signed out: {}", stamp, "✗".red(), reason);
                    break;
                }
                Ok(SyncEvent::Error(error)) => {
                    println!("  {} {} {:?}", stamp, "✗".red(), error);
                }
                Ok(_) => {}
                Err(_) => break,
            },
            event = notifications.recv() => {
                if let Ok(SyncEvent::Data(DataEvent::Created(notification))) = event {
                    println!(
                        "  {} {} {}: {}",
                        stamp,
                        "✉".magenta(),
                        notification.title.bold(),
                        notification.message
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\n{} Signing out", "✓".green());
    session.logout().await;
    Ok(())
}
