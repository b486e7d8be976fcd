//! Demo 2: Mark Ready
//!
//! Showcases: optimistic mutation confirmed over the socket or REST
//!
//! Run: TABLESYNC_API_URL=https://api.example.com \
//!      TABLESYNC_TOKEN=... TABLESYNC_RESTAURANT=rest-1 \
//!      cargo run --bin mark_ready -- order-42

use colored::*;
use std::time::Instant;
use tablesync_sdk::prelude::*;
use tracing_subscriber::EnvFilter;

fn required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(name).map_err(|_| format!("{} is not set", name).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tablesync=debug")),
        )
        .init();

    let order_id = std::env::args()
        .nth(1)
        .ok_or("usage: mark_ready <order-id>")?;

    let client = SyncClient::from_env()?;
    let session = client.session(AuthToken::new(required("TABLESYNC_TOKEN")?)?);
    let orders = session
        .orders(SubscriptionKey::new(required("TABLESYNC_RESTAURANT")?)?)
        .await?;

    // Give the socket a moment so the mutation can go realtime
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    println!("  Channel state: {}", orders.state().to_string().cyan());

    let started = Instant::now();
    match orders.mutate(&order_id, Patch::status("ready")).await {
        Ok(order) => println!(
            "{} {} is {} ({:?})",
            "✓".green(),
            order.id.cyan(),
            order.status.to_string().green(),
            started.elapsed()
        ),
        Err(e) => println!("{} {} rolled back: {}", "✗".red(), order_id, e),
    }

    session.logout().await;
    Ok(())
}
