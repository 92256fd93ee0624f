//! User cache and upstream directory commands.
//!
//! # Usage
//!
//! ```bash
//! rc-cli users clear
//! rc-cli users list
//! rc-cli users reconcile --cache data/users.json
//! ```

use std::path::Path;

use tracing::info;

use replica_chat_server::services::Reconciler;
use replica_chat_server::store::UserCache;

use super::connect;

/// Reset the cache file to `{}`.
pub async fn clear(cache: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let users = UserCache::new(cache);
    let before = users.all().await.len();
    users.clear().await?;

    info!(path = %cache.display(), removed = before, "User cache cleared");
    Ok(())
}

/// Print every upstream user with its id, email, creation time, and linked
/// account count.
#[allow(clippy::print_stdout)]
pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let (client, resilience) = connect()?;
    let users = client.list_users(resilience.request_timeout).await?;

    if users.is_empty() {
        println!("No users registered upstream.");
        return Ok(());
    }

    println!("{} user(s) upstream:", users.len());
    for (index, user) in users.iter().enumerate() {
        println!();
        println!("{}. {}", index + 1, user.id);
        println!("   email:   {}", user.email.as_deref().unwrap_or("-"));
        println!(
            "   created: {}",
            user.created_at
                .map_or_else(|| "-".to_string(), |at| at.to_rfc3339())
        );
        println!(
            "   linked accounts: {}",
            user.linked_accounts.as_ref().map_or(0, Vec::len)
        );
    }
    Ok(())
}

/// Rewrite cached ids that disagree with upstream and report the rest.
#[allow(clippy::print_stdout)]
pub async fn reconcile(cache: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (client, resilience) = connect()?;
    let reconciler = Reconciler::new(client, UserCache::new(cache), resilience);

    let report = reconciler.reconcile_cache().await?;

    for healed in &report.healed {
        println!("healed    {}  {} -> {}", healed.user.email, healed.previous, healed.user.id);
    }
    for user in &report.unconfirmed {
        println!("unknown   {}  {} (not listed upstream)", user.email, user.id);
    }
    println!(
        "{} healed, {} confirmed, {} not found upstream",
        report.healed.len(),
        report.confirmed,
        report.unconfirmed.len()
    );
    Ok(())
}
