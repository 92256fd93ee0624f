//! Bulk replica cleanup.
//!
//! Lists up to one page of the organization's replicas and deletes them one
//! by one. A 404 on delete means the replica is already gone.

use serde::Deserialize;
use tracing::{info, warn};

use replica_chat_core::ReplicaId;
use replica_chat_server::upstream::REPLICA_PAGE_SIZE;
use replica_chat_server::upstream::types::normalize_list;

use super::connect;

/// The listing fields this command needs.
#[derive(Debug, Deserialize)]
struct ListedReplica {
    uuid: ReplicaId,
    #[serde(default)]
    name: String,
}

/// Counts from one cleanup run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: usize,
    pub already_gone: usize,
    pub failed: usize,
}

/// Delete every listed replica. Without `confirm` only print what would go.
#[allow(clippy::print_stdout)]
pub async fn delete_all(confirm: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (client, resilience) = connect()?;
    let timeout = resilience.request_timeout;

    let response = client
        .list_replicas(None, Some(REPLICA_PAGE_SIZE), timeout)
        .await?
        .error_for_status()?;
    let replicas: Vec<ListedReplica> = normalize_list(response.body)?;

    if replicas.is_empty() {
        info!("No replicas to delete");
        return Ok(());
    }

    for replica in &replicas {
        println!("{}  {}", replica.uuid, replica.name);
    }

    if !confirm {
        println!(
            "{} replica(s) would be deleted. Re-run with --yes to delete them.",
            replicas.len()
        );
        return Ok(());
    }

    let mut summary = DeleteSummary::default();
    for replica in &replicas {
        match client.delete_replica(&replica.uuid, timeout).await {
            Ok(response) if response.is_success() => {
                info!(uuid = %replica.uuid, name = %replica.name, "Deleted replica");
                summary.deleted += 1;
            }
            Ok(response) if response.status.as_u16() == 404 => {
                info!(uuid = %replica.uuid, "Replica already deleted");
                summary.already_gone += 1;
            }
            Ok(response) => {
                warn!(uuid = %replica.uuid, status = %response.status, body = %response.body, "Failed to delete replica");
                summary.failed += 1;
            }
            Err(e) => {
                warn!(uuid = %replica.uuid, error = %e, "Failed to delete replica");
                summary.failed += 1;
            }
        }
    }

    info!(
        deleted = summary.deleted,
        already_gone = summary.already_gone,
        failed = summary.failed,
        "Replica cleanup finished"
    );

    if summary.failed > 0 {
        return Err(format!("{} replica(s) could not be deleted", summary.failed).into());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_listing_reads_items_envelope() {
        let body = json!({
            "success": true,
            "items": [
                { "uuid": "r-1", "name": "Ada", "ownerID": "u-1" },
                { "uuid": "r-2" }
            ]
        });

        let replicas: Vec<ListedReplica> = normalize_list(body).unwrap();
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[0].uuid.as_str(), "r-1");
        assert_eq!(replicas[0].name, "Ada");
        assert!(replicas[1].name.is_empty());
    }
}
