//! Recursive delete that tolerates concurrent writers.
//!
//! The store reports `NotEmpty` when a child appears between enumeration and
//! delete; the subtree delete is then simply run again. No lock is taken.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashSet;

use ensemble_common::constants::ROOT_PATH;
use ensemble_common::{CoordError, Result};

use crate::client::CoordinationClient;
use crate::paths;

/// Delete `path` and everything below it. A missing node is not an error.
pub async fn delete_safe(client: &dyn CoordinationClient, path: &str) -> Result<()> {
    paths::validate(path)?;
    if path == ROOT_PATH {
        return Err(CoordError::InvalidArgument(
            "The root node cannot be deleted".to_string(),
        ));
    }
    delete_subtree(client, path.to_string()).await
}

fn delete_subtree<'a>(client: &'a dyn CoordinationClient, path: String) -> BoxFuture<'a, Result<()>> {
    async move {
        loop {
            let children = match client.children(&path).await {
                Ok(children) => children,
                Err(CoordError::NoNode(_)) => return Ok(()),
                Err(e) => return Err(e),
            };

            for child in children {
                delete_subtree(client, paths::join(&path, &child)).await?;
            }

            match client.delete(&path).await {
                Ok(()) | Err(CoordError::NoNode(_)) => {
                    tracing::debug!(path = %path, "Deleted node");
                    return Ok(());
                }
                Err(CoordError::NotEmpty(_)) => {
                    tracing::debug!(path = %path, "Child appeared during delete, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
    }
    .boxed()
}

/// Delete `path`, then prune ancestors that were left empty.
///
/// Pruning walks upwards and stops at the first ancestor that is in
/// `boundaries`, still has children, or is the root. A boundary is never
/// deleted. Boundaries must be valid absolute paths.
pub async fn delete_safe_up_to(
    client: &dyn CoordinationClient,
    path: &str,
    boundaries: &[&str],
) -> Result<()> {
    paths::validate(path)?;
    for boundary in boundaries {
        paths::validate(boundary)?;
    }
    if client.exists(path).await?.is_none() {
        return Ok(());
    }
    delete_safe(client, path).await?;

    let boundaries: HashSet<&str> = boundaries.iter().copied().collect();
    let mut current = paths::parent(path)?;

    while current != ROOT_PATH && !boundaries.contains(current.as_str()) {
        match client.delete(&current).await {
            Ok(()) => {
                tracing::debug!(path = %current, "Pruned empty ancestor");
            }
            Err(CoordError::NotEmpty(_)) | Err(CoordError::NoNode(_)) => break,
            Err(e) => return Err(e),
        }
        current = paths::parent(&current)?;
    }

    Ok(())
}
