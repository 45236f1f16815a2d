//! Node data helpers layered over a [`CoordinationClient`].
//!
//! These absorb the store's race errors where the caller only cares about
//! the end state: a missing node reads as `None`, a concurrent creator
//! winning a create counts as success.

use ensemble_common::{CoordError, CreateMode, Result};

use crate::client::CoordinationClient;
use crate::paths;

/// Payload of `path`, or `None` if the node does not exist
pub async fn get_data_safe(client: &dyn CoordinationClient, path: &str) -> Result<Option<Vec<u8>>> {
    match client.get_data(path).await {
        Ok(data) => Ok(data),
        Err(CoordError::NoNode(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Payload of `path` decoded as UTF-8, `None` if absent or empty-valued
pub async fn get_string_data(client: &dyn CoordinationClient, path: &str) -> Result<Option<String>> {
    match get_data_safe(client, path).await? {
        Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|_| {
            CoordError::InvalidArgument(format!("Node {path} does not hold UTF-8 text"))
        }),
        None => Ok(None),
    }
}

/// Write `data` to `path`, creating it (and missing parents) as persistent if absent
pub async fn set_data(client: &dyn CoordinationClient, path: &str, data: Option<&[u8]>) -> Result<()> {
    set_data_with_mode(client, path, data, CreateMode::Persistent).await
}

/// Write `data` to `path`, creating it with `mode` if absent
pub async fn set_data_with_mode(
    client: &dyn CoordinationClient,
    path: &str,
    data: Option<&[u8]>,
    mode: CreateMode,
) -> Result<()> {
    paths::validate(path)?;

    loop {
        if client.exists(path).await?.is_none() {
            match client.create(path, data, mode, true).await {
                Ok(_) => return Ok(()),
                // Someone else created it first; fall through to overwrite.
                Err(CoordError::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        match client.set_data(path, data).await {
            Ok(()) => return Ok(()),
            // Deleted between the check and the write; create it again.
            Err(CoordError::NoNode(_)) => {
                tracing::debug!(path, "Node vanished before write, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Create `path` as a persistent node with `value`, but only if it does not exist
///
/// Returns true when this call created the node.
pub async fn create_default(client: &dyn CoordinationClient, path: &str, value: &str) -> Result<bool> {
    if client.exists(path).await?.is_some() {
        return Ok(false);
    }
    match client
        .create(path, Some(value.as_bytes()), CreateMode::Persistent, true)
        .await
    {
        Ok(_) => Ok(true),
        Err(CoordError::NodeExists(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Child names of `path`, empty if the node does not exist
pub async fn children_safe(client: &dyn CoordinationClient, path: &str) -> Result<Vec<String>> {
    match client.children(path).await {
        Ok(children) => Ok(children),
        Err(CoordError::NoNode(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Full paths of every descendant of `path`, pre-order
pub async fn all_children(client: &dyn CoordinationClient, path: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![path.to_string()];

    while let Some(current) = stack.pop() {
        let children = children_safe(client, &current).await?;
        // Reverse so the walk visits children in listing order.
        for child in children.iter().rev() {
            stack.push(paths::join(&current, child));
        }
        if current != path {
            out.push(current);
        }
    }

    Ok(out)
}

/// Latest modification time over the leaves of the subtree rooted at `path`
///
/// A node with children contributes only through its descendants.
pub async fn last_modified(client: &dyn CoordinationClient, path: &str) -> Result<i64> {
    let mut latest = 0;
    let mut stack = vec![path.to_string()];

    while let Some(current) = stack.pop() {
        let children = children_safe(client, &current).await?;
        if children.is_empty() {
            // Leaves deleted mid-walk no longer count.
            if let Some(stat) = client.exists(&current).await? {
                latest = latest.max(stat.mtime);
            }
        } else {
            stack.extend(children.iter().map(|child| paths::join(&current, child)));
        }
    }

    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryStore;

    #[tokio::test]
    async fn test_get_data_safe_missing() {
        let client = MemoryStore::new().session();
        assert!(get_data_safe(&client, "/nope").await.unwrap().is_none());
        assert!(get_string_data(&client, "/nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_data_creates_then_overwrites() {
        let client = MemoryStore::new().session();
        set_data(&client, "/a/b/c", Some(b"one")).await.unwrap();
        assert_eq!(
            get_string_data(&client, "/a/b/c").await.unwrap().as_deref(),
            Some("one")
        );

        set_data(&client, "/a/b/c", Some(b"two")).await.unwrap();
        assert_eq!(
            get_string_data(&client, "/a/b/c").await.unwrap().as_deref(),
            Some("two")
        );
    }

    #[tokio::test]
    async fn test_set_data_rejects_relative_path() {
        let client = MemoryStore::new().session();
        let err = set_data(&client, "a/b", Some(b"x")).await.unwrap_err();
        assert!(matches!(err, CoordError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_create_default_never_overwrites() {
        let client = MemoryStore::new().session();
        assert!(create_default(&client, "/cfg", "first").await.unwrap());
        assert!(!create_default(&client, "/cfg", "second").await.unwrap());
        assert_eq!(
            get_string_data(&client, "/cfg").await.unwrap().as_deref(),
            Some("first")
        );
    }

    #[tokio::test]
    async fn test_all_children_pre_order() {
        let client = MemoryStore::new().session();
        for path in ["/r/a/x", "/r/a/y", "/r/b"] {
            set_data(&client, path, None).await.unwrap();
        }

        let all = all_children(&client, "/r").await.unwrap();
        assert_eq!(all, vec!["/r/a", "/r/a/x", "/r/a/y", "/r/b"]);
        assert!(children_safe(&client, "/missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_modified_uses_leaves() {
        let client = MemoryStore::new().session();
        set_data(&client, "/t/a", Some(b"1")).await.unwrap();
        set_data(&client, "/t/b", Some(b"2")).await.unwrap();
        set_data(&client, "/t/a", Some(b"3")).await.unwrap();

        let a = client.exists("/t/a").await.unwrap().unwrap();
        let b = client.exists("/t/b").await.unwrap().unwrap();
        assert_eq!(last_modified(&client, "/t").await.unwrap(), a.mtime.max(b.mtime));
        assert_eq!(last_modified(&client, "/t").await.unwrap(), a.mtime);
    }
}
