//! Additive subtree copy.
//!
//! Copy only seeds: a destination node that already exists is neither
//! overwritten nor descended into, so re-running after a partial failure
//! converges on the same tree. Ephemeral source nodes are never copied.

use ensemble_common::{CoordError, CopyReport, CreateMode, Result};

use crate::client::CoordinationClient;
use crate::nodes;
use crate::paths;

/// Copy every persistent descendant of `path` from `source` into `dest`
pub async fn copy_between(
    source: &dyn CoordinationClient,
    dest: &dyn CoordinationClient,
    path: &str,
) -> Result<CopyReport> {
    paths::validate(path)?;
    copy_tree(source, dest, path, path).await
}

/// Copy every persistent descendant of `from` to the same relative place under `to`
pub async fn copy_within(client: &dyn CoordinationClient, from: &str, to: &str) -> Result<CopyReport> {
    paths::validate(from)?;
    paths::validate(to)?;

    let nested = to == from || from == "/" || to.starts_with(&format!("{from}/"));
    if nested {
        return Err(CoordError::InvalidArgument(format!(
            "Cannot copy {from} into itself ({to})"
        )));
    }

    copy_tree(client, client, from, to).await
}

async fn copy_tree(
    source: &dyn CoordinationClient,
    dest: &dyn CoordinationClient,
    from: &str,
    to: &str,
) -> Result<CopyReport> {
    let mut report = CopyReport::default();
    let mut stack = vec![(from.to_string(), to.to_string())];

    while let Some((src_parent, dst_parent)) = stack.pop() {
        for child in nodes::children_safe(source, &src_parent).await? {
            let src = paths::join(&src_parent, &child);
            let dst = paths::join(&dst_parent, &child);

            let Some(stat) = source.exists(&src).await? else {
                report.skipped += 1;
                continue;
            };
            if stat.is_ephemeral() {
                tracing::debug!(path = %src, "Skipping ephemeral node");
                report.skipped += 1;
                continue;
            }
            if dest.exists(&dst).await?.is_some() {
                report.skipped += 1;
                continue;
            }

            let data = match source.get_data(&src).await {
                Ok(data) => data,
                Err(CoordError::NoNode(_)) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match dest
                .create(&dst, data.as_deref(), CreateMode::Persistent, true)
                .await
            {
                Ok(_) => {
                    tracing::debug!(from = %src, to = %dst, "Copied node");
                    report.created.push(dst.clone());
                    stack.push((src, dst));
                }
                // A concurrent writer seeded it first; leave its subtree alone.
                Err(CoordError::NodeExists(_)) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }
    }

    tracing::info!(
        from = %from,
        to = %to,
        created = report.created.len(),
        skipped = report.skipped,
        "Tree copy finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryClient, MemoryStore};
    use crate::nodes::{all_children, get_string_data, set_data};

    async fn seed(client: &MemoryClient) {
        set_data(client, "/fabric/configs/a", Some(b"alpha")).await.unwrap();
        set_data(client, "/fabric/configs/a/x", Some(b"ex")).await.unwrap();
        set_data(client, "/fabric/configs/b", Some(b"beta")).await.unwrap();
        client
            .create(
                "/fabric/configs/live",
                Some(b"session"),
                CreateMode::Ephemeral,
                true,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_copy_between_stores() {
        let source = MemoryStore::new().session();
        let dest = MemoryStore::new().session();
        seed(&source).await;

        let report = copy_between(&source, &dest, "/fabric").await.unwrap();
        assert_eq!(report.created.len(), 4);

        assert_eq!(
            get_string_data(&dest, "/fabric/configs/a/x").await.unwrap().as_deref(),
            Some("ex")
        );
        assert_eq!(
            get_string_data(&dest, "/fabric/configs/b").await.unwrap().as_deref(),
            Some("beta")
        );
    }

    #[tokio::test]
    async fn test_copy_skips_ephemeral() {
        let source = MemoryStore::new().session();
        let dest = MemoryStore::new().session();
        seed(&source).await;

        copy_between(&source, &dest, "/fabric").await.unwrap();
        assert!(dest.exists("/fabric/configs/live").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_copy_never_overwrites_and_is_idempotent() {
        let source = MemoryStore::new().session();
        let dest = MemoryStore::new().session();
        seed(&source).await;

        copy_between(&source, &dest, "/fabric").await.unwrap();
        let first = all_children(&dest, "/").await.unwrap();

        // Neither local edits nor later source updates are touched by a re-run.
        set_data(&dest, "/fabric/configs/b", Some(b"local")).await.unwrap();
        set_data(&source, "/fabric/configs/a", Some(b"changed")).await.unwrap();

        let again = copy_between(&source, &dest, "/fabric").await.unwrap();
        assert!(again.created.is_empty());
        assert_eq!(all_children(&dest, "/").await.unwrap(), first);
        assert_eq!(
            get_string_data(&dest, "/fabric/configs/b").await.unwrap().as_deref(),
            Some("local")
        );
        assert_eq!(
            get_string_data(&dest, "/fabric/configs/a").await.unwrap().as_deref(),
            Some("alpha")
        );
    }

    #[tokio::test]
    async fn test_copy_within_store() {
        let client = MemoryStore::new().session();
        seed(&client).await;

        copy_within(&client, "/fabric/configs", "/fabric/backup")
            .await
            .unwrap();
        assert_eq!(
            get_string_data(&client, "/fabric/backup/a/x").await.unwrap().as_deref(),
            Some("ex")
        );
        assert!(client.exists("/fabric/backup/live").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_copy_within_rejects_nested_target() {
        let client = MemoryStore::new().session();
        seed(&client).await;

        let err = copy_within(&client, "/fabric", "/fabric/configs/copy")
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidArgument(_)));
    }
}
