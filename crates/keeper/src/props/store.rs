//! Node-level property reads and diff-preserving writes.

use ensemble_common::{CoordError, CreateMode, Result};
use std::collections::BTreeMap;

use super::document::{PropertiesDocument, parse_map};
use crate::client::{CoordinationClient, NodeWatch};
use crate::nodes;

/// Properties stored at `path`.
///
/// A missing node, an empty node, or data that is not UTF-8 all read as an
/// empty map. Store availability errors are still returned.
pub async fn get_properties(
    client: &dyn CoordinationClient,
    path: &str,
) -> Result<BTreeMap<String, String>> {
    let data = nodes::get_data_safe(client, path).await?;
    Ok(decode(path, data))
}

/// Like [`get_properties`], also registering a one-shot watch on the node
pub async fn get_properties_watched(
    client: &dyn CoordinationClient,
    path: &str,
) -> Result<(BTreeMap<String, String>, NodeWatch)> {
    let (data, watch) = client.get_data_watch(path).await?;
    Ok((decode(path, data), watch))
}

/// Make the properties at `path` equal `properties`.
///
/// Keys in both are updated, new keys appended, missing keys removed. Lines
/// for unchanged keys, comments and blank lines are written back as they were.
pub async fn set_properties(
    client: &dyn CoordinationClient,
    path: &str,
    properties: &BTreeMap<String, String>,
) -> Result<()> {
    if client.exists(path).await?.is_none() {
        match client.create(path, None, CreateMode::Persistent, true).await {
            Ok(_) | Err(CoordError::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let original = match nodes::get_data_safe(client, path).await? {
        Some(bytes) => String::from_utf8(bytes).map_err(|_| {
            CoordError::InvalidArgument(format!("Node {path} does not hold UTF-8 properties"))
        })?,
        None => String::new(),
    };

    let mut doc = PropertiesDocument::parse(&original);
    doc.apply(properties);
    let merged = doc.render();

    tracing::debug!(path, keys = properties.len(), "Writing properties");
    nodes::set_data(client, path, Some(merged.as_bytes())).await
}

fn decode(path: &str, data: Option<Vec<u8>>) -> BTreeMap<String, String> {
    match data.map(String::from_utf8) {
        Some(Ok(text)) => parse_map(&text),
        Some(Err(_)) => {
            tracing::warn!(path, "Ignoring non UTF-8 properties node");
            BTreeMap::new()
        }
        None => BTreeMap::new(),
    }
}
