//! Space-delimited value lists stored as node data.

use ensemble_common::{CoordError, Result};
use regex::Regex;

use crate::client::CoordinationClient;
use crate::nodes;

/// Tokens stored at `path`, empty if the node is missing or blank
pub async fn values(client: &dyn CoordinationClient, path: &str) -> Result<Vec<String>> {
    let data = nodes::get_string_data(client, path).await?;
    Ok(tokens(data.as_deref().unwrap_or_default()))
}

/// Append `value` to the list at `path`, creating the node if needed.
///
/// Duplicates are kept.
pub async fn add(client: &dyn CoordinationClient, path: &str, value: &str) -> Result<()> {
    let mut data = nodes::get_string_data(client, path)
        .await?
        .unwrap_or_default();
    if !data.is_empty() {
        data.push(' ');
    }
    data.push_str(value);

    nodes::set_data(client, path, Some(data.as_bytes())).await
}

/// Remove every token at `path` that fully matches the regular expression `pattern`.
///
/// Returns the number of tokens removed. A missing node is left alone.
pub async fn remove(client: &dyn CoordinationClient, path: &str, pattern: &str) -> Result<usize> {
    let matcher = Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| CoordError::InvalidArgument(format!("Invalid pattern {pattern:?}: {e}")))?;

    if client.exists(path).await?.is_none() {
        return Ok(0);
    }

    let current = tokens(
        nodes::get_string_data(client, path)
            .await?
            .as_deref()
            .unwrap_or_default(),
    );
    let before = current.len();
    let kept: Vec<String> = current
        .into_iter()
        .filter(|token| !matcher.is_match(token))
        .collect();

    let removed = before - kept.len();
    if removed > 0 {
        tracing::debug!(path, pattern, removed, "Removing values");
        nodes::set_data(client, path, Some(kept.join(" ").as_bytes())).await?;
    }
    Ok(removed)
}

fn tokens(data: &str) -> Vec<String> {
    data.split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryStore;
    use crate::nodes::get_string_data;

    #[tokio::test]
    async fn test_add_then_remove() {
        let client = MemoryStore::new().session();
        add(&client, "/fabric/parents", "a").await.unwrap();
        add(&client, "/fabric/parents", "b").await.unwrap();
        assert_eq!(
            get_string_data(&client, "/fabric/parents").await.unwrap().as_deref(),
            Some("a b")
        );

        assert_eq!(remove(&client, "/fabric/parents", "a").await.unwrap(), 1);
        assert_eq!(
            get_string_data(&client, "/fabric/parents").await.unwrap().as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_add_keeps_duplicates() {
        let client = MemoryStore::new().session();
        add(&client, "/v", "x").await.unwrap();
        add(&client, "/v", "x").await.unwrap();
        assert_eq!(values(&client, "/v").await.unwrap(), vec!["x", "x"]);
    }

    #[tokio::test]
    async fn test_remove_uses_full_match() {
        let client = MemoryStore::new().session();
        nodes::set_data(&client, "/v", Some(b"  feature-a   feature-ab b-feature-a  "))
            .await
            .unwrap();

        // Substring semantics would also drop the other two tokens.
        assert_eq!(remove(&client, "/v", "feature-a").await.unwrap(), 1);
        assert_eq!(
            values(&client, "/v").await.unwrap(),
            vec!["feature-ab", "b-feature-a"]
        );

        assert_eq!(remove(&client, "/v", "feature-.*|b-.*").await.unwrap(), 2);
        assert!(values(&client, "/v").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_node_is_noop() {
        let client = MemoryStore::new().session();
        assert_eq!(remove(&client, "/none", ".*").await.unwrap(), 0);
        assert!(client.exists("/none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_without_match_leaves_data() {
        let client = MemoryStore::new().session();
        nodes::set_data(&client, "/v", Some(b"a  b")).await.unwrap();
        assert_eq!(remove(&client, "/v", "c").await.unwrap(), 0);
        assert_eq!(
            get_string_data(&client, "/v").await.unwrap().as_deref(),
            Some("a  b")
        );
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let client = MemoryStore::new().session();
        assert!(matches!(
            remove(&client, "/v", "(").await,
            Err(CoordError::InvalidArgument(_))
        ));
    }
}
