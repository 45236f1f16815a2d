//! `${scheme:location}` reference expansion against the store.
//!
//! A reference such as `${zk:/fabric/configs/db#url}` is replaced with the
//! data (or a single property) of the referenced node, and the loaded value
//! is expanded again. References that cannot be resolved become empty.

use futures::FutureExt;
use futures::future::BoxFuture;

use ensemble_common::constants::DEFAULT_REFERENCE_SCHEME;
use ensemble_common::Result;

use crate::client::CoordinationClient;
use crate::nodes;
use crate::props::parse_map;

/// Resolves store references embedded in text
pub struct SubstitutionResolver<'a> {
    client: &'a dyn CoordinationClient,
    schemes: Vec<String>,
}

impl<'a> SubstitutionResolver<'a> {
    /// Resolver recognising the `zk` scheme
    pub fn new(client: &'a dyn CoordinationClient) -> Self {
        Self {
            client,
            schemes: vec![DEFAULT_REFERENCE_SCHEME.to_string()],
        }
    }

    /// Also treat `scheme` as a store reference
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.schemes.push(scheme.into());
        self
    }

    /// Expand every reference in `text`
    pub async fn resolve(&self, text: &str) -> Result<String> {
        self.substitute(text.to_string(), Vec::new()).await
    }

    /// Load the node (or `path#key` property) at `location` and expand it.
    ///
    /// Returns `None` if the node does not exist or the value is empty.
    pub async fn resolve_path(&self, location: &str) -> Result<Option<String>> {
        let (path, _) = split_fragment(location);
        if self.client.exists(path).await?.is_none() {
            return Ok(None);
        }

        match self.load(location).await? {
            Some(content) if !content.is_empty() => Ok(Some(self.resolve(&content).await?)),
            _ => Ok(None),
        }
    }

    fn substitute(&self, text: String, stack: Vec<String>) -> BoxFuture<'_, Result<String>> {
        async move {
            let mut out = String::with_capacity(text.len());
            let mut rest = text.as_str();

            while let Some(start) = rest.find("${") {
                out.push_str(&rest[..start]);
                let body = &rest[start + 2..];
                let Some(end) = closing_brace(body) else {
                    // Unterminated reference stays literal.
                    out.push_str(&rest[start..]);
                    rest = "";
                    break;
                };

                let key = self.substitute(body[..end].to_string(), stack.clone()).await?;
                if stack.contains(&key) {
                    tracing::warn!(reference = %key, "Cyclic reference left unresolved");
                } else if let Some(value) = self.lookup(&key).await? {
                    let mut nested = stack.clone();
                    nested.push(key);
                    out.push_str(&self.substitute(value, nested).await?);
                }

                rest = &body[end + 1..];
            }

            out.push_str(rest);
            Ok(out)
        }
        .boxed()
    }

    /// Value for a `scheme:location` key, `None` when it does not resolve
    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        let Some((scheme, location)) = key.split_once(':') else {
            return Ok(None);
        };
        if !self.schemes.iter().any(|s| s == scheme) {
            return Ok(None);
        }
        self.load(location).await
    }

    async fn load(&self, location: &str) -> Result<Option<String>> {
        let (path, fragment) = split_fragment(location);
        let data = match nodes::get_string_data(self.client, path).await {
            Ok(data) => data,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::debug!(location, error = %e, "Reference did not resolve");
                return Ok(None);
            }
        };

        Ok(match (data, fragment) {
            (Some(text), Some(key)) => parse_map(&text).remove(key),
            (data, None) => data,
            (None, Some(_)) => None,
        })
    }
}

fn split_fragment(location: &str) -> (&str, Option<&str>) {
    match location.rsplit_once('#') {
        Some((path, key)) => (path, Some(key)),
        None => (location, None),
    }
}

/// Index of the `}` closing a reference body, honouring nested `${...}`
fn closing_brace(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            b'}' if depth == 0 => return Some(i),
            b'}' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}
