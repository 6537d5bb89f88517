pub mod call;
pub mod policy;
pub mod serve;
pub mod status;

use anyhow::{Context, Result};
use serde_json::Value;

/// Parse a `--params` argument. Must be a JSON object when given.
pub fn parse_params(raw: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("--params is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("--params must be a JSON object");
    }
    Ok(Some(value))
}
