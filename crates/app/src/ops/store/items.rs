use clap::Args;
use serde_json::{Map, Value};

use super::{KeyArgs, StoreOpError};
use crate::op::OpContext;

/// Store one or more values
#[derive(Args, Debug, Clone)]
pub struct Set {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Entries as key=value
    #[arg(required = true)]
    pub entries: Vec<String>,
}

/// Read one or more values
#[derive(Args, Debug, Clone)]
pub struct Get {
    #[command(flatten)]
    pub key: KeyArgs,

    #[arg(required = true)]
    pub keys: Vec<String>,
}

/// Deep-merge JSON objects into stored values
#[derive(Args, Debug, Clone)]
pub struct Merge {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Entries as key=<json object>
    #[arg(required = true)]
    pub entries: Vec<String>,
}

/// Remove one or more values
#[derive(Args, Debug, Clone)]
pub struct Rm {
    #[command(flatten)]
    pub key: KeyArgs,

    #[arg(required = true)]
    pub keys: Vec<String>,
}

/// List stored keys readable with the current key
#[derive(Args, Debug, Clone)]
pub struct Keys {
    #[command(flatten)]
    pub key: KeyArgs,
}

/// Remove every stored value
#[derive(Args, Debug, Clone)]
pub struct Clear {
    #[command(flatten)]
    pub key: KeyArgs,
}

fn split_entries(entries: &[String]) -> Result<Vec<(&str, &str)>, StoreOpError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key, value)),
            _ => Err(StoreOpError::InvalidPair(entry.clone())),
        })
        .collect()
}

#[async_trait::async_trait]
impl crate::op::Op for Set {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let entries = split_entries(&self.entries)?;
        let store = self.key.open_store(ctx)?;
        store.multi_set(entries.iter().copied())?;
        Ok(format!("stored {} value(s)", entries.len()))
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Get {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let store = self.key.open_store(ctx)?;

        if let [key] = self.keys.as_slice() {
            return store
                .get_item(key)?
                .ok_or_else(|| StoreOpError::NotFound(key.clone()));
        }

        let values: Map<String, Value> = store
            .multi_get(self.keys.iter().map(String::as_str))?
            .into_iter()
            .map(|(key, value)| (key, value.map(Value::String).unwrap_or(Value::Null)))
            .collect();
        Ok(serde_json::to_string_pretty(&values)?)
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Merge {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let entries = split_entries(&self.entries)?;
        let store = self.key.open_store(ctx)?;
        store.multi_merge(entries.iter().copied())?;
        Ok(format!("merged {} value(s)", entries.len()))
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Rm {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let store = self.key.open_store(ctx)?;
        store.multi_remove(self.keys.iter().map(String::as_str))?;
        Ok(format!("removed {} key(s)", self.keys.len()))
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Keys {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let keys = self.key.open_store(ctx)?.get_all_keys()?;
        if keys.is_empty() {
            return Ok("No keys found".to_string());
        }
        Ok(keys.join("\n"))
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Clear {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        self.key.open_store(ctx)?.clear()?;
        Ok("store cleared".to_string())
    }
}
