use crate::error::ClientError;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_SHEET_URL: &str = "https://sheetdb.io/api/v1/n8h7gje9zs2se";
pub const DEFAULT_KEY_COLUMN: &str = "Time";

/// A sheet row as SheetDB returns it: column name to cell. Cells are usually strings.
pub type SheetRow = BTreeMap<String, Value>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeleteResponse {
    pub deleted: u64,
}

#[derive(Clone)]
pub struct SheetDbClient {
    client: Client,
    sheet_url: Url,
}

impl SheetDbClient {
    pub fn new_with_client(client: Client, sheet_url: &str) -> Result<Self, ClientError> {
        let sheet_url = Url::parse(sheet_url).map_err(|e| ClientError::InvalidUrl {
            url: sheet_url.to_string(),
            reason: e.to_string(),
        })?;
        if sheet_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl {
                url: sheet_url.to_string(),
                reason: "url cannot be a base".to_string(),
            });
        }
        Ok(Self { client, sheet_url })
    }

    pub async fn rows(&self) -> Result<Vec<SheetRow>, ClientError> {
        let rows = self
            .client
            .get(self.sheet_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<SheetRow>>()
            .await?;
        debug!(len = rows.len(), "fetched rows from SheetDB");
        Ok(rows)
    }

    /// Deletes every row whose `column` cell equals `value`.
    pub async fn delete_where(&self, column: &str, value: &str) -> Result<u64, ClientError> {
        let url = delete_url(&self.sheet_url, column, value)?;
        let resp = self
            .client
            .delete(url)
            .send()
            .await?
            .error_for_status()?
            .json::<DeleteResponse>()
            .await?;
        debug!(column, value, deleted = resp.deleted, "deleted rows from SheetDB");
        Ok(resp.deleted)
    }
}

fn delete_url(sheet_url: &Url, column: &str, value: &str) -> Result<Url, ClientError> {
    let mut url = sheet_url.clone();
    url.path_segments_mut()
        .map_err(|()| ClientError::InvalidUrl {
            url: sheet_url.to_string(),
            reason: "url cannot be a base".to_string(),
        })?
        .pop_if_empty()
        .push(column)
        .push(value);
    Ok(url)
}
