//! Request/response queries.
//!
//! Thin typed wrappers over [`BobClient::request`]. Payloads the client does
//! not interpret are returned as `serde_json::Value`.

use serde_json::{json, Value};

use crate::client::error::{BobError, BobResult};
use crate::client::BobClient;
use crate::rpc::methods;
use crate::rpc::types::SyncStatus;

impl BobClient {
    /// Chain id; accepted as a JSON number or a `0x` hex string.
    pub async fn chain_id(&self) -> BobResult<u64> {
        let value = self.request(methods::CHAIN_ID, json!([])).await?;
        parse_u64(&value)
    }

    pub async fn client_version(&self) -> BobResult<String> {
        let value = self.request(methods::CLIENT_VERSION, json!([])).await?;
        match value {
            Value::String(version) => Ok(version),
            other => Err(BobError::UnexpectedResponse(format!("client version {}", other))),
        }
    }

    /// Sync status of the active node.
    pub async fn syncing(&self) -> BobResult<SyncStatus> {
        let value = self.request(methods::SYNCING, json!([])).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn current_epoch(&self) -> BobResult<Value> {
        self.request(methods::CURRENT_EPOCH, json!([])).await
    }

    pub async fn epoch_info(&self, epoch: u32) -> BobResult<Value> {
        self.request(methods::EPOCH_INFO, json!([epoch])).await
    }

    pub async fn tick_by_number(&self, tick: u64) -> BobResult<Value> {
        self.request(methods::TICK_BY_NUMBER, json!([tick])).await
    }

    pub async fn tick_by_hash(&self, hash: &str) -> BobResult<Value> {
        self.request(methods::TICK_BY_HASH, json!([hash])).await
    }

    pub async fn balance(&self, identity: &str) -> BobResult<Value> {
        self.request(methods::BALANCE, json!([identity])).await
    }

    /// Transfers matching `filter` (identity, tick range, ...).
    pub async fn transfers(&self, filter: Value) -> BobResult<Value> {
        self.request(methods::TRANSFERS, json!([filter])).await
    }

    pub async fn asset_balance(&self, identity: &str, issuer: &str, asset_name: &str) -> BobResult<Value> {
        self.request(methods::ASSET_BALANCE, json!([identity, issuer, asset_name]))
            .await
    }

    pub async fn transaction_by_hash(&self, hash: &str) -> BobResult<Value> {
        self.request(methods::TRANSACTION_BY_HASH, json!([hash])).await
    }

    pub async fn transaction_receipt(&self, hash: &str) -> BobResult<Value> {
        self.request(methods::TRANSACTION_RECEIPT, json!([hash])).await
    }

    /// Contract logs matching `filter`.
    pub async fn logs(&self, filter: Value) -> BobResult<Value> {
        self.request(methods::LOGS, json!([filter])).await
    }

    /// Read-only contract function call; `input` is hex encoded.
    pub async fn query_smart_contract(
        &self,
        contract_index: u32,
        input_type: u32,
        input: &str,
    ) -> BobResult<Value> {
        self.request(
            methods::QUERY_SMART_CONTRACT,
            json!([{
                "contractIndex": contract_index,
                "inputType": input_type,
                "input": input,
            }]),
        )
        .await
    }
}

fn parse_u64(value: &Value) -> BobResult<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    };
    parsed.ok_or_else(|| BobError::UnexpectedResponse(format!("expected integer, got {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64_forms() {
        assert_eq!(parse_u64(&json!(2025)).unwrap(), 2025);
        assert_eq!(parse_u64(&json!("0x7e9")).unwrap(), 2025);
        assert_eq!(parse_u64(&json!("2025")).unwrap(), 2025);
        assert!(matches!(
            parse_u64(&json!(null)),
            Err(BobError::UnexpectedResponse(_))
        ));
        assert!(parse_u64(&json!(-1)).is_err());
    }
}
