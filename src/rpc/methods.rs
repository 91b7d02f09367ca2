//! Bob JSON-RPC method names.

pub const CHAIN_ID: &str = "qubic_chainId";
pub const CLIENT_VERSION: &str = "qubic_clientVersion";
pub const SYNCING: &str = "qubic_syncing";
pub const CURRENT_EPOCH: &str = "qubic_getCurrentEpoch";
pub const EPOCH_INFO: &str = "qubic_getEpochInfo";
pub const TICK_BY_NUMBER: &str = "qubic_getTickByNumber";
pub const TICK_BY_HASH: &str = "qubic_getTickByHash";
pub const BALANCE: &str = "qubic_getBalance";
pub const TRANSFERS: &str = "qubic_getTransfers";
pub const ASSET_BALANCE: &str = "qubic_getAssetBalance";
pub const TRANSACTION_BY_HASH: &str = "qubic_getTransactionByHash";
pub const TRANSACTION_RECEIPT: &str = "qubic_getTransactionReceipt";
pub const LOGS: &str = "qubic_getLogs";
pub const QUERY_SMART_CONTRACT: &str = "qubic_querySmartContract";

pub const SUBSCRIBE: &str = "qubic_subscribe";
pub const UNSUBSCRIBE: &str = "qubic_unsubscribe";
