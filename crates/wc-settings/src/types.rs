//! Settings type definitions.
//!
//! All types use camelCase field names and `#[serde(default)]`, so a partial
//! settings file only needs the keys it overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use wc_core::PeerMeta;

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// The wallet's own metadata, announced to every dapp.
    pub client_meta: PeerMeta,
    /// Chain the wallet approves sessions on.
    pub chain_id: u64,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
    pub messages: MessageSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            client_meta: PeerMeta::new("Blockchain.com", "https://blockchain.com")
                .with_description("Blockchain.com Wallet")
                .with_icon("https://www.blockchain.com/static/favicon.ico"),
            // Ethereum mainnet
            chain_id: 1,
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
            messages: MessageSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite key-value database holding the session list.
    pub db_path: String,
    /// Key the authorized dapp list is stored under.
    pub sessions_key: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("database/kv.db").display().to_string(),
            sessions_key: "wc_authorized_dapps".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` still wins.
    pub level: String,
    /// Persist warn+ records to SQLite.
    pub persist: bool,
    pub db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            persist: false,
            db_path: data_dir().join("database/logs.db").display().to_string(),
        }
    }
}

/// Reason strings sent to the dapp when the user declines.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageSettings {
    pub session_rejected: String,
    pub transaction_rejected: String,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            session_rejected: "Connection rejected by user.".to_string(),
            transaction_rejected: "Transaction rejected by user.".to_string(),
        }
    }
}

/// `~/.wcbridge`, falling back to `/tmp/.wcbridge` without a home directory.
pub fn data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".wcbridge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.chain_id, 1);
        assert_eq!(settings.client_meta.name, "Blockchain.com");
        assert_eq!(settings.storage.sessions_key, "wc_authorized_dapps");
        assert!(settings.storage.db_path.ends_with("database/kv.db"));
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.messages.session_rejected, "Connection rejected by user.");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: BridgeSettings =
            serde_json::from_str(r#"{"chainId": 5, "storage": {"sessionsKey": "k"}}"#).unwrap();
        assert_eq!(settings.chain_id, 5);
        assert_eq!(settings.storage.sessions_key, "k");
        assert!(settings.storage.db_path.ends_with("database/kv.db"));
        assert_eq!(settings.messages.transaction_rejected, "Transaction rejected by user.");
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(BridgeSettings::default()).unwrap();
        assert!(json.get("clientMeta").is_some());
        assert!(json["storage"].get("sessionsKey").is_some());
        assert!(json["messages"].get("sessionRejected").is_some());
    }
}
