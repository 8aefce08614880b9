//! Process-wide shared resources.
//!
//! Providers and token metadata are read-mostly and safe to share across
//! concurrently running pipelines, so they live in explicit registries with
//! a documented lifetime: entries are created on first use and never evicted
//! within the process. Signature and transaction state are never shared —
//! each pipeline instance owns its own.

use std::{
    collections::HashMap,
    env,
    sync::{Arc, Mutex},
};

use alloy::{
    providers::{ProviderBuilder, RootProvider},
    transports::BoxTransport,
};
use alloy_primitives::Address;
use dotenv::dotenv;
use once_cell::sync::Lazy;

use crate::orchestration::{
    chain_reader::ChainReader,
    errors::ExecutionError,
    models::{Chain, TokenMetadata},
};

static CLIENTS: Lazy<ClientRegistry> = Lazy::new(ClientRegistry::new);
static TOKENS: Lazy<TokenRegistry> = Lazy::new(TokenRegistry::new);

/// One provider per chain id, connected from `<CHAIN>_RPC_URL` (falling back
/// to `RPC_URL`) on first use.
pub struct ClientRegistry {
    clients: Mutex<HashMap<u64, Arc<RootProvider<BoxTransport>>>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self { clients: Mutex::new(HashMap::new()) }
    }

    /// The process-wide registry. Lives for the lifetime of the process.
    pub fn global() -> &'static ClientRegistry {
        &CLIENTS
    }

    pub async fn get_or_connect(
        &self,
        chain: &Chain,
    ) -> Result<Arc<RootProvider<BoxTransport>>, ExecutionError> {
        if let Some(client) = self
            .clients
            .lock()
            .expect("client registry lock poisoned")
            .get(&chain.id)
        {
            return Ok(client.clone());
        }

        dotenv().ok();
        let rpc_url = env::var(chain.rpc_url_env_key())
            .or_else(|_| env::var("RPC_URL"))
            .map_err(|_| {
                ExecutionError::FatalError(format!(
                    "Missing {} (or RPC_URL) in environment",
                    chain.rpc_url_env_key()
                ))
            })?;
        let client = ProviderBuilder::new()
            .on_builtin(&rpc_url)
            .await
            .map_err(|e| {
                ExecutionError::FatalError(format!("Failed to connect provider: {e}"))
            })?;

        let mut clients = self
            .clients
            .lock()
            .expect("client registry lock poisoned");
        // A concurrent connect for the same chain may have won the race;
        // keep the first entry so every pipeline shares one client.
        let entry = clients
            .entry(chain.id)
            .or_insert_with(|| Arc::new(client));
        Ok(entry.clone())
    }
}

/// Token metadata keyed by chain id and lowercase address.
pub struct TokenRegistry {
    tokens: Mutex<HashMap<(u64, String), TokenMetadata>>,
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()) }
    }

    /// The process-wide registry. Lives for the lifetime of the process.
    pub fn global() -> &'static TokenRegistry {
        &TOKENS
    }

    fn key(chain_id: u64, token: Address) -> (u64, String) {
        (chain_id, hex::encode(token.as_slice()))
    }

    pub fn get(&self, chain_id: u64, token: Address) -> Option<TokenMetadata> {
        self.tokens
            .lock()
            .expect("token registry lock poisoned")
            .get(&Self::key(chain_id, token))
            .cloned()
    }

    /// Returns cached metadata, reading it through `reader` on first use.
    pub async fn get_or_fetch(
        &self,
        chain_id: u64,
        token: Address,
        reader: &dyn ChainReader,
    ) -> Result<TokenMetadata, ExecutionError> {
        if let Some(metadata) = self.get(chain_id, token) {
            return Ok(metadata);
        }
        let metadata = reader.token_metadata(token).await?;
        self.tokens
            .lock()
            .expect("token registry lock poisoned")
            .entry(Self::key(chain_id, token))
            .or_insert_with(|| metadata.clone());
        Ok(metadata)
    }
}
