use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CoreError, RpcError};

use super::DaemonRpc;

type Scripted = Result<Value, (i64, String)>;

/// A scripted daemon for tests.
///
/// Each method answers from its queue of one-shot responses first, then
/// from its standing response. Unscripted methods fail with the daemon's
/// "method not found" error. Every call is recorded.
pub struct MockRpc {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    standing: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockRpc {
    pub fn builder() -> MockRpcBuilder {
        MockRpcBuilder {
            queued: HashMap::new(),
            standing: HashMap::new(),
        }
    }

    /// Replace the standing response for `method`.
    pub fn set_result(&self, method: &str, value: Value) {
        lock(&self.standing).insert(method.to_owned(), Ok(value));
    }

    pub fn set_error(&self, method: &str, code: i64, message: &str) {
        lock(&self.standing).insert(method.to_owned(), Err((code, message.to_owned())));
    }

    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.calls).iter().filter(|(m, _)| m == method).count()
    }

    pub fn params(&self, method: &str) -> Vec<Vec<Value>> {
        lock(&self.calls)
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }
}

pub struct MockRpcBuilder {
    queued: HashMap<String, VecDeque<Scripted>>,
    standing: HashMap<String, Scripted>,
}

impl MockRpcBuilder {
    pub fn with_result(mut self, method: &str, value: Value) -> Self {
        self.standing.insert(method.to_owned(), Ok(value));
        self
    }

    pub fn with_error(mut self, method: &str, code: i64, message: &str) -> Self {
        self.standing
            .insert(method.to_owned(), Err((code, message.to_owned())));
        self
    }

    /// Answer the next call to `method` with `value`, ahead of the standing
    /// response.
    pub fn then_result(mut self, method: &str, value: Value) -> Self {
        self.queued
            .entry(method.to_owned())
            .or_default()
            .push_back(Ok(value));
        self
    }

    pub fn then_error(mut self, method: &str, code: i64, message: &str) -> Self {
        self.queued
            .entry(method.to_owned())
            .or_default()
            .push_back(Err((code, message.to_owned())));
        self
    }

    pub fn build(self) -> MockRpc {
        MockRpc {
            queued: Mutex::new(self.queued),
            standing: Mutex::new(self.standing),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DaemonRpc for MockRpc {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError> {
        lock(&self.calls).push((method.to_owned(), params));

        let next = lock(&self.queued)
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        let scripted = match next {
            Some(scripted) => scripted,
            None => lock(&self.standing)
                .get(method)
                .cloned()
                .unwrap_or_else(|| Err((-32601, "Method not found".to_owned()))),
        };

        scripted.map_err(|(code, message)| CoreError::Rpc(RpcError::ServerError { code, message }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::block_hash_from_byte;

    #[tokio::test]
    async fn queued_responses_come_before_standing_ones() {
        let hash = block_hash_from_byte(7);
        let rpc = MockRpc::builder()
            .then_error("getbestblockhash", -28, "Loading block index...")
            .with_result("getbestblockhash", serde_json::json!(hash.to_string()))
            .build();

        let first = rpc.get_best_block_hash().await.expect_err("queued error first");
        assert!(first.is_warming_up());
        let second = rpc.get_best_block_hash().await.expect("standing result");
        assert_eq!(second, hash);
        assert_eq!(rpc.call_count("getbestblockhash"), 2);
    }

    #[tokio::test]
    async fn unscripted_methods_fail() {
        let rpc = MockRpc::builder().build();
        let err = rpc.get_info().await.expect_err("no getinfo scripted");
        assert_eq!(err.rpc_code(), Some(-32601));
    }

    #[tokio::test]
    async fn records_params() {
        let rpc = MockRpc::builder()
            .with_result("getaddressbalance", serde_json::json!({"balance": 5, "received": 9}))
            .build();
        let balance = rpc
            .get_address_balance(&["mgY65WSfEmsyYaYPQaXhmXMeBhwp4EcsQW".to_owned()])
            .await
            .expect("balance");
        assert_eq!(balance.received, 9);
        assert_eq!(
            rpc.params("getaddressbalance"),
            vec![vec![serde_json::json!({"addresses": ["mgY65WSfEmsyYaYPQaXhmXMeBhwp4EcsQW"]})]]
        );
    }
}
