//! Stampede prevention: concurrent callers for the same `proposalId` share
//! one in-flight preparation future instead of each hitting the database.

use crate::error::CalcError;
use crate::types::FrozenInput;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

type Shared = Result<Arc<FrozenInput>, String>;

#[derive(Default)]
pub struct Coalescer {
    inflight: Mutex<HashMap<String, broadcast::Sender<Shared>>>,
}

pub enum Lead {
    /// This caller is the first for `proposal_id`; it must do the work and
    /// call [`Coalescer::complete`] when done.
    Leader,
    /// Another caller is already preparing this proposal; wait on the
    /// receiver for its result.
    Follower(broadcast::Receiver<Shared>),
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, proposal_id: &str) -> Lead {
        let mut inflight = self.inflight.lock().await;
        if let Some(tx) = inflight.get(proposal_id) {
            return Lead::Follower(tx.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        inflight.insert(proposal_id.to_string(), tx);
        Lead::Leader
    }

    pub async fn complete(&self, proposal_id: &str, result: Result<FrozenInput, CalcError>) {
        let mut inflight = self.inflight.lock().await;
        if let Some(tx) = inflight.remove(proposal_id) {
            let shared: Shared = result.map(Arc::new).map_err(|e| e.to_string());
            let _ = tx.send(shared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn dummy(id: &str) -> FrozenInput {
        FrozenInput {
            proposal_id: id.to_string(),
            tenant: "t1".to_string(),
            schema_version: "v1".to_string(),
            line_items: vec![],
            modifiers: vec![],
            dependencies: vec![],
            compiled_rules: BTreeMap::new(),
            config: crate::types::TaxConfig {
                mode: crate::types::TaxMode::Retail,
                retail_rate: Some("0.08".to_string()),
                use_tax_rate: None,
                jurisdictions: vec![],
                schema_version: "v1".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn second_joiner_is_a_follower() {
        let coalescer = Arc::new(Coalescer::new());
        assert!(matches!(coalescer.join("p1").await, Lead::Leader));
        let follow = coalescer.join("p1").await;
        assert!(matches!(follow, Lead::Follower(_)));

        let coalescer2 = coalescer.clone();
        let waiter = tokio::spawn(async move {
            if let Lead::Follower(mut rx) = follow {
                rx.recv().await.unwrap()
            } else {
                unreachable!()
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        coalescer2.complete("p1", Ok(dummy("p1"))).await;

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }
}
