use crate::backend::StoreTransaction;
use common::{Error, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared slot holding the transaction of a request. Emptied exactly once,
/// by commit or rollback.
pub type TransactionSlot = Arc<Mutex<Option<Box<dyn StoreTransaction>>>>;

/// Per-request state threaded through every store and provider call:
/// the caller's identity, the active transaction (if any), and the
/// cancellation signal and deadline set by the caller.
#[derive(Clone)]
pub struct RequestScope {
    user_id: Option<i64>,
    transaction: Option<TransactionSlot>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self {
            user_id: None,
            transaction: None,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    /// The caller's id; `NotAuthorized` when the transport attached none.
    pub fn require_user(&self) -> Result<i64> {
        self.user_id.ok_or(Error::NotAuthorized)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub(crate) fn transaction(&self) -> Option<&TransactionSlot> {
        self.transaction.as_ref()
    }

    pub(crate) fn with_transaction(&self, slot: TransactionSlot) -> Self {
        Self {
            transaction: Some(slot),
            ..self.clone()
        }
    }

    /// Run `operation` unless the request is cancelled or its deadline passes
    /// first. The operation is dropped in either case.
    pub async fn guard<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, operation)
                    .await
                    .map_err(|_| Error::DeadlineExceeded)?,
                None => operation.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            result = bounded => result,
        }
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("user_id", &self.user_id)
            .field("transaction", &self.transaction.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}
