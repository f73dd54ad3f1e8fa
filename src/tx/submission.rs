//! Lifecycle of a single transaction
//!
//! A `Submission` is a cheap handle. `send` spawns a worker task that owns all
//! mutable lifecycle state (current intent, broadcast hashes, retry counter)
//! and drives it through prepare, broadcast and the confirmation wait while
//! holding the manager's execution gate. `replace` and `cancel` never touch
//! that state directly: they are queued to the worker, which applies them
//! between polls, so a stuck wait can still be interrupted.

use super::broadcast::content_hash;
use super::classify::{classify_error, ErrorClass};
use super::gas::FeePolicy;
use super::intent::TransactionIntent;
use super::manager::{GateState, ManagerShared};
use crate::error::{TxError, TxResult};
use crate::metrics;

use ethers::types::{TransactionReceipt, H256, U256};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Progress notifications of a running submission
#[derive(Debug, Clone)]
pub enum SubmissionEvent {
    /// A payload was accepted by the primary endpoint
    TransactionHash(H256),
    /// One of our payloads was found in a block
    Mined(TransactionReceipt),
    /// Blocks on top of the receipt block; reported only when it changes
    Confirmations(u64),
}

pub(super) enum Command {
    Replace {
        intent: TransactionIntent,
        reply: oneshot::Sender<TxResult<()>>,
    },
}

enum Slot {
    /// Not sent yet; replacements simply overwrite the intent
    Idle(TransactionIntent),
    /// Worker running (or finished, once its receiver is gone)
    Running(mpsc::UnboundedSender<Command>),
}

/// Handle to one transaction intent
#[derive(Clone)]
pub struct Submission {
    id: Uuid,
    manager: Arc<ManagerShared>,
    slot: Arc<Mutex<Slot>>,
}

impl Submission {
    pub(super) fn new(manager: Arc<ManagerShared>, intent: TransactionIntent) -> Self {
        Self {
            id: Uuid::new_v4(),
            manager,
            slot: Arc::new(Mutex::new(Slot::Idle(intent))),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start submitting. Must be called from within a tokio runtime.
    ///
    /// The returned handle yields progress events and resolves once the
    /// transaction has the configured number of confirmations or failed.
    pub fn send(&self) -> TxResult<SubmissionHandle> {
        let mut slot = self.lock_slot();
        let intent = match &*slot {
            Slot::Idle(intent) => intent.clone(),
            Slot::Running(_) => return Err(TxError::AlreadyExecuted),
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        *slot = Slot::Running(command_tx);
        drop(slot);

        let worker = Worker::new(self.manager.clone(), intent, command_rx, event_tx);
        let span = info_span!("submission", id = %self.id);
        let task = tokio::spawn(worker.execute().instrument(span));

        Ok(SubmissionHandle {
            events: event_rx,
            task,
        })
    }

    /// Replace the transaction with another one using the same nonce.
    ///
    /// Before `send` this only swaps the intent. Afterwards the new payload is
    /// broadcast with fees no lower than the current ones, and this call
    /// returns once the broadcast is done.
    pub async fn replace(&self, intent: TransactionIntent) -> TxResult<()> {
        let commands = {
            let mut slot = self.lock_slot();
            match &mut *slot {
                Slot::Idle(current) => {
                    info!(id = %self.id, "Replacing transaction before it was sent");
                    *current = intent;
                    return Ok(());
                }
                Slot::Running(commands) => commands.clone(),
            }
        };

        let (reply, response) = oneshot::channel();
        commands
            .send(Command::Replace { intent, reply })
            .map_err(|_| TxError::NotPending)?;
        response.await.map_err(|_| TxError::NotPending)?
    }

    /// Replace the transaction with a zero-value transfer to ourselves
    pub async fn cancel(&self) -> TxResult<()> {
        info!(id = %self.id, "Canceling the transaction");
        let sender = self.manager.signer.address();
        self.replace(TransactionIntent::cancellation(sender)).await
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Progress and outcome of a sent submission
pub struct SubmissionHandle {
    events: mpsc::UnboundedReceiver<SubmissionEvent>,
    task: JoinHandle<TxResult<TransactionReceipt>>,
}

impl SubmissionHandle {
    /// Next progress event; `None` once the submission has settled
    pub async fn next_event(&mut self) -> Option<SubmissionEvent> {
        self.events.recv().await
    }

    /// Wait for the final receipt
    pub async fn wait(self) -> TxResult<TransactionReceipt> {
        self.task
            .await
            .map_err(|e| TxError::Internal(format!("Submission task failed: {}", e)))?
    }
}

enum Recovery {
    /// State was adjusted, send again
    Retry,
    /// Nothing to do, the failure is harmless
    Skip,
}

/// Owner of a submission's lifecycle state while it runs
pub(super) struct Worker {
    pub(super) manager: Arc<ManagerShared>,
    pub(super) intent: TransactionIntent,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SubmissionEvent>,
    /// Set once a replacement went out; later nonce conflicts are expected
    replaced: bool,
    retries: u32,
    /// Every hash ever broadcast for this submission, oldest first
    pub(super) hashes: Vec<H256>,
    pub(super) last_broadcast: Instant,
    pub(super) last_confirmations: Option<u64>,
    started: Instant,
}

impl Worker {
    fn new(
        manager: Arc<ManagerShared>,
        intent: TransactionIntent,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<SubmissionEvent>,
    ) -> Self {
        let now = Instant::now();
        Self {
            manager,
            intent,
            commands,
            events,
            replaced: false,
            retries: 0,
            hashes: Vec::new(),
            last_broadcast: now,
            last_confirmations: None,
            started: now,
        }
    }

    /// Run the whole lifecycle while holding the execution gate
    async fn execute(mut self) -> TxResult<TransactionReceipt> {
        let manager = self.manager.clone();
        let mut gate = manager.gate.lock().await;
        debug!("Acquired execution gate");

        // Replacements queued while waiting for the gate apply before preparation
        while let Ok(Command::Replace { intent, reply }) = self.commands.try_recv() {
            self.intent = intent;
            let _ = reply.send(Ok(()));
        }

        let result = self.run(&mut gate).await;

        // A mined transaction consumes its nonce even if it reverted. The
        // nonce may have moved during the wait, so advance past the final one.
        if matches!(&result, Ok(_) | Err(TxError::RevertedTransaction { .. })) {
            if let Some(nonce) = self.intent.nonce {
                gate.nonces.advance_past(nonce);
            }
        }

        match &result {
            Ok(receipt) => {
                info!(
                    "Transaction {:?} confirmed in block {:?}",
                    receipt.transaction_hash, receipt.block_number
                );
                metrics::record_confirmed(self.intent.chain_id, self.started.elapsed().as_secs_f64());
            }
            Err(e) => {
                error!("Transaction failed: {}", e);
                metrics::record_failed(self.intent.chain_id);
            }
        }

        result
    }

    async fn run(&mut self, gate: &mut GateState) -> TxResult<TransactionReceipt> {
        self.prepare(gate).await?;
        self.broadcast().await?;
        self.watch().await
    }

    /// Fill in gas limit, chain id, nonce and fees
    async fn prepare(&mut self, gate: &mut GateState) -> TxResult<()> {
        let manager = self.manager.clone();

        let block_gas_limit = manager.block_gas_limit().await?;
        let chain_id = gate.chain_id(manager.ledger.as_ref()).await?;
        self.intent.chain_id = Some(chain_id);

        // With ESTIMATE_GAS the estimate also runs as a preflight check,
        // but an explicit limit from the caller is kept.
        if self.intent.gas_limit.is_none() || manager.config.estimate_gas {
            let estimated = self.estimate_gas().await?;
            if self.intent.gas_limit.is_none() {
                self.intent.gas_limit = Some(manager.config.scale_gas_limit(estimated, block_gas_limit));
            }
        }

        let next_nonce = gate.nonces.next(manager.ledger.as_ref()).await?;
        if self.intent.nonce.is_none() {
            self.intent.nonce = Some(next_nonce);
        }

        if self.intent.fees().is_none() {
            let fees = manager
                .fee_policy
                .suggest(manager.fee_estimator.as_ref(), self.intent.kind)
                .await?;
            self.intent.set_fees(fees);
        }

        debug!(
            "Prepared transaction: nonce {:?}, gas {:?}, fees {:?}",
            self.intent.nonce,
            self.intent.gas_limit,
            self.intent.fees()
        );
        Ok(())
    }

    async fn estimate_gas(&mut self) -> TxResult<U256> {
        loop {
            match self.manager.signer.estimate_gas(&self.intent.to_typed()).await {
                Ok(gas) => return Ok(gas),
                Err(e)
                    if classify_error(&e) == ErrorClass::NonceTooLow
                        && self.intent.nonce.is_some() =>
                {
                    self.increment_nonce()
                        .map_err(|_| TxError::GasEstimation(message_of(&e)))?;
                }
                Err(e) => return Err(TxError::GasEstimation(message_of(&e))),
            }
        }
    }

    /// Sign the current intent and hand it to the broadcaster, recovering
    /// from nonce and fee conflicts along the way
    pub(super) async fn broadcast(&mut self) -> TxResult<()> {
        loop {
            let raw = self.manager.signer.sign(&self.intent.to_typed()).await?;
            let hash = content_hash(&raw);
            self.hashes.push(hash);
            self.last_broadcast = Instant::now();

            match self.manager.broadcaster.broadcast(raw).await {
                Ok(_) => {
                    info!(
                        "Broadcasted transaction {:?} with nonce {:?}",
                        hash, self.intent.nonce
                    );
                    metrics::record_broadcast(self.intent.chain_id);
                    self.emit(SubmissionEvent::TransactionHash(hash));
                    return Ok(());
                }
                Err(e) => match self.recover(e)? {
                    Recovery::Retry => continue,
                    Recovery::Skip => return Ok(()),
                },
            }
        }
    }

    fn recover(&mut self, error: TxError) -> TxResult<Recovery> {
        match classify_error(&error) {
            ErrorClass::NonceTooLow if self.replaced => {
                info!("Nonce already used, the replaced payload is moot");
                Ok(Recovery::Skip)
            }
            ErrorClass::NonceTooLow => {
                self.increment_nonce()?;
                Ok(Recovery::Retry)
            }
            ErrorClass::FeeTooLow => {
                info!(
                    "Gas price {:?} is too low, increasing and retrying",
                    self.intent.fees()
                );
                if self.bump_fees() {
                    Ok(Recovery::Retry)
                } else {
                    Err(TxError::FeeTooLow(message_of(&error)))
                }
            }
            ErrorClass::AlreadyKnown => {
                info!("Same transaction is already in mempool, skipping submit");
                Ok(Recovery::Skip)
            }
            ErrorClass::Other => Err(match error {
                TxError::Rpc(message) => TxError::UnclassifiedSubmit(message),
                other => other,
            }),
        }
    }

    fn increment_nonce(&mut self) -> TxResult<()> {
        let nonce = self.assigned_nonce()?;
        if self.retries > self.manager.config.max_retries {
            return Err(TxError::SequenceConflict {
                nonce,
                retries: self.retries,
            });
        }

        info!("Nonce {} is too low, increasing and retrying", nonce);
        self.intent.nonce = Some(nonce + 1);
        self.retries += 1;
        metrics::record_nonce_retry(self.intent.chain_id);
        Ok(())
    }

    /// Raise the fees one step; false if they are already at the ceiling
    pub(super) fn bump_fees(&mut self) -> bool {
        let Some(current) = self.intent.fees() else {
            return false;
        };

        match self.manager.fee_policy.bump(&current) {
            Some(next) => {
                self.intent.set_fees(next);
                metrics::record_gas_bump(self.intent.chain_id);
                true
            }
            None => false,
        }
    }

    pub(super) fn assigned_nonce(&self) -> TxResult<u64> {
        self.intent
            .nonce
            .ok_or_else(|| TxError::Internal("nonce is not assigned".to_string()))
    }

    async fn replace(&mut self, mut intent: TransactionIntent) -> TxResult<()> {
        info!("Replacing current transaction");
        let manager = self.manager.clone();

        if intent.gas_limit.is_none() {
            let estimated = manager
                .signer
                .estimate_gas(&intent.to_typed())
                .await
                .map_err(|e| TxError::GasEstimation(message_of(&e)))?;
            let block_gas_limit = manager.block_gas_limit().await?;
            intent.gas_limit = Some(manager.config.scale_gas_limit(estimated, block_gas_limit));
        }

        // Same slot in the sender's sequence, never cheaper than what it replaces
        intent.nonce = self.intent.nonce;
        intent.chain_id = self.intent.chain_id;
        if let Some(current) = self.intent.fees() {
            intent.set_fees(FeePolicy::floor(&current, intent.fees()));
        }

        let previous = std::mem::replace(&mut self.intent, intent);
        let was_replaced = std::mem::replace(&mut self.replaced, true);
        self.bump_fees();

        match self.broadcast().await {
            Ok(()) => {
                metrics::record_replaced(self.intent.chain_id);
                Ok(())
            }
            Err(e) => {
                warn!("Replacement failed, keeping the previous transaction: {}", e);
                self.intent = previous;
                self.replaced = was_replaced;
                Err(e)
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Replace { intent, reply } => {
                let result = self.replace(intent).await;
                let _ = reply.send(result);
            }
        }
    }

    /// Apply replacements that arrived since the last poll
    pub(super) async fn handle_pending_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.handle(command).await;
        }
    }

    /// Sleep until the next poll, waking early to apply a replacement
    pub(super) async fn pause(&mut self, duration: Duration) {
        let command = tokio::select! {
            _ = tokio::time::sleep(duration) => None,
            Some(command) = self.commands.recv() => Some(command),
        };

        if let Some(command) = command {
            self.handle(command).await;
        }
    }

    pub(super) fn emit(&self, event: SubmissionEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

fn message_of(error: &TxError) -> String {
    error
        .rpc_message()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}
