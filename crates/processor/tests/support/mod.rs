//! Aggregates, messages and handlers shared by the processor integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::AggregateId;
use domain::{
    AggregateRoot, AggregateState, BusinessRuleViolation, ConfigurationError, DomainEvent,
    Message, Query, SnapshotCapable, ValidationErrors,
};
use event_store::InMemoryEventStore;
use processor::{
    Context, Dispatcher, DispatcherBuilder, Handler, QueryHandler, Requirements, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TallyEvent {
    Opened { limit: u32 },
    Incremented { by: u32 },
}

impl Message for TallyEvent {}

impl DomainEvent for TallyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TallyEvent::Opened { .. } => "TallyOpened",
            TallyEvent::Incremented { .. } => "TallyIncremented",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("limit of {0} reached")]
pub struct LimitReached(pub u32);

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Tally {
    pub limit: u32,
    pub count: u32,
}

impl AggregateState for Tally {
    type Event = TallyEvent;
    type Error = LimitReached;

    fn aggregate_type() -> &'static str {
        "Tally"
    }

    fn apply(&mut self, event: &TallyEvent) -> std::result::Result<(), ConfigurationError> {
        match event {
            TallyEvent::Opened { limit } => self.limit = *limit,
            TallyEvent::Incremented { by } => self.count += by,
        }
        Ok(())
    }
}

impl SnapshotCapable for Tally {}

impl Tally {
    pub fn increment(&self, by: u32) -> std::result::Result<Vec<TallyEvent>, LimitReached> {
        if self.count + by > self.limit {
            return Err(LimitReached(self.limit));
        }
        Ok(vec![TallyEvent::Incremented { by }])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerEvent {
    Recorded { amount: u32 },
}

impl Message for LedgerEvent {}

impl DomainEvent for LedgerEvent {
    fn event_type(&self) -> &'static str {
        "LedgerRecorded"
    }
}

#[derive(Debug, thiserror::Error)]
#[error("ledger is sealed")]
pub struct Sealed;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub total: u32,
    pub entries: u32,
}

impl AggregateState for Ledger {
    type Event = LedgerEvent;
    type Error = Sealed;

    fn aggregate_type() -> &'static str {
        "Ledger"
    }

    fn apply(&mut self, event: &LedgerEvent) -> std::result::Result<(), ConfigurationError> {
        let LedgerEvent::Recorded { amount } = event;
        self.total += amount;
        self.entries += 1;
        Ok(())
    }
}

impl SnapshotCapable for Ledger {}

#[derive(Debug)]
pub struct OpenTally {
    pub id: AggregateId,
    pub limit: u32,
}

impl Message for OpenTally {
    fn message_type(&self) -> &'static str {
        "OpenTally"
    }

    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(self.limit > 0, "limit", "must be positive");
        errors.into_result()
    }
}

#[derive(Debug)]
pub struct Increment {
    pub id: AggregateId,
    pub by: u32,
}

impl Message for Increment {
    fn message_type(&self) -> &'static str {
        "Increment"
    }
}

#[derive(Debug)]
pub struct GetCount {
    pub id: AggregateId,
}

impl Message for GetCount {}

impl Query for GetCount {
    type Output = u32;
}

/// Requires the `auditor` role.
#[derive(Debug)]
pub struct Audit;

impl Message for Audit {}

#[derive(Debug)]
pub struct Explode;

impl Message for Explode {}

#[derive(Default)]
pub struct OpenTallyHandler {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<OpenTally> for OpenTallyHandler {
    async fn handle(&self, cmd: &OpenTally, ctx: &mut Context) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let root = AggregateRoot::create(cmd.id, TallyEvent::Opened { limit: cmd.limit })?;
        ctx.repository::<Tally>().add(root).await?;
        Ok(())
    }
}

pub struct IncrementHandler;

#[async_trait]
impl Handler<Increment> for IncrementHandler {
    async fn handle(&self, cmd: &Increment, ctx: &mut Context) -> Result<()> {
        let tally = ctx.repository::<Tally>().load(cmd.id).await?;
        let by = cmd.by;
        tally.lock().await.execute(|state| state.increment(by))?;
        Ok(())
    }
}

pub struct GetCountHandler;

#[async_trait]
impl QueryHandler<GetCount> for GetCountHandler {
    async fn handle(&self, query: &GetCount, ctx: &mut Context) -> Result<u32> {
        let tally = ctx.repository::<Tally>().load(query.id).await?;
        let count = tally.lock().await.state().count;
        Ok(count)
    }
}

#[derive(Default)]
pub struct AuditHandler {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<Audit> for AuditHandler {
    async fn handle(&self, _cmd: &Audit, _ctx: &mut Context) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        Requirements::none().role("auditor")
    }
}

pub struct ExplodeHandler;

#[async_trait]
impl Handler<Explode> for ExplodeHandler {
    async fn handle(&self, _cmd: &Explode, _ctx: &mut Context) -> Result<()> {
        panic!("boom");
    }
}

/// Records every increment on one ledger.
pub struct RecordIncrements {
    pub ledger: AggregateId,
}

#[async_trait]
impl Handler<TallyEvent> for RecordIncrements {
    async fn handle(&self, event: &TallyEvent, ctx: &mut Context) -> Result<()> {
        let TallyEvent::Incremented { by } = event else {
            return Ok(());
        };
        let recorded = LedgerEvent::Recorded { amount: *by };
        let ledgers = ctx.repository::<Ledger>();
        match ledgers.get_by_key(self.ledger).await? {
            Some(ledger) => {
                ledger.lock().await.publish(recorded)?;
            }
            None => {
                ledgers.add(AggregateRoot::create(self.ledger, recorded)?).await?;
            }
        }
        Ok(())
    }
}

/// Answers every ledger entry with another one. Never settles.
pub struct Echo {
    pub ledger: AggregateId,
}

#[async_trait]
impl Handler<LedgerEvent> for Echo {
    async fn handle(&self, _event: &LedgerEvent, ctx: &mut Context) -> Result<()> {
        let ledger = ctx.repository::<Ledger>().load(self.ledger).await?;
        ledger.lock().await.publish(LedgerEvent::Recorded { amount: 0 })?;
        Ok(())
    }
}

/// Rejects every tally increment as if the ledger were sealed.
pub struct SealedLedger;

#[async_trait]
impl Handler<TallyEvent> for SealedLedger {
    async fn handle(&self, event: &TallyEvent, _ctx: &mut Context) -> Result<()> {
        match event {
            TallyEvent::Incremented { .. } => {
                Err(BusinessRuleViolation::new("Ledger", Sealed).into())
            }
            TallyEvent::Opened { .. } => Ok(()),
        }
    }
}

pub struct Harness {
    pub store: InMemoryEventStore,
    pub ledger: AggregateId,
    pub opened: Arc<AtomicUsize>,
    pub audits: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: InMemoryEventStore::new(),
            ledger: AggregateId::new(),
            opened: Arc::new(AtomicUsize::new(0)),
            audits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every tally command, query and the ledger cascade.
    pub fn builder(&self) -> DispatcherBuilder {
        Dispatcher::builder(Arc::new(self.store.clone()))
            .register_handler(OpenTallyHandler {
                calls: Arc::clone(&self.opened),
            })
            .register_handler(IncrementHandler)
            .register_query_handler(GetCountHandler)
            .register_handler(AuditHandler {
                calls: Arc::clone(&self.audits),
            })
            .register_handler(ExplodeHandler)
            .register_event_handler(RecordIncrements {
                ledger: self.ledger,
            })
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.builder().build().unwrap()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn audits(&self) -> usize {
        self.audits.load(Ordering::SeqCst)
    }
}

/// Opens a tally with `limit` and returns its key.
pub async fn open_tally(dispatcher: &Dispatcher, limit: u32) -> AggregateId {
    let id = AggregateId::new();
    dispatcher.dispatch(OpenTally { id, limit }).await.unwrap();
    id
}
