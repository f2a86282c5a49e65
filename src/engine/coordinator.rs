//! Routing coordinator
//!
//! Runs routing passes: gap snapshot, query, route, batch, commit. One pass
//! per channel at a time; distinct channels run concurrently.

use super::topology::{Topology, TopologyCache};
use super::types::{PassReport, PassState, RoutingRound};
use crate::batch::{BatchAccumulator, BatchLimits, BatchSequence};
use crate::config::{Channel, EngineConfig, PlatformCapabilities, RoutingParams};
use crate::cursor::{ChangeRowCursor, CursorOptions};
use crate::error::{Error, Result};
use crate::gap::GapLedger;
use crate::query::{PlannerThresholds, QueryPlan, RangeQueryPlanner};
use crate::store::{ChangeLogStore, PassCommit, RoutingStore};
use crate::types::DataId;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, OnceCell, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Mutable routing context of one channel
///
/// Only the pass holding the channel lock touches it.
#[derive(Debug)]
struct ChannelContext {
    ledger: GapLedger,
    planner: RangeQueryPlanner,
    last_committed_id: Option<DataId>,
}

#[derive(Debug)]
struct ChannelSlot {
    context: Mutex<ChannelContext>,
    state: watch::Sender<PassState>,
}

/// Orchestrates routing passes for every channel of one engine
pub struct RoutingCoordinator {
    engine_name: String,
    params: RoutingParams,
    platform: PlatformCapabilities,
    topology: TopologyCache,
    change_log: Arc<dyn ChangeLogStore>,
    store: Arc<dyn RoutingStore>,
    sequence: OnceCell<Arc<BatchSequence>>,
    slots: RwLock<HashMap<String, Arc<ChannelSlot>>>,
}

impl std::fmt::Debug for RoutingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingCoordinator")
            .field("engine_name", &self.engine_name)
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl RoutingCoordinator {
    /// Create a coordinator over an engine definition
    pub fn new(
        config: &EngineConfig,
        change_log: Arc<dyn ChangeLogStore>,
        store: Arc<dyn RoutingStore>,
    ) -> Result<Self> {
        let topology = TopologyCache::fixed(Topology::from_config(config)?);
        Ok(Self::with_topology(config, topology, change_log, store))
    }

    /// Create a coordinator reading channels and routers from a cache
    pub fn with_topology(
        config: &EngineConfig,
        topology: TopologyCache,
        change_log: Arc<dyn ChangeLogStore>,
        store: Arc<dyn RoutingStore>,
    ) -> Self {
        Self {
            engine_name: config.engine_name.clone(),
            params: config.routing.clone(),
            platform: config.platform.clone(),
            topology,
            change_log,
            store,
            sequence: OnceCell::new(),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Engine name
    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    /// Topology cache
    pub fn topology(&self) -> &TopologyCache {
        &self.topology
    }

    /// Current stage of a channel's pass, `None` if it never ran
    pub async fn pass_state(&self, channel_id: &str) -> Option<PassState> {
        let slots = self.slots.read().await;
        slots.get(channel_id).map(|slot| *slot.state.borrow())
    }

    /// Subscribe to stage changes of a channel
    pub async fn watch_state(&self, channel_id: &str) -> watch::Receiver<PassState> {
        self.slot(channel_id).await.state.subscribe()
    }

    /// Run one routing pass for a channel
    ///
    /// Fails with [`Error::ChannelBusy`] while another pass for the channel
    /// is in flight. Any other failure rolls the pass back and is returned
    /// as [`Error::PassFailed`].
    pub async fn route_channel(
        &self,
        channel_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PassReport> {
        let topology = self.topology.snapshot();
        let channel = topology
            .channel(channel_id)
            .cloned()
            .ok_or_else(|| Error::ChannelNotFound {
                channel_id: channel_id.to_string(),
            })?;

        let slot = self.slot(channel_id).await;
        let Ok(mut context) = slot.context.try_lock() else {
            return Err(Error::ChannelBusy {
                channel_id: channel_id.to_string(),
            });
        };

        let checkpoint = context.ledger.clone();
        let timeout_ms = self.params.pass_timeout_ms;
        let limit = match timeout_ms {
            0 => Duration::MAX,
            ms => Duration::from_millis(ms),
        };
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled {
                channel_id: channel_id.to_string(),
            }),
            result = tokio::time::timeout(
                limit,
                self.run_pass(&mut context, &slot, &topology, &channel, cancel),
            ) => result.unwrap_or(Err(Error::Timeout { timeout_ms })),
        };

        match outcome {
            Ok(mut report) => {
                if report.last_data_id.is_some() {
                    context.last_committed_id = report.last_data_id;
                }
                // Committed from here on; the backlog is informational only
                if let Some(watermark) = context.ledger.watermark() {
                    report.backlog = self.count_backlog(channel_id, watermark, cancel).await;
                }
                report.duration_ms = started.elapsed().as_millis() as u64;
                slot.state.send_replace(PassState::Idle);
                info!(
                    channel_id,
                    rows_read = report.rows_read,
                    rows_routed = report.rows_routed,
                    batches = report.batches_created,
                    gaps_deleted = report.gaps_deleted,
                    gaps_inserted = report.gaps_inserted,
                    backlog = report.backlog,
                    duration_ms = report.duration_ms,
                    "Routing pass committed"
                );
                Ok(report)
            }
            Err(e) => {
                context.ledger = checkpoint;
                slot.state.send_replace(PassState::Failed);
                let last_data_id = context.last_committed_id;
                if e.is_aborted() {
                    warn!(channel_id, last_data_id, error = %e, "Routing pass aborted and rolled back");
                } else {
                    error!(
                        channel_id,
                        last_data_id,
                        error = %e,
                        "Routing pass failed and was rolled back"
                    );
                }
                Err(Error::pass_failed(channel_id, last_data_id, e))
            }
        }
    }

    /// Run one pass for every enabled channel concurrently
    pub async fn route_all(self: &Arc<Self>, cancel: &CancellationToken) -> RoutingRound {
        let started = Instant::now();
        let topology = self.topology.snapshot();
        let mut tasks = JoinSet::new();
        for channel in topology.channels().iter().filter(|c| c.enabled) {
            let coordinator = Arc::clone(self);
            let cancel = cancel.clone();
            let channel_id = channel.channel_id.clone();
            tasks.spawn(async move { coordinator.route_channel(&channel_id, &cancel).await });
        }

        let mut round = RoutingRound::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(report)) => {
                    round.stats.add_report(&report);
                    round.reports.push(report);
                }
                Ok(Err(e)) => {
                    round.stats.add_failure();
                    round.failures.push(e);
                }
                Err(e) => {
                    round.stats.add_failure();
                    round
                        .failures
                        .push(Error::Other(format!("Routing task failed: {e}")));
                }
            }
        }
        round.reports.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        round
            .stats
            .set_duration(started.elapsed().as_millis() as u64);
        round
    }

    async fn slot(&self, channel_id: &str) -> Arc<ChannelSlot> {
        if let Some(slot) = self.slots.read().await.get(channel_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        let slot = slots.entry(channel_id.to_string()).or_insert_with(|| {
            Arc::new(ChannelSlot {
                context: Mutex::new(ChannelContext {
                    ledger: GapLedger::new(channel_id, &self.params),
                    planner: RangeQueryPlanner::new(PlannerThresholds::from_config(
                        &self.params,
                        &self.platform,
                    )),
                    last_committed_id: None,
                }),
                state: watch::Sender::new(PassState::Idle),
            })
        });
        Arc::clone(slot)
    }

    async fn batch_sequence(&self) -> Result<Arc<BatchSequence>> {
        let sequence = self
            .sequence
            .get_or_try_init(|| async {
                let last = self.store.max_batch_id().await?;
                Ok::<_, Error>(Arc::new(BatchSequence::starting_after(last)))
            })
            .await?;
        Ok(Arc::clone(sequence))
    }

    fn cursor_options(&self, channel: &Channel) -> CursorOptions {
        CursorOptions {
            peek_ahead_window: self.params.peek_ahead_window.max(1),
            track_transactions: self.platform.supports_transaction_id
                && channel.batch_algorithm.keeps_transactions(),
            max_rows: channel.max_data_to_route.max(1),
        }
    }

    async fn run_pass(
        &self,
        context: &mut ChannelContext,
        slot: &ChannelSlot,
        topology: &Topology,
        channel: &Channel,
        cancel: &CancellationToken,
    ) -> Result<PassReport> {
        let channel_id = channel.channel_id.as_str();
        let mut report = PassReport::new(channel_id);
        let set_state = |state: PassState| {
            slot.state.send_replace(state);
            debug!(channel_id, state = %state, "Routing pass state");
        };

        // Gap snapshot
        set_state(PassState::GapSnapshot);
        let snapshot = self.store.load_gaps(channel_id).await?;
        let last_routed = self.store.last_routed_data_id(channel_id).await?;
        if context.last_committed_id.is_none() {
            context.last_committed_id = last_routed;
        }
        let earliest = self.change_log.earliest_transaction_start().await?;
        let ledger = &mut context.ledger;
        ledger.set_transaction_view(self.platform.supports_transaction_view);
        ledger.set_earliest_open_transaction(earliest);
        ledger.set_last_busy_expire(snapshot.last_busy_expire);
        ledger.before_routing_pass(snapshot.gaps, last_routed, Utc::now());
        let gaps = ledger.query_gaps();

        // Querying
        set_state(PassState::Querying);
        let mut plan: QueryPlan = context.planner.plan(channel, &gaps);
        if !topology.router().needs_payload(channel_id) {
            plan = plan.without_payload();
        }
        let mut cursor = ChangeRowCursor::new(
            Arc::clone(&self.change_log),
            plan,
            gaps,
            self.cursor_options(channel),
        );
        let mut accumulator = BatchAccumulator::new(
            channel_id,
            BatchLimits::from_channel(channel),
            self.batch_sequence().await?,
        );
        let mut batches = Vec::new();

        // Routing
        set_state(PassState::Routing);
        loop {
            if cancel.is_cancelled() {
                cursor.close();
                return Err(Error::Cancelled {
                    channel_id: channel_id.to_string(),
                });
            }
            let row = match cursor.next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    cursor.close();
                    return Err(e);
                }
            };
            report.rows_read += 1;
            context.ledger.record_observed_id(row.data_id);

            let destinations = topology.router().route(&row, channel);
            if destinations.is_empty() {
                report.rows_unrouted += 1;
                continue;
            }
            report.rows_routed += 1;
            let at_boundary = cursor.at_transaction_boundary();
            for node_id in &destinations {
                if let Some(batch) = accumulator.offer(&row, node_id, at_boundary) {
                    batches.push(batch);
                }
            }
        }
        let all_data_read = cursor.all_data_read();
        report.all_data_read = all_data_read;
        report.last_data_id = cursor.last_data_id();
        report.queries_executed = cursor.stats().queries_executed;
        cursor.close();

        // Batching
        set_state(PassState::Batching);
        batches.extend(accumulator.finish());
        for batch in &mut batches {
            batch.mark_ready();
        }
        report.batches_created = batches.len();

        // Committing
        set_state(PassState::Committing);
        let mut verified_empty = BTreeSet::new();
        for gap in context.ledger.stale_gaps_to_verify(all_data_read) {
            let count = self
                .change_log
                .count_data_in_range(channel_id, gap.start_id, gap.end_id)
                .await?;
            if count == 0 {
                verified_empty.insert(gap);
            }
        }
        let delta = context
            .ledger
            .after_routing_pass(all_data_read, &verified_empty);
        report.gaps_deleted = delta.to_delete.len();
        report.gaps_inserted = delta.to_insert.len();

        let mut commit = PassCommit::new(channel_id, snapshot.version);
        commit.gap_delta = delta;
        commit.batches = batches;
        commit.last_busy_expire = context.ledger.last_busy_expire();
        report.gap_version = self.store.commit(commit).await?;
        Ok(report)
    }

    /// Rows above the watermark still waiting to be routed
    ///
    /// Runs after the commit, so cancellation or a store error only leaves
    /// the count unset.
    async fn count_backlog(
        &self,
        channel_id: &str,
        watermark: DataId,
        cancel: &CancellationToken,
    ) -> Option<u64> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(channel_id, "Backlog count skipped after cancellation");
                None
            }
            counted = self.change_log.count_unrouted(channel_id, watermark) => match counted {
                Ok(backlog) => Some(backlog),
                Err(e) => {
                    warn!(channel_id, error = %e, "Failed to count unrouted rows");
                    None
                }
            },
        }
    }
}

