pub mod accumulator;
pub mod resolver;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::models::common::EntityKind;
use crate::models::errors::ExportError;
use crate::scheduler::accumulator::Accumulator;
use crate::scheduler::resolver::{discovery_dependencies, resolve};
use crate::storage::ExportRouter;

/// A contiguous, inclusive range of blocks processed as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    pub fn blocks(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The fetch/derive work of a pipeline, one call per task.
#[async_trait]
pub trait Stages: Send + Sync + 'static {
    /// Produce the entities of `kind` for `window` into `acc`. Prerequisite kinds are
    /// already present. Returns the number of entities produced.
    async fn extract(&self, kind: EntityKind, window: Window, acc: &Accumulator) -> Result<usize>;

    /// Second pass: fold pool and token metadata back into the window's events.
    async fn enrich(&self, window: Window, acc: &Accumulator) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskId {
    Extract(EntityKind),
    EnrichEvents,
    Export { sink: usize, kind: EntityKind },
    Finish,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Extract(kind) => write!(f, "extract:{kind}"),
            TaskId::EnrichEvents => f.write_str("enrich:event"),
            TaskId::Export { sink, kind } => write!(f, "export:{sink}:{kind}"),
            TaskId::Finish => f.write_str("finish"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
}

#[derive(Debug)]
struct TaskNode {
    state: TaskState,
    depends_on: Vec<TaskId>,
}

/// Tasks of one window and the edges between them.
#[derive(Debug)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, TaskNode>,
}

impl TaskGraph {
    /// One extract task per resolved kind, an enrichment task when events are
    /// produced, one export task per routed (sink, kind), and a `Finish` node that
    /// depends on everything else.
    pub fn build(kinds: &BTreeSet<EntityKind>, routes: &[(usize, EntityKind)]) -> Self {
        let mut tasks = BTreeMap::new();
        let mut add = |id: TaskId, depends_on: Vec<TaskId>| {
            tasks.insert(
                id,
                TaskNode {
                    state: TaskState::Pending,
                    depends_on,
                },
            );
        };

        for kind in kinds {
            let deps = discovery_dependencies(*kind)
                .iter()
                .filter(|dep| kinds.contains(dep))
                .map(|dep| TaskId::Extract(*dep))
                .collect();
            add(TaskId::Extract(*kind), deps);
        }

        let enrich = kinds.contains(&EntityKind::Event);
        if enrich {
            let deps = [EntityKind::Event, EntityKind::Pool, EntityKind::Token]
                .into_iter()
                .filter(|kind| kinds.contains(kind))
                .map(TaskId::Extract)
                .collect();
            add(TaskId::EnrichEvents, deps);
        }

        for (sink, kind) in routes {
            if !kinds.contains(kind) {
                warn!("Sink {} is routed {} but it is not extracted; skipping", sink, kind);
                continue;
            }
            let upstream = if *kind == EntityKind::Event && enrich {
                TaskId::EnrichEvents
            } else {
                TaskId::Extract(*kind)
            };
            add(
                TaskId::Export {
                    sink: *sink,
                    kind: *kind,
                },
                vec![upstream],
            );
        }

        let all = tasks.keys().copied().collect();
        tasks.insert(
            TaskId::Finish,
            TaskNode {
                state: TaskState::Pending,
                depends_on: all,
            },
        );

        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(|node| node.state)
    }

    /// Pending tasks whose dependencies are all done.
    pub fn ready(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, node)| node.state == TaskState::Pending)
            .filter(|(_, node)| {
                node.depends_on
                    .iter()
                    .all(|dep| self.state(*dep) == Some(TaskState::Done))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn mark_running(&mut self, id: TaskId) {
        if let Some(node) = self.tasks.get_mut(&id) {
            node.state = TaskState::Running;
        }
    }

    pub fn mark_done(&mut self, id: TaskId) {
        if let Some(node) = self.tasks.get_mut(&id) {
            node.state = TaskState::Done;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state(TaskId::Finish) == Some(TaskState::Done)
    }
}

/// Result of one processed window.
#[derive(Debug, Clone)]
pub struct WindowReport {
    pub window: Window,
    /// Blocks completed so far in the run, including this window.
    pub progress: u64,
    pub counts: BTreeMap<EntityKind, usize>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub windows: Vec<WindowReport>,
}

impl RunSummary {
    pub fn blocks(&self) -> u64 {
        self.windows.last().map(|w| w.progress).unwrap_or_default()
    }

    pub fn total(&self, kind: EntityKind) -> usize {
        self.windows
            .iter()
            .filter_map(|w| w.counts.get(&kind))
            .sum()
    }
}

/// Runs the task graph for each window of a block range.
pub struct Scheduler {
    stages: Arc<dyn Stages>,
    router: Arc<ExportRouter>,
    kinds: BTreeSet<EntityKind>,
}

impl Scheduler {
    pub fn new(stages: Arc<dyn Stages>, router: Arc<ExportRouter>, targets: &BTreeSet<EntityKind>) -> Self {
        let kinds = resolve(targets);
        info!(
            "Resolved {} requested entity kind(s) to {}: {:?}",
            targets.len(),
            kinds.len(),
            kinds
        );
        Self { stages, router, kinds }
    }

    /// Process `start..=end` in windows of `batch_size` blocks. Stops at the first
    /// failed window; earlier windows stay exported.
    pub async fn run(&self, start: u64, end: u64, batch_size: u64) -> Result<RunSummary> {
        if start > end {
            return Err(anyhow!("Invalid block range: start {start} is after end {end}"));
        }
        let total = (end - start).saturating_add(1);
        let batch_size = batch_size.max(1);
        let mut progress: u64 = 0;
        let mut next_start = Some(start);
        let mut summary = RunSummary::default();

        while let Some(window_start) = next_start {
            let window = Window {
                start: window_start,
                end: window_start.saturating_add(batch_size - 1).min(end),
            };

            let window_timer = Instant::now();
            let counts = self
                .run_window(window)
                .await
                .with_context(|| format!("Window {window} failed"))?;
            let duration = window_timer.elapsed();
            progress = progress.saturating_add(window.len());
            next_start = (window.end < end).then(|| window.end + 1);

            if let Some(metrics) = Metrics::global() {
                metrics.record_window(window.len(), window.end, duration.as_secs_f64());
            }
            info!(
                "Processed blocks {} ({}/{}) in {:.2?}",
                window, progress, total, duration
            );

            summary.windows.push(WindowReport {
                window,
                progress,
                counts,
                duration,
            });
        }

        Ok(summary)
    }

    /// Execute every task for one window, starting tasks as soon as their
    /// dependencies finish. Extraction failures abort the window immediately;
    /// export failures are collected and reported once the graph drains.
    pub async fn run_window(&self, window: Window) -> Result<BTreeMap<EntityKind, usize>> {
        let acc = Arc::new(Accumulator::new());
        let mut graph = TaskGraph::build(&self.kinds, &self.router.routes());
        let mut running: JoinSet<(TaskId, Result<()>)> = JoinSet::new();
        let mut failures = Vec::new();

        debug!("Window {} has {} task(s)", window, graph.len());

        loop {
            for id in graph.ready() {
                if id == TaskId::Finish {
                    graph.mark_done(id);
                    continue;
                }
                graph.mark_running(id);

                let stages = self.stages.clone();
                let router = self.router.clone();
                let acc = acc.clone();
                running.spawn(async move {
                    let result = execute(id, window, stages.as_ref(), &router, &acc).await;
                    (id, result)
                });
            }

            if graph.is_finished() {
                break;
            }

            match running.join_next().await {
                Some(Ok((id, Ok(())))) => {
                    debug!("Task {} done for window {}", id, window);
                    graph.mark_done(id);
                }
                Some(Ok((id @ TaskId::Export { sink, kind }, Err(e)))) => {
                    let sink = self.router.sink_name(sink).unwrap_or("unknown");
                    failures.push(format!("{sink}/{kind}: {e:#}"));
                    graph.mark_done(id);
                }
                Some(Ok((id, Err(e)))) => {
                    error!("Task {} failed for window {}: {:#}", id, window, e);
                    running.abort_all();
                    return Err(e.context(format!("Task {id} failed")));
                }
                Some(Err(e)) => {
                    running.abort_all();
                    return Err(anyhow!("Task panicked or was cancelled: {e}"));
                }
                None => {
                    return Err(anyhow!("Task graph stalled for window {window}"));
                }
            }
        }

        let counts = acc.counts().await;
        acc.clear().await;

        if !failures.is_empty() {
            return Err(ExportError::WindowFailed {
                failures: failures.len(),
                first_block: window.start,
                last_block: window.end,
                details: failures.join("; "),
            }
            .into());
        }

        Ok(counts)
    }
}

async fn execute(
    id: TaskId,
    window: Window,
    stages: &dyn Stages,
    router: &ExportRouter,
    acc: &Accumulator,
) -> Result<()> {
    match id {
        TaskId::Extract(kind) => {
            let count = stages.extract(kind, window, acc).await?;
            debug!("Extracted {} {} entities for blocks {}", count, kind, window);
        }
        TaskId::EnrichEvents => stages.enrich(window, acc).await?,
        TaskId::Export { sink, kind } => {
            let records = acc.records(kind).await?;
            if !records.is_empty() {
                router.export_to(sink, kind, &records).await?;
            }
        }
        TaskId::Finish => {}
    }
    Ok(())
}
