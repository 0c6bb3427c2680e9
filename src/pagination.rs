//! Incremental scroll-and-collect loop.
//!
//! Each iteration harvests whatever the page currently renders, tells the
//! [`StopEvaluator`] how many of those items were new, and either stops or
//! scrolls further and waits for the page to render more.

use crate::browser::PageDriver;
use crate::config::PaginationArgs;
use crate::scroller::{ScrollOutcome, Scroller};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Stop-condition knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationPolicy {
    /// Consecutive no-progress iterations that end the loop.
    pub stall_threshold: u32,
    /// Iteration index a stall must reach before it can end the loop.
    pub min_iterations: u32,
    /// Absolute cap on iterations.
    pub max_iterations: u32,
}

impl From<&PaginationArgs> for PaginationPolicy {
    fn from(args: &PaginationArgs) -> Self {
        Self {
            stall_threshold: args.stall_threshold,
            min_iterations: args.min_scrolls,
            max_iterations: args.max_scrolls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Progressing,
    Stalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing new for `stall_threshold` iterations past the floor.
    Exhausted,
    /// `max_iterations` reached.
    IterationCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop(StopReason),
}

/// Two-state evaluator over per-iteration new-item counts.
#[derive(Debug, Clone)]
pub struct StopEvaluator {
    policy: PaginationPolicy,
    state: ProgressState,
    stalled: u32,
}

impl StopEvaluator {
    pub fn new(policy: PaginationPolicy) -> Self {
        Self {
            policy,
            state: ProgressState::Progressing,
            stalled: 0,
        }
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    /// Consecutive iterations without new items.
    pub fn stalled(&self) -> u32 {
        self.stalled
    }

    /// Record iteration `index` (0-based) and decide whether the loop ends here.
    pub fn observe(&mut self, index: u32, new_items: usize) -> Decision {
        if new_items > 0 {
            self.state = ProgressState::Progressing;
            self.stalled = 0;
        } else {
            self.state = ProgressState::Stalled;
            self.stalled += 1;
        }

        if self.stalled >= self.policy.stall_threshold && index >= self.policy.min_iterations {
            return Decision::Stop(StopReason::Exhausted);
        }
        if index + 1 >= self.policy.max_iterations {
            return Decision::Stop(StopReason::IterationCap);
        }
        Decision::Continue
    }
}

/// Pause after each scroll, lengthened once the page looks stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub step_pause: Duration,
    /// Stall count from which the pause is multiplied.
    pub slow_down_after: u32,
    pub slow_down_factor: u32,
}

impl Pacing {
    pub fn new(step_pause: Duration) -> Self {
        Self {
            step_pause,
            slow_down_after: 3,
            slow_down_factor: 2,
        }
    }

    pub fn pause_for(&self, stalled: u32) -> Duration {
        if stalled >= self.slow_down_after {
            self.step_pause * self.slow_down_factor
        } else {
            self.step_pause
        }
    }
}

impl From<&PaginationArgs> for Pacing {
    fn from(args: &PaginationArgs) -> Self {
        Self::new(Duration::from_millis(args.scroll_pause_ms))
    }
}

/// Sleep for `pause` unless `cancel` fires first. Returns false when cancelled.
pub async fn pause_unless_cancelled(cancel: &CancellationToken, pause: Duration) -> bool {
    tokio::select! {
        _ = sleep(pause) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Collects items from the current DOM into its own accumulator.
#[async_trait]
pub trait Harvester: Send {
    /// Re-read the page and return how many previously unseen items were added.
    /// Extraction problems are logged and count as zero.
    async fn harvest(&mut self, page: &dyn PageDriver) -> usize;

    /// Items accumulated so far.
    fn total(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationReport {
    /// Iterations performed, including the one that stopped the loop.
    pub iterations: u32,
    pub stop_reason: StopReason,
    pub scroll_failures: u32,
    pub items: usize,
}

/// Drive `harvester` over an infinite-scroll page until the policy says stop.
pub async fn scroll_and_collect<H: Harvester + ?Sized>(
    page: &dyn PageDriver,
    scroller: &mut Scroller,
    harvester: &mut H,
    policy: PaginationPolicy,
    pacing: Pacing,
) -> PaginationReport {
    let mut evaluator = StopEvaluator::new(policy);
    let mut scroll_failures = 0;
    let mut index = 0;

    let stop_reason = loop {
        let new_items = harvester.harvest(page).await;
        debug!(
            "Iteration {}: {} new items ({} total)",
            index + 1,
            new_items,
            harvester.total()
        );

        if let Decision::Stop(reason) = evaluator.observe(index, new_items) {
            break reason;
        }
        if evaluator.state() == ProgressState::Stalled {
            debug!(
                "No new items for {} consecutive iterations",
                evaluator.stalled()
            );
        }

        if scroller.advance(page).await == ScrollOutcome::Failed {
            scroll_failures += 1;
        }
        sleep(pacing.pause_for(evaluator.stalled())).await;
        index += 1;
    };

    let report = PaginationReport {
        iterations: index + 1,
        stop_reason,
        scroll_failures,
        items: harvester.total(),
    };
    info!(
        "Pagination finished after {} iterations ({:?}): {} items, {} failed scrolls",
        report.iterations, report.stop_reason, report.items, report.scroll_failures
    );
    report
}
