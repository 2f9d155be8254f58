//! Sequencing of a restoration run.
//!
//! A run moves through `Idle → WaitingForComplete → Debounced → Dispatching
//! → Settled`. It suspends exactly twice: until the document reports
//! `complete`, and then for one deferred tick so the browser's own
//! restoration writes land before controls are compared.

use futures::StreamExt;
use futures::channel::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::context::{BrowsingContext, Document, ElementOf, ReadyState};
use crate::detector::should_skip;
use crate::differ::diff;
use crate::snapshot::{Snapshot, capture};
use crate::{Error, Result};

/// When the baseline snapshot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotTiming {
    /// Snapshot when the run starts, then fold in controls discovered on each
    /// intermediate lifecycle notification. The earliest captured value of a
    /// control wins.
    #[default]
    Streaming,
    /// Snapshot once, when `complete` is observed. Controls that appear after
    /// that are not tracked.
    AfterComplete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    pub snapshot_timing: SnapshotTiming,
}

impl RestoreOptions {
    pub fn with_snapshot_timing(mut self, timing: SnapshotTiming) -> Self {
        self.snapshot_timing = timing;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    WaitingForComplete,
    Debounced,
    Dispatching,
    Settled(Outcome),
}

/// Snapshot transform that leaves the snapshot untouched.
pub fn identity<E>(snapshot: Snapshot<E>) -> Result<Snapshot<E>> {
    Ok(snapshot)
}

/// Dispatches `change` to every form control a back/forward restoration
/// repopulated, using the default options.
pub async fn restore_change_events<C: BrowsingContext>(context: &C) -> Result<()> {
    restore_change_events_with(context, RestoreOptions::default(), identity).await
}

/// Like [`restore_change_events`], with explicit options and a transform
/// applied to every snapshot before it is used.
///
/// Resolves immediately without touching the page when [`should_skip`] says so.
pub async fn restore_change_events_with<C, F>(
    context: &C,
    options: RestoreOptions,
    transform: F,
) -> Result<()>
where
    C: BrowsingContext,
    F: FnMut(Snapshot<ElementOf<C>>) -> Result<Snapshot<ElementOf<C>>>,
{
    if should_skip(context) {
        debug!(target: "restored_change", "not a completed back/forward restoration, skipping");
        return Ok(());
    }
    Orchestrator::new(context, options).run(transform).await
}

pub struct Orchestrator<'a, C: BrowsingContext> {
    context: &'a C,
    options: RestoreOptions,
    phase: Phase,
}

impl<'a, C: BrowsingContext> Orchestrator<'a, C> {
    pub fn new(context: &'a C, options: RestoreOptions) -> Self {
        Self {
            context,
            options,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }

    /// Runs the state machine to completion. Does not consult the detector.
    ///
    /// Any failure settles the run; events dispatched before the failure
    /// stay dispatched and no further ones are attempted.
    pub async fn run<F>(&mut self, mut transform: F) -> Result<()>
    where
        F: FnMut(Snapshot<ElementOf<C>>) -> Result<Snapshot<ElementOf<C>>>,
    {
        if self.phase != Phase::Idle {
            return Err(Error::AlreadyStarted);
        }

        let result = self.drive(&mut transform).await;
        match &result {
            Ok(()) => self.transition(Phase::Settled(Outcome::Success)),
            Err(err) => {
                warn!(target: "restored_change", error = %err, phase = ?self.phase, "restoration run failed");
                self.transition(Phase::Settled(Outcome::Failure));
            }
        }
        result
    }

    async fn drive<F>(&mut self, transform: &mut F) -> Result<()>
    where
        F: FnMut(Snapshot<ElementOf<C>>) -> Result<Snapshot<ElementOf<C>>>,
    {
        let context = self.context;
        let document = context.document();
        let streaming = self.options.snapshot_timing == SnapshotTiming::Streaming;

        let mut tracked = if streaming {
            capture(document)?
        } else {
            Snapshot::new()
        };

        let (notify, mut notifications) = mpsc::unbounded::<()>();
        document.on_ready_state_change(Box::new(move || {
            // The receiver is gone once the run settles.
            let _ = notify.unbounded_send(());
        }))?;
        self.transition(Phase::WaitingForComplete);

        let mut state = document.ready_state()?;
        while state != ReadyState::Complete {
            if notifications.next().await.is_none() {
                return Err(Error::LifecycleDetached);
            }
            state = document.ready_state()?;
            if state != ReadyState::Complete && streaming {
                let discovered = transform(capture(document)?)?;
                let added = tracked.merge(discovered);
                debug!(target: "restored_change", %state, added, tracked = tracked.len(), "merged controls");
            }
        }

        if !streaming {
            tracked = capture(document)?;
        }

        let (tick, ticked) = oneshot::channel::<()>();
        context.defer(Box::new(move || {
            let _ = tick.send(());
        }))?;
        self.transition(Phase::Debounced);
        ticked.await.map_err(|_| Error::DeferredTaskDropped)?;

        self.transition(Phase::Dispatching);
        let changed = diff(document, transform(tracked)?.entries())?;
        debug!(target: "restored_change", changed = changed.len(), "dispatching change events");
        for element in &changed {
            document.dispatch_change(element)?;
            debug!(target: "restored_change", ?element, "dispatched change");
        }
        Ok(())
    }

    fn transition(&mut self, next: Phase) {
        debug!(target: "restored_change", from = ?self.phase, to = ?next, "phase");
        self.phase = next;
    }
}
