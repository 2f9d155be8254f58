//! Synthesizes `change` events for form controls a browser repopulated while
//! restoring a page from its back/forward history cache.
//!
//! Browsers write restored values into text inputs, text areas and selects
//! without firing `change`. [`restore_change_events`] detects a completed
//! back/forward restoration, snapshots the controls, waits for the document
//! lifecycle plus one deferred tick, and dispatches `change` to every control
//! whose value moved.
//!
//! The page is reached only through the [`BrowsingContext`] and [`Document`]
//! traits. [`harness`] provides a deterministic in-process implementation for
//! tests and reproductions.

use thiserror::Error;

pub mod context;
pub mod detector;
pub mod differ;
pub mod harness;
pub mod orchestrator;
pub mod snapshot;

pub use context::{
    BrowsingContext, Document, ElementOf, NavigationType, PerformanceNavigation, ReadyState,
};
pub use detector::should_skip;
pub use differ::diff;
pub use harness::{
    ElementRef, Event, EventLog, EventPhase, EventTarget, MockBrowser, MockDocument, MockWindow,
};
pub use orchestrator::{
    Orchestrator, Outcome, Phase, RestoreOptions, SnapshotTiming, identity, restore_change_events,
    restore_change_events_with,
};
pub use snapshot::{ControlKind, ObservedValue, Snapshot, SnapshotEntry, capture};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("html parse error: {0}")]
    HtmlParse(String),
    #[error("observation failed: {0}")]
    Observation(String),
    #[error("snapshot transform failed: {0}")]
    Transform(String),
    #[error("dispatch to {target} failed: {message}")]
    Dispatch { target: String, message: String },
    #[error("ready state listener detached before the document completed")]
    LifecycleDetached,
    #[error("deferred task dropped before it ran")]
    DeferredTaskDropped,
    #[error("restoration run already started")]
    AlreadyStarted,
    #[error("selector not found: {0}")]
    SelectorNotFound(String),
    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error("type mismatch for {selector}: expected {expected}, actual {actual}")]
    TypeMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    #[error("assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}")]
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
    #[error("history error: {0}")]
    History(String),
    #[error("harness error: {0}")]
    Harness(String),
}
