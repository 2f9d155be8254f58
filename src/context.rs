//! The slice of a browsing context the restoration workaround observes.
//!
//! Nothing in this crate reaches for ambient browser globals. Everything it
//! reads (navigation metadata, document lifecycle, form-control values) and
//! everything it does (register a lifecycle listener, defer a task, dispatch a
//! `change` event) goes through these two traits, so a page, an embedding
//! shell or the in-process [`harness`](crate::harness) can stand in.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Document load progress, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

impl ReadyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Interactive => "interactive",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadyState {
    type Err = Error;

    fn from_str(src: &str) -> Result<Self> {
        match src {
            "loading" => Ok(Self::Loading),
            "interactive" => Ok(Self::Interactive),
            "complete" => Ok(Self::Complete),
            other => Err(Error::Observation(format!("unknown ready state: {other}"))),
        }
    }
}

/// Numeric navigation-type codes as exposed by `performance.navigation.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationType {
    Navigate,
    Reload,
    BackForward,
    Reserved,
}

impl NavigationType {
    pub fn code(self) -> u16 {
        match self {
            Self::Navigate => 0,
            Self::Reload => 1,
            Self::BackForward => 2,
            Self::Reserved => 255,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Navigate),
            1 => Some(Self::Reload),
            2 => Some(Self::BackForward),
            255 => Some(Self::Reserved),
            _ => None,
        }
    }
}

/// Raw navigation descriptor. A descriptor whose type field is absent or
/// unreadable carries `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerformanceNavigation {
    pub navigation_type: Option<u16>,
}

impl PerformanceNavigation {
    pub fn of(kind: NavigationType) -> Self {
        Self {
            navigation_type: Some(kind.code()),
        }
    }

    pub fn kind(&self) -> Option<NavigationType> {
        self.navigation_type.and_then(NavigationType::from_code)
    }
}

/// Callback invoked on every lifecycle-state change of a document.
pub type ReadyStateListener = Box<dyn FnMut()>;

/// One-shot task handed to [`BrowsingContext::defer`].
pub type DeferredTask = Box<dyn FnOnce()>;

/// The document surface: lifecycle, form-control reads and event dispatch.
///
/// Element handles are non-owning; two handles to the same control must
/// compare equal.
pub trait Document {
    type Element: Clone + PartialEq + fmt::Debug;

    fn ready_state(&self) -> Result<ReadyState>;

    /// Connected elements with the given tag name, in document order.
    fn elements_by_tag_name(&self, tag_name: &str) -> Result<Vec<Self::Element>>;

    fn tag_name(&self, element: &Self::Element) -> Result<String>;

    /// Current value of a text-like control.
    fn value(&self, element: &Self::Element) -> Result<String>;

    /// Current selected index of a choice control, `-1` when nothing is selected.
    fn selected_index(&self, element: &Self::Element) -> Result<i64>;

    /// Synthesizes a `change` event and dispatches it to `element` synchronously.
    fn dispatch_change(&self, element: &Self::Element) -> Result<()>;

    /// Registers a listener for `readystatechange`. Listeners are released
    /// once the document reaches `complete`; registering on a document that
    /// is already `complete` stores nothing.
    fn on_ready_state_change(&self, listener: ReadyStateListener) -> Result<()>;
}

pub trait BrowsingContext {
    type Document: Document;

    /// `None` when the performance/navigation descriptor is absent or null.
    fn navigation(&self) -> Option<PerformanceNavigation>;

    fn document(&self) -> &Self::Document;

    /// Schedules `task` to run after the current synchronous work and any
    /// pending rendering work. Deferred tasks run in FIFO order.
    fn defer(&self, task: DeferredTask) -> Result<()>;
}

/// Element handle type of a context's document.
pub type ElementOf<C> = <<C as BrowsingContext>::Document as Document>::Element;
