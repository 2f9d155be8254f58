//! Deterministic in-process browsing context.
//!
//! [`MockWindow`] implements [`BrowsingContext`] over an arena DOM with a
//! document lifecycle, capture/bubble event dispatch and a FIFO queue of
//! deferred tasks. Nothing runs on its own: tests advance the lifecycle and
//! the task queue explicitly, or hand a future to [`MockWindow::drive`].
//! [`MockBrowser`] layers a back/forward history with form-value restoration
//! on top.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::task::noop_waker_ref;

use crate::context::{
    BrowsingContext, DeferredTask, Document, NavigationType, PerformanceNavigation, ReadyState,
    ReadyStateListener,
};
use crate::{Error, Result};

mod browser;
mod dom;
mod events;
mod html;

pub use browser::MockBrowser;
pub use events::{Event, EventLog, EventPhase, EventTarget};

use dom::{Dom, NodeId, truncate_chars};
use events::{Listener, ListenerStore};
use html::parse_html;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_TASK_STEP_LIMIT: usize = 10_000;
const DEFAULT_TRACE_LOG_LIMIT: usize = 10_000;

/// Handle to an element of one specific [`MockDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef {
    document: u64,
    node: NodeId,
}

impl ElementRef {
    pub fn document_id(&self) -> u64 {
        self.document
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document{}/node{}", self.document, self.node.0)
    }
}

struct ScheduledTask {
    id: u64,
    task: DeferredTask,
}

#[derive(Debug, Default)]
struct PlatformMockState {
    ready_state_failure: Option<String>,
    dispatch_failures: HashMap<NodeId, String>,
}

#[derive(Debug)]
struct TraceState {
    enabled: bool,
    logs: VecDeque<String>,
    log_limit: usize,
}

struct PageState {
    id: u64,
    url: String,
    dom: Dom,
    ready_state: ReadyState,
    navigation: Option<PerformanceNavigation>,
    ready_state_listeners: Vec<Rc<RefCell<ReadyStateListener>>>,
    listeners: ListenerStore,
    task_queue: VecDeque<ScheduledTask>,
    next_task_id: u64,
    task_step_limit: usize,
    platform_mocks: PlatformMockState,
    trace: TraceState,
}

impl PageState {
    fn node_label(&self, node: NodeId) -> String {
        if node == self.dom.root {
            return "document".into();
        }
        let Some(tag) = self.dom.tag_name(node) else {
            return format!("node{}", node.0);
        };
        match self.dom.attr(node, "id") {
            Some(id) if !id.is_empty() => format!("{tag}#{id}"),
            _ => tag.to_string(),
        }
    }

    fn trace_line(&mut self, line: String) {
        tracing::trace!(target: "restored_change::harness", url = %self.url, "{line}");
        if !self.trace.enabled {
            return;
        }
        if self.trace.logs.len() >= self.trace.log_limit {
            self.trace.logs.pop_front();
        }
        self.trace.logs.push_back(line);
    }
}

/// The document half of a [`MockWindow`]. Clones share the same page.
#[derive(Clone)]
pub struct MockDocument {
    state: Rc<RefCell<PageState>>,
}

impl fmt::Debug for MockDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MockDocument")
            .field("id", &state.id)
            .field("url", &state.url)
            .field("ready_state", &state.ready_state)
            .field("pending_tasks", &state.task_queue.len())
            .finish()
    }
}

impl MockDocument {
    fn new(url: &str, dom: Dom) -> Self {
        let state = PageState {
            id: NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed),
            url: url.to_string(),
            dom,
            ready_state: ReadyState::Loading,
            navigation: Some(PerformanceNavigation::of(NavigationType::Navigate)),
            ready_state_listeners: Vec::new(),
            listeners: ListenerStore::default(),
            task_queue: VecDeque::new(),
            next_task_id: 1,
            task_step_limit: DEFAULT_TASK_STEP_LIMIT,
            platform_mocks: PlatformMockState::default(),
            trace: TraceState {
                enabled: false,
                logs: VecDeque::new(),
                log_limit: DEFAULT_TRACE_LOG_LIMIT,
            },
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.borrow().id
    }

    pub fn url(&self) -> String {
        self.state.borrow().url.clone()
    }

    fn element_ref(&self, node: NodeId) -> ElementRef {
        ElementRef {
            document: self.id(),
            node,
        }
    }

    fn resolve(&self, element: &ElementRef) -> Result<NodeId> {
        let state = self.state.borrow();
        if element.document != state.id {
            return Err(Error::Observation(format!(
                "{element} belongs to another document"
            )));
        }
        if state.dom.element(element.node).is_none() {
            return Err(Error::Observation(format!("{element} is not an element")));
        }
        Ok(element.node)
    }

    fn select_node(&self, selector: &str) -> Result<NodeId> {
        self.state
            .borrow()
            .dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    /// First connected element matching a compound selector: `tag`, `#id`,
    /// `[name=value]` and `:nth-of-type(n)` in any combination.
    pub fn query_selector(&self, selector: &str) -> Result<ElementRef> {
        Ok(self.element_ref(self.select_node(selector)?))
    }

    pub fn label(&self, element: &ElementRef) -> String {
        match self.resolve(element) {
            Ok(node) => self.state.borrow().node_label(node),
            Err(_) => element.to_string(),
        }
    }

    pub fn is_connected(&self, element: &ElementRef) -> Result<bool> {
        let node = self.resolve(element)?;
        Ok(self.state.borrow().dom.is_connected(node))
    }

    /// Script-style value write. Fires no events.
    pub fn set_element_value(&self, element: &ElementRef, value: &str) -> Result<()> {
        let node = self.resolve(element)?;
        self.state.borrow_mut().dom.set_value(node, value)
    }

    /// Script-style selection write. Fires no events. Out-of-range indexes
    /// deselect every option.
    pub fn set_element_selected_index(&self, element: &ElementRef, index: i64) -> Result<()> {
        let node = self.resolve(element)?;
        self.state.borrow_mut().dom.set_selected_index(node, index)
    }

    pub fn set_value(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.query_selector(selector)?;
        self.set_element_value(&element, value)
    }

    pub fn set_selected_index(&self, selector: &str, index: i64) -> Result<()> {
        let element = self.query_selector(selector)?;
        self.set_element_selected_index(&element, index)
    }

    /// Replaces the value of an `input` or `textarea` the way typing does,
    /// firing a trusted `input` event. Disabled and read-only controls are
    /// left alone.
    pub fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let target = self.select_node(selector)?;
        {
            let state = self.state.borrow();
            if state.dom.attr(target, "disabled").is_some()
                || state.dom.attr(target, "readonly").is_some()
            {
                return Ok(());
            }
            let tag = state
                .dom
                .tag_name(target)
                .unwrap_or_default()
                .to_ascii_lowercase();
            if tag != "input" && tag != "textarea" {
                return Err(Error::TypeMismatch {
                    selector: selector.to_string(),
                    expected: "input or textarea".into(),
                    actual: tag,
                });
            }
        }

        self.state.borrow_mut().dom.set_value(target, text)?;
        self.dispatch_event(target, "input", true, true)
    }

    /// Picks an option of a `select` the way a user does, firing trusted
    /// `input` and `change` events when the selection moves.
    pub fn select_option(&self, selector: &str, index: i64) -> Result<()> {
        let target = self.select_node(selector)?;
        let current = {
            let state = self.state.borrow();
            if state.dom.attr(target, "disabled").is_some() {
                return Ok(());
            }
            let tag = state
                .dom
                .tag_name(target)
                .unwrap_or_default()
                .to_ascii_lowercase();
            if tag != "select" {
                return Err(Error::TypeMismatch {
                    selector: selector.to_string(),
                    expected: "select".into(),
                    actual: tag,
                });
            }
            state.dom.selected_index(target)?
        };

        if current == index {
            return Ok(());
        }
        self.state.borrow_mut().dom.set_selected_index(target, index)?;
        self.dispatch_event(target, "input", true, true)?;
        self.dispatch_event(target, "change", true, true)
    }

    /// Appends markup to `<body>` when the page has one, otherwise to the
    /// document itself.
    pub fn append_html(&self, html: &str) -> Result<Vec<ElementRef>> {
        let parent = {
            let state = self.state.borrow();
            state
                .dom
                .elements_by_tag_name("body")
                .first()
                .copied()
                .unwrap_or(state.dom.root)
        };
        self.append_html_under(parent, html)
    }

    pub fn append_html_to(&self, selector: &str, html: &str) -> Result<Vec<ElementRef>> {
        let parent = self.select_node(selector)?;
        self.append_html_under(parent, html)
    }

    fn append_html_under(&self, parent: NodeId, html: &str) -> Result<Vec<ElementRef>> {
        let fragment = parse_html(html)?;
        let appended = self.state.borrow_mut().dom.append_fragment(parent, &fragment)?;
        let state = self.state.borrow();
        Ok(appended
            .into_iter()
            .filter(|node| state.dom.element(*node).is_some())
            .map(|node| ElementRef {
                document: state.id,
                node,
            })
            .collect())
    }

    /// Detaches an element. The handle stays readable.
    pub fn remove_element(&self, element: &ElementRef) -> Result<()> {
        let node = self.resolve(element)?;
        self.state.borrow_mut().dom.remove_node(node)
    }

    pub fn remove(&self, selector: &str) -> Result<()> {
        let element = self.query_selector(selector)?;
        self.remove_element(&element)
    }

    /// Moves the lifecycle forward and notifies `readystatechange` listeners.
    pub fn set_ready_state(&self, next: ReadyState) -> Result<()> {
        let listeners = {
            let mut state = self.state.borrow_mut();
            if next <= state.ready_state {
                return Err(Error::Harness(format!(
                    "ready state cannot move from {} to {next}",
                    state.ready_state
                )));
            }
            state.ready_state = next;
            state.trace_line(format!("[lifecycle] readystatechange {next}"));
            // `complete` is final: nothing can fire after it.
            if next == ReadyState::Complete {
                std::mem::take(&mut state.ready_state_listeners)
            } else {
                state.ready_state_listeners.clone()
            }
        };

        for listener in listeners {
            // A listener that is already running is skipped on nested notifications.
            if let Ok(mut handler) = listener.try_borrow_mut() {
                (*handler)();
            }
        }
        Ok(())
    }

    /// Drives the lifecycle to `complete`, passing through every state in between.
    pub fn finish_loading(&self) -> Result<()> {
        for next in [ReadyState::Interactive, ReadyState::Complete] {
            if self.state.borrow().ready_state < next {
                self.set_ready_state(next)?;
            }
        }
        Ok(())
    }

    pub fn add_event_listener(
        &self,
        target: EventTarget,
        event_type: &str,
        capture: bool,
        listener: impl FnMut(&Event) + 'static,
    ) -> Result<()> {
        let node = match target {
            EventTarget::Document => self.state.borrow().dom.root,
            EventTarget::Element(element) => self.resolve(&element)?,
        };
        let handler: Box<dyn FnMut(&Event)> = Box::new(listener);
        self.state.borrow_mut().listeners.add(
            node,
            event_type.to_string(),
            Listener {
                capture,
                handler: Rc::new(RefCell::new(handler)),
            },
        );
        Ok(())
    }

    /// Records every `event_type` event dispatched to `target` or its
    /// descendants. The listener sits in the capture phase, so non-bubbling
    /// events are recorded too.
    pub fn record_events(&self, target: EventTarget, event_type: &str) -> Result<EventLog> {
        let log = EventLog::default();
        let sink = log.clone();
        self.add_event_listener(target, event_type, true, move |event| sink.push(event))?;
        Ok(log)
    }

    fn current_target(&self, node: NodeId) -> EventTarget {
        if node == self.state.borrow().dom.root {
            EventTarget::Document
        } else {
            EventTarget::Element(self.element_ref(node))
        }
    }

    fn invoke_listeners(&self, node: NodeId, event: &mut Event, capture: bool) {
        let listeners = {
            let mut state = self.state.borrow_mut();
            let listeners = state.listeners.get(node, &event.event_type, capture);
            if !listeners.is_empty() {
                let line = format!(
                    "[event] {} target={} current={} phase={:?} trusted={}",
                    event.event_type,
                    state.node_label(event.target.node),
                    state.node_label(node),
                    event.phase,
                    event.is_trusted
                );
                state.trace_line(line);
            }
            listeners
        };

        event.current_target = self.current_target(node);
        for listener in listeners {
            // Nested dispatch reaching a listener that is still running skips it.
            if let Ok(mut handler) = listener.handler.try_borrow_mut() {
                (*handler)(event);
            }
        }
    }

    fn dispatch_event(
        &self,
        target: NodeId,
        event_type: &str,
        is_trusted: bool,
        bubbles: bool,
    ) -> Result<()> {
        let path = {
            let state = self.state.borrow();
            let mut path = Vec::new();
            let mut cursor = Some(target);
            while let Some(node) = cursor {
                path.push(node);
                cursor = state.dom.parent(node);
            }
            path.reverse();
            path
        };

        let mut event = Event {
            event_type: event_type.to_string(),
            target: self.element_ref(target),
            current_target: self.current_target(target),
            phase: EventPhase::Capturing,
            is_trusted,
            bubbles,
        };

        let ancestors = &path[..path.len().saturating_sub(1)];
        for node in ancestors {
            self.invoke_listeners(*node, &mut event, true);
        }

        event.phase = EventPhase::AtTarget;
        self.invoke_listeners(target, &mut event, true);
        self.invoke_listeners(target, &mut event, false);

        if bubbles {
            event.phase = EventPhase::Bubbling;
            for node in ancestors.iter().rev() {
                self.invoke_listeners(*node, &mut event, false);
            }
        }

        let mut state = self.state.borrow_mut();
        let line = format!("[event] done {} target={}", event_type, state.node_label(target));
        state.trace_line(line);
        Ok(())
    }

    pub fn assert_value(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_node(selector)?;
        let state = self.state.borrow();
        let actual = state.dom.value(target)?;
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: truncate_chars(&state.dom.dump_node(target), 200),
            });
        }
        Ok(())
    }

    pub fn assert_selected_index(&self, selector: &str, expected: i64) -> Result<()> {
        let target = self.select_node(selector)?;
        let state = self.state.borrow();
        let actual = state.dom.selected_index(target)?;
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
                dom_snippet: truncate_chars(&state.dom.dump_node(target), 200),
            });
        }
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_node(selector)?;
        Ok(self.state.borrow().dom.dump_node(target))
    }
}

impl Document for MockDocument {
    type Element = ElementRef;

    fn ready_state(&self) -> Result<ReadyState> {
        let state = self.state.borrow();
        if let Some(message) = &state.platform_mocks.ready_state_failure {
            return Err(Error::Observation(message.clone()));
        }
        Ok(state.ready_state)
    }

    fn elements_by_tag_name(&self, tag_name: &str) -> Result<Vec<ElementRef>> {
        let state = self.state.borrow();
        Ok(state
            .dom
            .elements_by_tag_name(tag_name)
            .into_iter()
            .map(|node| ElementRef {
                document: state.id,
                node,
            })
            .collect())
    }

    fn tag_name(&self, element: &ElementRef) -> Result<String> {
        let node = self.resolve(element)?;
        let state = self.state.borrow();
        state
            .dom
            .tag_name(node)
            .map(|tag| tag.to_ascii_uppercase())
            .ok_or_else(|| Error::Observation(format!("{element} is not an element")))
    }

    fn value(&self, element: &ElementRef) -> Result<String> {
        let node = self.resolve(element)?;
        self.state.borrow().dom.value(node)
    }

    fn selected_index(&self, element: &ElementRef) -> Result<i64> {
        let node = self.resolve(element)?;
        self.state.borrow().dom.selected_index(node)
    }

    fn dispatch_change(&self, element: &ElementRef) -> Result<()> {
        let node = self.resolve(element).map_err(|err| Error::Dispatch {
            target: element.to_string(),
            message: err.to_string(),
        })?;
        let failure = self
            .state
            .borrow()
            .platform_mocks
            .dispatch_failures
            .get(&node)
            .cloned();
        if let Some(message) = failure {
            return Err(Error::Dispatch {
                target: self.label(element),
                message,
            });
        }
        // Synthesized like `new Event("change")`: untrusted, does not bubble.
        self.dispatch_event(node, "change", false, false)
    }

    fn on_ready_state_change(&self, listener: ReadyStateListener) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.ready_state == ReadyState::Complete {
            return Ok(());
        }
        state
            .ready_state_listeners
            .push(Rc::new(RefCell::new(listener)));
        Ok(())
    }
}

/// A single page: its document, navigation metadata and deferred-task queue.
/// Clones share the same page.
#[derive(Debug, Clone)]
pub struct MockWindow {
    document: MockDocument,
}

impl MockWindow {
    pub fn from_html(html: &str) -> Result<Self> {
        Self::from_html_with_url("about:blank", html)
    }

    /// Parses `html` into a fresh page in the `loading` state with an
    /// ordinary `navigate` navigation type.
    pub fn from_html_with_url(url: &str, html: &str) -> Result<Self> {
        let dom = parse_html(html)?;
        Ok(Self {
            document: MockDocument::new(url, dom),
        })
    }

    pub fn document(&self) -> &MockDocument {
        &self.document
    }

    pub fn url(&self) -> String {
        self.document.url()
    }

    fn state(&self) -> &Rc<RefCell<PageState>> {
        &self.document.state
    }

    pub fn set_navigation(&self, navigation: Option<PerformanceNavigation>) {
        self.state().borrow_mut().navigation = navigation;
    }

    pub fn set_navigation_type(&self, kind: NavigationType) {
        self.set_navigation(Some(PerformanceNavigation::of(kind)));
    }

    pub fn set_ready_state(&self, next: ReadyState) -> Result<()> {
        self.document.set_ready_state(next)
    }

    pub fn finish_loading(&self) -> Result<()> {
        self.document.finish_loading()
    }

    pub fn set_task_step_limit(&self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Harness(
                "set_task_step_limit requires at least 1 step".into(),
            ));
        }
        self.state().borrow_mut().task_step_limit = max_steps;
        Ok(())
    }

    pub fn enable_trace(&self, enabled: bool) {
        self.state().borrow_mut().trace.enabled = enabled;
    }

    pub fn set_trace_log_limit(&self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Harness(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        let mut state = self.state().borrow_mut();
        state.trace.log_limit = max_entries;
        while state.trace.logs.len() > max_entries {
            state.trace.logs.pop_front();
        }
        Ok(())
    }

    pub fn take_trace_logs(&self) -> Vec<String> {
        self.state().borrow_mut().trace.logs.drain(..).collect()
    }

    /// Makes every ready-state read fail with `message`.
    pub fn fail_ready_state_reads(&self, message: &str) {
        self.state().borrow_mut().platform_mocks.ready_state_failure = Some(message.to_string());
    }

    /// Makes `change` dispatch to `element` fail with `message`.
    pub fn fail_dispatch_on(&self, element: &ElementRef, message: &str) -> Result<()> {
        let node = self.document.resolve(element)?;
        self.state()
            .borrow_mut()
            .platform_mocks
            .dispatch_failures
            .insert(node, message.to_string());
        Ok(())
    }

    pub fn clear_platform_mocks(&self) {
        self.state().borrow_mut().platform_mocks = PlatformMockState::default();
    }

    pub fn pending_tasks(&self) -> usize {
        self.state().borrow().task_queue.len()
    }

    /// Runs the oldest deferred task. Returns `false` when the queue is empty.
    pub fn run_next_task(&self) -> Result<bool> {
        let next = {
            let mut state = self.state().borrow_mut();
            let next = state.task_queue.pop_front();
            if let Some(task) = &next {
                let line = format!("[task] run id={}", task.id);
                state.trace_line(line);
            }
            next
        };

        let Some(scheduled) = next else {
            return Ok(false);
        };
        (scheduled.task)();
        Ok(true)
    }

    /// Runs deferred tasks, including ones queued while running, until the
    /// queue is empty.
    pub fn run_tasks(&self) -> Result<usize> {
        let limit = self.state().borrow().task_step_limit;
        let mut steps = 0usize;
        while self.pending_tasks() > 0 {
            steps += 1;
            if steps > limit {
                return Err(self.task_step_limit_error(limit, steps));
            }
            self.run_next_task()?;
        }
        Ok(steps)
    }

    fn task_step_limit_error(&self, limit: usize, steps: usize) -> Error {
        let state = self.state().borrow();
        let next_task = state
            .task_queue
            .front()
            .map(|task| task.id.to_string())
            .unwrap_or_else(|| "none".into());
        Error::Harness(format!(
            "task queue exceeded max steps: limit={limit}, steps={steps}, pending_tasks={}, next_task={next_task}",
            state.task_queue.len()
        ))
    }

    /// Polls `future` to completion, running one deferred task whenever it
    /// is pending. Fails when the future is pending and no task is left to
    /// wake it.
    pub fn drive<F: Future>(&self, future: F) -> Result<F::Output> {
        let mut future = pin!(future);
        let mut cx = Context::from_waker(noop_waker_ref());
        let limit = self.state().borrow().task_step_limit;
        let mut steps = 0usize;

        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            if !self.run_next_task()? {
                let ready_state = self.state().borrow().ready_state;
                return Err(Error::Harness(format!(
                    "future stalled with no deferred task pending (ready_state={ready_state})"
                )));
            }
            steps += 1;
            if steps > limit {
                return Err(self.task_step_limit_error(limit, steps));
            }
        }
    }
}

impl BrowsingContext for MockWindow {
    type Document = MockDocument;

    fn navigation(&self) -> Option<PerformanceNavigation> {
        self.state().borrow().navigation
    }

    fn document(&self) -> &MockDocument {
        &self.document
    }

    fn defer(&self, task: DeferredTask) -> Result<()> {
        let mut state = self.state().borrow_mut();
        let id = state.next_task_id;
        state.next_task_id += 1;
        state.task_queue.push_back(ScheduledTask { id, task });
        let line = format!("[task] defer id={id}");
        state.trace_line(line);
        Ok(())
    }
}
