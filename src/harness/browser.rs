use std::fmt;

use tracing::{debug, warn};

use super::MockWindow;
use crate::context::{BrowsingContext, Document, NavigationType};
use crate::snapshot::{ControlKind, ObservedValue, TRACKED_TAGS};
use crate::{Error, Result};

type PageShowHook = Box<dyn FnMut(&MockWindow) -> Result<()>>;

/// A control value remembered by the history cache, keyed by tag name and
/// position among same-tag controls.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RememberedControl {
    tag: &'static str,
    position: usize,
    value: ObservedValue,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    url: String,
    html: String,
    form_state: Vec<RememberedControl>,
}

/// A tab with session history.
///
/// Leaving a page remembers its form-control values. Traversing back or
/// forward reloads the page from its markup with navigation type
/// `back_forward`, runs it to `complete`, then queues a deferred task that
/// writes the remembered values back without firing any events.
#[derive(Default)]
pub struct MockBrowser {
    entries: Vec<HistoryEntry>,
    current: Option<usize>,
    window: Option<MockWindow>,
    page_show: Option<PageShowHook>,
}

impl fmt::Debug for MockBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBrowser")
            .field("entries", &self.entries.len())
            .field("current", &self.current)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` on every page once it reaches `complete`, after any
    /// history-cache restoration has been queued.
    pub fn on_page_show(&mut self, hook: impl FnMut(&MockWindow) -> Result<()> + 'static) {
        self.page_show = Some(Box::new(hook));
    }

    pub fn current(&self) -> Result<&MockWindow> {
        self.window
            .as_ref()
            .ok_or_else(|| Error::History("no page has been loaded".into()))
    }

    pub fn history_len(&self) -> usize {
        self.entries.len()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Loads a new page, dropping any forward history.
    pub fn navigate(&mut self, url: &str, html: &str) -> Result<MockWindow> {
        self.remember_current()?;
        let next = self.current.map(|index| index + 1).unwrap_or(0);
        self.entries.truncate(next);
        self.entries.push(HistoryEntry {
            url: url.to_string(),
            html: html.to_string(),
            form_state: Vec::new(),
        });
        self.load(next, NavigationType::Navigate)
    }

    pub fn go_back(&mut self) -> Result<MockWindow> {
        let target = match self.current {
            Some(index) if index > 0 => index - 1,
            _ => return Err(Error::History("no previous history entry".into())),
        };
        self.traverse(target)
    }

    pub fn go_forward(&mut self) -> Result<MockWindow> {
        let target = match self.current {
            Some(index) if index + 1 < self.entries.len() => index + 1,
            _ => return Err(Error::History("no next history entry".into())),
        };
        self.traverse(target)
    }

    fn traverse(&mut self, target: usize) -> Result<MockWindow> {
        self.remember_current()?;
        self.load(target, NavigationType::BackForward)
    }

    fn remember_current(&mut self) -> Result<()> {
        let (Some(index), Some(window)) = (self.current, self.window.as_ref()) else {
            return Ok(());
        };
        let form_state = remember_form_state(window)?;
        if let Some(entry) = self.entries.get_mut(index) {
            entry.form_state = form_state;
        }
        Ok(())
    }

    fn load(&mut self, index: usize, kind: NavigationType) -> Result<MockWindow> {
        let entry = self
            .entries
            .get(index)
            .cloned()
            .ok_or_else(|| Error::History(format!("history entry {index} does not exist")))?;
        debug!(target: "restored_change::harness", url = %entry.url, ?kind, "loading history entry");

        let window = MockWindow::from_html_with_url(&entry.url, &entry.html)?;
        window.set_navigation_type(kind);
        window.finish_loading()?;

        if kind == NavigationType::BackForward && !entry.form_state.is_empty() {
            let restored = window.clone();
            let form_state = entry.form_state;
            window.defer(Box::new(move || {
                if let Err(err) = restore_form_state(&restored, &form_state) {
                    warn!(target: "restored_change::harness", error = %err, "form state restoration failed");
                }
            }))?;
        }

        self.current = Some(index);
        self.window = Some(window.clone());

        if let Some(hook) = self.page_show.as_mut() {
            hook(&window)?;
        }
        Ok(window)
    }
}

fn remember_form_state(window: &MockWindow) -> Result<Vec<RememberedControl>> {
    let document = window.document();
    let mut remembered = Vec::new();
    for tag in TRACKED_TAGS {
        let kind = ControlKind::from_tag_name(tag);
        for (position, element) in document.elements_by_tag_name(tag)?.iter().enumerate() {
            if let Some(value) = kind.read(document, element)? {
                remembered.push(RememberedControl {
                    tag,
                    position,
                    value,
                });
            }
        }
    }
    Ok(remembered)
}

/// Writes remembered values into the controls that still line up with them.
fn restore_form_state(window: &MockWindow, form_state: &[RememberedControl]) -> Result<()> {
    let document = window.document();
    for control in form_state {
        let elements = document.elements_by_tag_name(control.tag)?;
        let Some(element) = elements.get(control.position) else {
            continue;
        };
        match &control.value {
            ObservedValue::Text(value) => document.set_element_value(element, value)?,
            ObservedValue::Index(index) => document.set_element_selected_index(element, *index)?,
        }
    }
    Ok(())
}
