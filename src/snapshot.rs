use std::fmt;

use crate::Result;
use crate::context::Document;

/// Tag-name passes, in the order a snapshot walks them.
pub(crate) const TRACKED_TAGS: [&str; 3] = ["input", "textarea", "select"];

/// Which observable property a control exposes, resolved from its tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// `input` and `textarea`: compared by value string.
    TextLike,
    /// `select`: compared by selected index.
    Choice,
    Other,
}

impl ControlKind {
    pub fn from_tag_name(tag_name: &str) -> Self {
        if tag_name.eq_ignore_ascii_case("input") || tag_name.eq_ignore_ascii_case("textarea") {
            Self::TextLike
        } else if tag_name.eq_ignore_ascii_case("select") {
            Self::Choice
        } else {
            Self::Other
        }
    }

    pub fn is_tracked(self) -> bool {
        !matches!(self, Self::Other)
    }

    /// Reads the current observable value of `element`, `None` for untracked kinds.
    pub fn read<D: Document>(self, document: &D, element: &D::Element) -> Result<Option<ObservedValue>> {
        match self {
            Self::TextLike => Ok(Some(ObservedValue::Text(document.value(element)?))),
            Self::Choice => Ok(Some(ObservedValue::Index(document.selected_index(element)?))),
            Self::Other => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObservedValue {
    Text(String),
    Index(i64),
}

impl ObservedValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<i64> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for ObservedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => write!(f, "{value:?}"),
            Self::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// A control and the value it had when captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry<E> {
    pub element: E,
    pub value: ObservedValue,
}

impl<E> SnapshotEntry<E> {
    pub fn new(element: E, value: ObservedValue) -> Self {
        Self { element, value }
    }
}

/// Point-in-time baseline of form-control values: text-like controls first,
/// then choice controls, each group in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<E> {
    entries: Vec<SnapshotEntry<E>>,
}

impl<E> Default for Snapshot<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<E> Snapshot<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<SnapshotEntry<E>>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SnapshotEntry<E>] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [SnapshotEntry<E>] {
        &mut self.entries
    }

    pub fn into_entries(self) -> Vec<SnapshotEntry<E>> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, element: E, value: ObservedValue) {
        self.entries.push(SnapshotEntry::new(element, value));
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SnapshotEntry<E>> {
        self.entries.iter()
    }
}

impl<E: PartialEq> Snapshot<E> {
    pub fn contains(&self, element: &E) -> bool {
        self.entries.iter().any(|entry| entry.element == *element)
    }

    pub fn value_of(&self, element: &E) -> Option<&ObservedValue> {
        self.entries
            .iter()
            .find(|entry| entry.element == *element)
            .map(|entry| &entry.value)
    }

    /// Appends entries for controls not tracked yet. A control already
    /// present keeps its earlier value.
    pub fn merge(&mut self, other: Snapshot<E>) -> usize {
        let mut added = 0;
        for entry in other.entries {
            if self.contains(&entry.element) {
                continue;
            }
            self.entries.push(entry);
            added += 1;
        }
        added
    }
}

impl<E> IntoIterator for Snapshot<E> {
    type Item = SnapshotEntry<E>;
    type IntoIter = std::vec::IntoIter<SnapshotEntry<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a, E> IntoIterator for &'a Snapshot<E> {
    type Item = &'a SnapshotEntry<E>;
    type IntoIter = std::slice::Iter<'a, SnapshotEntry<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<E> FromIterator<SnapshotEntry<E>> for Snapshot<E> {
    fn from_iter<I: IntoIterator<Item = SnapshotEntry<E>>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Records the current value of every `input`, `textarea` and `select` in
/// `document`. Inputs, then textareas, then selects; each pass in document
/// order. Does not touch the document.
pub fn capture<D: Document>(document: &D) -> Result<Snapshot<D::Element>> {
    let mut snapshot = Snapshot::new();
    for tag in TRACKED_TAGS {
        let kind = ControlKind::from_tag_name(tag);
        for element in document.elements_by_tag_name(tag)? {
            if let Some(value) = kind.read(document, &element)? {
                snapshot.push(element, value);
            }
        }
    }
    Ok(snapshot)
}
