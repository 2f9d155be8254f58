use crate::Result;
use crate::context::Document;
use crate::snapshot::{ControlKind, SnapshotEntry};

/// Controls whose current value no longer matches their captured value, in
/// input order.
///
/// Each element is re-read with the accessor for its kind and compared
/// exactly. Entries for untracked element kinds are ignored. Duplicate
/// entries are not collapsed: an element listed twice that changed is
/// reported twice.
pub fn diff<D: Document>(
    document: &D,
    entries: &[SnapshotEntry<D::Element>],
) -> Result<Vec<D::Element>> {
    let mut changed = Vec::new();
    for entry in entries {
        let kind = ControlKind::from_tag_name(&document.tag_name(&entry.element)?);
        let Some(current) = kind.read(document, &entry.element)? else {
            continue;
        };
        if current != entry.value {
            changed.push(entry.element.clone());
        }
    }
    Ok(changed)
}
