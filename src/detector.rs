use crate::context::{BrowsingContext, Document, NavigationType, ReadyState};

/// Returns `true` (leave the page alone) unless the page is a back/forward
/// history restoration whose document has already reached `complete`.
///
/// Evaluated once, synchronously. Missing or unreadable fields count as the
/// condition not being met.
pub fn should_skip<C: BrowsingContext>(context: &C) -> bool {
    let Some(navigation) = context.navigation() else {
        return true;
    };

    if navigation.navigation_type != Some(NavigationType::BackForward.code()) {
        return true;
    }

    !matches!(context.document().ready_state(), Ok(ReadyState::Complete))
}
