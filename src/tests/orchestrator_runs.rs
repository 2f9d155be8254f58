use std::cell::RefCell;
use std::rc::Rc;

use super::*;
use crate::context::{DeferredTask, ReadyStateListener};

fn overwrite_first_entry(
    mut snapshot: Snapshot<ElementRef>,
) -> Result<Snapshot<ElementRef>> {
    if let Some(first) = snapshot.entries_mut().first_mut() {
        first.value = ObservedValue::text("new value");
    }
    Ok(snapshot)
}

fn overwrite_every_entry(
    mut snapshot: Snapshot<ElementRef>,
) -> Result<Snapshot<ElementRef>> {
    for entry in snapshot.entries_mut() {
        entry.value = ObservedValue::text("stale");
    }
    Ok(snapshot)
}

#[test]
fn no_events_when_the_page_was_not_restored() -> Result<()> {
    let window = MockWindow::from_html(MIXED_CONTROLS_HTML)?;
    window.finish_loading()?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;

    window.drive(restore_change_events(&window))??;
    window.run_tasks()?;

    assert!(events.is_empty());
    assert_eq!(window.pending_tasks(), 0);
    Ok(())
}

#[test]
fn no_events_when_nothing_was_repopulated() -> Result<()> {
    let window = restored_window(MIXED_CONTROLS_HTML)?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;

    window.drive(restore_change_events(&window))??;

    assert!(events.is_empty());
    Ok(())
}

#[test]
fn change_listener_may_update_a_dependent_control() -> Result<()> {
    let window = restored_window(
        r#"
        <select id='size'><option>s</option><option>m</option></select>
        <select id='dep'><option>none</option><option>fits m</option></select>
        "#,
    )?;
    let document = window.document();
    let events = document.record_events(EventTarget::Document, "change")?;
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let page_script = document.clone();
    document.add_event_listener(EventTarget::Document, "change", true, move |_event| {
        *counter.borrow_mut() += 1;
        if page_script.select_option("#dep", 1).is_err() {
            *counter.borrow_mut() += 100;
        }
    })?;

    let restore = window.clone();
    window.defer(Box::new(move || {
        let _ = restore.document().set_selected_index("#size", 1);
    }))?;
    window.drive(restore_change_events(&window))??;

    assert_eq!(*calls.borrow(), 1);
    document.assert_selected_index("#dep", 1)?;
    assert_eq!(
        events.targets(),
        vec![element(&window, "#size")?, element(&window, "#dep")?]
    );
    assert_eq!(
        events.events().iter().map(|event| event.is_trusted).collect::<Vec<_>>(),
        vec![false, true]
    );
    Ok(())
}

#[test]
fn repopulated_input_gets_exactly_one_change_event() -> Result<()> {
    let window = restored_window(MIXED_CONTROLS_HTML)?;
    let input = element(&window, "input")?;
    let events = window
        .document()
        .record_events(EventTarget::Element(input), "change")?;

    window.drive(restore_change_events_with(
        &window,
        RestoreOptions::default(),
        overwrite_first_entry,
    ))??;

    let recorded = events.events();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].target, input);
    assert_eq!(recorded[0].event_type, "change");
    assert!(!recorded[0].is_trusted);
    assert!(!recorded[0].bubbles);
    Ok(())
}

#[test]
fn change_is_dispatched_only_after_the_deferred_tick() -> Result<()> {
    let window = restored_window("<input id='name'>")?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;
    let restore = window.clone();
    window.defer(Box::new(move || {
        restore
            .document()
            .set_value("#name", "restored")
            .expect("restoration write");
    }))?;

    window.drive(restore_change_events(&window))??;

    assert_eq!(events.targets(), vec![element(&window, "#name")?]);
    Ok(())
}

#[test]
fn dispatch_follows_snapshot_order() -> Result<()> {
    let window = restored_window(
        r#"
        <select id='pick'><option>a</option><option>b</option></select>
        <textarea id='notes'></textarea>
        <input id='name'>
        "#,
    )?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;
    let restore = window.clone();
    window.defer(Box::new(move || {
        let document = restore.document();
        document.set_selected_index("#pick", 1).expect("select write");
        document.set_value("#notes", "n").expect("textarea write");
        document.set_value("#name", "x").expect("input write");
    }))?;

    window.drive(restore_change_events(&window))??;

    assert_eq!(
        events.targets(),
        vec![
            element(&window, "#name")?,
            element(&window, "#notes")?,
            element(&window, "#pick")?,
        ]
    );
    Ok(())
}

#[test]
fn run_settles_through_every_phase() -> Result<()> {
    let window = restored_window(MIXED_CONTROLS_HTML)?;
    let mut orchestrator = Orchestrator::new(&window, RestoreOptions::default());
    assert_eq!(orchestrator.phase(), Phase::Idle);

    window.drive(orchestrator.run(identity))??;
    assert_eq!(orchestrator.phase(), Phase::Settled(Outcome::Success));
    Ok(())
}

#[test]
fn second_run_on_the_same_orchestrator_is_rejected() -> Result<()> {
    let window = restored_window(MIXED_CONTROLS_HTML)?;
    let mut orchestrator = Orchestrator::new(&window, RestoreOptions::default());
    window.drive(orchestrator.run(identity))??;

    let second = window.drive(orchestrator.run(identity))?;
    assert_eq!(second, Err(Error::AlreadyStarted));
    assert_eq!(orchestrator.phase(), Phase::Settled(Outcome::Success));
    Ok(())
}

#[test]
fn transform_failure_dispatches_nothing() -> Result<()> {
    let window = restored_window(MIXED_CONTROLS_HTML)?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;
    let mut orchestrator = Orchestrator::new(&window, RestoreOptions::default());

    let result = window.drive(orchestrator.run(|_snapshot: Snapshot<ElementRef>| {
        Err(Error::Transform("hook rejected snapshot".into()))
    }))?;

    assert_eq!(result, Err(Error::Transform("hook rejected snapshot".into())));
    assert_eq!(orchestrator.phase(), Phase::Settled(Outcome::Failure));
    assert!(events.is_empty());
    Ok(())
}

#[test]
fn dispatch_failure_keeps_earlier_events_and_stops() -> Result<()> {
    let window = restored_window("<input id='a'><input id='b'><input id='c'>")?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;
    window.fail_dispatch_on(&element(&window, "#b")?, "target is malformed")?;

    let result = window.drive(restore_change_events_with(
        &window,
        RestoreOptions::default(),
        overwrite_every_entry,
    ))?;

    assert_eq!(
        result,
        Err(Error::Dispatch {
            target: "input#b".into(),
            message: "target is malformed".into(),
        })
    );
    assert_eq!(events.targets(), vec![element(&window, "#a")?]);
    Ok(())
}

#[test]
fn dispatch_failure_on_the_first_control_dispatches_nothing() -> Result<()> {
    let window = restored_window("<input id='a'><input id='b'>")?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;
    window.fail_dispatch_on(&element(&window, "#a")?, "boom")?;

    let result = window.drive(restore_change_events_with(
        &window,
        RestoreOptions::default(),
        overwrite_every_entry,
    ))?;

    assert!(matches!(result, Err(Error::Dispatch { .. })));
    assert!(events.is_empty());
    Ok(())
}

#[test]
fn unreadable_lifecycle_fails_the_run() -> Result<()> {
    let window = MockWindow::from_html(MIXED_CONTROLS_HTML)?;
    window.fail_ready_state_reads("readyState getter threw");
    let mut orchestrator = Orchestrator::new(&window, RestoreOptions::default());

    let result = window.drive(orchestrator.run(identity))?;

    assert_eq!(
        result,
        Err(Error::Observation("readyState getter threw".into()))
    );
    assert_eq!(orchestrator.phase(), Phase::Settled(Outcome::Failure));
    assert_eq!(window.pending_tasks(), 0);
    Ok(())
}

#[test]
fn unreadable_lifecycle_is_skipped_by_the_entry_point() -> Result<()> {
    let window = restored_window(MIXED_CONTROLS_HTML)?;
    window.fail_ready_state_reads("readyState getter threw");

    window.drive(restore_change_events(&window))??;
    assert_eq!(window.pending_tasks(), 0);
    Ok(())
}

/// Queues the script of a page that keeps loading: a control is injected
/// while interactive, then both controls are repopulated before `complete`.
fn queue_late_control_and_repopulation(window: &MockWindow) -> Result<()> {
    let page = window.clone();
    window.defer(Box::new(move || {
        page.document()
            .append_html("<input id='late' value='b'>")
            .expect("inject control");
        page.set_ready_state(ReadyState::Interactive)
            .expect("interactive");
    }))?;

    let page = window.clone();
    window.defer(Box::new(move || {
        let document = page.document();
        document.set_value("#early", "z").expect("repopulate early");
        document.set_value("#late", "c").expect("repopulate late");
        page.set_ready_state(ReadyState::Complete).expect("complete");
    }))?;
    Ok(())
}

#[test]
fn streaming_snapshot_tracks_controls_injected_before_complete() -> Result<()> {
    let window = MockWindow::from_html("<input id='early' value='a'>")?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;
    queue_late_control_and_repopulation(&window)?;

    let mut orchestrator = Orchestrator::new(&window, RestoreOptions::default());
    window.drive(orchestrator.run(identity))??;

    assert_eq!(
        events.targets(),
        vec![element(&window, "#early")?, element(&window, "#late")?]
    );
    Ok(())
}

#[test]
fn after_complete_snapshot_misses_earlier_repopulation() -> Result<()> {
    let window = MockWindow::from_html("<input id='early' value='a'>")?;
    let events = window
        .document()
        .record_events(EventTarget::Document, "change")?;
    queue_late_control_and_repopulation(&window)?;

    let options = RestoreOptions::default().with_snapshot_timing(SnapshotTiming::AfterComplete);
    let mut orchestrator = Orchestrator::new(&window, options);
    window.drive(orchestrator.run(identity))??;

    assert!(events.is_empty());
    Ok(())
}

#[test]
fn streaming_transform_sees_every_intermediate_snapshot() -> Result<()> {
    let window = MockWindow::from_html("<input id='early'>")?;
    queue_late_control_and_repopulation(&window)?;
    let sizes = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&sizes);

    let mut orchestrator = Orchestrator::new(&window, RestoreOptions::default());
    window.drive(orchestrator.run(move |snapshot: Snapshot<ElementRef>| {
        seen.borrow_mut().push(snapshot.len());
        Ok(snapshot)
    }))??;

    // One merge at `interactive`, one pass before diffing.
    assert_eq!(*sizes.borrow(), vec![2, 2]);
    Ok(())
}

/// A document that drops every ready-state listener it is given.
struct ForgetfulDocument(MockDocument);

impl Document for ForgetfulDocument {
    type Element = ElementRef;

    fn ready_state(&self) -> Result<ReadyState> {
        self.0.ready_state()
    }

    fn elements_by_tag_name(&self, tag_name: &str) -> Result<Vec<ElementRef>> {
        self.0.elements_by_tag_name(tag_name)
    }

    fn tag_name(&self, element: &ElementRef) -> Result<String> {
        self.0.tag_name(element)
    }

    fn value(&self, element: &ElementRef) -> Result<String> {
        self.0.value(element)
    }

    fn selected_index(&self, element: &ElementRef) -> Result<i64> {
        self.0.selected_index(element)
    }

    fn dispatch_change(&self, element: &ElementRef) -> Result<()> {
        self.0.dispatch_change(element)
    }

    fn on_ready_state_change(&self, _listener: ReadyStateListener) -> Result<()> {
        Ok(())
    }
}

/// A context whose scheduler drops deferred tasks unrun.
struct LossyContext {
    document: ForgetfulDocument,
}

impl BrowsingContext for LossyContext {
    type Document = ForgetfulDocument;

    fn navigation(&self) -> Option<PerformanceNavigation> {
        Some(PerformanceNavigation::of(NavigationType::BackForward))
    }

    fn document(&self) -> &ForgetfulDocument {
        &self.document
    }

    fn defer(&self, _task: DeferredTask) -> Result<()> {
        Ok(())
    }
}

#[test]
fn dropped_lifecycle_listener_detaches_the_run() -> Result<()> {
    let window = MockWindow::from_html("<input>")?;
    let context = LossyContext {
        document: ForgetfulDocument(window.document().clone()),
    };
    let mut orchestrator = Orchestrator::new(&context, RestoreOptions::default());

    let result = window.drive(orchestrator.run(identity))?;

    assert_eq!(result, Err(Error::LifecycleDetached));
    assert_eq!(orchestrator.phase(), Phase::Settled(Outcome::Failure));
    Ok(())
}

#[test]
fn dropped_deferred_task_fails_the_run() -> Result<()> {
    let window = restored_window("<input>")?;
    let context = LossyContext {
        document: ForgetfulDocument(window.document().clone()),
    };
    assert!(!should_skip(&context));

    let result = window.drive(restore_change_events(&context))?;
    assert_eq!(result, Err(Error::DeferredTaskDropped));
    Ok(())
}
