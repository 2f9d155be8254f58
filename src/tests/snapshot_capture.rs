use super::*;

#[test]
fn capture_records_each_tracked_control_with_its_kind_value() -> Result<()> {
    let window = MockWindow::from_html(MIXED_CONTROLS_HTML)?;
    let document = window.document();

    let snapshot = capture(document)?;
    assert_eq!(snapshot.len(), 3);

    let entries = snapshot.entries();
    assert_eq!(document.tag_name(&entries[0].element)?, "INPUT");
    assert_eq!(entries[0].value, ObservedValue::text(""));
    assert_eq!(document.tag_name(&entries[1].element)?, "TEXTAREA");
    assert_eq!(entries[1].value, ObservedValue::text(""));
    assert_eq!(document.tag_name(&entries[2].element)?, "SELECT");
    assert_eq!(entries[2].value, ObservedValue::Index(0));
    Ok(())
}

#[test]
fn capture_walks_inputs_then_textareas_then_selects() -> Result<()> {
    let html = r#"
        <select id='s1'><option>a</option><option selected>b</option></select>
        <textarea id='t1'>first</textarea>
        <input id='i1' value='one'>
        <select id='s2'></select>
        <input id='i2' value='two'>
        <textarea id='t2'></textarea>
        "#;
    let window = MockWindow::from_html(html)?;

    let snapshot = capture(window.document())?;
    let order = snapshot
        .iter()
        .map(|entry| window.document().label(&entry.element))
        .collect::<Vec<_>>();
    assert_eq!(
        order,
        vec!["input#i1", "input#i2", "textarea#t1", "textarea#t2", "select#s1", "select#s2"]
    );

    let values = snapshot
        .iter()
        .map(|entry| entry.value.clone())
        .collect::<Vec<_>>();
    assert_eq!(
        values,
        vec![
            ObservedValue::text("one"),
            ObservedValue::text("two"),
            ObservedValue::text("first"),
            ObservedValue::text(""),
            ObservedValue::Index(1),
            ObservedValue::Index(-1),
        ]
    );
    Ok(())
}

#[test]
fn capture_is_idempotent_on_an_unmodified_document() -> Result<()> {
    let window = MockWindow::from_html(MIXED_CONTROLS_HTML)?;
    let first = capture(window.document())?;
    let second = capture(window.document())?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn capture_ignores_untracked_and_detached_elements() -> Result<()> {
    let window = MockWindow::from_html(
        "<div id='box'><input id='inner'></div><button>go</button><input id='kept'>",
    )?;
    window.document().remove("#box")?;

    let snapshot = capture(window.document())?;
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.contains(&element(&window, "#kept")?));
    Ok(())
}

#[test]
fn capture_fails_with_the_observation_error() -> Result<()> {
    struct Broken;

    impl Document for Broken {
        type Element = u32;

        fn ready_state(&self) -> Result<ReadyState> {
            Ok(ReadyState::Complete)
        }

        fn elements_by_tag_name(&self, _tag_name: &str) -> Result<Vec<u32>> {
            Ok(vec![1])
        }

        fn tag_name(&self, _element: &u32) -> Result<String> {
            Ok("INPUT".into())
        }

        fn value(&self, _element: &u32) -> Result<String> {
            Err(Error::Observation("value getter threw".into()))
        }

        fn selected_index(&self, _element: &u32) -> Result<i64> {
            Ok(0)
        }

        fn dispatch_change(&self, _element: &u32) -> Result<()> {
            Ok(())
        }

        fn on_ready_state_change(&self, _listener: context::ReadyStateListener) -> Result<()> {
            Ok(())
        }
    }

    assert_eq!(
        capture(&Broken).unwrap_err(),
        Error::Observation("value getter threw".into())
    );
    Ok(())
}

#[test]
fn control_kind_resolves_from_tag_name_case_insensitively() {
    assert_eq!(ControlKind::from_tag_name("INPUT"), ControlKind::TextLike);
    assert_eq!(ControlKind::from_tag_name("textarea"), ControlKind::TextLike);
    assert_eq!(ControlKind::from_tag_name("Select"), ControlKind::Choice);
    assert_eq!(ControlKind::from_tag_name("BUTTON"), ControlKind::Other);
    assert!(!ControlKind::Other.is_tracked());
    assert!(ControlKind::Choice.is_tracked());
}

#[test]
fn merge_keeps_the_first_seen_value() -> Result<()> {
    let window = MockWindow::from_html("<input id='a' value='early'>")?;
    let mut tracked = capture(window.document())?;

    window.document().set_value("#a", "late")?;
    window.document().append_html("<input id='b' value='new'>")?;
    let added = tracked.merge(capture(window.document())?);

    assert_eq!(added, 1);
    assert_eq!(tracked.len(), 2);
    assert_eq!(
        tracked.value_of(&element(&window, "#a")?),
        Some(&ObservedValue::text("early"))
    );
    assert_eq!(
        tracked.value_of(&element(&window, "#b")?),
        Some(&ObservedValue::text("new"))
    );
    Ok(())
}

#[test]
fn observed_value_accessors_and_display() {
    let text = ObservedValue::text("abc");
    assert_eq!(text.as_text(), Some("abc"));
    assert_eq!(text.as_index(), None);
    assert_eq!(text.to_string(), "\"abc\"");

    let index = ObservedValue::Index(-1);
    assert_eq!(index.as_index(), Some(-1));
    assert_eq!(index.as_text(), None);
    assert_eq!(index.to_string(), "#-1");
}
