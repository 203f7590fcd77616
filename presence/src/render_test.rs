use super::*;

fn record_at(x: f64, y: f64) -> CursorRecord {
    CursorRecord::active(PagePosition::new(x, y), 1_000)
}

fn viewport() -> Viewport {
    Viewport::new(1280.0, 800.0)
}

#[test]
fn projection_subtracts_scroll() {
    let mut vp = viewport();
    vp.on_scroll(0.0, 1000.0);
    assert_eq!(vp.project(PagePosition::new(500.0, 1200.0)), PagePosition::new(500.0, 200.0));
}

#[test]
fn margin_bounds_are_inclusive() {
    let vp = viewport();
    assert!(vp.contains(PagePosition::new(-100.0, -100.0), 100.0));
    assert!(vp.contains(PagePosition::new(1380.0, 900.0), 100.0));
    assert!(!vp.contains(PagePosition::new(-100.5, 0.0), 100.0));
    assert!(!vp.contains(PagePosition::new(0.0, 900.5), 100.0));
}

#[test]
fn far_left_cursor_is_not_drawn() {
    let vp = viewport();
    assert!(!vp.contains(PagePosition::new(-150.0, 50.0), 100.0));

    let mut visible = BTreeMap::new();
    visible.insert(ParticipantId::from("left"), record_at(-150.0, 50.0));
    assert!(render(&visible, &vp, 100.0).is_empty());
}

#[test]
fn render_projects_and_decorates() {
    let mut vp = viewport();
    vp.on_scroll(0.0, 1000.0);
    let mut visible = BTreeMap::new();
    visible.insert(ParticipantId::from("a"), record_at(500.0, 1200.0));

    let markers = render(&visible, &vp, 100.0);
    assert_eq!(markers.len(), 1);
    let marker = &markers[0];
    assert_eq!((marker.x, marker.y), (500.0, 200.0));
    assert_eq!(marker.color, visual::cursor_color("a"));
    assert_eq!(marker.emoji, visual::cursor_emoji("a"));
    assert_eq!(marker.label, "user a");
}

#[test]
fn scrolling_toggles_on_screen_without_dropping_the_record() {
    let mut vp = viewport();
    let mut visible = BTreeMap::new();
    visible.insert(ParticipantId::from("deep"), record_at(100.0, 3000.0));

    assert!(render(&visible, &vp, 100.0).is_empty());
    vp.on_scroll(0.0, 2500.0);
    assert_eq!(render(&visible, &vp, 100.0).len(), 1);
    assert_eq!(visible.len(), 1);
}

#[test]
fn markers_are_ordered_by_id() {
    let vp = viewport();
    let mut visible = BTreeMap::new();
    for id in ["c", "a", "b"] {
        visible.insert(ParticipantId::from(id), record_at(10.0, 10.0));
    }
    let ids: Vec<_> = render(&visible, &vp, 100.0).into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![ParticipantId::from("a"), ParticipantId::from("b"), ParticipantId::from("c")]);
}
