mod common;

use common::{fixture, port_id, wait_for_event};
use flowcore::{Direction, ErrorKind, FlowError, FlowEvent, GraphError, ProjectRecord};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_add_step_emits_event() {
    let fx = fixture().await;
    let editor = fx.host.editor().await.unwrap();
    let mut events = fx.host.subscribe_events();

    let view = editor.add_step(fx.templates.source, 10.0, 20.0).await.unwrap();
    assert_eq!(view.position.x, 10.0);
    assert_eq!(view.ports.len(), 2);

    let event = wait_for_event(&mut events, |e| matches!(e, FlowEvent::StepAdded { .. })).await;
    match event {
        FlowEvent::StepAdded { step_id, template, .. } => {
            assert_eq!(step_id, view.id);
            assert_eq!(template.type_name, "test.source");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_add_step_unknown_template() {
    let fx = fixture().await;
    let editor = fx.host.editor().await.unwrap();

    let err = editor.add_step(Uuid::new_v4(), 0.0, 0.0).await.unwrap_err();
    assert!(matches!(err, FlowError::TemplateNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_link_scenario_and_remove() {
    let fx = fixture().await;
    let editor = fx.host.editor().await.unwrap();
    let inspector = fx.host.inspector().await.unwrap();

    let a = editor.add_step(fx.templates.source, 0.0, 0.0).await.unwrap();
    let b = editor.add_step(fx.templates.sink, 100.0, 0.0).await.unwrap();
    let x = port_id(&a, "out", Direction::Output);
    let y = port_id(&b, "in", Direction::Input);

    let link = editor.link_ports(x, y).await.unwrap();
    assert_eq!(link.source.port_id, x);
    assert_eq!(link.target.port_id, y);
    assert_eq!(inspector.list_links().await, vec![link.clone()]);

    let duplicate = editor.link_ports(x, y).await.unwrap_err();
    assert!(matches!(duplicate, FlowError::Graph(GraphError::DuplicateLink { .. })));
    assert_eq!(duplicate.kind(), ErrorKind::Validation);

    let mut events = fx.host.subscribe_events();
    let removed = editor.remove_step(a.id).await.unwrap();
    assert_eq!(removed, vec![link.clone()]);
    assert!(inspector.list_links().await.is_empty());

    let event = wait_for_event(&mut events, |e| matches!(e, FlowEvent::StepRemoved { .. })).await;
    match event {
        FlowEvent::StepRemoved { step_id, links, .. } => {
            assert_eq!(step_id, a.id);
            assert_eq!(links, vec![link.id]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Removal shuts the body down
    assert_eq!(fx.recorder.shutdowns(), 1);
}

#[tokio::test]
async fn test_reversed_link_rejected() {
    let fx = fixture().await;
    let editor = fx.host.editor().await.unwrap();

    let a = editor.add_step(fx.templates.source, 0.0, 0.0).await.unwrap();
    let b = editor.add_step(fx.templates.sink, 0.0, 0.0).await.unwrap();

    let err = editor
        .link_ports(port_id(&b, "in", Direction::Input), port_id(&a, "out", Direction::Output))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Graph(GraphError::DirectionMismatch { .. })));
}

#[tokio::test]
async fn test_unlink_twice_succeeds() {
    let fx = fixture().await;
    let editor = fx.host.editor().await.unwrap();

    let a = editor.add_step(fx.templates.source, 0.0, 0.0).await.unwrap();
    let b = editor.add_step(fx.templates.sink, 0.0, 0.0).await.unwrap();
    let link = editor
        .link_ports(port_id(&a, "out", Direction::Output), port_id(&b, "in", Direction::Input))
        .await
        .unwrap();

    assert!(editor.unlink_ports(link.id).await.unwrap().is_some());
    assert!(editor.unlink_ports(link.id).await.unwrap().is_none());
    assert!(editor.unlink_ports(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_move_step() {
    let fx = fixture().await;
    let editor = fx.host.editor().await.unwrap();
    let inspector = fx.host.inspector().await.unwrap();

    let a = editor.add_step(fx.templates.source, 0.0, 0.0).await.unwrap();
    editor.move_step(a.id, 5.0, 6.0).await.unwrap();

    let view = inspector.get_step(a.id, None).await.unwrap();
    assert_eq!((view.position.x, view.position.y), (5.0, 6.0));

    let err = editor.move_step(Uuid::new_v4(), 0.0, 0.0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_update_port_value_reports_conversion() {
    let fx = fixture().await;
    let editor = fx.host.editor().await.unwrap();
    let inspector = fx.host.inspector().await.unwrap();
    let mut events = fx.host.subscribe_events();

    let a = editor.add_step(fx.templates.source, 0.0, 0.0).await.unwrap();
    let value = port_id(&a, "value", Direction::Input);

    editor.update_port_value(value, json!("12.5")).await.unwrap();
    let port = inspector.get_port(value, None).await.unwrap();
    assert_eq!(port.value, json!(12.5));

    let err = editor.update_port_value(value, json!({"not": "a number"})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);

    // Both updates announced, including the rejected one
    let mut changed = 0;
    while changed < 2 {
        wait_for_event(&mut events, |e| matches!(e, FlowEvent::PortChanged { port_id: id, .. } if *id == value)).await;
        changed += 1;
    }

    let port = inspector.get_port(value, None).await.unwrap();
    assert_eq!(port.value, json!(12.5));
}

#[tokio::test]
async fn test_editing_requires_active_project() {
    let fx = fixture().await;
    fx.host.deactivate_project().await.unwrap();

    let err = fx.host.editor().await.err().unwrap();
    assert!(matches!(err, FlowError::NoActiveProject));
    assert!(fx.host.inspector().await.is_err());
    assert!(matches!(fx.host.deactivate_project().await, Err(FlowError::NoActiveProject)));
}

#[tokio::test]
async fn test_editor_fails_after_its_project_is_deactivated() {
    let fx = fixture().await;
    let stale = fx.host.editor().await.unwrap();
    let view = stale.add_step(fx.templates.source, 0.0, 0.0).await.unwrap();

    fx.host.deactivate_project().await.unwrap();

    let err = stale.add_step(fx.templates.sink, 0.0, 0.0).await.unwrap_err();
    assert!(matches!(err, FlowError::NoActiveProject));
    assert!(matches!(stale.move_step(view.id, 1.0, 1.0).await, Err(FlowError::NoActiveProject)));
    assert!(matches!(stale.remove_step(view.id).await, Err(FlowError::NoActiveProject)));
    assert!(matches!(stale.unlink_ports(Uuid::new_v4()).await, Err(FlowError::NoActiveProject)));

    // A new activation does not revive the old handle
    fx.host.activate_project(&ProjectRecord::new("second")).await.unwrap();
    let err = stale.add_step(fx.templates.source, 0.0, 0.0).await.unwrap_err();
    assert!(matches!(err, FlowError::NoActiveProject));
    assert_eq!(fx.host.project().await.unwrap().steps, 0);

    let fresh = fx.host.editor().await.unwrap();
    fresh.add_step(fx.templates.source, 0.0, 0.0).await.unwrap();
    assert_eq!(fx.host.project().await.unwrap().steps, 1);
}
