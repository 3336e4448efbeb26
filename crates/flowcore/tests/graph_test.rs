use async_trait::async_trait;
use flowcore::{
    Direction, FlowGraph, GraphError, PortId, PortSpec, PortValue, ProjectSettings, Step, StepBody, StepContext,
    StepError, StepId, StepOutput, TemplateIdentity, TemplateRef,
};
use std::sync::Arc;
use uuid::Uuid;

/// Body with a fixed set of ports that does nothing when run
struct FixedPorts(Vec<PortSpec>);

#[async_trait]
impl StepBody for FixedPorts {
    fn ports(&self) -> Vec<PortSpec> {
        self.0.clone()
    }

    async fn run(&self, _ctx: StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::new())
    }
}

fn add_step(graph: &mut FlowGraph, ports: Vec<PortSpec>) -> StepId {
    let template = TemplateRef {
        id: Uuid::new_v4(),
        identity: TemplateIdentity::new("test.fixed", "tests"),
    };
    let step = Step::new(Uuid::new_v4(), template, Arc::new(FixedPorts(ports)));
    graph.add_step(step).unwrap()
}

fn port(graph: &FlowGraph, step: StepId, name: &str, direction: Direction) -> PortId {
    graph.step(step).unwrap().port_named(name, direction).unwrap().id()
}

/// Step A with numeric output X, step B with numeric input Y
fn two_steps() -> (FlowGraph, StepId, StepId, PortId, PortId) {
    let mut graph = FlowGraph::new(ProjectSettings::default());
    let a = add_step(&mut graph, vec![PortSpec::output("X", 0.0)]);
    let b = add_step(&mut graph, vec![PortSpec::input("Y", 0.0)]);
    let x = port(&graph, a, "X", Direction::Output);
    let y = port(&graph, b, "Y", Direction::Input);
    (graph, a, b, x, y)
}

#[test]
fn test_link_then_remove_source_step() {
    let (mut graph, a, _b, x, y) = two_steps();

    let link = graph.link_ports(x, y).unwrap();
    assert_eq!(link.source.port_id, x);
    assert_eq!(link.target.port_id, y);

    let links: Vec<_> = graph.links().cloned().collect();
    assert_eq!(links, vec![link.clone()]);

    let (_, removed) = graph.remove_step(a).unwrap();
    assert_eq!(removed, vec![link]);
    assert_eq!(graph.link_count(), 0);
    assert!(!graph.port(y).unwrap().1.is_connected());
}

#[test]
fn test_duplicate_link_rejected() {
    let (mut graph, _, _, x, y) = two_steps();

    graph.link_ports(x, y).unwrap();
    let second = graph.link_ports(x, y);

    assert!(matches!(second, Err(GraphError::DuplicateLink { .. })));
    assert_eq!(graph.link_count(), 1);
}

#[test]
fn test_reversed_direction_rejected() {
    let (mut graph, _, _, x, y) = two_steps();

    let result = graph.link_ports(y, x);
    assert!(matches!(
        result,
        Err(GraphError::DirectionMismatch {
            from: Direction::Input,
            to: Direction::Output
        })
    ));
    assert_eq!(graph.link_count(), 0);
}

#[test]
fn test_reversed_direction_rejected_before_brand_check() {
    let mut graph = FlowGraph::new(ProjectSettings::default());
    let a = add_step(&mut graph, vec![PortSpec::input("img", PortValue::Image(None))]);
    let b = add_step(&mut graph, vec![PortSpec::output("n", 0.0)]);

    let result = graph.link_ports(port(&graph, a, "img", Direction::Input), port(&graph, b, "n", Direction::Output));
    assert!(matches!(result, Err(GraphError::DirectionMismatch { .. })));
}

#[test]
fn test_incompatible_brands_rejected() {
    let mut graph = FlowGraph::new(ProjectSettings::default());
    let a = add_step(&mut graph, vec![PortSpec::output("img", PortValue::Image(None))]);
    let b = add_step(&mut graph, vec![PortSpec::input("n", 0.0)]);

    let result = graph.link_ports(port(&graph, a, "img", Direction::Output), port(&graph, b, "n", Direction::Input));
    assert!(matches!(result, Err(GraphError::IncompatibleBrands { .. })));
}

#[test]
fn test_convertible_brands_accepted() {
    let mut graph = FlowGraph::new(ProjectSettings::default());
    let a = add_step(&mut graph, vec![PortSpec::output("n", 1.5)]);
    let b = add_step(&mut graph, vec![PortSpec::input("s", "")]);

    let result = graph.link_ports(port(&graph, a, "n", Direction::Output), port(&graph, b, "s", Direction::Input));
    assert!(result.is_ok());
}

#[test]
fn test_same_step_rejected() {
    let mut graph = FlowGraph::new(ProjectSettings::default());
    let a = add_step(&mut graph, vec![PortSpec::input("in", 0.0), PortSpec::output("out", 0.0)]);

    let result = graph.link_ports(port(&graph, a, "out", Direction::Output), port(&graph, a, "in", Direction::Input));
    assert!(matches!(result, Err(GraphError::SameStep(id)) if id == a));
}

#[test]
fn test_unknown_port_not_found() {
    let (mut graph, _, _, x, _) = two_steps();
    let missing = Uuid::new_v4();

    let result = graph.link_ports(x, missing);
    assert!(matches!(result, Err(GraphError::PortNotFound(id)) if id == missing));
}

#[test]
fn test_unlink_is_idempotent() {
    let (mut graph, _, _, x, y) = two_steps();
    let link = graph.link_ports(x, y).unwrap();

    assert!(graph.unlink(link.id).is_some());
    assert!(graph.unlink(link.id).is_none());
    assert_eq!(graph.link_count(), 0);
    assert!(!graph.port(x).unwrap().1.is_connected());
}

#[test]
fn test_fan_in_keeps_input_connected_until_last_link_removed() {
    let (mut graph, _, b, x, y) = two_steps();
    let c = add_step(&mut graph, vec![PortSpec::output("Z", 0.0)]);
    let z = port(&graph, c, "Z", Direction::Output);

    let first = graph.link_ports(x, y).unwrap();
    let second = graph.link_ports(z, y).unwrap();
    assert_eq!(graph.incoming_links(b).count(), 2);

    graph.unlink(first.id);
    assert!(graph.port(y).unwrap().1.is_connected());

    graph.unlink(second.id);
    assert!(!graph.port(y).unwrap().1.is_connected());
}

#[test]
fn test_remove_step_leaves_unrelated_links() {
    let mut graph = FlowGraph::new(ProjectSettings::default());
    let a = add_step(&mut graph, vec![PortSpec::output("out", 0.0)]);
    let b = add_step(&mut graph, vec![PortSpec::input("in", 0.0), PortSpec::output("out", 0.0)]);
    let c = add_step(&mut graph, vec![PortSpec::input("in", 0.0)]);
    let d = add_step(&mut graph, vec![PortSpec::output("out", 0.0)]);
    let e = add_step(&mut graph, vec![PortSpec::input("in", 0.0)]);

    let ab = graph
        .link_ports(port(&graph, a, "out", Direction::Output), port(&graph, b, "in", Direction::Input))
        .unwrap();
    let bc = graph
        .link_ports(port(&graph, b, "out", Direction::Output), port(&graph, c, "in", Direction::Input))
        .unwrap();
    let de = graph
        .link_ports(port(&graph, d, "out", Direction::Output), port(&graph, e, "in", Direction::Input))
        .unwrap();

    let (removed_step, removed) = graph.remove_step(b).unwrap();
    assert_eq!(removed_step.id(), b);
    assert_eq!(removed.len(), 2);
    assert!(removed.contains(&ab) && removed.contains(&bc));

    let remaining: Vec<_> = graph.links().cloned().collect();
    assert_eq!(remaining, vec![de]);
    assert!(graph.step(b).is_none());
    assert!(graph.port_owner(removed_step.ports()[0].id()).is_none());
}

#[test]
fn test_remove_unknown_step_fails() {
    let (mut graph, _, _, _, _) = two_steps();
    let missing = Uuid::new_v4();

    assert!(matches!(graph.remove_step(missing), Err(GraphError::StepNotFound(id)) if id == missing));
    assert_eq!(graph.step_count(), 2);
}

#[test]
fn test_connect_skips_compatibility_checks() {
    let mut graph = FlowGraph::new(ProjectSettings::default());
    let a = add_step(&mut graph, vec![PortSpec::output("img", PortValue::Image(None))]);
    let b = add_step(&mut graph, vec![PortSpec::input("n", 0.0)]);
    let id = Uuid::new_v4();

    let link = graph
        .connect(id, port(&graph, a, "img", Direction::Output), port(&graph, b, "n", Direction::Input))
        .unwrap();
    assert_eq!(link.id, id);
    assert!(graph.port(link.target.port_id).unwrap().1.is_connected());
}
