//! Registry unit tests

use dockfleet::errors::OrchestratorError;
use dockfleet::models::context::{ContextState, Credential, Endpoint};
use dockfleet::registry::ContextRegistry;

fn endpoint(address: &str) -> Endpoint {
    Endpoint::new(address, 22, "bf")
}

#[test]
fn test_register_and_get() {
    let registry = ContextRegistry::new();
    let ctx = registry
        .register("nuc1", endpoint("10.0.0.5"), Credential::password("pw"))
        .unwrap();

    assert_eq!(ctx.state, ContextState::Pending);
    assert_eq!(registry.get("nuc1").unwrap().endpoint.address, "10.0.0.5");
}

#[test]
fn test_register_duplicate_name() {
    let registry = ContextRegistry::new();
    registry
        .register("nuc1", endpoint("10.0.0.5"), Credential::password("pw"))
        .unwrap();

    let result = registry.register("nuc1", endpoint("10.0.0.6"), Credential::password("pw"));
    assert!(matches!(result, Err(OrchestratorError::DuplicateName(name)) if name == "nuc1"));
}

#[test]
fn test_get_unknown() {
    let registry = ContextRegistry::new();
    assert!(matches!(registry.get("ghost"), Err(OrchestratorError::NotFound(_))));
}

#[test]
fn test_list_preserves_insertion_order() {
    let registry = ContextRegistry::new();
    for name in ["zeta", "alpha", "mid"] {
        registry
            .register(name, endpoint("10.0.0.1"), Credential::password("pw"))
            .unwrap();
    }

    let names: Vec<String> = registry.list().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}

#[test]
fn test_only_forward_transitions_allowed() {
    let registry = ContextRegistry::new();
    registry
        .register("nuc1", endpoint("10.0.0.5"), Credential::password("pw"))
        .unwrap();

    // Pending -> Ready skips Provisioning
    assert!(matches!(
        registry.update_state("nuc1", ContextState::Ready, None),
        Err(OrchestratorError::InvalidTransition { .. })
    ));

    registry.update_state("nuc1", ContextState::Provisioning, None).unwrap();
    registry.update_state("nuc1", ContextState::Ready, None).unwrap();

    // Ready is final
    for state in [
        ContextState::Pending,
        ContextState::Provisioning,
        ContextState::Failed,
    ] {
        assert!(registry.update_state("nuc1", state, None).is_err());
    }
    assert_eq!(registry.get("nuc1").unwrap().state, ContextState::Ready);
}

#[test]
fn test_credential_taken_once() {
    let registry = ContextRegistry::new();
    registry
        .register("nuc1", endpoint("10.0.0.5"), Credential::password("pw"))
        .unwrap();

    assert!(registry.take_credential("nuc1").is_some());
    assert!(registry.take_credential("nuc1").is_none());
}

#[test]
fn test_mark_for_removal_and_remove() {
    let registry = ContextRegistry::new();
    registry
        .register("nuc1", endpoint("10.0.0.5"), Credential::password("pw"))
        .unwrap();
    registry
        .register("nuc2", endpoint("10.0.0.6"), Credential::password("pw"))
        .unwrap();

    assert!(registry.mark_for_removal("nuc1").unwrap().removal_pending);
    registry.remove("nuc1").unwrap();

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.list()[0].name, "nuc2");
    assert!(matches!(registry.remove("nuc1"), Err(OrchestratorError::NotFound(_))));
}

#[test]
fn test_pending_lists_unprovisioned_contexts() {
    let registry = ContextRegistry::new();
    registry
        .register("nuc1", endpoint("10.0.0.5"), Credential::password("pw"))
        .unwrap();
    registry
        .register("nuc2", endpoint("10.0.0.6"), Credential::password("pw"))
        .unwrap();
    registry.update_state("nuc1", ContextState::Provisioning, None).unwrap();

    assert_eq!(registry.pending(), vec!["nuc2".to_string()]);
}
