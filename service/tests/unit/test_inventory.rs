//! Host list tests

use std::path::PathBuf;

use secrecy::ExposeSecret;

use dockfleet::errors::OrchestratorError;
use dockfleet::inventory::{load_host_list, parse_host_list, register_hosts};
use dockfleet::models::context::{ContextState, Credential};
use dockfleet::registry::ContextRegistry;

const HOSTS: &str = "\
name,address,ssh_port,user,credential
# lab rack
nuc1,10.0.0.5,22,bf,pw

nuc2, 10.0.0.6 ,2222,ops,key:/etc/dockfleet/keys/nuc2
nuc3,10.0.0.7,22,bf,pa,ss
";

#[test]
fn test_parse_host_list() {
    let records = parse_host_list(HOSTS).unwrap();
    assert_eq!(records.len(), 3);

    assert_eq!(records[0].name, "nuc1");
    assert_eq!(records[0].endpoint.address, "10.0.0.5");
    assert_eq!(records[0].endpoint.ssh_port, 22);
    assert_eq!(records[0].endpoint.user, "bf");

    assert_eq!(records[1].endpoint.address, "10.0.0.6");
    assert_eq!(records[1].endpoint.ssh_port, 2222);
    match &records[1].credential {
        Credential::KeyFile(path) => {
            assert_eq!(path, &PathBuf::from("/etc/dockfleet/keys/nuc2"))
        }
        other => panic!("expected key file, got {:?}", other),
    }

    // Commas after the fourth separator belong to the credential
    match &records[2].credential {
        Credential::Password(secret) => assert_eq!(secret.expose_secret(), "pa,ss"),
        other => panic!("expected password, got {:?}", other),
    }
}

#[test]
fn test_header_is_optional() {
    let records = parse_host_list("nuc1,10.0.0.5,22,bf,pw\n").unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn test_invalid_lines_report_line_number() {
    let result = parse_host_list("name,address,ssh_port,user,credential\nnuc1,10.0.0.5,ssh,bf,pw\n");
    match result {
        Err(OrchestratorError::ConfigError(msg)) => {
            assert!(msg.contains("line 2"), "{}", msg);
            assert!(msg.contains("ssh_port"), "{}", msg);
        }
        other => panic!("expected config error, got {:?}", other.map(|r| r.len())),
    }

    assert!(parse_host_list("nuc1,10.0.0.5,22\n").is_err());
    assert!(parse_host_list("nuc1,10.0.0.5,22,bf,\n").is_err());
}

#[test]
fn test_register_hosts_in_file_order() {
    let registry = ContextRegistry::new();
    let names = register_hosts(&registry, parse_host_list(HOSTS).unwrap()).unwrap();

    assert_eq!(names, vec!["nuc1", "nuc2", "nuc3"]);
    assert!(registry
        .list()
        .iter()
        .all(|ctx| ctx.state == ContextState::Pending));
}

#[test]
fn test_duplicate_host_names_are_rejected() {
    let registry = ContextRegistry::new();
    let records = parse_host_list("nuc1,10.0.0.5,22,bf,pw\nnuc1,10.0.0.6,22,bf,pw\n").unwrap();

    let result = register_hosts(&registry, records);
    assert!(matches!(result, Err(OrchestratorError::DuplicateName(_))));
}

#[tokio::test]
async fn test_load_host_list_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hosts.csv");
    tokio::fs::write(&path, HOSTS).await.unwrap();

    let records = load_host_list(&path).await.unwrap();
    assert_eq!(records.len(), 3);

    let missing = load_host_list(&dir.path().join("missing.csv")).await;
    assert!(matches!(missing, Err(OrchestratorError::ConfigError(_))));
}
