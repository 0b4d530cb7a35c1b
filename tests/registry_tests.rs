//! Server registry persisted to a JSON settings file

use std::sync::Arc;

use mcp_tool_gateway::registry::{
    CUSTOM_SERVERS_KEY, CustomServerUpdate, JsonFileStore, MANAGED_SERVERS_KEY, NewCustomServer,
    ServerRegistry, ServerSource, SettingsStore,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

const EDGE: &str = "https://gateway.example";

fn open(dir: &TempDir) -> ServerRegistry {
    let store = JsonFileStore::new(dir.path().join("settings.json"));
    ServerRegistry::new(Arc::new(store), EDGE).unwrap()
}

#[test]
fn test_changes_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let registry = open(&dir);
    let added = registry
        .add_custom(NewCustomServer {
            name: "Docs Search".to_string(),
            url: "https://docs.example/mcp/".to_string(),
            token: Some("  secret  ".to_string()),
            enabled: true,
        })
        .unwrap();
    assert_eq!(added.id, "custom-docs-search");
    assert_eq!(added.url, "https://docs.example/mcp");
    registry.set_enabled("jamaica-market", false).unwrap();

    let reopened = open(&dir);
    let servers = reopened.list().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].id, "jamaica-market");
    assert_eq!(servers[0].source, ServerSource::Managed);
    assert_eq!(servers[0].url, format!("{EDGE}/api/mcp/jamaica-market"));
    assert!(!servers[0].enabled);
    assert_eq!(servers[1].token.as_deref(), Some("secret"));

    let enabled: Vec<String> = reopened.enabled().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(enabled, vec!["custom-docs-search".to_string()]);
}

#[test]
fn test_documents_are_stored_under_separate_keys() {
    let dir = TempDir::new().unwrap();
    let registry = open(&dir);
    registry
        .add_custom(NewCustomServer {
            name: "Alpha".to_string(),
            url: "http://alpha.local:9000".to_string(),
            token: None,
            enabled: false,
        })
        .unwrap();
    registry.set_enabled("Jamaica Market", true).unwrap();

    let store = JsonFileStore::new(dir.path().join("settings.json"));
    let custom = store.get(CUSTOM_SERVERS_KEY).unwrap().unwrap();
    let managed = store.get(MANAGED_SERVERS_KEY).unwrap().unwrap();

    assert_eq!(custom["version"], 1);
    assert_eq!(custom["servers"][0]["id"], "custom-alpha");
    assert_eq!(custom["servers"][0]["enabled"], false);
    assert_eq!(managed, json!({ "version": 1, "enabledById": { "jamaica-market": true } }));
}

#[test]
fn test_update_keeps_id() {
    let dir = TempDir::new().unwrap();
    let registry = open(&dir);
    registry
        .add_custom(NewCustomServer {
            name: "Alpha".to_string(),
            url: "http://alpha.local".to_string(),
            token: Some("t1".to_string()),
            enabled: true,
        })
        .unwrap();

    let updated = registry
        .update_custom(
            "alpha",
            CustomServerUpdate {
                name: Some("Alpha Prime".to_string()),
                token: Some(None),
                ..CustomServerUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(updated.id, "custom-alpha");
    assert_eq!(updated.name, "Alpha Prime");
    assert_eq!(updated.token, None);

    let reopened = open(&dir);
    assert_eq!(reopened.find("alpha prime").unwrap().id, "custom-alpha");
    reopened.remove_custom("custom-alpha").unwrap();
    assert_eq!(reopened.custom().unwrap().len(), 0);
}
