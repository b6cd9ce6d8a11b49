//! Instances built from configuration text

use bootstrap::{request_message, Instance};
use controller::ControllerError;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use transit_config::TransitConfig;
use types::AddressResponse;

const DATASET: &str = r#"
name = "rhein-main"

[[stations]]
id = "da-hbf"
name = "Darmstadt Hauptbahnhof"
lat = 49.8725
lng = 8.6306

[[stations]]
id = "f-hbf"
name = "Frankfurt (Main) Hauptbahnhof"
lat = 50.1071
lng = 8.6636
"#;

fn dataset_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("schedule.toml"), DATASET).unwrap();
    dir
}

fn config(dir: &Path, extra: &str) -> TransitConfig {
    let text = format!(
        r#"
[dataset]
path = "{}"
format = "toml"

[runtime]
num_threads = 2
io_threads = 1
connect_timeout_ms = 500
call_timeout_ms = 2000

{}
"#,
        dir.join("schedule.toml").display(),
        extra
    );
    TransitConfig::from_toml_str(&text).unwrap()
}

fn guesses(response: &types::Message) -> Vec<String> {
    response
        .content_as::<AddressResponse>()
        .unwrap()
        .guesses
        .iter()
        .map(|g| g.name.clone())
        .collect()
}

#[test]
fn test_geocoder_instance_answers_address() {
    let dir = dataset_dir();
    let instance = Instance::from_config(config(
        dir.path(),
        r#"
[modules]
enabled = ["geocoder"]
"#,
    ))
    .unwrap();

    assert_eq!(instance.controller().module_names(), vec!["geocoder"]);
    assert!(instance.wait_for_remotes(Duration::from_millis(10)));

    let response = instance.call(request_message("/address", Some("haupt"))).unwrap();
    assert_eq!(
        guesses(&response),
        vec!["Darmstadt Hauptbahnhof", "Frankfurt (Main) Hauptbahnhof"]
    );
}

#[test]
fn test_both_typeahead_modules_conflict() {
    let dir = dataset_dir();
    let err = Instance::from_config(config(
        dir.path(),
        r#"
[modules]
enabled = ["geocoder", "photon"]

[modules.params.photon]
url = "http://localhost:2322/api"
"#,
    ))
    .err()
    .unwrap();

    match err.downcast_ref::<ControllerError>() {
        Some(ControllerError::DuplicatePath { path, .. }) => assert_eq!(path, "/address"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_excluding_one_resolves_conflict() {
    let dir = dataset_dir();
    let instance = Instance::from_config(config(
        dir.path(),
        r#"
[modules]
enabled = ["geocoder", "photon"]
exclude = ["photon"]
"#,
    ))
    .unwrap();
    assert_eq!(instance.controller().module_names(), vec!["geocoder"]);
}

#[test]
fn test_missing_dataset_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = Instance::from_config(config(dir.path(), "")).err().unwrap();
    assert!(format!("{:#}", err).contains("Failed to load schedule"));
}

#[test]
fn test_address_forwarded_to_peer_instance() {
    let dir = dataset_dir();
    let mut server = Instance::from_config(config(
        dir.path(),
        r#"
[modules]
enabled = ["geocoder"]

[server]
bind = "127.0.0.1:0"
"#,
    ))
    .unwrap();
    let addr = server.controller().server_addr().unwrap();

    let client = Instance::from_config(config(
        dir.path(),
        &format!(
            r#"
[[remotes]]
host = "{}"
target = "/address"
"#,
            addr
        ),
    ))
    .unwrap();

    assert!(client.wait_for_remotes(Duration::from_secs(5)));
    let response = client.call(request_message("/address", Some("darmstadt"))).unwrap();
    assert_eq!(guesses(&response), vec!["Darmstadt Hauptbahnhof"]);
    assert_eq!(client.controller().metrics().remote_forwards, 1);

    server.shutdown();
}
