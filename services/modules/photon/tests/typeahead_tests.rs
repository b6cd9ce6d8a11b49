//! `/address` served by Photon against a mock HTTP endpoint

use controller::{Controller, ControllerError, ModuleCatalog};
use mockito::Matcher;
use photon::{Photon, MODULE_ID};
use std::collections::HashMap;
use types::{AddressRequest, AddressResponse, Message};

const BODY: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [8.6306, 49.8725]},
            "properties": {"name": "Darmstadt Hauptbahnhof", "type": "house", "city": "Darmstadt", "country": "Deutschland"}
        },
        {
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [8.6512, 49.8728]},
            "properties": {"name": "Darmstadt", "type": "city", "state": "Hessen"}
        }
    ]
}"#;

fn controller_for(url: &str) -> Controller {
    let catalog = ModuleCatalog::new().with(MODULE_ID, || Box::new(Photon::new()));
    let mut controller = Controller::new(catalog);
    let params = HashMap::from([(MODULE_ID.to_string(), HashMap::from([("url".to_string(), url.to_string())]))]);
    controller.set_module_params(params);
    controller.init_modules(&[MODULE_ID], &[] as &[&str], 2).unwrap();
    controller
}

fn query(input: &str) -> Message {
    Message::from_content("/address", AddressRequest::new(input))
}

#[test]
fn test_address_through_photon() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("layer".into(), "city".into()),
            Matcher::UrlEncoded("layer".into(), "district".into()),
            Matcher::UrlEncoded("q".into(), "Darmstadt Hbf".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(BODY)
        .expect(1)
        .create();

    let controller = controller_for(&format!("{}/api", server.url()));
    let response = controller.call(query("Darmstadt Hbf"), 2).unwrap();
    let guesses = &response.content_as::<AddressResponse>().unwrap().guesses;

    assert_eq!(guesses.len(), 2);
    assert_eq!(guesses[0].name, "Darmstadt Hauptbahnhof");
    assert_eq!(guesses[0].kind, "unknown");
    assert_eq!(guesses[0].regions.len(), 2);
    assert_eq!(guesses[1].kind, "place");
    assert!((guesses[1].pos.lat - 49.8728).abs() < 1e-9);
    mock.assert();
}

#[test]
fn test_repeated_calls_use_fresh_connections() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api")
        .match_query(Matcher::Any)
        .with_body(BODY)
        .expect(3)
        .create();

    let controller = controller_for(&format!("{}/api", server.url()));
    for _ in 0..3 {
        controller.call(query("darm"), 1).unwrap();
    }
    mock.assert();
}

#[test]
fn test_bad_json_is_handler_error() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/api")
        .match_query(Matcher::Any)
        .with_body("<html>not json</html>")
        .create();

    let controller = controller_for(&format!("{}/api", server.url()));
    let err = controller.call(query("darm"), 1).unwrap_err();
    match err {
        ControllerError::Handler { path, message } => {
            assert_eq!(path, "/address");
            assert!(message.contains("Bad JSON"), "{}", message);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_http_status_is_handler_error() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/api")
        .match_query(Matcher::Any)
        .with_status(503)
        .create();

    let controller = controller_for(&format!("{}/api", server.url()));
    let err = controller.call(query("darm"), 1).unwrap_err();
    assert!(matches!(err, ControllerError::Handler { ref message, .. } if message.contains("503")));
}

#[test]
fn test_missing_url_rejected_at_init() {
    let catalog = ModuleCatalog::new().with(MODULE_ID, || Box::new(Photon::new()));
    let mut controller = Controller::new(catalog);
    let err = controller.init_modules(&[MODULE_ID], &[] as &[&str], 1).unwrap_err();
    assert!(matches!(err, ControllerError::Configuration { ref module, .. } if module == MODULE_ID));
}
