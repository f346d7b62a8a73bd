//! Namespace processing: bindings, resolution, constraint enforcement.

mod common;

use common::{Log, Recorder};
use pretty_assertions::assert_eq;
use qxml::{Error, XmlReader};

fn trace(xml: &str) -> (Vec<String>, qxml::Result<()>) {
    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut content);
    let result = reader.parse_str(xml);
    (log.take(), result)
}

#[test]
fn prefixed_element_and_attribute() {
    let (events, result) = trace(r#"<x:a xmlns:x="http://n" x:k="v"/>"#);
    result.unwrap();
    assert_eq!(
        events,
        vec![
            "setDocumentLocator",
            "startDocument",
            "startPrefixMapping(x,http://n)",
            "startElement(http://n,a,x:a x:k=v|uri=http://n|type=CDATA)",
            "endElement(http://n,a,x:a)",
            "endPrefixMapping(x)",
            "endDocument",
        ]
    );
}

#[test]
fn default_namespace_applies_to_elements_only() {
    let (events, result) = trace(r#"<a xmlns="http://d" k="v"><b/></a>"#);
    result.unwrap();
    // The attribute stays in no namespace; both elements are bound.
    assert_eq!(
        events[3],
        "startElement(http://d,a,a k=v|uri=|type=CDATA)"
    );
    assert_eq!(events[4], "startElement(http://d,b,b)");
}

#[test]
fn inner_redeclaration_shadows_and_unwinds() {
    let xml = r#"<a xmlns:p="uri:one"><b xmlns:p="uri:two"><p:c/></b><p:d/></a>"#;
    let (events, result) = trace(xml);
    result.unwrap();
    assert!(events.contains(&"startElement(uri:two,c,p:c)".to_string()));
    assert!(events.contains(&"startElement(uri:one,d,p:d)".to_string()));
}

#[test]
fn xmlns_attributes_hidden_by_default_shown_on_request() {
    let (events, result) = trace(r#"<a xmlns:x="http://n"/>"#);
    result.unwrap();
    assert_eq!(events[3], "startElement(,a,a)");

    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut reader = XmlReader::builder().namespace_prefixes(true).build();
    reader.set_content_handler(&mut content);
    reader.parse_str(r#"<a xmlns:x="http://n"/>"#).unwrap();
    let events = log.take();
    assert_eq!(
        events[3],
        "startElement(,a,a xmlns:x=http://n|uri=|type=CDATA)"
    );
}

#[test]
fn namespace_processing_can_be_disabled() {
    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut reader = XmlReader::builder().namespaces(false).build();
    reader.set_content_handler(&mut content);
    reader
        .parse_str(r#"<x:a xmlns:x="http://n" x:k="v"/>"#)
        .unwrap();
    let events = log.take();
    // No prefix mappings, no URIs, xmlns shows up like any attribute.
    assert!(events.iter().all(|e| !e.starts_with("startPrefixMapping")));
    assert_eq!(
        events[2],
        "startElement(,a,x:a xmlns:x=http://n|uri=|type=CDATA x:k=v|uri=|type=CDATA)"
    );
}

#[test]
fn undeclared_prefix_is_fatal() {
    let (_, result) = trace("<p:a/>");
    assert!(matches!(result, Err(Error::Parse(_))));
    let (_, result) = trace(r#"<a q:k="v"/>"#);
    assert!(result.is_err());
}

#[test]
fn expanded_name_collision_is_fatal() {
    let xml = r#"<e xmlns:n1="http://w" xmlns:n2="http://w" n1:a="1" n2:a="2"/>"#;
    let (_, result) = trace(xml);
    assert!(result.is_err());
}

#[test]
fn same_local_name_different_uris_is_fine() {
    let xml = r#"<e xmlns:n1="http://one" xmlns:n2="http://two" n1:a="1" n2:a="2"/>"#;
    let (_, result) = trace(xml);
    result.unwrap();
}

#[test]
fn xml_prefix_is_predefined() {
    let (events, result) = trace(r#"<a xml:lang="en"/>"#);
    result.unwrap();
    assert_eq!(
        events[2],
        "startElement(,a,a xml:lang=en|uri=http://www.w3.org/XML/1998/namespace|type=CDATA)"
    );
}

#[test]
fn reserved_declarations_are_fatal() {
    // xml may not be rebound, xmlns may not be declared at all.
    assert!(trace(r#"<a xmlns:xml="http://other"/>"#).1.is_err());
    assert!(trace(r#"<a xmlns:xmlns="http://x"/>"#).1.is_err());
    // Unbinding a non-default prefix is not XML 1.0.
    assert!(trace(r#"<a xmlns:p=""/>"#).1.is_err());
    // Unbinding the default namespace is fine.
    assert!(trace(r#"<a xmlns="http://d"><b xmlns=""/></a>"#).1.is_ok());
}

#[test]
fn empty_element_keeps_its_bindings_in_scope_for_events() {
    // Bindings declared on an empty element wrap exactly its two events.
    let (events, result) = trace(r#"<r><e xmlns:p="u" p:x="1"/></r>"#);
    result.unwrap();
    assert_eq!(
        events[3..7],
        [
            "startPrefixMapping(p,u)".to_string(),
            "startElement(,e,e p:x=1|uri=u|type=CDATA)".to_string(),
            "endElement(,e,e)".to_string(),
            "endPrefixMapping(p)".to_string(),
        ]
    );
}
