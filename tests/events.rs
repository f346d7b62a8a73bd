//! Event-trace tests for plain well-formed and ill-formed documents.

mod common;

use common::{Log, Recorder};
use pretty_assertions::assert_eq;
use qxml::{Error, XmlReader};

fn trace(xml: &str) -> (Vec<String>, qxml::Result<()>) {
    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut errors = Recorder::new(&log);
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut content);
    reader.set_error_handler(&mut errors);
    let result = reader.parse_str(xml);
    (log.take(), result)
}

#[test]
fn minimal_document() {
    let (events, result) = trace("<?xml version=\"1.0\"?><r/>");
    result.unwrap();
    assert_eq!(
        events,
        vec![
            "setDocumentLocator",
            "startDocument",
            "startElement(,r,r)",
            "endElement(,r,r)",
            "endDocument",
        ]
    );
}

#[test]
fn empty_element_and_explicit_pair_are_identical() {
    let (short_form, r1) = trace("<a/>");
    let (long_form, r2) = trace("<a></a>");
    r1.unwrap();
    r2.unwrap();
    assert_eq!(short_form, long_form);
}

#[test]
fn nested_elements_with_text() {
    let (events, result) = trace("<a><b>hi</b>tail</a>");
    result.unwrap();
    assert_eq!(
        events,
        vec![
            "setDocumentLocator",
            "startDocument",
            "startElement(,a,a)",
            "startElement(,b,b)",
            "characters(hi)",
            "endElement(,b,b)",
            "characters(tail)",
            "endElement(,a,a)",
            "endDocument",
        ]
    );
}

#[test]
fn attributes_are_reported_in_document_order() {
    let (events, result) = trace(r#"<r b="2" a="1"/>"#);
    result.unwrap();
    assert_eq!(
        events[2],
        "startElement(,r,r b=2|uri=|type=CDATA a=1|uri=|type=CDATA)"
    );
}

#[test]
fn attribute_whitespace_and_charrefs_normalize() {
    // A literal tab, a character reference and an entity reference must
    // normalize to the same value as writing the plain text.
    let (events, _) = trace("<r a=\"x\ty&#32;z&lt;\"/>");
    assert_eq!(events[2], "startElement(,r,r a=x y z<|uri=|type=CDATA)");
}

#[test]
fn character_and_predefined_references_in_content() {
    let (events, result) = trace("<r>&lt;&#65;&amp;</r>");
    result.unwrap();
    assert_eq!(events[3], "characters(<A&)");
}

#[test]
fn cdata_passes_markup_through() {
    let (events, result) = trace("<r><![CDATA[<&]]></r>");
    result.unwrap();
    assert_eq!(
        events,
        vec![
            "setDocumentLocator",
            "startDocument",
            "startElement(,r,r)",
            "characters(<&)",
            "endElement(,r,r)",
            "endDocument",
        ]
    );
}

#[test]
fn cdata_with_lexical_handler_brackets() {
    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut lexical = Recorder::new(&log);
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut content);
    reader.set_lexical_handler(&mut lexical);
    reader.parse_str("<r><![CDATA[<&]]></r>").unwrap();
    assert_eq!(
        log.take(),
        vec![
            "setDocumentLocator",
            "startDocument",
            "startElement(,r,r)",
            "startCDATA",
            "characters(<&)",
            "endCDATA",
            "endElement(,r,r)",
            "endDocument",
        ]
    );
}

#[test]
fn comments_reach_only_the_lexical_handler() {
    let (events, result) = trace("<r><!-- hidden --></r>");
    result.unwrap();
    assert!(events.iter().all(|e| !e.contains("hidden")));

    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut lexical = Recorder::new(&log);
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut content);
    reader.set_lexical_handler(&mut lexical);
    reader.parse_str("<r><!-- hidden --></r>").unwrap();
    assert!(log.take().contains(&"comment( hidden )".to_string()));
}

#[test]
fn processing_instructions_always_reported() {
    let (events, result) = trace("<?go there?><r/><?and back?>");
    result.unwrap();
    assert_eq!(events[2], "pi(go,there)");
    assert_eq!(events[5], "pi(and,back)");
}

#[test]
fn whitespace_only_document_has_no_root() {
    let (events, result) = trace("   \n  ");
    assert!(matches!(result, Err(Error::Parse(_))));
    assert_eq!(events.last().unwrap(), "endDocument");
    assert!(events.iter().any(|e| e.starts_with("fatalError")));
}

#[test]
fn unbalanced_tags_are_fatal_at_the_mismatch() {
    let (events, result) = trace("<a><b></a></b>");
    assert!(result.is_err());
    // <a> and <b> opened fine; the failure names the mismatch.
    assert!(events.contains(&"startElement(,b,b)".to_string()));
    assert!(events
        .iter()
        .any(|e| e.starts_with("fatalError") && e.contains("</a>")));
    assert_eq!(events.last().unwrap(), "endDocument");
}

#[test]
fn content_after_root_is_fatal() {
    let (_, result) = trace("<a/><b/>");
    assert!(result.is_err());
}

#[test]
fn stray_lt_in_chardata_is_fatal() {
    let (_, result) = trace("<a>1 < 2</a>");
    assert!(result.is_err());
}

#[test]
fn cdata_end_marker_in_chardata_is_fatal() {
    let (_, result) = trace("<a>]]></a>");
    assert!(result.is_err());
}

#[test]
fn doubled_attribute_is_fatal() {
    let (_, result) = trace(r#"<a x="1" x="2"/>"#);
    assert!(result.is_err());
}

#[test]
fn unknown_xml_version_is_fatal() {
    let (_, result) = trace("<?xml version=\"1.1\"?><r/>");
    assert!(result.is_err());
}

#[test]
fn fatal_errors_stop_content_events_but_not_end_document() {
    let (events, result) = trace("<a><b></a></b>");
    assert!(result.is_err());
    let fatal_at = events
        .iter()
        .position(|e| e.starts_with("fatalError"))
        .unwrap();
    // Nothing but endDocument after the fatal report.
    assert_eq!(events[fatal_at + 1..], ["endDocument".to_string()]);
}

#[test]
fn handler_cancellation_surfaces_unchanged() {
    struct Canceller;
    impl qxml::ContentHandler for Canceller {
        fn start_element(
            &mut self,
            _uri: Option<&str>,
            _local_name: &str,
            _qname: &str,
            _attributes: &qxml::AttributeSet,
        ) -> qxml::Result<()> {
            Err(Error::Cancelled)
        }
    }
    let mut canceller = Canceller;
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut canceller);
    match reader.parse_str("<a><b/></a>") {
        Err(Error::Cancelled) => {}
        other => panic!("expected cancellation, got ok={}", other.is_ok()),
    }
}

#[test]
fn entity_recursion_is_fatal_and_names_the_cycle() {
    let xml = "<!DOCTYPE r [ <!ENTITY a \"&b;\"> <!ENTITY b \"&a;\"> ]><r>&a;</r>";
    let (events, result) = trace(xml);
    assert!(result.is_err());
    let fatal = events
        .iter()
        .find(|e| e.starts_with("fatalError"))
        .expect("fatal reported");
    assert!(fatal.contains("a -> b -> a"), "{}", fatal);
}

#[test]
fn internal_entities_expand_in_content() {
    let xml = "<!DOCTYPE r [ <!ENTITY greet \"hi <b>there</b>\"> ]><r>&greet;!</r>";
    let (events, result) = trace(xml);
    result.unwrap();
    assert_eq!(
        events,
        vec![
            "setDocumentLocator",
            "startDocument",
            "startElement(,r,r)",
            "characters(hi )",
            "startElement(,b,b)",
            "characters(there)",
            "endElement(,b,b)",
            "characters(!)",
            "endElement(,r,r)",
            "endDocument",
        ]
    );
}

#[test]
fn element_split_across_entity_is_fatal() {
    let xml = "<!DOCTYPE r [ <!ENTITY open \"<x>\"> ]><r>&open;</x></r>";
    let (_, result) = trace(xml);
    assert!(result.is_err());
}

#[test]
fn undeclared_entity_without_dtd_is_fatal() {
    let (_, result) = trace("<r>&nosuch;</r>");
    assert!(result.is_err());
}

#[test]
fn misplaced_xml_declaration_is_a_reserved_pi() {
    let (_, result) = trace("<r/><?xml version=\"1.0\"?>");
    assert!(result.is_err());
}
