//! DTD effects: defaulting, typing, validation, declaration events.

mod common;

use common::{Log, Recorder};
use pretty_assertions::assert_eq;
use qxml::{DeclHandler, Result, XmlReader};

fn trace_validating(xml: &str) -> (Vec<String>, qxml::Result<()>) {
    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut errors = Recorder::new(&log);
    let mut dtd = Recorder::new(&log);
    let mut reader = XmlReader::builder().validation(true).build();
    reader.set_content_handler(&mut content);
    reader.set_error_handler(&mut errors);
    reader.set_dtd_handler(&mut dtd);
    let result = reader.parse_str(xml);
    (log.take(), result)
}

fn validity_errors(events: &[String]) -> Vec<&String> {
    events.iter().filter(|e| e.starts_with("error(")).collect()
}

#[test]
fn defaulted_attribute_is_reported_unspecified() {
    let xml = r#"<!DOCTYPE r [ <!ELEMENT r EMPTY> <!ATTLIST r a CDATA "d"> ]><r/>"#;
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(events.contains(&"startElement(,r,r a=d|uri=|type=CDATA|default)".to_string()));
    assert_eq!(validity_errors(&events).len(), 0);
}

#[test]
fn specified_value_wins_over_default() {
    let xml = r#"<!DOCTYPE r [ <!ELEMENT r EMPTY> <!ATTLIST r a CDATA "d"> ]><r a="mine"/>"#;
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(events.contains(&"startElement(,r,r a=mine|uri=|type=CDATA)".to_string()));
}

#[test]
fn required_attribute_missing_is_a_validity_error() {
    let xml = r#"<!DOCTYPE r [ <!ELEMENT r EMPTY> <!ATTLIST r a CDATA #REQUIRED> ]><r/>"#;
    let (events, result) = trace_validating(xml);
    result.unwrap();
    let errors = validity_errors(&events);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("required"), "{}", errors[0]);
}

#[test]
fn fixed_attribute_must_match() {
    let xml =
        r#"<!DOCTYPE r [ <!ELEMENT r EMPTY> <!ATTLIST r a CDATA #FIXED "f"> ]><r a="other"/>"#;
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert_eq!(validity_errors(&events).len(), 1);
}

#[test]
fn tokenized_values_collapse_cdata_does_not() {
    let xml = concat!(
        "<!DOCTYPE r [ <!ELEMENT r EMPTY>\n",
        "<!ATTLIST r t NMTOKENS #IMPLIED c CDATA #IMPLIED> ]>",
        "<r t=\"  a   b \" c=\"  a   b \"/>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    let start = events
        .iter()
        .find(|e| e.starts_with("startElement"))
        .unwrap();
    assert!(start.contains("t=a b|uri=|type=NMTOKENS"), "{}", start);
    assert!(start.contains("c=  a   b |uri=|type=CDATA"), "{}", start);
}

#[test]
fn undeclared_attribute_type_falls_back_to_cdata() {
    let xml = "<r a=\"v\"/>";
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(events
        .iter()
        .any(|e| e.contains("a=v|uri=|type=CDATA")));
}

#[test]
fn content_model_violations_are_recoverable() {
    let xml = concat!(
        "<!DOCTYPE doc [ <!ELEMENT doc (head,body)> ",
        "<!ELEMENT head EMPTY> <!ELEMENT body EMPTY> ]>",
        "<doc><body/></doc>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    let errors = validity_errors(&events);
    // body out of order, and the model never completed.
    assert!(errors.iter().any(|e| e.contains("not allowed here")));
    assert!(errors.iter().any(|e| e.contains("ended too early")));
    // Content events kept flowing.
    assert!(events.contains(&"startElement(,body,body)".to_string()));
}

#[test]
fn whitespace_in_element_content_is_ignorable() {
    let xml = concat!(
        "<!DOCTYPE doc [ <!ELEMENT doc (item*)> <!ELEMENT item (#PCDATA)> ]>",
        "<doc>\n  <item>x</item>\n</doc>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(events.contains(&"ignorableWhitespace(\\n  )".to_string()));
    assert!(events.contains(&"characters(x)".to_string()));
}

#[test]
fn nondeterministic_content_model_is_reported() {
    let xml = concat!(
        "<!DOCTYPE doc [ <!ELEMENT doc ((a,b)|(a,c))> ",
        "<!ELEMENT a EMPTY> <!ELEMENT b EMPTY> <!ELEMENT c EMPTY> ]>",
        "<doc><a/><b/></doc>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(validity_errors(&events)
        .iter()
        .any(|e| e.contains("deterministic")));
}

#[test]
fn id_uniqueness_and_idref_resolution() {
    let xml = concat!(
        "<!DOCTYPE doc [ <!ELEMENT doc (e*)> <!ELEMENT e EMPTY>\n",
        "<!ATTLIST e id ID #IMPLIED ref IDREF #IMPLIED> ]>",
        "<doc><e id=\"n1\"/><e id=\"n1\"/><e ref=\"ghost\"/></doc>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    let errors = validity_errors(&events);
    assert!(errors.iter().any(|e| e.contains("already in use")));
    assert!(errors.iter().any(|e| e.contains("ghost")));
}

#[test]
fn undeclared_element_and_wrong_root_reported() {
    let xml = r#"<!DOCTYPE root [ <!ELEMENT root EMPTY> ]><other/>"#;
    let (events, result) = trace_validating(xml);
    result.unwrap();
    let errors = validity_errors(&events);
    assert!(errors.iter().any(|e| e.contains("DOCTYPE")));
    assert!(errors.iter().any(|e| e.contains("not declared")));
}

#[test]
fn notations_and_unparsed_entities_are_reported() {
    let xml = concat!(
        "<!DOCTYPE doc [ <!NOTATION gif SYSTEM \"gif-viewer\">\n",
        "<!ENTITY pic SYSTEM \"img/pic.gif\" NDATA gif>\n",
        "<!ELEMENT doc EMPTY> <!ATTLIST doc img ENTITY #IMPLIED> ]>",
        "<doc img=\"pic\"/>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(events.contains(&"notationDecl(gif,,gif-viewer)".to_string()));
    assert!(events
        .iter()
        .any(|e| e.starts_with("unparsedEntityDecl(pic,") && e.ends_with(",gif)")));
    assert_eq!(validity_errors(&events).len(), 0);
}

#[test]
fn entity_attribute_must_name_an_unparsed_entity() {
    let xml = concat!(
        "<!DOCTYPE doc [ <!ELEMENT doc EMPTY>\n",
        "<!ENTITY txt \"hello\">\n",
        "<!ATTLIST doc e ENTITY #IMPLIED> ]>",
        "<doc e=\"txt\"/>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(validity_errors(&events)
        .iter()
        .any(|e| e.contains("unparsed")));
}

#[test]
fn reference_to_unparsed_entity_is_fatal() {
    let xml = concat!(
        "<!DOCTYPE doc [ <!NOTATION gif SYSTEM \"v\">\n",
        "<!ENTITY pic SYSTEM \"p.gif\" NDATA gif> <!ELEMENT doc (#PCDATA)> ]>",
        "<doc>&pic;</doc>"
    );
    let (_, result) = trace_validating(xml);
    assert!(result.is_err());
}

#[test]
fn duplicate_entity_declaration_warns_first_wins() {
    let xml = concat!(
        "<!DOCTYPE r [ <!ELEMENT r (#PCDATA)>\n",
        "<!ENTITY e \"one\"> <!ENTITY e \"two\"> ]>",
        "<r>&e;</r>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(events.iter().any(|e| e.starts_with("warning(")));
    assert!(events.contains(&"characters(one)".to_string()));
}

#[test]
fn declaration_events_reach_the_decl_handler() {
    #[derive(Default)]
    struct Decls {
        seen: Vec<String>,
    }
    impl DeclHandler for Decls {
        fn element_decl(&mut self, name: &str, model: &str) -> Result<()> {
            self.seen.push(format!("element {} {}", name, model));
            Ok(())
        }
        fn attribute_decl(
            &mut self,
            element_name: &str,
            attribute_name: &str,
            type_name: &str,
            mode: Option<&str>,
            value: Option<&str>,
        ) -> Result<()> {
            self.seen.push(format!(
                "attribute {} {} {} {} {}",
                element_name,
                attribute_name,
                type_name,
                mode.unwrap_or("-"),
                value.unwrap_or("-")
            ));
            Ok(())
        }
        fn internal_entity_decl(&mut self, name: &str, value: &str) -> Result<()> {
            self.seen.push(format!("entity {} {}", name, value));
            Ok(())
        }
    }

    let xml = concat!(
        "<!DOCTYPE doc [\n",
        "<!ELEMENT doc (a,(b|c)*)>\n",
        "<!ATTLIST doc kind (x|y) \"x\">\n",
        "<!ENTITY e \"text\">\n",
        "<!ELEMENT a EMPTY> <!ELEMENT b EMPTY> <!ELEMENT c EMPTY> ]>",
        "<doc><a/></doc>"
    );
    let mut decls = Decls::default();
    let mut reader = XmlReader::new();
    reader.set_decl_handler(&mut decls);
    reader.parse_str(xml).unwrap();
    assert_eq!(
        decls.seen,
        vec![
            "element doc (a,(b|c)*)",
            "attribute doc kind (x|y) - x",
            "entity e text",
            "element a EMPTY",
            "element b EMPTY",
            "element c EMPTY",
        ]
    );
}

#[test]
fn mixed_content_restricts_children_when_validating() {
    let xml = concat!(
        "<!DOCTYPE doc [ <!ELEMENT doc (#PCDATA|em)*> ",
        "<!ELEMENT em (#PCDATA)> <!ELEMENT other EMPTY> ]>",
        "<doc>text <em>fine</em> <other/></doc>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    assert!(validity_errors(&events)
        .iter()
        .any(|e| e.contains("mixed content")));
}

#[test]
fn standalone_document_with_external_default_reports() {
    // The external declaration is simulated through a parameter entity
    // carried subset; here the internal subset suffices to check the
    // plumbing for standalone + externally-declared entity use.
    let xml = concat!(
        "<?xml version=\"1.0\" standalone=\"yes\"?>",
        "<!DOCTYPE r [ <!ELEMENT r (#PCDATA)> <!ENTITY e \"v\"> ]>",
        "<r>&e;</r>"
    );
    let (events, result) = trace_validating(xml);
    result.unwrap();
    // Internally declared: no standalone violation.
    assert_eq!(validity_errors(&events).len(), 0);
    assert!(events.contains(&"characters(v)".to_string()));
}
