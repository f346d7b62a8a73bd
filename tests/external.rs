//! External entities, the external subset, resolvers and catalogs.

mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Log, Recorder};
use qxml::{EntityInput, EntityResolver, Result, XmlReader};

static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A scratch directory for the files of one test.
fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "qxml-test-{}-{}",
        std::process::id(),
        DIR_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(dir: &PathBuf, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn external_general_entity_from_file() {
    let dir = scratch_dir();
    write(&dir, "frag.xml", "<b>inner</b>");
    let doc = write(
        &dir,
        "doc.xml",
        "<!DOCTYPE r [ <!ENTITY frag SYSTEM \"frag.xml\"> ]><r>&frag;</r>",
    );

    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut content);
    reader.parse_file(&doc).unwrap();
    let events = log.take();
    assert!(events.contains(&"startElement(,b,b)".to_string()));
    assert!(events.contains(&"characters(inner)".to_string()));
}

#[test]
fn external_entity_with_text_declaration() {
    let dir = scratch_dir();
    // The fragment is real Latin-1 bytes with a text declaration naming it.
    std::fs::write(
        dir.join("frag.xml"),
        b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><i>caf\xE9</i>".to_vec(),
    )
    .unwrap();
    let doc = write(
        &dir,
        "doc.xml",
        "<!DOCTYPE r [ <!ENTITY frag SYSTEM \"frag.xml\"> ]><r>&frag;</r>",
    );

    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut content);
    reader.parse_file(&doc).unwrap();
    assert!(log.take().contains(&"characters(café)".to_string()));
}

#[test]
fn external_entities_can_be_disabled() {
    let dir = scratch_dir();
    write(&dir, "frag.xml", "<b/>");
    let doc = write(
        &dir,
        "doc.xml",
        "<!DOCTYPE r [ <!ENTITY frag SYSTEM \"frag.xml\"> ]><r>&frag;</r>",
    );

    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut reader = XmlReader::builder()
        .external_general_entities(false)
        .build();
    reader.set_content_handler(&mut content);
    reader.parse_file(&doc).unwrap();
    let events = log.take();
    assert!(events.contains(&"skippedEntity(frag)".to_string()));
    assert!(!events.contains(&"startElement(,b,b)".to_string()));
}

#[test]
fn external_subset_supplies_declarations() {
    let dir = scratch_dir();
    write(
        &dir,
        "doc.dtd",
        "<!ELEMENT r EMPTY>\n<!ATTLIST r a CDATA \"from-dtd\">\n",
    );
    let doc = write(&dir, "doc.xml", "<!DOCTYPE r SYSTEM \"doc.dtd\"><r/>");

    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut errors = Recorder::new(&log);
    let mut reader = XmlReader::builder().validation(true).build();
    reader.set_content_handler(&mut content);
    reader.set_error_handler(&mut errors);
    reader.parse_file(&doc).unwrap();
    let events = log.take();
    assert!(events
        .contains(&"startElement(,r,r a=from-dtd|uri=|type=CDATA|default)".to_string()));
    assert!(events.iter().all(|e| !e.starts_with("error(")));
}

#[test]
fn external_subset_with_parameter_entities_and_conditionals() {
    let dir = scratch_dir();
    write(
        &dir,
        "doc.dtd",
        concat!(
            "<!ENTITY % elems \"<!ELEMENT r (x*)> <!ELEMENT x EMPTY>\">\n",
            "%elems;\n",
            "<![INCLUDE[ <!ATTLIST x k CDATA \"v\"> ]]>\n",
            "<![IGNORE[ <!ATTLIST x dropped CDATA \"nope\"> ]]>\n",
        ),
    );
    let doc = write(&dir, "doc.xml", "<!DOCTYPE r SYSTEM \"doc.dtd\"><r><x/></r>");

    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut errors = Recorder::new(&log);
    let mut reader = XmlReader::builder().validation(true).build();
    reader.set_content_handler(&mut content);
    reader.set_error_handler(&mut errors);
    reader.parse_file(&doc).unwrap();
    let events = log.take();
    assert!(events.contains(&"startElement(,x,x k=v|uri=|type=CDATA|default)".to_string()));
    assert!(events.iter().all(|e| !e.contains("dropped")));
    assert!(events.iter().all(|e| !e.starts_with("error(")));
}

#[test]
fn missing_external_subset_is_a_warning() {
    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut errors = Recorder::new(&log);
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut content);
    reader.set_error_handler(&mut errors);
    reader
        .parse_str("<!DOCTYPE r SYSTEM \"does-not-exist.dtd\"><r/>")
        .unwrap();
    let events = log.take();
    assert!(events.iter().any(|e| e.starts_with("warning(")));
    assert!(events.contains(&"startElement(,r,r)".to_string()));
}

#[test]
fn entity_resolver_intercepts_system_ids() {
    struct Inliner;
    impl EntityResolver for Inliner {
        fn resolve_entity(
            &mut self,
            _public_id: Option<&str>,
            system_id: &str,
        ) -> Result<Option<EntityInput<'static>>> {
            if system_id.ends_with("frag.xml") {
                Ok(Some(EntityInput::from_owned_bytes(
                    system_id.to_string(),
                    b"<b>resolved</b>".to_vec(),
                )))
            } else {
                Ok(None)
            }
        }
    }

    let log = Log::new();
    let mut content = Recorder::new(&log);
    let mut resolver = Inliner;
    let mut reader = XmlReader::new();
    reader.set_content_handler(&mut content);
    reader.set_entity_resolver(&mut resolver);
    reader
        .parse_str("<!DOCTYPE r [ <!ENTITY e SYSTEM \"frag.xml\"> ]><r>&e;</r>")
        .unwrap();
    assert!(log.take().contains(&"characters(resolved)".to_string()));
}

#[cfg(feature = "catalog")]
mod catalog {
    use super::*;
    use pretty_assertions::assert_eq;
    use qxml::{Catalog, Catalogs};
    use std::sync::Arc;

    #[test]
    fn dtd_resolved_through_catalog() {
        let dir = scratch_dir();
        let dtd = write(
            &dir,
            "local.dtd",
            "<!ELEMENT r EMPTY>\n<!ATTLIST r via CDATA \"catalog\">\n",
        );
        let catalog = Catalog::parse(
            &format!("{}/catalog.xml", dir.to_string_lossy()),
            format!(
                r#"<catalog><public publicId="-//Acme//DTD R//EN" uri="{}"/></catalog>"#,
                dtd
            )
            .as_bytes(),
        )
        .unwrap();

        let log = Log::new();
        let mut content = Recorder::new(&log);
        let mut reader = XmlReader::builder()
            .catalogs(Arc::new(Catalogs::from_catalog(catalog)))
            .build();
        reader.set_content_handler(&mut content);
        reader
            .parse_str(
                "<!DOCTYPE r PUBLIC \"-//Acme//DTD R//EN\" \"http://unreachable/r.dtd\"><r/>",
            )
            .unwrap();
        assert!(log
            .take()
            .contains(&"startElement(,r,r via=catalog|uri=|type=CDATA|default)".to_string()));
    }

    #[test]
    fn resolution_is_idempotent() {
        let dir = scratch_dir();
        let dtd = write(&dir, "local.dtd", "<!ELEMENT r EMPTY>\n");
        let catalog = Catalog::parse(
            "/virtual/catalog.xml",
            format!(
                r#"<catalog><system systemId="http://remote/r.dtd" uri="{}"/></catalog>"#,
                dtd
            )
            .as_bytes(),
        )
        .unwrap();
        let catalogs = Catalogs::from_catalog(catalog);
        let resolved = catalogs
            .resolve_external(None, "http://remote/r.dtd")
            .unwrap();
        assert_eq!(resolved, dtd);
        // Resolving the already-local result changes nothing further.
        assert_eq!(catalogs.resolve_external(None, &resolved), None);
    }
}
