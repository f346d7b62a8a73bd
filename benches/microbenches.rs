use criterion::{criterion_group, criterion_main, Criterion};

use qxml::dtd::{ContentSpec, Dfa};
use qxml::{AttributeSet, CharTypeFacet, ContentHandler, Result, XmlReader};

#[derive(Default)]
struct Sink {
    elements: usize,
    chars: usize,
}

impl ContentHandler for Sink {
    fn start_element(
        &mut self,
        _uri: Option<&str>,
        _local_name: &str,
        _qname: &str,
        _attributes: &AttributeSet,
    ) -> Result<()> {
        self.elements += 1;
        Ok(())
    }

    fn characters(&mut self, data: &str) -> Result<()> {
        self.chars += data.len();
        Ok(())
    }
}

fn build_document(items: usize) -> String {
    let mut doc = String::from("<?xml version=\"1.0\"?><list xmlns:m=\"urn:bench\">");
    for i in 0..items {
        doc.push_str(&format!(
            "<item id=\"i{}\" m:kind=\"plain\">value {} &amp; more</item>",
            i, i
        ));
    }
    doc.push_str("</list>");
    doc
}

/// Parsing a mid-sized namespaced document, attributes and references
/// included.
fn parse_document(c: &mut Criterion) {
    let doc = build_document(500);
    c.bench_function("parse 500 elements", |b| {
        b.iter(|| {
            let mut sink = Sink::default();
            let mut reader = XmlReader::new();
            reader.set_content_handler(&mut sink);
            reader.parse_str(&doc).unwrap();
            criterion::black_box(sink.elements)
        })
    });
}

/// Stepping a compiled content model across a long child sequence.
fn content_model_steps(c: &mut Criterion) {
    let spec = ContentSpec::Seq(vec![
        ContentSpec::Name("head".to_string()),
        ContentSpec::Star(Box::new(ContentSpec::Choice(vec![
            ContentSpec::Name("item".to_string()),
            ContentSpec::Name("note".to_string()),
        ]))),
        ContentSpec::Name("tail".to_string()),
    ]);
    let dfa = Dfa::compile(&spec).unwrap();
    c.bench_function("dfa 10k steps", |b| {
        b.iter(|| {
            let mut state = dfa.start();
            state = dfa.step(state, "head").unwrap();
            for i in 0..10_000 {
                let name = if i % 3 == 0 { "note" } else { "item" };
                state = dfa.step(state, name).unwrap();
            }
            state = dfa.step(state, "tail").unwrap();
            criterion::black_box(dfa.accepting(state))
        })
    });
}

/// Raw character classification throughput.
fn classify_chars(c: &mut Criterion) {
    let facet = CharTypeFacet::get();
    let text: String = "qxml名前試験-123.ident ".repeat(500);
    c.bench_function("classify name chars", |b| {
        b.iter(|| {
            let mut names = 0usize;
            for ch in text.chars() {
                if facet.is_name_char(ch) {
                    names += 1;
                }
            }
            criterion::black_box(names)
        })
    });
}

criterion_group!(benches, parse_document, content_model_steps, classify_chars);
criterion_main!(benches);
