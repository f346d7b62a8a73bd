//! Parse a file given on the command line and print an event summary.
//!
//! ```sh
//! cargo run --example count_events -- document.xml
//! ```

use qxml::{AttributeSet, ContentHandler, ErrorHandler, ParseError, Result, XmlReader};

#[derive(Default)]
struct Stats {
    elements: usize,
    attributes: usize,
    text_bytes: usize,
    errors: usize,
}

impl ContentHandler for Stats {
    fn start_element(
        &mut self,
        _uri: Option<&str>,
        _local_name: &str,
        _qname: &str,
        attributes: &AttributeSet,
    ) -> Result<()> {
        self.elements += 1;
        self.attributes += attributes.len();
        Ok(())
    }

    fn characters(&mut self, data: &str) -> Result<()> {
        self.text_bytes += data.len();
        Ok(())
    }
}

#[derive(Default)]
struct Problems {
    count: usize,
}

impl ErrorHandler for Problems {
    fn error(&mut self, error: &ParseError) -> Result<()> {
        eprintln!("{}", error);
        self.count += 1;
        Ok(())
    }

    fn fatal_error(&mut self, error: &ParseError) -> Result<()> {
        eprintln!("{}", error);
        self.count += 1;
        Ok(())
    }
}

fn main() {
    let path = std::env::args().nth(1).expect("usage: count_events FILE");
    let mut stats = Stats::default();
    let mut problems = Problems::default();
    let mut reader = XmlReader::builder().validation(true).build();
    reader.set_content_handler(&mut stats);
    reader.set_error_handler(&mut problems);
    match reader.parse_file(&path) {
        Ok(()) => {
            stats.errors = problems.count;
            println!(
                "{}: {} elements, {} attributes, {} bytes of text, {} problems",
                path, stats.elements, stats.attributes, stats.text_bytes, stats.errors
            );
        }
        Err(e) => {
            eprintln!("{}: parse failed: {}", path, e);
            std::process::exit(1);
        }
    }
}
