//! Element-content models: the expression tree and its compilation into a
//! deterministic automaton.
//!
//! The compiler builds a Glushkov position automaton: every name occurrence
//! in the expression is one position, `first`/`last`/`follow` sets connect
//! them. XML 1.0 requires content models to be deterministic ("1-unambiguous"),
//! which makes the position automaton itself deterministic — no subset
//! construction is needed, only the check that no position can reach two
//! different positions on the same name.

use std::collections::BTreeSet;
use std::fmt;

/// The expression tree of an element-content model, as parsed from a
/// `<!ELEMENT>` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSpec {
    Name(String),
    /// `(a, b, c)`
    Seq(Vec<ContentSpec>),
    /// `(a | b | c)`
    Choice(Vec<ContentSpec>),
    /// `x?`
    Opt(Box<ContentSpec>),
    /// `x*`
    Star(Box<ContentSpec>),
    /// `x+`
    Plus(Box<ContentSpec>),
}

impl fmt::Display for ContentSpec {
    /// Canonical form, as reported through `element_decl`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn write_group(
            f: &mut fmt::Formatter,
            items: &[ContentSpec],
            separator: &str,
        ) -> fmt::Result {
            f.write_str("(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(separator)?;
                }
                write!(f, "{}", item)?;
            }
            f.write_str(")")
        }
        match self {
            ContentSpec::Name(n) => f.write_str(n),
            ContentSpec::Seq(items) => write_group(f, items, ","),
            ContentSpec::Choice(items) => write_group(f, items, "|"),
            ContentSpec::Opt(inner) => write!(f, "{}?", inner),
            ContentSpec::Star(inner) => write!(f, "{}*", inner),
            ContentSpec::Plus(inner) => write!(f, "{}+", inner),
        }
    }
}

/// The compiled deterministic automaton over child element names.
///
/// State 0 is the start state; state `p + 1` means "the last accepted child
/// was position `p`".
#[derive(Debug, Clone)]
pub struct Dfa {
    symbols: Vec<String>,
    /// Outgoing edges per state as `(symbol, target)` pairs.
    transitions: Vec<Vec<(u32, u32)>>,
    accepting: Vec<bool>,
}

/// A name that can follow the same point of the model in two different
/// ways, which XML 1.0 forbids (appendix E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousModel {
    pub name: String,
}

impl fmt::Display for AmbiguousModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "content model is not deterministic: \"{}\" can match in more than one way",
            self.name
        )
    }
}

struct Glushkov {
    labels: Vec<u32>,
    follow: Vec<BTreeSet<usize>>,
}

struct Piece {
    nullable: bool,
    first: BTreeSet<usize>,
    last: BTreeSet<usize>,
}

impl Glushkov {
    fn build(&mut self, spec: &ContentSpec, symbols: &mut Vec<String>) -> Piece {
        match spec {
            ContentSpec::Name(name) => {
                let symbol = match symbols.iter().position(|s| s == name) {
                    Some(i) => i as u32,
                    None => {
                        symbols.push(name.clone());
                        (symbols.len() - 1) as u32
                    }
                };
                let position = self.labels.len();
                self.labels.push(symbol);
                self.follow.push(BTreeSet::new());
                let mut set = BTreeSet::new();
                set.insert(position);
                Piece {
                    nullable: false,
                    first: set.clone(),
                    last: set,
                }
            }
            ContentSpec::Seq(items) => {
                let mut acc = Piece {
                    nullable: true,
                    first: BTreeSet::new(),
                    last: BTreeSet::new(),
                };
                for item in items {
                    let piece = self.build(item, symbols);
                    for &q in &acc.last {
                        self.follow[q].extend(piece.first.iter().copied());
                    }
                    if acc.nullable {
                        acc.first.extend(piece.first.iter().copied());
                    }
                    if piece.nullable {
                        acc.last.extend(piece.last.iter().copied());
                    } else {
                        acc.last = piece.last;
                    }
                    acc.nullable &= piece.nullable;
                }
                acc
            }
            ContentSpec::Choice(items) => {
                let mut acc = Piece {
                    nullable: false,
                    first: BTreeSet::new(),
                    last: BTreeSet::new(),
                };
                for item in items {
                    let piece = self.build(item, symbols);
                    acc.nullable |= piece.nullable;
                    acc.first.extend(piece.first.iter().copied());
                    acc.last.extend(piece.last.iter().copied());
                }
                acc
            }
            ContentSpec::Opt(inner) => {
                let mut piece = self.build(inner, symbols);
                piece.nullable = true;
                piece
            }
            ContentSpec::Star(inner) | ContentSpec::Plus(inner) => {
                let piece = self.build(inner, symbols);
                for &q in &piece.last {
                    let first: Vec<usize> = piece.first.iter().copied().collect();
                    self.follow[q].extend(first);
                }
                Piece {
                    nullable: piece.nullable || matches!(spec, ContentSpec::Star(_)),
                    first: piece.first,
                    last: piece.last,
                }
            }
        }
    }
}

impl Dfa {
    /// Compiles a content expression, rejecting non-deterministic models.
    pub fn compile(spec: &ContentSpec) -> Result<Dfa, AmbiguousModel> {
        let mut symbols = Vec::new();
        let mut glushkov = Glushkov {
            labels: Vec::new(),
            follow: Vec::new(),
        };
        let root = glushkov.build(spec, &mut symbols);

        let positions = glushkov.labels.len();
        let mut transitions = vec![Vec::new(); positions + 1];
        let mut accepting = vec![false; positions + 1];
        accepting[0] = root.nullable;
        for &p in &root.last {
            accepting[p + 1] = true;
        }

        let edges_from = |set: &BTreeSet<usize>| -> Result<Vec<(u32, u32)>, AmbiguousModel> {
            let mut edges: Vec<(u32, u32)> = Vec::new();
            for &q in set {
                let symbol = glushkov.labels[q];
                if edges.iter().any(|&(s, _)| s == symbol) {
                    return Err(AmbiguousModel {
                        name: symbols[symbol as usize].clone(),
                    });
                }
                edges.push((symbol, (q + 1) as u32));
            }
            Ok(edges)
        };

        transitions[0] = edges_from(&root.first)?;
        for p in 0..positions {
            transitions[p + 1] = edges_from(&glushkov.follow[p])?;
        }

        Ok(Dfa {
            symbols,
            transitions,
            accepting,
        })
    }

    /// The start state.
    #[inline]
    pub fn start(&self) -> u32 {
        0
    }

    /// Steps the automaton on one child name; `None` rejects.
    pub fn step(&self, state: u32, name: &str) -> Option<u32> {
        let symbol = self.symbols.iter().position(|s| s == name)? as u32;
        self.transitions[state as usize]
            .iter()
            .find(|&&(s, _)| s == symbol)
            .map(|&(_, target)| target)
    }

    /// Whether ending the element in this state satisfies the model.
    #[inline]
    pub fn accepting(&self, state: u32) -> bool {
        self.accepting[state as usize]
    }

    /// The names a valid continuation could use from `state`; used to word
    /// validity messages.
    pub fn expected(&self, state: u32) -> Vec<&str> {
        self.transitions[state as usize]
            .iter()
            .map(|&(s, _)| self.symbols[s as usize].as_str())
            .collect()
    }
}
