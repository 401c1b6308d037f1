//! # Markbind Tree
//!
//! The markup tree the binding engine reads and writes.
//!
//! ```text
//! source text ──tokenize/parse──→ MarkupFile (arena of tags, attributes, text)
//!                                     │
//!                                     └──→ FileStub (persisted structural summary)
//! ```
//!
//! The tree exposes plain node reads (names, namespaces, attribute values,
//! sub-tags, text), edit primitives, per-node validity, a modification counter
//! per file and a cache slot per node that the engine uses to remember which
//! handler owns a node.

pub mod error;
pub mod id_generator;
pub mod parser;
pub mod serializer;
pub mod stub;
pub mod tokenizer;
pub mod tree;
pub mod visitor;

pub use error::{format_error, ParseError, ParseResult, TreeError, TreeResult};
pub use id_generator::{get_file_id, FileId, ScratchPaths};
pub use parser::{parse, Parser};
pub use serializer::{serialize, Serializer};
pub use stub::{AttributeStub, ElementStub, FileStub, StubId};
pub use tokenizer::{tokenize, Token};
pub use tree::{split_name, MarkupFile, NodeId, NodeKind, NodeState, TreeChange, TreeSnapshot};
pub use visitor::{walk_file, walk_tag, Visitor};
