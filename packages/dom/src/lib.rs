//! # Markbind DOM
//!
//! Projects markup trees onto declared, typed interfaces.
//!
//! ```text
//! TypeDeclaration ──register──→ schema (child descriptions per type)
//!                                  │
//! MarkupFile ──match root──→ DomElement ──invoke("get_x")──→ value / child / children
//!     ▲                           │
//!     └────── guarded writes ─────┘──→ DomEvent (after the lock is released)
//! ```
//!
//! A [`DomManager`] owns registered types, converters and file descriptions.
//! Elements are handles: they carry no tree data themselves and re-locate
//! their tag by logical path (parent, description, position) whenever the
//! file changed under them. Files opened lazily answer structural queries
//! from their persisted stub until something needs the real tree.

mod changes;
mod children;
mod config;
mod converter;
mod copy;
mod declaration;
mod description;
mod dynamic;
mod element;
mod error;
mod events;
mod handler;
mod holder;
mod interface;
mod invocation;
mod manager;
mod name;
mod root;
mod schema;
mod stable;
mod state;
mod strategy;
mod stub_index;
mod value;
mod values;
mod write;

pub use config::DomConfig;
pub use converter::{
    BooleanConverter, ConvertContext, Converter, ConverterRef, EnumConverter, IdReferenceConverter, IntegerConverter,
    Resolution, ResolvingConverter, StringConverter, Unresolved,
};
pub use copy::{CancellationFlag, CancellationSignal, NeverCanceled};
pub use declaration::{Binding, OperationDecl, ParamType, ReturnType, TypeDeclaration, TypeDeclarationBuilder, TypeKey};
pub use description::{
    AttributeDescription, ChildDescription, CollectionDescription, CustomDescription, CustomMatcher, DescriptionKey,
    DescriptionKind, FixedDescription, TagInfo,
};
pub use dynamic::{DomExtender, DomExtensionsRegistrar, ExtensionContext};
pub use element::DomElement;
pub use error::{ConfigError, DomError, DomResult};
pub use events::{DomEvent, DomEventKind, ListenerId};
pub use interface::DomInterface;
pub use invocation::InvocationResult;
pub use manager::DomManager;
pub use name::{NamespacePolicies, XmlName};
pub use root::{DescriptionId, DomFileDescription};
pub use stable::{DomPath, PathSegment, StableElement};
pub use strategy::ParentStrategy;
pub use value::{EnumType, Value, ValueType};

pub use markbind_tree::{FileId, FileStub, MarkupFile, NodeId};
