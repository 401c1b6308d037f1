use crate::declaration::{TypeDeclaration, TypeKey};
use crate::element::DomElement;

/// A typed view over [`DomElement`]s of one declared type.
///
/// ```ignore
/// struct Module(DomElement);
///
/// impl DomInterface for Module {
///     const TYPE_NAME: &'static str = "Module";
///
///     fn declaration() -> TypeDeclaration {
///         TypeDeclaration::builder(Self::TYPE_NAME)
///             .attribute("get_id", "id", ValueType::String)
///             .build()
///     }
///
///     fn wrap(element: DomElement) -> Self {
///         Module(element)
///     }
///
///     fn element(&self) -> &DomElement {
///         &self.0
///     }
/// }
/// ```
pub trait DomInterface: Sized {
    const TYPE_NAME: &'static str;

    fn declaration() -> TypeDeclaration;

    fn wrap(element: DomElement) -> Self;

    fn element(&self) -> &DomElement;

    fn type_key() -> TypeKey {
        TypeKey::new(Self::TYPE_NAME)
    }
}
