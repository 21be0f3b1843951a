//! Built-in adapters, one per replicated object type.

pub mod component;
pub mod container;
pub mod generic;
pub mod instances;
pub mod node;
pub mod template;

pub use component::ComponentAdapter;
pub use container::ContainerAdapter;
pub use generic::GenericAdapter;
pub use instances::{InstanceAdapter, INSTANCE_CONTAINER_CLASS};
pub use node::{NodeAdapter, ObjectInitializer};
pub use template::TemplateAdapter;

/// Dictionary key holding an object's name.
pub const NAME: &str = "name";
/// Dictionary key holding an object's class.
pub const CLASS: &str = "class";
/// Dictionary key holding a node's display label.
pub const LABEL: &str = "label";
/// Dictionary key holding a node's outliner folder.
pub const FOLDER: &str = "folder";
/// Dictionary key holding the list of a node's editor layers.
pub const LAYERS: &str = "layers";
