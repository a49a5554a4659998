pub mod id;
pub mod name;
pub mod template;
