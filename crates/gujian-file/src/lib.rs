//! 古建模板存取
//!
//! 支持：
//! - `.json` 可读模板
//! - `.gjt` 压缩二进制模板（MessagePack + Zstd）
//! - 按目录管理的模板库

pub mod error;
pub mod library;
pub mod native;
pub mod template;

pub use error::FileError;
pub use library::TemplateLibrary;
pub use template::{Template, TemplateFormat, TemplateMetadata};
