//! 模板库：一个目录下的具名模板
//!
//! 文件名即模板名，`.gjt` 与 `.json` 同名时优先读取 `.gjt`。

use crate::error::FileError;
use crate::template::{Template, TemplateFormat};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub struct TemplateLibrary {
    root: PathBuf,
    format: TemplateFormat,
}

impl TemplateLibrary {
    /// 打开（必要时创建）模板目录，新模板以 `.gjt` 保存
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, FileError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            format: TemplateFormat::Native,
        })
    }

    pub fn with_format(mut self, format: TemplateFormat) -> Self {
        self.format = format;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 全部模板名，按名称排序
    pub fn list(&self) -> Result<Vec<String>, FileError> {
        let mut names = BTreeSet::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if TemplateFormat::from_path(&path).is_none() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.insert(stem.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    pub fn save(&self, name: &str, template: &Template) -> Result<PathBuf, FileError> {
        check_name(name)?;
        let path = self.path_for(name, self.format);
        template.save(&path)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Template, FileError> {
        check_name(name)?;
        for format in [TemplateFormat::Native, TemplateFormat::Json] {
            let path = self.path_for(name, format);
            if path.exists() {
                return Template::load(&path);
            }
        }
        Err(FileError::TemplateNotFound(name.to_string()))
    }

    /// 删除模板的全部格式，返回是否删除了文件
    pub fn remove(&self, name: &str) -> Result<bool, FileError> {
        check_name(name)?;
        let mut removed = false;
        for format in [TemplateFormat::Native, TemplateFormat::Json] {
            let path = self.path_for(name, format);
            if path.exists() {
                std::fs::remove_file(&path)?;
                removed = true;
            }
        }
        if removed {
            tracing::info!("Removed template {}", name);
        }
        Ok(removed)
    }

    fn path_for(&self, name: &str, format: TemplateFormat) -> PathBuf {
        self.root.join(format!("{}.{}", name, format.extension()))
    }
}

fn check_name(name: &str) -> Result<(), FileError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(FileError::InvalidFormat(format!("Invalid template name: {:?}", name)));
    }
    Ok(())
}
