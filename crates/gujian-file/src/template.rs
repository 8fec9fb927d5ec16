//! 参数模板
//!
//! 模板 = 元数据 + 一组建筑参数。保存与加载时都按参数模式校验。

use crate::error::FileError;
use crate::native;
use chrono::{DateTime, Utc};
use gujian_core::params::ParameterSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// 模板元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl TemplateMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            author: String::new(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

/// 模板文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Json,
    Native,
}

impl TemplateFormat {
    /// 按扩展名判断，未知扩展名返回 `None`
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "gjt" => Some(Self::Native),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Native => "gjt",
        }
    }
}

/// 参数模板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub metadata: TemplateMetadata,
    pub params: ParameterSet,
}

impl Template {
    pub fn new(name: impl Into<String>, params: ParameterSet) -> Self {
        Self {
            metadata: TemplateMetadata::new(name),
            params,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// 替换参数（校验通过才替换）
    pub fn set_params(&mut self, params: ParameterSet) -> Result<(), FileError> {
        params.validate()?;
        self.params = params;
        self.metadata.touch();
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, FileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, FileError> {
        let template: Template = serde_json::from_str(text)?;
        template.params.validate()?;
        Ok(template)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), FileError> {
        self.params.validate()?;
        std::fs::write(path, self.to_json()?)?;
        tracing::info!("Saved template {} to {}", self.name(), path.display());
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self, FileError> {
        let text = std::fs::read_to_string(path)?;
        let template = Self::from_json(&text)?;
        tracing::info!("Loaded template {} from {}", template.name(), path.display());
        Ok(template)
    }

    /// 按扩展名选择格式保存
    pub fn save(&self, path: &Path) -> Result<(), FileError> {
        match TemplateFormat::from_path(path) {
            Some(TemplateFormat::Json) => self.save_json(path),
            Some(TemplateFormat::Native) => native::save(self, path),
            None => Err(FileError::InvalidFormat(format!(
                "Unknown template extension: {}",
                path.display()
            ))),
        }
    }

    /// 按扩展名选择格式加载
    pub fn load(path: &Path) -> Result<Self, FileError> {
        match TemplateFormat::from_path(path) {
            Some(TemplateFormat::Json) => Self::load_json(path),
            Some(TemplateFormat::Native) => native::load(path),
            None => Err(FileError::InvalidFormat(format!(
                "Unknown template extension: {}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gujian_core::params::RoofStyle;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}_{}", Uuid::new_v4(), name))
    }

    #[test]
    fn test_json_roundtrip() {
        let path = temp_path("hall.json");
        let params = ParameterSet { roof_style: RoofStyle::Gable, y_rooms: 1, ..Default::default() };
        let template = Template::new("悬山三间", params);
        template.save(&path).unwrap();

        let loaded = Template::load(&path).unwrap();
        assert_eq!(loaded, template);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let text = r#"{
            "metadata": {
                "id": "6f9619ff-8b86-d011-b42d-00c04fc964ff",
                "name": "partial",
                "created_at": "2024-01-01T00:00:00Z",
                "modified_at": "2024-01-01T00:00:00Z"
            },
            "params": { "x_rooms": 5, "roof_style": "Hip" }
        }"#;
        let template = Template::from_json(text).unwrap();
        assert_eq!(template.params.x_rooms, 5);
        assert_eq!(template.params.y_rooms, ParameterSet::default().y_rooms);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut template = Template::new("bad", ParameterSet::default());
        template.params.x_rooms = 0;
        let text = serde_json::to_string(&template).unwrap();
        assert!(matches!(Template::from_json(&text), Err(FileError::InvalidParams(_))));

        let mut good = Template::new("good", ParameterSet::default());
        let before = good.params.clone();
        assert!(good.set_params(ParameterSet { pillar_height: 1.0, ..Default::default() }).is_err());
        assert_eq!(good.params, before);
    }

    #[test]
    fn test_unknown_extension() {
        let template = Template::new("x", ParameterSet::default());
        assert!(matches!(
            template.save(&temp_path("hall.txt")),
            Err(FileError::InvalidFormat(_))
        ));
        assert_eq!(TemplateFormat::from_path(Path::new("a.GJT")), Some(TemplateFormat::Native));
    }
}
