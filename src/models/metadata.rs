//! 模型元数据定义
//!
//! `ModelInfo` 是写入 `model.yaml` 的持久化记录。写入时由 `tag` 拆出
//! `name` / `version` 两个字段，读取时再合成回 `tag`；同时兼容旧版本的记录格式。

use crate::Result;
use crate::api::error::ModelError;
use crate::models::tag::Tag;
use crate::models::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 描述文件名
pub const MODEL_YAML_FILENAME: &str = "model.yaml";

/// 旧版本在顶层记录的平台版本字段
const LEGACY_VERSION_FIELD: &str = "platform_version";
/// 旧版本在 context 中记录的依赖清单字段
const LEGACY_DEPENDENCIES_FIELD: &str = "dependencies";

/// 模型元数据
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub tag: Tag,
    /// 负责保存/加载该模型的模块名，用于解析 runnable 工厂
    pub module: String,
    pub api_version: String,
    pub labels: BTreeMap<String, String>,
    pub options: ModelOptions,
    /// 用户元数据（训练参数、评估指标等）
    pub metadata: BTreeMap<String, AnyValue>,
    pub context: ModelContext,
    pub signatures: ModelSignatures,
    pub creation_time: DateTime<Utc>,
}

/// 磁盘上的记录，字段顺序即写出顺序
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelInfoRecord {
    name: String,
    version: String,
    module: String,
    api_version: String,
    labels: BTreeMap<String, String>,
    options: ModelOptions,
    metadata: BTreeMap<String, AnyValue>,
    context: ModelContext,
    signatures: ModelSignatures,
    creation_time: DateTime<Utc>,
}

impl ModelInfo {
    /// 返回覆盖了部分选项的新元数据
    pub fn with_options<I, K>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, AnyValue)>,
        K: Into<String>,
    {
        Self {
            options: self.options.with_options(overrides),
            ..self.clone()
        }
    }

    /// 序列化为 YAML 文本
    pub fn to_yaml(&self) -> Result<String> {
        let version = self.tag.version().ok_or_else(|| {
            ModelError::InvalidField(format!("cannot persist {} without a version", self.tag))
        })?;

        let record = ModelInfoRecord {
            name: self.tag.name().to_string(),
            version: version.to_string(),
            module: self.module.clone(),
            api_version: self.api_version.clone(),
            labels: self.labels.clone(),
            options: self.options.clone(),
            metadata: self.metadata.clone(),
            context: self.context.clone(),
            signatures: self.signatures.clone(),
            creation_time: self.creation_time,
        };

        serde_yaml::to_string(&record)
            .map_err(|e| ModelError::InvalidField(format!("failed to serialize {MODEL_YAML_FILENAME}: {e}")).into())
    }

    /// 从 YAML 文本解析，并应用旧格式迁移规则
    pub fn from_yaml(content: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| ModelError::Corrupt(format!("unparsable {MODEL_YAML_FILENAME}: {e}")))?;

        let serde_yaml::Value::Mapping(mut mapping) = document else {
            return Err(ModelError::Corrupt(format!("malformed {MODEL_YAML_FILENAME}")).into());
        };

        migrate_legacy_fields(&mut mapping);

        let record: ModelInfoRecord = serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))
            .map_err(|e| ModelError::Corrupt(format!("unexpected content in {MODEL_YAML_FILENAME}: {e}")))?;

        let tag = Tag::new(&record.name, Some(&record.version))
            .map_err(|e| ModelError::Corrupt(format!("invalid tag in {MODEL_YAML_FILENAME}: {e}")))?;
        if tag.is_latest() {
            return Err(ModelError::Corrupt(format!(
                "{MODEL_YAML_FILENAME} must record a concrete version"
            ))
            .into());
        }

        Ok(Self {
            tag,
            module: record.module,
            api_version: record.api_version,
            labels: record.labels,
            options: record.options,
            metadata: record.metadata,
            context: record.context,
            signatures: record.signatures,
            creation_time: record.creation_time,
        })
    }
}

fn migrate_legacy_fields(mapping: &mut serde_yaml::Mapping) {
    mapping.remove(LEGACY_VERSION_FIELD);

    if !mapping.contains_key("signatures") {
        mapping.insert(
            serde_yaml::Value::from("signatures"),
            serde_yaml::Value::Mapping(Default::default()),
        );
    }

    if let Some(serde_yaml::Value::Mapping(context)) = mapping.get_mut("context") {
        if context.remove(LEGACY_DEPENDENCIES_FIELD).is_some() {
            context.insert(
                serde_yaml::Value::from("framework_versions"),
                serde_yaml::Value::Mapping(Default::default()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_info() -> ModelInfo {
        let mut signatures = ModelSignatures::new();
        signatures.insert("predict".to_string(), ModelSignature::batchable(0));
        signatures.insert("embed".to_string(), ModelSignature::default());

        ModelInfo {
            tag: Tag::parse("demo:v1").unwrap(),
            module: "modelforge.testing".to_string(),
            api_version: "v1".to_string(),
            labels: [("team".to_string(), "nlp".to_string())].into_iter().collect(),
            options: [("partial_kwargs", json!({"predict": {"threshold": 0.5}}))].into_iter().collect(),
            metadata: [("accuracy".to_string(), json!(0.93))].into_iter().collect(),
            context: ModelContext::new("testing").with_framework_version("testing", "1.0"),
            signatures,
            creation_time: Utc::now(),
        }
    }

    #[test]
    fn test_yaml_round_trip() {
        let info = create_test_info();
        let yaml = info.to_yaml().unwrap();
        let back = ModelInfo::from_yaml(&yaml).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_keys_in_declared_order() {
        let yaml = create_test_info().to_yaml().unwrap();
        let keys: Vec<&str> = yaml
            .lines()
            .filter(|line| !line.starts_with(' ') && line.contains(':'))
            .map(|line| line.split(':').next().unwrap())
            .collect();
        assert_eq!(
            keys,
            vec![
                "name", "version", "module", "api_version", "labels", "options", "metadata",
                "context", "signatures", "creation_time"
            ]
        );
    }

    #[test]
    fn test_missing_signatures_defaults_to_empty() {
        let mut info = create_test_info();
        info.signatures.clear();
        let yaml = info.to_yaml().unwrap();
        let yaml = yaml.replace("signatures: {}\n", "");
        assert!(!yaml.contains("signatures"));

        let back = ModelInfo::from_yaml(&yaml).unwrap();
        assert!(back.signatures.is_empty());
    }

    #[test]
    fn test_legacy_fields_are_dropped() {
        let info = create_test_info();
        let mut yaml = info.to_yaml().unwrap();
        yaml.push_str("platform_version: 0.0.1\n");
        let yaml = yaml.replace(
            "context:\n",
            "context:\n  dependencies:\n  - numpy==1.0\n",
        );

        let back = ModelInfo::from_yaml(&yaml).unwrap();
        assert!(back.context.framework_versions.is_empty());
        assert_eq!(back.tag, info.tag);
    }

    #[test]
    fn test_unknown_field_is_corrupt() {
        let mut yaml = create_test_info().to_yaml().unwrap();
        yaml.push_str("surprise: true\n");
        let err = ModelInfo::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, crate::ForgeError::Model(ModelError::Corrupt(_))));
    }

    #[test]
    fn test_non_mapping_is_corrupt() {
        let err = ModelInfo::from_yaml("- just\n- a list\n").unwrap_err();
        assert!(matches!(err, crate::ForgeError::Model(ModelError::Corrupt(_))));
    }

    #[test]
    fn test_with_options_keeps_identity() {
        let info = create_test_info();
        let updated = info.with_options([("device", json!("gpu"))]);
        assert_eq!(updated.tag, info.tag);
        assert_eq!(updated.creation_time, info.creation_time);
        assert!(info.options.get("device").is_none());
        assert_ne!(updated, info);
    }
}
