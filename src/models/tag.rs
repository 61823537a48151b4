//! 模型标签
//!
//! `name:version` 形式的版本化标识。省略版本或版本为 `latest` 时表示最新版本。

use crate::Result;
use crate::api::error::ModelError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const MAX_TAG_LENGTH: usize = 63;
const LATEST: &str = "latest";

/// 模型标签
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    name: String,
    version: Option<String>,
}

impl Tag {
    /// 创建标签，名称和版本会被转为小写并校验
    pub fn new(name: &str, version: Option<&str>) -> Result<Self> {
        let name = name.to_lowercase();
        validate_component("name", &name)?;

        let version = match version.map(str::to_lowercase) {
            None => None,
            Some(v) if v == LATEST => None,
            Some(v) => {
                validate_component("version", &v)?;
                Some(v)
            }
        };

        Ok(Self { name, version })
    }

    /// 解析 `name` 或 `name:version`
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.split_once(':') {
            Some((name, version)) => Self::new(name, Some(version)),
            None => Self::new(tag, None),
        }
    }

    /// 生成同名的新版本标签，版本按时间递增
    pub fn make_new_version(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: Some(uuid::Uuid::now_v7().simple().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// 是否指向最新版本
    pub fn is_latest(&self) -> bool {
        self.version.is_none()
    }
}

fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_TAG_LENGTH {
        return Err(ModelError::InvalidTag(format!(
            "{kind} '{value}' must be 1 to {MAX_TAG_LENGTH} characters"
        ))
        .into());
    }

    let bytes = value.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let inner_ok = |b: u8| edge_ok(b) || matches!(b, b'-' | b'_' | b'.');

    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) || !bytes.iter().all(|&b| inner_ok(b)) {
        return Err(ModelError::InvalidTag(format!(
            "{kind} '{value}' must be alphanumeric with '-', '_' or '.' and start and end with an alphanumeric character"
        ))
        .into());
    }

    Ok(())
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}:{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for Tag {
    type Err = crate::ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Tag::parse(s)
    }
}

/// 可以解析成标签的值：`&str`、`String`、`Tag`
pub trait IntoTag {
    fn into_tag(self) -> Result<Tag>;
}

impl IntoTag for &str {
    fn into_tag(self) -> Result<Tag> {
        Tag::parse(self)
    }
}

impl IntoTag for &String {
    fn into_tag(self) -> Result<Tag> {
        Tag::parse(self)
    }
}

impl IntoTag for String {
    fn into_tag(self) -> Result<Tag> {
        Tag::parse(&self)
    }
}

impl IntoTag for Tag {
    fn into_tag(self) -> Result<Tag> {
        Ok(self)
    }
}

impl IntoTag for &Tag {
    fn into_tag(self) -> Result<Tag> {
        Ok(self.clone())
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Tag::parse(&raw).map_err(serde::de::Error::custom)
    }
}
