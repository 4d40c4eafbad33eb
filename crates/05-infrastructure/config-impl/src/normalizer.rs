//! 资源归一化
//!
//! 把一个原始资源（键到数据块的映射）或一个挂载文件转换为扁平、有序的配置条目。

use crate::properties::{looks_like_properties, parse_properties};
use config_abstractions::{MountedFile, NormalizedEntries, ProfileConstraint, PropertyEntry};
use infrastructure_common::{ClusterConfigProperties, ConfigError, RawResource};
use serde_yaml::Value;
use tracing::{debug, warn};

const APPLICATION_BASENAME: &str = "application";
const DOCUMENT_EXTENSIONS: [&str; 3] = ["properties", "yaml", "yml"];

/// 嵌入文档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Yaml,
    Properties,
}

/// 单个数据块的识别结果
enum Detected {
    Document(Vec<Segment>),
    Literal,
}

/// 文档片段：`---` 分隔的一段，或 properties 全文
struct Segment {
    entries: Vec<(String, String)>,
}

/// 资源归一化器
#[derive(Debug, Clone)]
pub struct ResourceNormalizer {
    marker_keys: Vec<String>,
}

impl ResourceNormalizer {
    /// 使用给定 profile 标记键创建归一化器
    pub fn new<I, S>(marker_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            marker_keys: marker_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// 从启动配置创建
    pub fn from_properties(properties: &ClusterConfigProperties) -> Self {
        Self::new(properties.profile_marker_keys.iter().cloned())
    }

    /// 归一化一个集群资源
    ///
    /// 单键资源无论键名如何都尝试按嵌入文档解析；多键资源只解析
    /// `application.*` 与 `application-<profile>.*`，其余键原样作为属性。
    pub fn normalize(&self, resource: &RawResource) -> Result<NormalizedEntries, ConfigError> {
        let source_id = resource.source_id();
        let mut result = NormalizedEntries::new(source_id.clone());

        if resource.data.len() == 1 {
            if let Some((key, blob)) = resource.data.iter().next() {
                let text = String::from_utf8_lossy(blob);
                self.normalize_single(&source_id, key, &text, &mut result)?;
            }
            return Ok(result);
        }

        let mut literals = Vec::new();
        let mut base_documents = Vec::new();
        let mut profile_documents = Vec::new();

        for (key, blob) in &resource.data {
            match classify_key(key) {
                KeyRole::Application(format) => base_documents.push((key, blob, format)),
                KeyRole::ProfileApplication(format, profile) => {
                    profile_documents.push((key, blob, format, profile))
                }
                KeyRole::Literal => literals.push((key, blob)),
            }
        }

        for (key, blob) in literals {
            result.push(PropertyEntry::new(
                key.clone(),
                String::from_utf8_lossy(blob).into_owned(),
            ));
        }

        for (key, blob, format) in base_documents {
            let text = String::from_utf8_lossy(blob);
            let segments = parse_document(&source_id, key, &text, format)?;
            self.push_segments(segments, ProfileConstraint::always(), &mut result);
        }

        for (key, blob, format, profile) in profile_documents {
            let text = String::from_utf8_lossy(blob);
            let segments = parse_document(&source_id, key, &text, format)?;
            self.push_segments(segments, ProfileConstraint::any_of([profile]), &mut result);
        }

        debug!("资源 {} 归一化完成: {} 个条目", source_id, result.len());
        Ok(result)
    }

    /// 归一化一个挂载文件，以文件名代替键名参与格式识别
    pub fn normalize_file(&self, file: &MountedFile) -> Result<NormalizedEntries, ConfigError> {
        let source_id = file.source_id();
        let mut result = NormalizedEntries::new(source_id.clone());
        self.normalize_single(&source_id, &file.file_name(), &file.content, &mut result)?;
        debug!("挂载文件 {} 归一化完成: {} 个条目", source_id, result.len());
        Ok(result)
    }

    fn normalize_single(
        &self,
        source_id: &str,
        key: &str,
        text: &str,
        result: &mut NormalizedEntries,
    ) -> Result<(), ConfigError> {
        let default_profile = match classify_key(key) {
            KeyRole::ProfileApplication(_, profile) => ProfileConstraint::any_of([profile]),
            _ => ProfileConstraint::always(),
        };

        match detect(source_id, key, text)? {
            Detected::Document(segments) => {
                self.push_segments(segments, default_profile, result);
            }
            Detected::Literal => {
                debug!("{} 的键 {} 不是嵌入文档，按字面值处理", source_id, key);
                result.push(PropertyEntry::new(key, text));
            }
        }
        Ok(())
    }

    /// 逐段提取 profile 标记并写入条目；片段自身的标记优先于文件名推断的 profile
    fn push_segments(
        &self,
        segments: Vec<Segment>,
        default_profile: ProfileConstraint,
        result: &mut NormalizedEntries,
    ) {
        for segment in segments {
            let (profiles, entries) = self.extract_marker(segment.entries);
            let constraint = if profiles.is_empty() {
                default_profile.clone()
            } else {
                ProfileConstraint::any_of(profiles)
            };

            result.extend(
                entries
                    .into_iter()
                    .map(|(key, value)| PropertyEntry::new(key, value).with_profile(constraint.clone())),
            );
        }
    }

    fn extract_marker(&self, entries: Vec<(String, String)>) -> (Vec<String>, Vec<(String, String)>) {
        let mut profiles = Vec::new();
        let mut remaining = Vec::with_capacity(entries.len());

        for (key, value) in entries {
            if self.is_marker_key(&key) {
                profiles.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|profile| !profile.is_empty())
                        .map(str::to_string),
                );
            } else {
                remaining.push((key, value));
            }
        }

        (profiles, remaining)
    }

    fn is_marker_key(&self, key: &str) -> bool {
        self.marker_keys.iter().any(|marker| {
            key == marker
                || key
                    .strip_prefix(marker.as_str())
                    .is_some_and(|rest| rest.starts_with('[') && rest.ends_with(']'))
        })
    }
}

/// 键的角色
enum KeyRole {
    Application(DocumentFormat),
    ProfileApplication(DocumentFormat, String),
    Literal,
}

fn classify_key(key: &str) -> KeyRole {
    let Some((stem, extension)) = key.rsplit_once('.') else {
        return KeyRole::Literal;
    };
    if !DOCUMENT_EXTENSIONS.contains(&extension) {
        return KeyRole::Literal;
    }
    let format = format_for_extension(extension);

    if stem == APPLICATION_BASENAME {
        return KeyRole::Application(format);
    }

    match stem.strip_prefix(APPLICATION_BASENAME).and_then(|rest| rest.strip_prefix('-')) {
        Some(profile) if !profile.is_empty() => {
            KeyRole::ProfileApplication(format, profile.to_string())
        }
        _ => KeyRole::Literal,
    }
}

fn format_for_extension(extension: &str) -> DocumentFormat {
    if extension == "properties" {
        DocumentFormat::Properties
    } else {
        DocumentFormat::Yaml
    }
}

/// 单键数据块的格式识别：先 YAML，再 properties，最后字面值
///
/// 键名以 `.yaml`/`.yml` 结尾时，YAML 语法错误直接报告，不再回退。
fn detect(source_id: &str, key: &str, text: &str) -> Result<Detected, ConfigError> {
    if key.ends_with(".properties") {
        return Ok(properties_document(text));
    }

    let yaml_named = key.ends_with(".yaml") || key.ends_with(".yml");
    match parse_yaml_segments(text) {
        Ok(YamlShape::Mappings(segments)) => Ok(Detected::Document(segments)),
        Ok(_) if looks_like_properties(text) => Ok(properties_document(text)),
        Ok(_) => Ok(Detected::Literal),
        Err(_) if !yaml_named && looks_like_properties(text) => Ok(properties_document(text)),
        Err(message) => {
            warn!("{} 的键 {} 解析失败: {}", source_id, key, message);
            Err(ConfigError::parse_error(source_id, key, message))
        }
    }
}

fn properties_document(text: &str) -> Detected {
    Detected::Document(vec![Segment {
        entries: parse_properties(text),
    }])
}

/// 按已知格式解析文档，YAML 顶层不是映射时视为解析错误
fn parse_document(
    source_id: &str,
    key: &str,
    text: &str,
    format: DocumentFormat,
) -> Result<Vec<Segment>, ConfigError> {
    match format {
        DocumentFormat::Properties => Ok(vec![Segment {
            entries: parse_properties(text),
        }]),
        DocumentFormat::Yaml => match parse_yaml_segments(text) {
            Ok(YamlShape::Mappings(segments)) => Ok(segments),
            Ok(YamlShape::Empty) => Ok(Vec::new()),
            Ok(YamlShape::Scalar) => Err(ConfigError::parse_error(
                source_id,
                key,
                "文档顶层不是映射",
            )),
            Err(message) => {
                warn!("{} 的键 {} 解析失败: {}", source_id, key, message);
                Err(ConfigError::parse_error(source_id, key, message))
            }
        },
    }
}

/// YAML 文本的整体形态
enum YamlShape {
    /// 每段都是映射或空文档，且至少一段是映射
    Mappings(Vec<Segment>),
    /// 所有段都为空
    Empty,
    /// 存在标量或序列顶层
    Scalar,
}

/// 按 `---` 行切分并逐段解析
fn parse_yaml_segments(text: &str) -> Result<YamlShape, String> {
    let mut segments = Vec::new();

    for body in split_documents(text) {
        if body.trim().is_empty() {
            continue;
        }
        let value: Value = serde_yaml::from_str(&body).map_err(|e| e.to_string())?;
        match strip_tags(value) {
            Value::Null => {}
            Value::Mapping(mapping) => {
                let mut entries = Vec::new();
                flatten_mapping("", mapping, &mut entries)?;
                segments.push(Segment { entries });
            }
            _ => return Ok(YamlShape::Scalar),
        }
    }

    if segments.is_empty() {
        Ok(YamlShape::Empty)
    } else {
        Ok(YamlShape::Mappings(segments))
    }
}

fn split_documents(text: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim_end() == "---" {
            documents.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    documents.push(current);
    documents
}

fn strip_tags(value: Value) -> Value {
    match value {
        Value::Tagged(tagged) => strip_tags(tagged.value),
        other => other,
    }
}

fn join_key(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}

fn flatten_mapping(
    parent: &str,
    mapping: serde_yaml::Mapping,
    entries: &mut Vec<(String, String)>,
) -> Result<(), String> {
    if mapping.is_empty() && !parent.is_empty() {
        entries.push((parent.to_string(), String::new()));
        return Ok(());
    }

    for (key, value) in mapping {
        let key = scalar_to_string(&strip_tags(key))
            .ok_or_else(|| format!("{} 下存在非标量键", parent))?;
        flatten_value(join_key(parent, &key), value, entries)?;
    }
    Ok(())
}

fn flatten_value(
    key: String,
    value: Value,
    entries: &mut Vec<(String, String)>,
) -> Result<(), String> {
    match strip_tags(value) {
        Value::Mapping(mapping) => flatten_mapping(&key, mapping, entries),
        Value::Sequence(items) if items.is_empty() => {
            entries.push((key, String::new()));
            Ok(())
        }
        Value::Sequence(items) => {
            for (index, item) in items.into_iter().enumerate() {
                flatten_value(format!("{}[{}]", key, index), item, entries)?;
            }
            Ok(())
        }
        scalar => {
            let value = scalar_to_string(&scalar).unwrap_or_default();
            entries.push((key, value));
            Ok(())
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}
