use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// 从 TOML 文件读取配置
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config: {}", path.display()))?;
    parse_toml(&text).with_context(|| format!("failed to parse config: {}", path.display()))
}

/// 从 TOML 字符串读取配置
pub fn parse_toml<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    Ok(toml::from_str(text)?)
}

/// 有路径就读文件，没有就用默认值
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: Option<impl AsRef<Path>>) -> anyhow::Result<T> {
    match path {
        Some(path) => load_toml(path),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Default, Debug, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_parse_partial_toml() {
        let sample: Sample = parse_toml("count = 3").unwrap();
        assert_eq!(sample, Sample { name: String::new(), count: 3 });
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = load_toml::<Sample>("/definitely/not/here.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_without_path() {
        let sample: Sample = load_toml_or_default(None::<&str>).unwrap();
        assert_eq!(sample, Sample::default());
    }
}
