//! GPU selection and detection helpers

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Query used to enumerate GPUs on a host
pub const NVIDIA_SMI_QUERY: &str = "nvidia-smi --query-gpu=index --format=csv,noheader";

/// Which GPUs a target may use
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GpuConfig {
    /// Explicit, ordered GPU identifiers (empty means CPU-only)
    Ids(Vec<String>),
    /// Detect every GPU on the executing host
    #[default]
    Auto,
}

impl GpuConfig {
    /// CPU-only configuration
    pub fn none() -> Self {
        GpuConfig::Ids(Vec::new())
    }

    /// Parse the textual form: `auto`, `""` or a comma-separated id list
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return GpuConfig::Auto;
        }
        GpuConfig::Ids(
            trimmed
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Explicit ids, or `None` when detection is needed
    pub fn ids(&self) -> Option<&[String]> {
        match self {
            GpuConfig::Ids(ids) => Some(ids),
            GpuConfig::Auto => None,
        }
    }
}

impl std::fmt::Display for GpuConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuConfig::Auto => write!(f, "auto"),
            GpuConfig::Ids(ids) if ids.is_empty() => write!(f, "cpu"),
            GpuConfig::Ids(ids) => write!(f, "{}", ids.join(",")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawGpuConfig {
    Text(String),
    Number(u32),
    List(Vec<RawGpuId>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawGpuId {
    Text(String),
    Number(u32),
}

impl<'de> Deserialize<'de> for GpuConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawGpuConfig::deserialize(deserializer)? {
            RawGpuConfig::Text(s) => GpuConfig::parse(&s),
            RawGpuConfig::Number(n) => GpuConfig::Ids(vec![n.to_string()]),
            RawGpuConfig::List(items) => GpuConfig::Ids(
                items
                    .into_iter()
                    .map(|item| match item {
                        RawGpuId::Text(s) => s.trim().to_string(),
                        RawGpuId::Number(n) => n.to_string(),
                    })
                    .collect(),
            ),
        })
    }
}

impl Serialize for GpuConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GpuConfig::Auto => serializer.serialize_str("auto"),
            GpuConfig::Ids(ids) => ids.serialize(serializer),
        }
    }
}

/// Parse the output of [`NVIDIA_SMI_QUERY`] into GPU ids, in device order
pub fn parse_gpu_indices(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        gpu: GpuConfig,
    }

    #[test]
    fn test_parse_text_forms() {
        assert_eq!(GpuConfig::parse("auto"), GpuConfig::Auto);
        assert_eq!(GpuConfig::parse("AUTO"), GpuConfig::Auto);
        assert_eq!(GpuConfig::parse(""), GpuConfig::none());
        assert_eq!(
            GpuConfig::parse("0, 1,3"),
            GpuConfig::Ids(vec!["0".into(), "1".into(), "3".into()])
        );
    }

    #[test]
    fn test_deserialize_variants() {
        let h: Holder = toml::from_str(r#"gpu = "2,3""#).unwrap();
        assert_eq!(h.gpu, GpuConfig::Ids(vec!["2".into(), "3".into()]));

        let h: Holder = toml::from_str(r#"gpu = [0, "1"]"#).unwrap();
        assert_eq!(h.gpu, GpuConfig::Ids(vec!["0".into(), "1".into()]));

        let h: Holder = toml::from_str(r#"gpu = 4"#).unwrap();
        assert_eq!(h.gpu, GpuConfig::Ids(vec!["4".into()]));

        let h: Holder = toml::from_str(r#"gpu = []"#).unwrap();
        assert_eq!(h.gpu, GpuConfig::none());
    }

    #[test]
    fn test_display() {
        assert_eq!(GpuConfig::Auto.to_string(), "auto");
        assert_eq!(GpuConfig::none().to_string(), "cpu");
        assert_eq!(GpuConfig::parse("0,1").to_string(), "0,1");
    }

    #[test]
    fn test_parse_gpu_indices() {
        let output = "0\n1\n\n2\n";
        assert_eq!(parse_gpu_indices(output), vec!["0", "1", "2"]);
        assert!(parse_gpu_indices("NVIDIA-SMI has failed").is_empty());
    }
}
