use serde::{Deserialize, Serialize};

/// Configuration for parser behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Maximum file size to parse (in bytes)
    /// Files larger than this are reported as `FileTooLarge`
    pub max_file_size: usize,

    /// Report `#define`d macros as declarations
    pub extract_macros: bool,

    /// Report function prototypes (declarations without a body)
    pub extract_prototypes: bool,

    /// Report file-scope variables
    pub extract_variables: bool,

    /// Maximum nesting of `#include` entries in one pass
    pub max_include_depth: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10 MB
            extract_macros: true,
            extract_prototypes: true,
            extract_variables: true,
            max_include_depth: 200,
        }
    }
}

impl ParserConfig {
    /// Create config for fast parsing (only definitions, no macros or variables)
    pub fn fast() -> Self {
        Self {
            extract_macros: false,
            extract_prototypes: false,
            extract_variables: false,
            ..Default::default()
        }
    }

    /// Set maximum file size
    pub fn with_max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set maximum include nesting
    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Enable or disable macro declarations
    pub fn with_macros(mut self, extract: bool) -> Self {
        self.extract_macros = extract;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_config() {
        let config = ParserConfig::fast();
        assert!(!config.extract_macros);
        assert!(!config.extract_variables);
        assert_eq!(config.max_file_size, ParserConfig::default().max_file_size);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ParserConfig = serde_json::from_str(r#"{"max_include_depth": 8}"#).unwrap();
        assert_eq!(config.max_include_depth, 8);
        assert!(config.extract_macros);
    }
}
