use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Output style understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    #[default]
    Nested,
    Expanded,
    Compact,
    Compressed,
}

/// Indentation character selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndentStyle {
    #[default]
    Space,
    Tab,
}

impl IndentStyle {
    pub fn character(&self) -> char {
        match self {
            IndentStyle::Space => ' ',
            IndentStyle::Tab => '\t',
        }
    }
}

/// The flattened, engine-facing options record.
///
/// Every field here is already validated and expanded: `indent` is the
/// fully rendered indentation string (width x character), numeric fields
/// are non-negative by construction. The bridge's option translator is the
/// only producer.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub output_style: OutputStyle,
    pub indent: String,
    pub linefeed: String,
    pub precision: u8,
    pub indented_syntax: bool,
    pub source_comments: bool,
    pub omit_source_map_url: bool,
    pub source_map_embed: bool,
    pub source_map_contents: bool,
    pub include_paths: Vec<PathBuf>,
    pub out_file: Option<String>,
    pub source_map_file: Option<String>,
    pub source_map_root: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            output_style: OutputStyle::Nested,
            indent: "  ".to_string(),
            linefeed: "\n".to_string(),
            precision: 5,
            indented_syntax: false,
            source_comments: false,
            omit_source_map_url: false,
            source_map_embed: false,
            source_map_contents: false,
            include_paths: Vec::new(),
            out_file: None,
            source_map_file: None,
            source_map_root: None,
        }
    }
}

impl EngineOptions {
    /// Whether the engine should construct a source map at all.
    pub fn wants_source_map(&self) -> bool {
        self.source_map_file.is_some() || self.source_map_embed
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(IndentStyle::Space, ' ')]
    #[case(IndentStyle::Tab, '\t')]
    fn test_indent_character(#[case] style: IndentStyle, #[case] expected: char) {
        assert_eq!(style.character(), expected);
    }

    #[test]
    fn test_output_style_serde_names() {
        let style: OutputStyle = serde_json::from_str("\"compressed\"").unwrap();
        assert_eq!(style, OutputStyle::Compressed);
    }

    #[test]
    fn test_wants_source_map() {
        let mut options = EngineOptions::default();
        assert!(!options.wants_source_map());

        options.source_map_file = Some("out.css.map".to_string());
        assert!(options.wants_source_map());

        let embedded = EngineOptions {
            source_map_embed: true,
            ..EngineOptions::default()
        };
        assert!(embedded.wants_source_map());
    }
}
