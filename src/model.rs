use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightType {
    Highlight,
    Comment,
    Html,
    Custom,
}

/// A tracked highlight or native comment, as persisted per file.
///
/// `id` and `created_at` survive reconciliation; every other field reflects
/// the most recent scan of the owning document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRecord {
    pub id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub line: usize,
    pub file_path: String,
    pub is_native_comment: bool,
    #[serde(default)]
    pub footnote_contents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: i64,
    #[serde(rename = "type")]
    pub highlight_type: HighlightType,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HighlightRecord {
        HighlightRecord {
            id: "h-1".to_string(),
            text: "keep me".to_string(),
            start_offset: 100,
            end_offset: 111,
            line: 3,
            file_path: "notes/a.md".to_string(),
            is_native_comment: false,
            footnote_contents: vec!["why".to_string()],
            color: None,
            created_at: 1_700_000_000_000,
            highlight_type: HighlightType::Highlight,
        }
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["startOffset"], 100);
        assert_eq!(json["endOffset"], 111);
        assert_eq!(json["filePath"], "notes/a.md");
        assert_eq!(json["isNativeComment"], false);
        assert_eq!(json["footnoteContents"][0], "why");
        assert_eq!(json["createdAt"], 1_700_000_000_000i64);
        assert_eq!(json["type"], "highlight");
        assert!(json.get("color").is_none());
    }

    #[test]
    fn test_record_without_footnotes_deserializes() {
        let raw = r#"{
            "id": "c-1",
            "text": "aside",
            "startOffset": 0,
            "endOffset": 11,
            "line": 0,
            "filePath": "a.md",
            "isNativeComment": true,
            "createdAt": 5,
            "type": "comment"
        }"#;
        let record: HighlightRecord = serde_json::from_str(raw).unwrap();
        assert!(record.footnote_contents.is_empty());
        assert_eq!(record.highlight_type, HighlightType::Comment);
        assert_eq!(record.color, None);
    }

    #[test]
    fn test_highlight_type_wire_names() {
        let types: Vec<HighlightType> =
            serde_json::from_str(r#"["highlight", "comment", "html", "custom"]"#).unwrap();
        assert_eq!(
            types,
            vec![
                HighlightType::Highlight,
                HighlightType::Comment,
                HighlightType::Html,
                HighlightType::Custom
            ]
        );
        assert!(serde_json::from_str::<HighlightType>(r#""HTML""#).is_err());
    }
}
