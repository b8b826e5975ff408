use serde::{Deserialize, Serialize};
use std::path::Path;

/// Page metadata as recorded by the ingestion job. PDF loaders emit integers,
/// other tools emit strings, and some emit nothing usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageRef {
    Number(i64),
    Text(String),
    Other(serde_json::Value),
}

impl PageRef {
    /// Zero-based page index, when the stored value is a non-negative integer.
    pub fn index(&self) -> Option<u64> {
        match self {
            PageRef::Number(n) if *n >= 0 => Some(*n as u64),
            PageRef::Text(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse().ok()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: usize,
    pub text: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageRef>,
}

impl Chunk {
    /// One-based page number for display.
    pub fn display_page(&self) -> Option<u64> {
        self.page
            .as_ref()
            .and_then(PageRef::index)
            .and_then(|p| p.checked_add(1))
    }

    /// Filename portion of the source path.
    pub fn source_name(&self) -> &str {
        Path::new(&self.source)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("document")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_page(page: Option<PageRef>) -> Chunk {
        Chunk { id: 0, text: "x".into(), source: "data/pdfs/manual.pdf".into(), page }
    }

    #[test]
    fn test_integer_page_is_one_based() {
        assert_eq!(chunk_with_page(Some(PageRef::Number(0))).display_page(), Some(1));
        assert_eq!(chunk_with_page(Some(PageRef::Number(41))).display_page(), Some(42));
    }

    #[test]
    fn test_digit_string_page() {
        assert_eq!(chunk_with_page(Some(PageRef::Text("7".into()))).display_page(), Some(8));
    }

    #[test]
    fn test_unusable_pages_are_unknown() {
        assert_eq!(chunk_with_page(None).display_page(), None);
        assert_eq!(chunk_with_page(Some(PageRef::Number(-1))).display_page(), None);
        assert_eq!(chunk_with_page(Some(PageRef::Text("iv".into()))).display_page(), None);
        assert_eq!(chunk_with_page(Some(PageRef::Text("".into()))).display_page(), None);
        assert_eq!(chunk_with_page(Some(PageRef::Text("-3".into()))).display_page(), None);
        assert_eq!(
            chunk_with_page(Some(PageRef::Other(serde_json::json!(2.5)))).display_page(),
            None
        );
    }

    #[test]
    fn test_deserialize_mixed_page_shapes() {
        let lines = [
            r#"{"id":0,"text":"a","source":"a.pdf","page":3}"#,
            r#"{"id":1,"text":"b","source":"b.pdf","page":"4"}"#,
            r#"{"id":2,"text":"c","source":"c.pdf"}"#,
            r#"{"id":3,"text":"d","source":"d.pdf","page":1.5}"#,
            r#"{"id":4,"text":"e","source":"e.pdf","page":null}"#,
        ];
        let pages: Vec<Option<u64>> = lines
            .iter()
            .map(|l| serde_json::from_str::<Chunk>(l).unwrap().display_page())
            .collect();
        assert_eq!(pages, vec![Some(4), Some(5), None, None, None]);
    }

    #[test]
    fn test_source_name_strips_directories() {
        let c = chunk_with_page(None);
        assert_eq!(c.source_name(), "manual.pdf");
        let bare = Chunk { id: 0, text: String::new(), source: String::new(), page: None };
        assert_eq!(bare.source_name(), "document");
    }
}
