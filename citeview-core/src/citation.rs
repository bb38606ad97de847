use serde::{Deserialize, Deserializer, Serialize};

/// A source reference attached to a chat answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(deserialize_with = "deserialize_file_name")]
    pub file_name: String,
    #[serde(alias = "content", default)]
    pub excerpt: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(alias = "chunk_num", default)]
    pub chunk_number: Option<u32>,
}

impl Citation {
    pub fn new(file_name: impl AsRef<str>, excerpt: impl Into<String>) -> Self {
        Self {
            file_name: base_name(file_name.as_ref()).to_owned(),
            excerpt: excerpt.into(),
            year: None,
            chunk_number: None,
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// File name without its `.pdf` suffix, followed by the year when known.
    pub fn label(&self) -> String {
        let stem = self
            .file_name
            .strip_suffix(".pdf")
            .unwrap_or(&self.file_name);
        match self.year {
            Some(year) => format!("{stem} ({year})"),
            None => stem.to_owned(),
        }
    }
}

/// The answer envelope citations arrive in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub content: String,
    #[serde(default)]
    pub metadata: Vec<Citation>,
    #[serde(default)]
    pub error_happened: bool,
}

impl ChatAnswer {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Looks up a citation by its 1-based position, as shown to the user.
    pub fn citation(&self, number: usize) -> Option<&Citation> {
        number.checked_sub(1).and_then(|idx| self.metadata.get(idx))
    }
}

// Retrievers report full storage paths; only the last segment names the file.
fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn deserialize_file_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(base_name(&raw).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_metadata_uses_chat_field_names() {
        let answer = ChatAnswer::from_json(
            r#"{
                "content": "Revenue grew.",
                "metadata": [
                    {"file_name": "/Volumes/main/raw_docs/report.pdf", "content": "revenue grew", "year": 2023, "chunk_num": 4},
                    {"file_name": "notes.pdf"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(answer.metadata.len(), 2);
        let first = answer.citation(1).unwrap();
        assert_eq!(first.file_name, "report.pdf");
        assert_eq!(first.excerpt, "revenue grew");
        assert_eq!(first.year, Some(2023));
        assert_eq!(first.chunk_number, Some(4));
        assert!(answer.citation(2).unwrap().excerpt.is_empty());
        assert!(answer.citation(0).is_none());
        assert!(answer.citation(3).is_none());
        assert!(!answer.error_happened);
    }

    #[test]
    fn label_drops_pdf_suffix_and_appends_year() {
        assert_eq!(Citation::new("dir/report.pdf", "").label(), "report");
        assert_eq!(
            Citation::new("report.pdf", "").with_year(2021).label(),
            "report (2021)"
        );
        assert_eq!(Citation::new("slides.pptx", "").label(), "slides.pptx");
    }
}
