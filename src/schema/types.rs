// src/schema/types.rs

use std::collections::HashSet;

use crate::error::ExtractError;

/// Pure, total value cleaner. Returns `""` for input it cannot interpret.
pub type Normalizer = fn(&str) -> String;

/// One output column: its logical name, every header title it has been
/// seen under in exported spool files, and how its raw text is cleaned.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    name: String,
    synonyms: Vec<String>,
    /// Lowercased copies of `synonyms`, used for matching.
    folded: Vec<String>,
    normalizer: Normalizer,
}

impl FieldSchema {
    pub fn new(name: &str, synonyms: &[&str], normalizer: Normalizer) -> Self {
        let synonyms: Vec<String> = synonyms.iter().map(|s| s.to_string()).collect();
        let folded = synonyms.iter().map(|s| s.to_lowercase()).collect();
        Self {
            name: name.to_string(),
            synonyms,
            folded,
            normalizer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn normalize(&self, raw: &str) -> String {
        (self.normalizer)(raw)
    }

    /// Any synonym occurs in `folded_line` (already lowercased).
    pub fn appears_in(&self, folded_line: &str) -> bool {
        self.folded.iter().any(|s| folded_line.contains(s.as_str()))
    }

    /// `title` equals one of the synonyms, ignoring case.
    pub fn is_titled(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.folded.iter().any(|s| *s == title)
    }
}

/// The field layout of one remote transaction's export, plus the saved
/// query variant used when submitting it.
#[derive(Debug, Clone)]
pub struct ImportSchema {
    transaction: String,
    variant: String,
    fields: Vec<FieldSchema>,
}

impl ImportSchema {
    pub fn new(
        transaction: &str,
        variant: &str,
        fields: Vec<FieldSchema>,
    ) -> Result<Self, ExtractError> {
        if fields.is_empty() {
            return Err(ExtractError::config(format!(
                "schema {transaction} has no fields"
            )));
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if field.synonyms.is_empty() {
                return Err(ExtractError::config(format!(
                    "field {} of {transaction} has no column titles",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ExtractError::config(format!(
                    "duplicate field {} in schema {transaction}",
                    field.name
                )));
            }
        }
        Ok(Self {
            transaction: transaction.to_string(),
            variant: variant.to_string(),
            fields,
        })
    }

    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(FieldSchema::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize::format_string;

    #[test]
    fn rejects_duplicate_field_names() {
        let err = ImportSchema::new(
            "IW67",
            "/VAR",
            vec![
                FieldSchema::new("NOTA", &["Nota"], format_string),
                FieldSchema::new("NOTA", &["Nota fiscal"], format_string),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate field NOTA"));
    }

    #[test]
    fn synonym_matching_ignores_case() {
        let field = FieldSchema::new(
            "TEXTO",
            &["Texto das medidas", "TextoMedid"],
            format_string,
        );
        assert!(field.appears_in("|nota|textomedid|"));
        assert!(field.is_titled("TEXTOMEDID"));
        assert!(!field.is_titled("Texto"));
    }
}
