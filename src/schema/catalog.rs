// src/schema/catalog.rs
//! Built-in import schemas.

use once_cell::sync::Lazy;
use std::sync::Arc;

use super::normalize::{format_date, format_integer, format_string};
use super::types::{FieldSchema, ImportSchema};

/// Saved selection variant loaded before IW67 submissions.
pub const IW67_VARIANT: &str = "/SAP_DATA_BRIDGE";

/// Measurement list (IW67). Column titles shift between exports depending on
/// how wide the report came out, hence several spellings for some fields.
pub static IW67_MEASUREMENTS: Lazy<Arc<ImportSchema>> = Lazy::new(|| {
    let fields = vec![
        FieldSchema::new("NOTA", &["Nota"], format_integer),
        FieldSchema::new("MEDIDA", &["CóMd"], format_integer),
        FieldSchema::new("STATUS", &["StatSist"], format_string),
        FieldSchema::new("RESPONSAVEL", &["Exec.por"], format_string),
        FieldSchema::new(
            "TEXTO",
            &["Texto das medidas", "TextoMedid", "Texto medidas"],
            format_string,
        ),
        FieldSchema::new("LOCALIZACAO", &["Localiz."], format_integer),
        FieldSchema::new("USUARIO_CRIACAO", &["Criado/a"], format_string),
        FieldSchema::new("DATA_CRIACAO", &["Dt.criação"], format_date),
        FieldSchema::new("USUARIO_CONCLUSAO", &["por", "Concl.por"], format_string),
        FieldSchema::new("DATA_CONCLUSAO", &["Concluído"], format_date),
        FieldSchema::new("DATA_PLANEJAMENTO_INICIO", &["Iníc.planj"], format_date),
        FieldSchema::new("DATA_PLANEJAMENTO_FIM", &["Fim plan."], format_date),
        FieldSchema::new("INDICE", &["Medi"], format_integer),
        FieldSchema::new("EQUIPAMENTO", &["LocInstal."], format_string),
    ];
    ImportSchema::new("IW67", IW67_VARIANT, fields)
        .map(Arc::new)
        .expect("built-in IW67 schema must validate")
});

/// Look up a built-in schema by transaction code.
pub fn lookup(transaction: &str) -> Option<Arc<ImportSchema>> {
    match transaction.to_ascii_uppercase().as_str() {
        "IW67" => Some(Arc::clone(&IW67_MEASUREMENTS)),
        _ => None,
    }
}
