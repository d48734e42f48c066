//! Name-based evidence: business-term hints and known export templates.

use crate::model::DataType;

// ============================================================================
// Column name hints
// ============================================================================

/// Business terms that predict a column's type from its name alone.
/// Matched by substring on the lowercased name, first hit wins.
const COLUMN_NAME_HINTS: &[(&str, DataType, f64)] = &[
    ("data", DataType::Date, 0.9),
    ("date", DataType::Date, 0.9),
    ("dt_", DataType::Date, 0.85),
    ("importo", DataType::Numeric, 0.9),
    ("prezzo", DataType::Numeric, 0.9),
    ("price", DataType::Numeric, 0.9),
    ("amount", DataType::Numeric, 0.9),
    ("totale", DataType::Numeric, 0.85),
    ("total", DataType::Numeric, 0.85),
    ("imp_", DataType::Numeric, 0.85),
    ("costo", DataType::Numeric, 0.85),
    ("cost", DataType::Numeric, 0.85),
    ("qta", DataType::Integer, 0.85),
    ("qty", DataType::Integer, 0.85),
    ("quantita", DataType::Integer, 0.85),
    ("quantity", DataType::Integer, 0.85),
    ("count", DataType::Integer, 0.8),
    ("numero", DataType::Integer, 0.7),
    ("perc", DataType::Numeric, 0.8),
    ("percent", DataType::Numeric, 0.8),
    ("iva", DataType::Numeric, 0.85),
    ("email", DataType::Text, 0.95),
    ("telefono", DataType::Text, 0.9),
    ("phone", DataType::Text, 0.9),
    ("tel", DataType::Text, 0.85),
    ("nome", DataType::Text, 0.9),
    ("name", DataType::Text, 0.9),
    ("cognome", DataType::Text, 0.9),
    ("surname", DataType::Text, 0.9),
    ("descrizione", DataType::Text, 0.9),
    ("description", DataType::Text, 0.9),
    ("note", DataType::Text, 0.9),
    ("notes", DataType::Text, 0.9),
    ("codice", DataType::Text, 0.8),
    ("code", DataType::Text, 0.8),
    ("cod_", DataType::Text, 0.75),
    ("id", DataType::Text, 0.7),
    ("flag", DataType::Boolean, 0.8),
    ("attivo", DataType::Boolean, 0.8),
    ("active", DataType::Boolean, 0.8),
    ("enabled", DataType::Boolean, 0.8),
];

/// Look up the first hint term the column name contains.
pub fn name_hint(column_name: &str) -> Option<(DataType, f64)> {
    let lower = column_name.to_lowercase();
    COLUMN_NAME_HINTS
        .iter()
        .find(|(term, _, _)| lower.contains(term))
        .map(|(_, ty, conf)| (*ty, *conf))
}

// ============================================================================
// Export templates
// ============================================================================

/// A known management-software export layout. A template fires only when
/// the filename carries one of its keywords AND at least
/// [`TEMPLATE_MIN_COLUMN_OVERLAP`] column names overlap its dictionary.
pub struct Template {
    pub name: &'static str,
    filename_keywords: &'static [&'static str],
    columns: &'static [(&'static str, DataType)],
}

/// Minimum column-name overlaps for a template to fire.
pub const TEMPLATE_MIN_COLUMN_OVERLAP: usize = 3;

/// Confidence granted to a column matched through a detected template.
pub const TEMPLATE_CONFIDENCE: f64 = 0.9;

static TEMPLATES: &[Template] = &[
    Template {
        name: "DDTRIGHE",
        filename_keywords: &["DDTRIGHE", "FATTUR"],
        columns: &[
            ("cod_art", DataType::Text),
            ("des_art", DataType::Text),
            ("qta", DataType::Numeric),
            ("prezzo", DataType::Numeric),
            ("imp_tot", DataType::Numeric),
            ("iva", DataType::Numeric),
            ("data_doc", DataType::Date),
            ("num_doc", DataType::Text),
            ("cod_cli", DataType::Text),
            ("rag_soc", DataType::Text),
        ],
    },
    Template {
        name: "INVENTARIO",
        filename_keywords: &["INVENTAR", "MAGAZZIN", "STOCK"],
        columns: &[
            ("codice", DataType::Text),
            ("descrizione", DataType::Text),
            ("giacenza", DataType::Integer),
            ("costo", DataType::Numeric),
            ("prezzo_vendita", DataType::Numeric),
            ("categoria", DataType::Text),
            ("fornitore", DataType::Text),
            ("um", DataType::Text),
        ],
    },
    Template {
        name: "CRM",
        filename_keywords: &["CRM", "LEAD", "CONTATT"],
        columns: &[
            ("nome", DataType::Text),
            ("cognome", DataType::Text),
            ("email", DataType::Text),
            ("telefono", DataType::Text),
            ("azienda", DataType::Text),
            ("stato", DataType::Text),
            ("fonte", DataType::Text),
            ("data_contatto", DataType::Date),
            ("note", DataType::Text),
        ],
    },
];

/// Shortest header allowed to match a template key by truncation. One- and
/// two-letter headers are substrings of nearly every key.
const REVERSE_MATCH_MIN_LEN: usize = 3;

fn key_matches(key: &str, header: &str) -> bool {
    header.contains(key) || (header.len() >= REVERSE_MATCH_MIN_LEN && key.contains(header))
}

impl Template {
    /// Type of a column under this template, matched loosely in both
    /// containment directions (exports often prefix or truncate headers).
    pub fn column_type(&self, column_name: &str) -> Option<DataType> {
        let lower = column_name.to_lowercase();
        self.columns
            .iter()
            .find(|(key, _)| key_matches(key, &lower))
            .map(|(_, ty)| *ty)
    }
}

/// Detect which export template (if any) produced this file.
pub fn detect_template(filename: &str, columns: &[String]) -> Option<&'static Template> {
    let upper_filename = filename.to_uppercase();
    let lower_columns: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();

    TEMPLATES.iter().find(|template| {
        let keyword_hit = template
            .filename_keywords
            .iter()
            .any(|kw| upper_filename.contains(kw));
        if !keyword_hit {
            return false;
        }
        let overlaps = lower_columns
            .iter()
            .filter(|c| template.columns.iter().any(|(key, _)| key_matches(key, c)))
            .count();
        overlaps >= TEMPLATE_MIN_COLUMN_OVERLAP
    })
}

// ============================================================================
// Name generation
// ============================================================================

/// Turn an arbitrary header into a safe snake_case physical column name:
/// accents folded, non-alphanumerics collapsed to `_`, capped at Postgres's
/// 63-byte identifier limit.
pub fn sanitize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.to_lowercase().chars() {
        let mapped = match ch {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            c if c.is_ascii_alphanumeric() => c,
            _ => '_',
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches('_');
    trimmed.chars().take(63).collect()
}

/// Human-readable Title Case label from a raw header.
pub fn generate_display_name(original: &str) -> String {
    let mut spaced = String::with_capacity(original.len() + 4);
    let mut prev_lower = false;
    for ch in original.chars() {
        if ch == '_' {
            spaced.push(' ');
            prev_lower = false;
        } else {
            if ch.is_uppercase() && prev_lower {
                spaced.push(' ');
            }
            prev_lower = ch.is_lowercase();
            spaced.push(ch);
        }
    }
    spaced
        .to_lowercase()
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
