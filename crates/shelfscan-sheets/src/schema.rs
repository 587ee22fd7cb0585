//! Header discovery: maps semantic fields onto whatever columns a tab has.
//!
//! Each field type carries an ordered rule table. A header is assigned to
//! the first rule that matches it; a rule matches when any of its patterns
//! matches, and a pattern matches when the lowercased header contains every
//! one of its needles (as substrings, or as whole words for word rules).
//! A field takes its column from the earliest rule that matched any header;
//! the leftmost column wins only among headers of that same rule. Columns
//! are never added or renamed.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// One row of a rule table.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule<F: 'static> {
    pub field: F,
    pub patterns: &'static [&'static [&'static str]],
    /// Needles must equal a whole word of the header.
    pub whole_words: bool,
}

impl<F> FieldRule<F> {
    pub const fn contains(field: F, patterns: &'static [&'static [&'static str]]) -> Self {
        Self { field, patterns, whole_words: false }
    }

    pub const fn words(field: F, patterns: &'static [&'static [&'static str]]) -> Self {
        Self { field, patterns, whole_words: true }
    }

    fn matches(&self, header: &str) -> bool {
        if self.whole_words {
            let words: Vec<&str> = header
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .collect();
            self.patterns
                .iter()
                .any(|pattern| pattern.iter().all(|needle| words.contains(needle)))
        } else {
            self.patterns
                .iter()
                .any(|pattern| pattern.iter().all(|needle| header.contains(needle)))
        }
    }
}

/// A semantic field of one tab.
pub trait SemanticField: Copy + Eq + Hash + fmt::Debug + 'static {
    /// Ordered matching rules.
    fn rules() -> &'static [FieldRule<Self>];

    /// Header row written when the tab has to be created.
    fn canonical_headers() -> &'static [&'static str];
}

// =============================================================================
// Inventory
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryField {
    ItemId,
    Name,
    Category,
    Confidence,
    Quantity,
    Source,
    Event,
    UpdatedAt,
    CreatedAt,
    Note,
    Location,
}

const INVENTORY_RULES: &[FieldRule<InventoryField>] = &[
    FieldRule::contains(InventoryField::ItemId, &[&["item", "id"]]),
    FieldRule::contains(InventoryField::Name, &[&["name"], &["nombre"]]),
    FieldRule::contains(InventoryField::Category, &[&["category"], &["categoria"], &["categoría"]]),
    FieldRule::contains(InventoryField::Confidence, &[&["confidence"], &["confianza"]]),
    FieldRule::contains(InventoryField::Quantity, &[&["quantity"], &["cantidad"], &["qty"]]),
    FieldRule::contains(InventoryField::Source, &[&["source"], &["origen"], &["fuente"]]),
    FieldRule::contains(InventoryField::Event, &[&["event"], &["evento"]]),
    FieldRule::contains(InventoryField::UpdatedAt, &[&["updated"], &["actualiz"], &["modific"]]),
    FieldRule::contains(
        InventoryField::CreatedAt,
        &[&["created"], &["creado"], &["creacion"], &["timestamp"], &["fecha"]],
    ),
    FieldRule::contains(InventoryField::Note, &[&["note"], &["nota"], &["observ"], &["comment"]]),
    FieldRule::contains(InventoryField::Location, &[&["location"], &["ubicacion"], &["ubicación"]]),
    // Whole words only: "confidence", "cantidad" and "caducidad" all contain "id".
    FieldRule::words(InventoryField::ItemId, &[&["id"], &["codigo"], &["código"]]),
];

impl SemanticField for InventoryField {
    fn rules() -> &'static [FieldRule<Self>] {
        INVENTORY_RULES
    }

    fn canonical_headers() -> &'static [&'static str] {
        &[
            "item_id",
            "name",
            "category",
            "confidence",
            "quantity",
            "created_at",
            "updated_at",
            "source",
            "event",
            "note",
            "location",
        ]
    }
}

// =============================================================================
// Removal ledger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerField {
    Timestamp,
    ItemId,
    Name,
    DeltaQty,
    NewQty,
    Event,
    Source,
    PayloadId,
    Note,
}

const LEDGER_RULES: &[FieldRule<LedgerField>] = &[
    FieldRule::contains(LedgerField::ItemId, &[&["item", "id"]]),
    FieldRule::contains(LedgerField::PayloadId, &[&["payload"]]),
    FieldRule::contains(LedgerField::Timestamp, &[&["timestamp"], &["fecha"]]),
    FieldRule::contains(LedgerField::Name, &[&["name"], &["nombre"]]),
    FieldRule::contains(LedgerField::DeltaQty, &[&["delta"]]),
    FieldRule::contains(LedgerField::NewQty, &[&["new"], &["nueva"]]),
    FieldRule::contains(LedgerField::Event, &[&["event"], &["evento"]]),
    FieldRule::contains(LedgerField::Source, &[&["source"], &["origen"]]),
    FieldRule::contains(LedgerField::Note, &[&["note"], &["nota"]]),
];

impl SemanticField for LedgerField {
    fn rules() -> &'static [FieldRule<Self>] {
        LEDGER_RULES
    }

    fn canonical_headers() -> &'static [&'static str] {
        &[
            "timestamp",
            "item_id",
            "name",
            "delta_qty",
            "new_qty",
            "event",
            "source",
            "payload_id",
            "note",
        ]
    }
}

// =============================================================================
// Synonyms
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynonymField {
    Term,
    ItemId,
    Category,
}

const SYNONYM_RULES: &[FieldRule<SynonymField>] = &[
    FieldRule::contains(SynonymField::ItemId, &[&["item", "id"]]),
    FieldRule::contains(SynonymField::Term, &[&["term"], &["sinonimo"], &["sinónimo"], &["alias"]]),
    FieldRule::contains(SynonymField::Category, &[&["categor"]]),
];

impl SemanticField for SynonymField {
    fn rules() -> &'static [FieldRule<Self>] {
        SYNONYM_RULES
    }

    fn canonical_headers() -> &'static [&'static str] {
        &["term", "item_id", "category"]
    }
}

// =============================================================================
// Column map
// =============================================================================

/// Resolved positions of semantic fields within one tab's header row.
#[derive(Debug, Clone)]
pub struct ColumnMap<F: SemanticField> {
    columns: HashMap<F, usize>,
    width: usize,
}

impl<F: SemanticField> ColumnMap<F> {
    /// Match a header row against the field's rule table.
    pub fn discover<S: AsRef<str>>(headers: &[S]) -> Self {
        // field -> (rule rank, column)
        let mut best: HashMap<F, (usize, usize)> = HashMap::new();

        for (index, header) in headers.iter().enumerate() {
            let normalized = header.as_ref().trim().to_lowercase();
            if normalized.is_empty() {
                continue;
            }
            let Some((rank, rule)) = F::rules()
                .iter()
                .enumerate()
                .find(|(_, rule)| rule.matches(&normalized))
            else {
                continue;
            };
            best.entry(rule.field)
                .and_modify(|current| {
                    if rank < current.0 {
                        *current = (rank, index);
                    }
                })
                .or_insert((rank, index));
        }

        Self {
            columns: best.into_iter().map(|(field, (_, index))| (field, index)).collect(),
            width: headers.len(),
        }
    }

    /// Zero-based column of `field`, if the tab has one.
    pub fn column(&self, field: F) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Number of columns in the header row.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Fields from `required` that have no column.
    pub fn missing(&self, required: &[F]) -> Vec<F> {
        required
            .iter()
            .copied()
            .filter(|field| !self.columns.contains_key(field))
            .collect()
    }

    /// Lay values out in header order; unmapped columns stay empty and
    /// values for fields without a column are dropped.
    pub fn build_row(&self, values: &[(F, String)]) -> Vec<String> {
        let mut row = vec![String::new(); self.width];
        for (field, value) in values {
            if let Some(index) = self.column(*field) {
                row[index] = value.clone();
            }
        }
        row
    }

    /// Read `field` from a row returned by the API (rows may be short).
    pub fn cell<'a>(&self, row: &'a [String], field: F) -> Option<&'a str> {
        self.column(field)
            .and_then(|index| row.get(index))
            .map(String::as_str)
    }
}
