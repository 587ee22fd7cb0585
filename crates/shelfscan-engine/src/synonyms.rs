//! Search aliases for confirmed inventory items.

use std::collections::BTreeSet;

const SNACK_MARKERS: &[&str] = &["galleta", "cookie", "dulce", "chocolate", "donut", "pastel", "postre", "snack"];
const BEVERAGE_MARKERS: &[&str] = &["bebida", "lata", "refresco", "agua", "botella", "coca"];
const FRUITS: &[&str] = &["manzana", "plátano", "platano", "naranja", "fruta", "apple", "banana", "orange"];
const PREPARED_MARKERS: &[&str] = &["comida", "alimento", "sándwich", "sandwich", "pizza", "hot dog"];

/// Lowercase, underscores to spaces, parentheses dropped, whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace('_', " ")
        .replace(['(', ')'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Alias terms for an item, each paired with `category`.
///
/// The normalized name is always included.
pub fn derive_synonyms(name: &str, category: &str) -> BTreeSet<(String, String)> {
    let normalized = normalize_name(name);
    let category_lower = category.to_lowercase();
    let mentions = |markers: &[&str]| {
        markers
            .iter()
            .any(|m| normalized.contains(m) || category_lower.contains(m))
    };

    let mut terms: Vec<String> = Vec::new();
    if !normalized.is_empty() {
        terms.push(normalized.clone());
    }

    if mentions(SNACK_MARKERS) {
        terms.extend(["galleta", "cookie", "dulce"].map(String::from));
        if normalized.contains("chocolate") {
            terms.push("chocolate".into());
        }
    }

    if mentions(BEVERAGE_MARKERS) || category_lower.starts_with("bebida") {
        terms.extend(["bebida", "lata", "refresco"].map(String::from));
        if normalized.contains("coca") {
            terms.extend(["coca", "cocacola"].map(String::from));
        }
    }

    if category_lower == "fruta" || FRUITS.iter().any(|f| normalized.contains(f)) {
        terms.push("fruta".into());
        if let Some(base) = normalized.split_whitespace().next() {
            terms.push(base.to_string());
        }
    }

    if category_lower == "comida_preparada" || mentions(PREPARED_MARKERS) {
        terms.extend(["comida", "alimento"].map(String::from));
    }

    terms
        .into_iter()
        .map(|term| (term, category.to_string()))
        .collect()
}
