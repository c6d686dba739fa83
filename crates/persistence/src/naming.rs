//! Naming helpers shared by the model registry and the trigger registry.
//!
//! Model names, collection names, relationship aliases and trigger access keys
//! are all derived from user-supplied identifiers. The conversions live here so
//! that every caller normalizes the same way.

use heck::{ToLowerCamelCase, ToSnakeCase, ToUpperCamelCase};

/// Converts any identifier to `snake_case`.
pub fn to_underscore(value: &str) -> String {
    value.to_snake_case()
}

/// Converts any identifier to `UpperCamelCase`.
pub fn to_camel_case(value: &str) -> String {
    value.to_upper_camel_case()
}

/// Converts any identifier to `lowerCamelCase`.
pub fn to_variable(value: &str) -> String {
    value.to_lower_camel_case()
}

/// Converts an identifier to a lowercase, hyphen separated slug.
///
/// `"Admin Panel"`, `"admin_panel"` and `"adminPanel"` all produce `"admin-panel"`.
pub fn to_slug(value: &str) -> String {
    let snake = value.to_snake_case();
    let mut slug = String::with_capacity(snake.len());
    let mut pending_separator = false;

    for c in snake.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c);
        } else {
            pending_separator = true;
        }
    }

    slug
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Converts a plural noun to its singular form using suffix rules.
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if let Some(stem) = word.strip_suffix("ves") {
        return format!("{stem}f");
    }
    if let Some(stem) = word.strip_suffix('s') {
        return stem.to_string();
    }
    word.to_string()
}

/// Converts a noun to its plural form using suffix rules.
///
/// The word is singularized first so that already plural input is stable.
pub fn pluralize(word: &str) -> String {
    let word = singularize(word);

    if ["s", "sh", "ch", "x", "z"]
        .iter()
        .any(|suffix| word.ends_with(suffix))
    {
        return format!("{word}es");
    }

    let mut chars = word.chars().rev();
    if let (Some('y'), Some(before)) = (chars.next(), chars.next()) {
        if !is_vowel(before) {
            return format!("{}ies", &word[..word.len() - 1]);
        }
    }

    if let Some(stem) = word.strip_suffix("fe") {
        return format!("{stem}ves");
    }
    if let Some(stem) = word.strip_suffix('f') {
        return format!("{stem}ves");
    }

    format!("{word}s")
}

/// Derives the model name for a collection: singular, `UpperCamelCase`.
pub fn model_name(collection: &str) -> String {
    to_camel_case(&singularize(&to_underscore(collection)))
}

/// Derives the storage collection name: plural, `snake_case`.
pub fn collection_name(collection: &str) -> String {
    to_underscore(&pluralize(&to_underscore(collection)))
}

/// Alias under which a parent model is reachable from the model owning `foreign_key`.
///
/// `customerId` becomes `customer`; a key without an `_id` suffix such as
/// `owner` becomes `ownerInfo` so it cannot shadow the stored column.
pub fn parent_alias(foreign_key: &str) -> String {
    let snake = to_underscore(foreign_key);
    let alias = match snake.strip_suffix("_id") {
        Some(prefix) if !prefix.is_empty() => to_variable(prefix),
        _ => to_variable(foreign_key),
    };

    if alias == foreign_key || alias == singularize(foreign_key) {
        to_variable(&format!("{snake}_info"))
    } else {
        alias
    }
}

/// Alias under which a child model is reachable from its parent.
///
/// The alias is prefixed with the foreign key stem whenever the stem differs
/// from the parent name, which keeps two edges from the same child into the
/// same parent distinct (`billingCustomerOrders` vs `orders`).
pub fn child_alias(parent_model: &str, child_model: &str, foreign_key: &str) -> String {
    let snake = to_underscore(foreign_key);
    let alias = match snake.strip_suffix("_id") {
        Some(prefix) if to_variable(prefix) != to_variable(parent_model) => {
            to_variable(&format!("{prefix}_{}", to_underscore(child_model)))
        }
        Some(_) => to_variable(child_model),
        None => to_variable(&format!("{snake}_{}", to_underscore(child_model))),
    };

    pluralize(&alias)
}
