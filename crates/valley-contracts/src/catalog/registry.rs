use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

use super::style::{Category, FullTransformStyle, SingleStyle, Style, StyleMetadata};

const DEFAULT_CATALOG_JSON: &str = include_str!("../../resources/default_catalog.json");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    categories: Vec<CategoryRow>,
}

#[derive(Debug, Deserialize)]
struct CategoryRow {
    id: String,
    display_name: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    style_noun: Option<String>,
    #[serde(default)]
    price_per_transform_usd: f64,
    full_transform: FullTransformRow,
    styles: Vec<StyleRow>,
}

#[derive(Debug, Deserialize)]
struct FullTransformRow {
    id: String,
    display_name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StyleRow {
    id: String,
    #[serde(flatten)]
    metadata: StyleMetadata,
}

/// Immutable registry of categories, their member styles and the derived
/// full-transform style of each category.
#[derive(Debug, Clone)]
pub struct StyleCatalog {
    categories: IndexMap<String, Category>,
}

impl StyleCatalog {
    /// The table compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(DEFAULT_CATALOG_JSON).context("built-in style catalog is invalid")
    }

    /// Built-in table, replaced by the override file when one exists.
    pub fn load() -> Result<Self> {
        match catalog_override_path() {
            Some(path) if path.exists() => Self::from_path(&path),
            _ => Self::builtin(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading catalog {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid catalog {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        let mut categories = IndexMap::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for row in file.categories {
            check_id("category", &row.id)?;
            if row.styles.is_empty() {
                bail!("category '{}' has no member styles", row.id);
            }
            if categories.contains_key(&row.id) {
                bail!("duplicate category id '{}'", row.id);
            }

            let mut members = Vec::with_capacity(row.styles.len());
            for style in row.styles {
                check_id("style", &style.id)?;
                if !seen_ids.insert(style.id.clone()) {
                    bail!("duplicate style id '{}'", style.id);
                }
                members.push(SingleStyle {
                    id: style.id,
                    category_id: row.id.clone(),
                    metadata: style.metadata,
                });
            }
            check_id("style", &row.full_transform.id)?;
            if !seen_ids.insert(row.full_transform.id.clone()) {
                bail!("duplicate style id '{}'", row.full_transform.id);
            }

            let full_transform = FullTransformStyle {
                id: row.full_transform.id,
                category_id: row.id.clone(),
                display_name: row.full_transform.display_name,
                description: row.full_transform.description,
                members: members.clone(),
            };
            let style_noun = row
                .style_noun
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "style".to_string());

            categories.insert(
                row.id.clone(),
                Category {
                    id: row.id,
                    display_name: row.display_name,
                    icon: row.icon,
                    style_noun,
                    price_per_transform_usd: row.price_per_transform_usd.max(0.0),
                    member_styles: members,
                    full_transform,
                },
            );
        }

        if categories.is_empty() {
            bail!("catalog defines no categories");
        }
        Ok(Self { categories })
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    /// Looks up a member style or a full-transform style by id.
    pub fn style(&self, id: &str) -> Option<Style> {
        self.categories.values().find_map(|category| {
            if category.full_transform.id == id {
                return Some(category.full_transform_style());
            }
            category.member(id).cloned().map(Style::Single)
        })
    }

    pub fn full_transform(&self, category_id: &str) -> Option<Style> {
        self.category(category_id)
            .map(|category| category.full_transform_style())
    }

    /// Price of requesting `style`: one charge per job it fans out into.
    pub fn estimate_cost(&self, style: &Style) -> Option<f64> {
        let category = self.category(style.category_id())?;
        Some(category.price_per_transform_usd * style.job_count() as f64)
    }
}

/// Ids become result keys and gallery file names: ASCII letters, digits,
/// `-` and `_` only.
fn check_id(kind: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if !valid {
        bail!("invalid {kind} id '{id}'");
    }
    Ok(())
}

fn catalog_override_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os("VALLEY_CATALOG_PATH").filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".valley").join("catalog.json"))
}
