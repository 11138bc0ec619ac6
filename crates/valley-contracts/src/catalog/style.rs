use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleMetadata {
    pub display_name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

/// One member style: a single artist or movement that can be requested on its
/// own or as one unit of a full transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleStyle {
    pub id: String,
    pub category_id: String,
    pub metadata: StyleMetadata,
}

/// The aggregate style of a category. `members` is never empty and always
/// equals the owning category's member styles, in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct FullTransformStyle {
    pub id: String,
    pub category_id: String,
    pub display_name: String,
    pub description: Option<String>,
    pub members: Vec<SingleStyle>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Style {
    Single(SingleStyle),
    FullTransform(FullTransformStyle),
}

impl Style {
    pub fn id(&self) -> &str {
        match self {
            Self::Single(style) => style.id.as_str(),
            Self::FullTransform(style) => style.id.as_str(),
        }
    }

    pub fn category_id(&self) -> &str {
        match self {
            Self::Single(style) => style.category_id.as_str(),
            Self::FullTransform(style) => style.category_id.as_str(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Single(style) => style.metadata.display_name.as_str(),
            Self::FullTransform(style) => style.display_name.as_str(),
        }
    }

    pub fn is_full_transform(&self) -> bool {
        matches!(self, Self::FullTransform(_))
    }

    pub fn as_single(&self) -> Option<&SingleStyle> {
        match self {
            Self::Single(style) => Some(style),
            Self::FullTransform(_) => None,
        }
    }

    pub fn as_full_transform(&self) -> Option<&FullTransformStyle> {
        match self {
            Self::FullTransform(style) => Some(style),
            Self::Single(_) => None,
        }
    }

    /// Number of remote jobs a request for this style fans out into.
    pub fn job_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::FullTransform(style) => style.members.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: String,
    pub display_name: String,
    pub icon: Option<String>,
    /// What the user is asked to pick in this category ("master", "art movement").
    pub style_noun: String,
    pub price_per_transform_usd: f64,
    pub member_styles: Vec<SingleStyle>,
    pub full_transform: FullTransformStyle,
}

impl Category {
    pub fn member(&self, style_id: &str) -> Option<&SingleStyle> {
        self.member_styles.iter().find(|style| style.id == style_id)
    }

    pub fn full_transform_style(&self) -> Style {
        Style::FullTransform(self.full_transform.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{FullTransformStyle, SingleStyle, Style, StyleMetadata};

    fn single(id: &str) -> SingleStyle {
        SingleStyle {
            id: id.to_string(),
            category_id: "masters".to_string(),
            metadata: StyleMetadata {
                display_name: id.to_uppercase(),
                icon: None,
                period: None,
            },
        }
    }

    #[test]
    fn job_count_follows_variant() {
        let one = Style::Single(single("klimt-master"));
        assert_eq!(one.job_count(), 1);
        assert!(!one.is_full_transform());

        let all = Style::FullTransform(FullTransformStyle {
            id: "masters-all".to_string(),
            category_id: "masters".to_string(),
            display_name: "All".to_string(),
            description: None,
            members: vec![single("klimt-master"), single("munch-master")],
        });
        assert_eq!(all.job_count(), 2);
        assert!(all.is_full_transform());
        assert_eq!(all.id(), "masters-all");
        assert_eq!(all.category_id(), "masters");
    }
}
