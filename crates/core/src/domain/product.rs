use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub active: bool,
}

impl Product {
    pub fn to_ref(&self) -> ProductRef {
        ProductRef { id: self.id.clone(), name: self.name.clone(), sku: Some(self.sku.clone()) }
    }
}

/// Product snapshot carried by a quotation item.
///
/// Name and SKU are copied at insertion time so a quotation keeps rendering
/// even when the catalog entry is later renamed or retired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
}

impl ProductRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: ProductId(id.into()), name: name.into(), sku: None }
    }

    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id.0
        } else {
            &self.name
        }
    }
}
