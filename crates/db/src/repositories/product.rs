use async_trait::async_trait;
use sqlx::Row;

use phasequote_core::cpq::catalog::{CatalogError, ProductCatalog};
use phasequote_core::domain::product::{Product, ProductId};

use super::{get_optional_text, get_text, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query("SELECT id, sku, name, category, active FROM product WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_product(r)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, product: &Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (id, sku, name, category, active)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 sku = excluded.sku,
                 name = excluded.name,
                 category = excluded.category,
                 active = excluded.active",
        )
        .bind(&product.id.0)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.category.as_deref())
        .bind(product.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let active: bool = row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    Ok(Product {
        id: ProductId(get_text(row, "id")?),
        sku: get_text(row, "sku")?,
        name: get_text(row, "name")?,
        category: get_optional_text(row, "category")?,
        active,
    })
}

/// Escapes `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'`.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for ch in query.trim().to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl ProductCatalog for SqlProductRepository {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>, CatalogError> {
        let pattern = like_pattern(query);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, sku, name, category, active
             FROM product
             WHERE active = 1
               AND (LOWER(name) LIKE ?1 ESCAPE '\\'
                    OR LOWER(sku) LIKE ?1 ESCAPE '\\'
                    OR LOWER(COALESCE(category, '')) LIKE ?1 ESCAPE '\\')
             ORDER BY name ASC
             LIMIT ?2",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        rows.iter()
            .map(row_to_product)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CatalogError::Decode(e.to_string()))
    }
}
